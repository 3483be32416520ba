mod common;

use common::{build_section, wait_until, Tracked};
use fibre_section::{CacheSection, ComputeResult, GenerationMode, SectionError, Task, TaskSpawner};

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  mpsc, Arc,
};
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(30);

#[test]
fn test_background_mode_does_not_block() {
  let section = build_section::<u32>("background");

  let value = section
    .get_or_generate("slow".to_string(), TIMEOUT, GenerationMode::Background, |_| {
      thread::sleep(Duration::from_millis(100));
      ComputeResult::Ok(11)
    })
    .unwrap();
  assert!(value.is_none(), "Non-blocking callers get what is available now");

  assert!(wait_until(Duration::from_secs(5), || {
    section.get_without_generating("slow", None).is_some()
  }));
  assert_eq!(section.get_without_generating("slow", None).as_deref(), Some(&11));
}

#[test]
fn test_background_generator_runs_on_named_thread() {
  let section = build_section::<String>("named");
  let (tx, rx) = mpsc::channel();

  section
    .get_or_generate_async(
      "who".to_string(),
      TIMEOUT,
      GenerationMode::Background,
      |_| ComputeResult::Ok(thread::current().name().unwrap_or_default().to_string()),
      move |value| tx.send(value).unwrap(),
    )
    .unwrap();

  let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
  assert_eq!(name.as_str(), "section-gen-named");
}

#[test]
fn test_background_fault_is_not_returned() {
  let section = build_section::<u32>("background-fault");

  let value = section
    .get_or_generate("bad".to_string(), TIMEOUT, GenerationMode::Background, |_| {
      ComputeResult::fail("no such table")
    })
    .unwrap();
  assert!(value.is_none());

  assert!(wait_until(Duration::from_secs(5), || section.metrics().faults == 1));
}

#[test]
fn test_queued_mode_requires_spawner() {
  let section = build_section::<u32>("no-spawner");
  let calls = Arc::new(AtomicUsize::new(0));

  let counter = calls.clone();
  let error = section
    .get_or_generate("k".to_string(), TIMEOUT, GenerationMode::Queued, move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
      ComputeResult::Ok(1)
    })
    .unwrap_err();

  assert!(matches!(error, SectionError::SpawnerRequired { .. }));
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  assert!(section.is_empty(), "No entry should be claimed without a spawner");
}

#[test]
fn test_queued_mode_uses_spawner() {
  let spawned = Arc::new(AtomicUsize::new(0));
  let counter = spawned.clone();
  let spawner: Arc<dyn TaskSpawner> = Arc::new(move |task: Task| {
    counter.fetch_add(1, Ordering::SeqCst);
    thread::spawn(task);
  });

  let section = CacheSection::<String, u32>::builder()
    .name("queued")
    .spawner(spawner)
    .build()
    .unwrap();

  let (tx, rx) = mpsc::channel();
  section
    .get_or_generate_async(
      "k".to_string(),
      TIMEOUT,
      GenerationMode::Queued,
      |_| ComputeResult::Ok(3),
      move |value| tx.send(value).unwrap(),
    )
    .unwrap();

  let value = rx.recv_timeout(Duration::from_secs(5)).unwrap();
  assert_eq!(value.as_deref(), Some(&3));
  assert_eq!(spawned.load(Ordering::SeqCst), 1);
}

#[test]
fn test_callback_runs_inline_when_resolved() {
  let section = build_section::<u32>("inline-callback");
  section.override_entry("ready".to_string(), 5, TIMEOUT);

  let caller = thread::current().id();
  let (tx, rx) = mpsc::channel();
  section
    .get_or_generate_async(
      "ready".to_string(),
      TIMEOUT,
      GenerationMode::Background,
      |_| ComputeResult::Ok(0),
      move |value| tx.send((thread::current().id(), value)).unwrap(),
    )
    .unwrap();

  // Delivered before the call returned.
  let (thread_id, value) = rx.try_recv().unwrap();
  assert_eq!(thread_id, caller);
  assert_eq!(value.as_deref(), Some(&5));
}

#[test]
fn test_callbacks_for_pending_entry_share_one_generation() {
  let section = build_section::<u32>("pending-callbacks");
  let calls = Arc::new(AtomicUsize::new(0));
  let (tx, rx) = mpsc::channel();

  for _ in 0..5 {
    let calls = calls.clone();
    let tx = tx.clone();
    section
      .get_or_generate_async(
        "shared".to_string(),
        TIMEOUT,
        GenerationMode::Background,
        move |_| {
          calls.fetch_add(1, Ordering::SeqCst);
          thread::sleep(Duration::from_millis(50));
          ComputeResult::Ok(8)
        },
        move |value| tx.send(value).unwrap(),
      )
      .unwrap();
  }

  for _ in 0..5 {
    let value = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(value.as_deref(), Some(&8));
  }
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_panicking_callback_does_not_stop_delivery() {
  let section = build_section::<u32>("callback-panic");
  let (tx, rx) = mpsc::channel();

  section
    .get_or_generate_async(
      "k".to_string(),
      TIMEOUT,
      GenerationMode::Background,
      |_| {
        thread::sleep(Duration::from_millis(50));
        ComputeResult::Ok(1)
      },
      |_| panic!("callback exploded"),
    )
    .unwrap();
  section
    .get_or_generate_async(
      "k".to_string(),
      TIMEOUT,
      GenerationMode::Background,
      |_| ComputeResult::Ok(2),
      move |value| tx.send(value).unwrap(),
    )
    .unwrap();

  let value = rx.recv_timeout(Duration::from_secs(5)).unwrap();
  assert_eq!(value.as_deref(), Some(&1));
}

#[test]
fn test_callback_receives_none_when_entry_destroyed() {
  let section = build_section::<Tracked>("destroyed-callback");
  let destroyed = Arc::new(AtomicUsize::new(0));
  let (tx, rx) = mpsc::channel();

  let payload_destroyed = destroyed.clone();
  section
    .get_or_generate_async(
      "doomed".to_string(),
      TIMEOUT,
      GenerationMode::Background,
      move |_| {
        thread::sleep(Duration::from_millis(100));
        ComputeResult::Ok(Tracked::new(1, &payload_destroyed))
      },
      move |value| tx.send(value.is_some()).unwrap(),
    )
    .unwrap();

  assert!(section.remove("doomed").is_none());
  assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());

  // The late payload is destroyed instead of published.
  assert!(wait_until(Duration::from_secs(5), || destroyed.load(Ordering::SeqCst) == 1));
  assert!(section.get_without_generating("doomed", None).is_none());
}

#[test]
fn test_pending_callbacks_run_in_order_on_notifier_thread() {
  let section = build_section::<u32>("ordered");
  let (tx, rx) = mpsc::channel();

  for index in 0..3 {
    let tx = tx.clone();
    section
      .get_or_generate_async(
        "k".to_string(),
        TIMEOUT,
        GenerationMode::Background,
        |_| {
          thread::sleep(Duration::from_millis(50));
          ComputeResult::Ok(1)
        },
        move |_| {
          // The first callback stalls the ones queued behind it.
          if index == 0 {
            thread::sleep(Duration::from_millis(50));
          }
          let name = thread::current().name().map(str::to_string);
          tx.send((index, name)).unwrap();
        },
      )
      .unwrap();
  }

  let delivered: Vec<_> = (0..3)
    .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
    .collect();
  let order: Vec<_> = delivered.iter().map(|(index, _)| *index).collect();
  assert_eq!(order, vec![0, 1, 2]);
  for (_, name) in delivered {
    assert_eq!(name.as_deref(), Some("section-notify-ordered"));
  }
}
