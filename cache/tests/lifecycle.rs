mod common;

use common::{build_section, wait_until, Tracked};
use fibre_section::{ComputeResult, EntryKey, GenerationMode};

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc, Barrier,
};
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(30);

fn tracked(section: &fibre_section::CacheSection<String, Tracked>, key: &str, timeout: Duration, destroyed: &Arc<AtomicUsize>) {
  let destroyed = destroyed.clone();
  section
    .get_or_generate(key.to_string(), timeout, GenerationMode::Blocking, move |_| {
      ComputeResult::Ok(Tracked::new(1, &destroyed))
    })
    .unwrap();
}

#[test]
fn test_idle_entries_are_swept_and_destroyed() {
  let section = build_section::<Tracked>("idle");
  let destroyed = Arc::new(AtomicUsize::new(0));

  tracked(&section, "short", Duration::from_millis(50), &destroyed);
  tracked(&section, "long", TIMEOUT, &destroyed);
  assert_eq!(section.sweep(), 0, "Nothing is idle yet");

  thread::sleep(Duration::from_millis(100));
  assert_eq!(section.sweep(), 1);
  assert_eq!(destroyed.load(Ordering::SeqCst), 1);
  assert!(!section.contains("short"));
  assert!(section.contains("long"));
  assert_eq!(section.metrics().evicted_by_idle, 1);
}

#[test]
fn test_access_keeps_entry_alive() {
  let section = build_section::<Tracked>("touch");
  let destroyed = Arc::new(AtomicUsize::new(0));
  let timeout = Duration::from_millis(150);

  tracked(&section, "busy", timeout, &destroyed);
  for _ in 0..6 {
    thread::sleep(Duration::from_millis(50));
    assert!(section.get_without_generating("busy", Some(timeout)).is_some());
    assert_eq!(section.sweep(), 0);
  }
  assert_eq!(destroyed.load(Ordering::SeqCst), 0);
}

#[test]
fn test_touch_never_shortens_deadline() {
  let section = build_section::<Tracked>("no-shorten");
  let destroyed = Arc::new(AtomicUsize::new(0));

  tracked(&section, "k", TIMEOUT, &destroyed);
  tracked(&section, "k", Duration::from_millis(1), &destroyed);
  thread::sleep(Duration::from_millis(20));

  assert_eq!(section.sweep(), 0);
  assert!(section.contains("k"));
}

#[test]
fn test_sweep_evicts_expired_entry_while_generating() {
  let section = build_section::<Tracked>("sweep-generating");
  let destroyed = Arc::new(AtomicUsize::new(0));

  let payload_destroyed = destroyed.clone();
  section
    .get_or_generate("slow".to_string(), Duration::from_millis(1), GenerationMode::Background, move |_| {
      thread::sleep(Duration::from_millis(200));
      ComputeResult::Ok(Tracked::new(1, &payload_destroyed))
    })
    .unwrap();
  thread::sleep(Duration::from_millis(30));

  assert_eq!(section.sweep(), 1, "An expired entry is evicted even mid-generation");
  assert!(!section.contains("slow"));
  assert_eq!(destroyed.load(Ordering::SeqCst), 0);

  // The payload arrives after its entry died and is destroyed on arrival.
  assert!(wait_until(Duration::from_secs(5), || destroyed.load(Ordering::SeqCst) == 1));
  assert!(section.get_without_generating("slow", None).is_none());
  assert!(section.is_empty());
  assert_eq!(section.metrics().evicted_by_idle, 1);
}

#[test]
fn test_destroy_is_idempotent_across_operations() {
  let section = build_section::<Tracked>("idempotent");
  let destroyed = Arc::new(AtomicUsize::new(0));

  tracked(&section, "k", TIMEOUT, &destroyed);
  let removed = section.remove("k").expect("payload handed back");
  assert_eq!(removed.value, 1);
  assert!(section.remove("k").is_none());
  assert_eq!(section.clear(), 0);
  assert_eq!(section.sweep(), 0);

  drop(removed);
  assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_removal_destroys_once() {
  let section = build_section::<Tracked>("racing-removal");
  let destroyed = Arc::new(AtomicUsize::new(0));
  tracked(&section, "k", TIMEOUT, &destroyed);

  let num_threads = 8;
  let barrier = Arc::new(Barrier::new(num_threads));
  let handles: Vec<_> = (0..num_threads)
    .map(|i| {
      let section = section.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        if i % 2 == 0 {
          section.remove("k").is_some() as usize
        } else {
          section.clear()
        }
      })
    })
    .collect();

  let removed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
  assert_eq!(removed, 1);
  assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_override_replaces_and_destroys_previous() {
  let section = build_section::<Tracked>("override");
  let destroyed = Arc::new(AtomicUsize::new(0));
  let replacement_destroyed = Arc::new(AtomicUsize::new(0));

  tracked(&section, "k", TIMEOUT, &destroyed);
  section.override_entry("k".to_string(), Tracked::new(2, &replacement_destroyed), TIMEOUT);

  assert_eq!(destroyed.load(Ordering::SeqCst), 1);
  let current = section.get_without_generating("k", None).unwrap();
  assert_eq!(current.value, 2);

  // An overridden entry never runs a generator.
  let value = section
    .get_or_generate("k".to_string(), TIMEOUT, GenerationMode::Blocking, |_| {
      panic!("generator must not run for an overridden entry")
    })
    .unwrap()
    .unwrap();
  assert_eq!(value.value, 2);
  assert_eq!(section.metrics().overrides, 1);
}

#[test]
fn test_destroy_during_generation_discards_late_payload() {
  let section = build_section::<Tracked>("late-payload");
  let late_destroyed = Arc::new(AtomicUsize::new(0));
  let fresh_destroyed = Arc::new(AtomicUsize::new(0));
  let runs = Arc::new(AtomicUsize::new(0));

  let payload_destroyed = late_destroyed.clone();
  let first_runs = runs.clone();
  section
    .get_or_generate("k".to_string(), TIMEOUT, GenerationMode::Background, move |_| {
      first_runs.fetch_add(1, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(100));
      ComputeResult::Ok(Tracked::new(1, &payload_destroyed))
    })
    .unwrap();
  assert!(section.contains("k"));
  section.remove("k");

  // A lookup after the removal generates afresh instead of joining the old run.
  let payload_destroyed = fresh_destroyed.clone();
  let second_runs = runs.clone();
  let fresh = section
    .get_or_generate("k".to_string(), TIMEOUT, GenerationMode::Blocking, move |_| {
      second_runs.fetch_add(1, Ordering::SeqCst);
      ComputeResult::Ok(Tracked::new(2, &payload_destroyed))
    })
    .unwrap()
    .expect("fresh generation publishes");
  assert_eq!(fresh.value, 2);
  assert_eq!(runs.load(Ordering::SeqCst), 2);

  assert!(wait_until(Duration::from_secs(5), || late_destroyed.load(Ordering::SeqCst) == 1));
  let visible = section.get_without_generating("k", None).expect("fresh payload stays cached");
  assert_eq!(visible.value, 2);
  assert_eq!(fresh_destroyed.load(Ordering::SeqCst), 0);
  assert_eq!(runs.load(Ordering::SeqCst), 2);
  assert_eq!(section.metrics().destroyed_payloads, 1);
}

#[test]
fn test_blocked_waiter_released_when_entry_destroyed() {
  let section = build_section::<u32>("released-waiter");
  let started = Arc::new(Barrier::new(2));

  let generating = started.clone();
  section
    .get_or_generate("k".to_string(), TIMEOUT, GenerationMode::Background, move |_| {
      generating.wait();
      thread::sleep(Duration::from_millis(200));
      ComputeResult::Ok(1)
    })
    .unwrap();
  started.wait();

  let waiter = {
    let section = section.clone();
    thread::spawn(move || {
      section
        .get_or_generate("k".to_string(), TIMEOUT, GenerationMode::Blocking, |_| ComputeResult::Ok(2))
        .unwrap()
    })
  };
  assert!(wait_until(Duration::from_secs(5), || section.metrics().long_waits == 1));
  section.remove("k");

  assert!(waiter.join().unwrap().is_none());
}

#[test]
fn test_dual_keys_are_isolated() {
  let section = build_section::<u32>("dual");

  section
    .get_or_generate("a".to_string(), TIMEOUT, GenerationMode::Blocking, |_| ComputeResult::Ok(1))
    .unwrap();
  let dual = section
    .get_or_generate_dual("a".to_string(), "a".to_string(), TIMEOUT, GenerationMode::Blocking, |k0, k1| {
      assert_eq!(k0, k1);
      ComputeResult::Ok(2)
    })
    .unwrap();
  assert_eq!(dual.as_deref(), Some(&2));

  let swapped = section
    .get_or_generate_dual("b".to_string(), "a".to_string(), TIMEOUT, GenerationMode::Blocking, |_, _| {
      ComputeResult::Ok(3)
    })
    .unwrap();
  assert_eq!(swapped.as_deref(), Some(&3));
  assert!(section
    .get_without_generating_dual(&"a".to_string(), &"b".to_string(), None)
    .is_none());

  assert_eq!(section.len(), 3);
  assert_eq!(section.remove("a").as_deref(), Some(&1));
  let a = "a".to_string();
  assert_eq!(section.get_without_generating_dual(&a, &a, None).as_deref(), Some(&2));

  section.override_dual(a.clone(), a.clone(), 4, TIMEOUT);
  assert_eq!(section.remove_dual(&a, &a).as_deref(), Some(&4));
  assert_eq!(section.len(), 1);
}

#[test]
fn test_remove_if_sees_both_namespaces() {
  let section = build_section::<u32>("remove-if");

  for (i, key) in ["x", "y", "z"].iter().enumerate() {
    section.override_entry(key.to_string(), i as u32, TIMEOUT);
  }
  section.override_dual("x".to_string(), "y".to_string(), 10, TIMEOUT);

  let removed = section.remove_if(|key, view| match key {
    EntryKey::Single(key) => key == "x",
    EntryKey::Dual(..) => view.payload().is_some_and(|value| *value >= 10),
  });

  assert_eq!(removed, 2);
  assert_eq!(section.len(), 2);
  assert!(!section.contains("x"));
  assert_eq!(section.metrics().invalidations, 2);
}

#[test]
fn test_dropping_section_destroys_remaining_payloads() {
  let destroyed = Arc::new(AtomicUsize::new(0));
  {
    let section = build_section::<Tracked>("drop");
    for key in ["a", "b", "c"] {
      tracked(&section, key, TIMEOUT, &destroyed);
    }
    let clone = section.clone();
    drop(section);
    assert_eq!(destroyed.load(Ordering::SeqCst), 0, "A live clone keeps the entries");
    assert_eq!(clone.len(), 3);
  }
  assert_eq!(destroyed.load(Ordering::SeqCst), 3);
}
