use fibre_section::{CacheRegistry, CacheSection, CachedValue, ComputeResult, GenerationMode};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Dimensions {
  width: u32,
  height: u32,
}

impl CachedValue for Dimensions {}

fn image_path(key: &String) -> Option<&str> {
  Some(key.as_str())
}

fn main() {
  let registry = CacheRegistry::new();
  let section: CacheSection<String, Dimensions> = CacheSection::builder()
    .name("image-dimensions")
    .registry(&registry)
    .key_path(image_path)
    .build()
    .expect("Failed to build section");

  println!("--- Coalesced Generation Demonstration ---");
  let start = Instant::now();
  let handles: Vec<_> = (0..2)
    .map(|caller| {
      let section = section.clone();
      thread::spawn(move || {
        let dimensions = section
          .get_or_generate(
            "/assets/img.png".to_string(),
            Duration::from_secs(2),
            GenerationMode::Blocking,
            move |path| {
              println!("[Caller {}] Decoding {} (simulating 50ms of work)...", caller, path);
              thread::sleep(Duration::from_millis(50));
              ComputeResult::Ok(Dimensions { width: 10, height: 10 })
            },
          )
          .expect("generator failed");
        println!("[Caller {}] Got {:?}", caller, dimensions);
        dimensions
      })
    })
    .collect();

  let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
  println!("Both callers finished in {:?}.", start.elapsed());
  if let (Some(first), Some(second)) = (&results[0], &results[1]) {
    println!("Shared the same payload: {}", Arc::ptr_eq(first, second));
  }

  println!("\n--- Idle Eviction Demonstration ---");
  let sweeper = registry.spawn_sweeper(Duration::from_millis(500));
  println!("Waiting 3 seconds without touching the entry...");
  thread::sleep(Duration::from_secs(3));
  println!("Entries left after sweeping: {}", section.len());
  sweeper.stop();

  println!("\n--- Final Metrics ---");
  println!("{:#?}", section.metrics());
}
