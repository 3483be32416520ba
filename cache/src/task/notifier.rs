use crate::entry::Callback;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use fibre::mpsc;
use once_cell::sync::OnceCell;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// The background thread that runs completion callbacks of async lookups.
///
/// Callbacks never run on the thread that resolved the entry, so a slow
/// callback cannot stall a generator or a sweep. All callbacks of a section
/// share this one thread and run in the order they were delivered.
///
/// The thread is spawned on the first delivery. The channel is unbounded so
/// that resolving an entry never blocks on delivery. The loop ends when the
/// `Notifier`, and with it the only sender, is dropped.
pub(crate) struct Notifier {
  section: Arc<str>,
  sender: OnceCell<Option<mpsc::UnboundedSender<Job>>>,
}

impl Notifier {
  pub(crate) fn new(section: Arc<str>) -> Self {
    Self {
      section,
      sender: OnceCell::new(),
    }
  }

  /// Queues every callback to be invoked with `payload`.
  pub(crate) fn deliver<V>(&self, callbacks: Vec<Callback<V>>, payload: Option<Arc<V>>)
  where
    V: Send + Sync + 'static,
  {
    if callbacks.is_empty() {
      return;
    }

    let sender = self.sender.get_or_init(|| self.spawn_thread());
    for callback in callbacks {
      let payload = payload.clone();
      let job: Job = Box::new(move || callback(payload));
      match sender {
        Some(sender) => {
          if let Err(error) = sender.send(job) {
            tracing::error!(section = %self.section, ?error, "callback notifier channel closed");
          }
        }
        // No delivery thread could be started; run inline.
        None => run_job(&self.section, job),
      }
    }
  }

  fn spawn_thread(&self) -> Option<mpsc::UnboundedSender<Job>> {
    let (tx, rx) = mpsc::unbounded::<Job>();
    let section = self.section.clone();
    let spawned = thread::Builder::new()
      .name(format!("section-notify-{}", self.section))
      .spawn(move || {
        // Ends once the sender is dropped and the channel drained.
        while let Ok(job) = rx.recv() {
          run_job(&section, job);
        }
      });

    match spawned {
      Ok(_) => Some(tx),
      Err(error) => {
        tracing::error!(section = %self.section, %error, "failed to spawn callback notifier thread");
        None
      }
    }
  }
}

fn run_job(section: &str, job: Job) {
  if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
    tracing::error!(section, "completion callback panicked");
  }
}
