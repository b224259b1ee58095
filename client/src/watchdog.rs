use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One-shot auto-stop timer with cancel-and-replace semantics.
///
/// Owned by the supervisor, so arming and cancelling never race. Each arm
/// gets a fresh id; the fire callback receives it and the supervisor must
/// [`claim`](Watchdog::claim) it, which rejects firings from timers that
/// were replaced or cancelled after their message was already queued.
#[derive(Default)]
pub(crate) struct Watchdog {
    next_id: u64,
    live: Option<Armed>,
}

struct Armed {
    id: u64,
    after: Duration,
    task: JoinHandle<()>,
}

impl Watchdog {
    pub(crate) fn arm<F>(&mut self, after: Duration, on_fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.next_id += 1;
        let id = self.next_id;
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            on_fire(id);
        });
        info!(id, secs = after.as_secs(), "auto-stop timer armed");
        self.live = Some(Armed { id, after, task });
        id
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(armed) = self.live.take() {
            armed.task.abort();
            debug!(id = armed.id, "auto-stop timer cancelled");
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.live.is_some()
    }

    /// Accepts a firing if `id` is the live timer, disarming it.
    pub(crate) fn claim(&mut self, id: u64) -> Option<Duration> {
        if self.live.as_ref().is_some_and(|armed| armed.id == id) {
            return self.live.take().map(|armed| armed.after);
        }
        debug!(id, "ignoring stale auto-stop timer");
        None
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}
