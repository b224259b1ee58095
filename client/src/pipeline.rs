use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::Stream;
use mjpeg_tap_common::frame::Frame;
use tokio::sync::Notify;

/// Single-slot, latest-wins hand-off from the reader to the consumer.
///
/// The producer never waits: a new frame replaces an undelivered one, and
/// while the gate is closed (session paused) frames are discarded outright.
struct Shared {
    slot: Mutex<Slot>,
    notify: Notify,
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    paused: bool,
    closed: bool,
    superseded: u64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        // The slot holds no invariant a panicking holder could break.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// What happened to an offered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// The slot was empty.
    Stored,
    /// An undelivered frame was dropped in favour of this one.
    Superseded,
    /// Delivery is paused; the frame was dropped.
    Gated,
}

impl Offer {
    pub(crate) fn delivered(self) -> bool {
        matches!(self, Offer::Stored | Offer::Superseded)
    }
}

/// Creates a pipeline. The sink goes to the reader task, the gate to the
/// supervisor, and the source to the caller.
pub(crate) fn channel() -> (FrameSink, FrameSource, PauseGate) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::default()),
        notify: Notify::new(),
    });
    (
        FrameSink {
            shared: Arc::clone(&shared),
        },
        FrameSource {
            shared: Arc::clone(&shared),
        },
        PauseGate { shared },
    )
}

/// Producer end. Dropping it closes the pipeline.
pub(crate) struct FrameSink {
    shared: Arc<Shared>,
}

impl FrameSink {
    pub(crate) fn offer(&self, frame: Frame) -> Offer {
        let outcome = {
            let mut slot = self.shared.lock();
            if slot.paused {
                Offer::Gated
            } else if slot.frame.replace(frame).is_some() {
                slot.superseded += 1;
                Offer::Superseded
            } else {
                Offer::Stored
            }
        };
        if outcome.delivered() {
            self.shared.notify.notify_one();
        }
        outcome
    }

    /// Cheap check so a paused reader can skip decoding altogether.
    pub(crate) fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    pub(crate) fn superseded(&self) -> u64 {
        self.shared.lock().superseded
    }
}

impl Drop for FrameSink {
    fn drop(&mut self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_waiters();
    }
}

/// Supervisor-side switch for pause intent.
pub(crate) struct PauseGate {
    shared: Arc<Shared>,
}

impl PauseGate {
    /// Closing the gate also discards any undelivered frame, so nothing
    /// decoded before the pause is handed out after it.
    pub(crate) fn set_paused(&self, paused: bool) {
        let mut slot = self.shared.lock();
        slot.paused = paused;
        if paused {
            slot.frame = None;
        }
    }
}

/// Consumer end: a finite sequence of frames that ends when the reader task
/// exits. Clones share the same slot, so each frame is delivered once.
#[derive(Clone)]
pub struct FrameSource {
    shared: Arc<Shared>,
}

impl FrameSource {
    /// Waits for the next frame. Returns `None` once the pipeline is closed
    /// and the last frame has been taken.
    pub async fn next_frame(&self) -> Option<Frame> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut slot = self.shared.lock();
                if let Some(frame) = slot.frame.take() {
                    return Some(frame);
                }
                if slot.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Takes the pending frame, if any, without waiting.
    pub fn try_next(&self) -> Option<Frame> {
        self.shared.lock().frame.take()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send + 'static {
        futures_util::stream::unfold(self, |source| async move {
            let frame = source.next_frame().await?;
            Some((frame, source))
        })
    }
}
