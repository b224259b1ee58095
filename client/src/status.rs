use futures_util::Stream;
use mjpeg_tap_common::state::StreamState;
use tokio::sync::watch;
use tracing::debug;

/// Latest-value broadcast of the session state. Publishing never waits on
/// observers; a slow observer skips intermediate states.
pub(crate) struct StatusPublisher {
    tx: watch::Sender<StreamState>,
}

impl StatusPublisher {
    pub(crate) fn new(initial: StreamState) -> (Self, StatusUpdates) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, StatusUpdates { rx })
    }

    pub(crate) fn publish(&self, state: StreamState) {
        let previous = self.tx.send_replace(state);
        debug!(from = %previous, to = %state, "state published");
    }
}

/// Observer handle for session state.
#[derive(Debug)]
pub struct StatusUpdates {
    rx: watch::Receiver<StreamState>,
}

impl Clone for StatusUpdates {
    /// A clone only reports changes made after it was created.
    fn clone(&self) -> Self {
        let mut rx = self.rx.clone();
        rx.borrow_and_update();
        Self { rx }
    }
}

impl StatusUpdates {
    /// The most recently published state.
    pub fn current(&self) -> StreamState {
        *self.rx.borrow()
    }

    /// Waits for a state newer than the last one seen and returns it.
    /// Returns `None` once the session has shut down.
    pub async fn next(&mut self) -> Option<StreamState> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Waits until the current state satisfies `pred`.
    pub async fn wait_for(
        &mut self,
        mut pred: impl FnMut(StreamState) -> bool,
    ) -> Option<StreamState> {
        let state = self.rx.wait_for(|state| pred(*state)).await.ok()?;
        Some(*state)
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamState> + Send + 'static {
        futures_util::stream::unfold(self, |mut updates| async move {
            let state = updates.next().await?;
            Some((state, updates))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn observers_see_latest_state() {
        let (publisher, mut updates) = StatusPublisher::new(StreamState::Stopped);
        assert_eq!(updates.current(), StreamState::Stopped);

        publisher.publish(StreamState::Playing);
        publisher.publish(StreamState::Paused);
        publisher.publish(StreamState::Playing);

        // Intermediate states are skipped, the current one is not.
        assert_eq!(updates.next().await, Some(StreamState::Playing));
    }

    #[tokio::test]
    async fn publishing_without_observers_does_not_block() {
        let (publisher, updates) = StatusPublisher::new(StreamState::Stopped);
        drop(updates);
        publisher.publish(StreamState::Playing);
        publisher.publish(StreamState::Error);
    }

    #[tokio::test]
    async fn clone_starts_from_current_state() {
        let (publisher, original) = StatusPublisher::new(StreamState::Stopped);
        publisher.publish(StreamState::Playing);

        let mut late = original.clone();
        assert_eq!(late.current(), StreamState::Playing);

        publisher.publish(StreamState::Stopped);
        assert_eq!(late.next().await, Some(StreamState::Stopped));
    }

    #[tokio::test]
    async fn ends_when_publisher_is_gone() {
        let (publisher, mut updates) = StatusPublisher::new(StreamState::Stopped);
        drop(publisher);
        assert_eq!(updates.next().await, None);
    }

    #[tokio::test]
    async fn wait_for_matches_current_value() {
        let (publisher, mut updates) = StatusPublisher::new(StreamState::Stopped);
        publisher.publish(StreamState::Error);
        assert_eq!(
            updates.wait_for(|s| s == StreamState::Error).await,
            Some(StreamState::Error)
        );
    }
}
