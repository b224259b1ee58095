use std::fmt;

/// Lifecycle state of a stream session, as published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Stopped,
    Playing,
    Paused,
    /// The reader hit a transport or protocol failure. Stays put until the
    /// next `Start` (retry) or `Stop`.
    Error,
}

impl StreamState {
    /// `true` while a reader task is attached to the session.
    pub fn is_active(self) -> bool {
        matches!(self, StreamState::Playing | StreamState::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamState::Stopped => "Stopped",
            StreamState::Playing => "Playing",
            StreamState::Paused => "Paused",
            StreamState::Error => "Error",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-issued control command. Commands are applied in the order the
/// session receives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    Start,
    Stop,
    Pause,
    Resume,
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlCommand::Start => "start",
            ControlCommand::Stop => "stop",
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(StreamState::Playing.to_string(), "Playing");
        assert_eq!(StreamState::Stopped.to_string(), "Stopped");
        assert_eq!(StreamState::Error.to_string(), "Error");
        assert_eq!(StreamState::Paused.to_string(), "Paused");
    }

    #[test]
    fn only_playing_and_paused_are_active() {
        assert!(StreamState::Playing.is_active());
        assert!(StreamState::Paused.is_active());
        assert!(!StreamState::Stopped.is_active());
        assert!(!StreamState::Error.is_active());
    }
}
