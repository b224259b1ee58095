use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mjpeg_tap_common::config::StreamConfig;
use mjpeg_tap_common::state::{ControlCommand, StreamState};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, info_span, Dispatch, Instrument, Span};

use crate::decoder::{FrameDecoder, JpegDecoder, RasterDecoder};
use crate::error::SessionError;
use crate::pipeline::{self, FrameSource, PauseGate};
use crate::reader::{self, ReaderContext, ReaderOutcome};
use crate::status::{StatusPublisher, StatusUpdates};
use crate::transport::{HttpTransport, Transport};
use crate::watchdog::Watchdog;

/// Everything the supervisor acts on, in arrival order. Callers, the reader
/// task and the watchdog all feed the same queue; only the supervisor
/// consumes it.
pub(crate) enum Request {
    Control {
        command: ControlCommand,
        reply: Option<oneshot::Sender<Reply>>,
    },
    ResetTimer {
        secs: i64,
    },
    /// First frame of a reader cycle reached the pipeline.
    FrameDelivered {
        generation: u64,
    },
    ReaderExited {
        generation: u64,
    },
    AutoStop {
        id: u64,
    },
}

pub(crate) struct Reply {
    state: StreamState,
    /// Set for `Start` only.
    frames: Option<FrameSource>,
}

/// A controllable MJPEG stream.
///
/// The session starts out `Stopped`. Commands are applied in the order they
/// are issued; the current state is published through
/// [`status_updates`](Session::status_updates). Dropping the session stops
/// any running reader.
///
/// ```no_run
/// # async fn demo() -> Result<(), mjpeg_tap_client::SessionError> {
/// use mjpeg_tap_client::{Session, StreamConfig};
///
/// let session = Session::new(StreamConfig::new("http://camera.local/stream").with_auto_stop(30))?;
/// let frames = session.start().await?;
/// while let Some(frame) = frames.next_frame().await {
///     println!("{}x{}", frame.width(), frame.height());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Session {
    intake: mpsc::UnboundedSender<Request>,
    status: StatusUpdates,
    shutdown: CancellationToken,
}

impl Session {
    /// Creates a session reading over HTTP and decoding JPEG. Must be called
    /// from within a tokio runtime.
    pub fn new(config: StreamConfig) -> Result<Self, SessionError> {
        let transport = HttpTransport::new()?;
        Self::with_collaborators(config, Arc::new(transport), Arc::new(JpegDecoder))
    }

    pub fn with_collaborators(
        config: StreamConfig,
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn RasterDecoder>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        let (intake, requests) = mpsc::unbounded_channel();
        let (publisher, status) = StatusPublisher::new(StreamState::Stopped);
        let shutdown = CancellationToken::new();
        let span = info_span!("mjpeg_session", url = %config.url);
        let logging = config.enable_log;

        let supervisor = Supervisor {
            auto_stop: config.auto_stop(),
            config,
            transport,
            decoder: FrameDecoder::new(decoder),
            publisher,
            intake: intake.clone(),
            lifecycle: Lifecycle::Idle,
            watchdog: Watchdog::default(),
            generation: 0,
        };

        spawn_traced(logging, span, supervisor.run(requests, shutdown.clone()));

        Ok(Self {
            intake,
            status,
            shutdown,
        })
    }

    /// Starts streaming and returns the frame source. Does not wait for the
    /// connection; failures surface as an `Error` state and a closed source.
    ///
    /// Starting a session that is already running returns a handle on the
    /// existing pipeline instead of opening a second stream.
    pub async fn start(&self) -> Result<FrameSource, SessionError> {
        let reply = self.request(ControlCommand::Start).await?;
        reply.frames.ok_or(SessionError::Closed)
    }

    /// Stops streaming. Returns once the reader task has exited and the
    /// transport has been released.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(ControlCommand::Stop).await.map(|_| ())
    }

    /// Suspends frame delivery. The part being read when the pause lands is
    /// finished and then discarded.
    pub fn pause(&self) -> Result<(), SessionError> {
        self.send(Request::Control {
            command: ControlCommand::Pause,
            reply: None,
        })
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        self.send(Request::Control {
            command: ControlCommand::Resume,
            reply: None,
        })
    }

    /// Cancels any pending auto-stop and re-arms it for `secs` seconds from
    /// now. A non-positive value re-arms with the previously configured
    /// duration.
    pub fn reset_timer(&self, secs: i64) -> Result<(), SessionError> {
        self.send(Request::ResetTimer { secs })
    }

    /// Applies a command and waits for the supervisor to acknowledge it,
    /// returning the state it left the session in.
    pub async fn command(&self, command: ControlCommand) -> Result<StreamState, SessionError> {
        Ok(self.request(command).await?.state)
    }

    /// Latest published state.
    pub fn state(&self) -> StreamState {
        self.status.current()
    }

    pub fn status_updates(&self) -> StatusUpdates {
        self.status.clone()
    }

    async fn request(&self, command: ControlCommand) -> Result<Reply, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Control {
            command,
            reply: Some(tx),
        })?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    fn send(&self, request: Request) -> Result<(), SessionError> {
        self.intake.send(request).map_err(|_| SessionError::Closed)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

enum Lifecycle {
    Idle,
    Streaming(ActiveReader),
    /// The last reader failed. Nothing is running.
    Faulted,
}

impl Lifecycle {
    fn state(&self) -> StreamState {
        match self {
            Lifecycle::Idle => StreamState::Stopped,
            Lifecycle::Streaming(active) if active.paused => StreamState::Paused,
            Lifecycle::Streaming(_) => StreamState::Playing,
            Lifecycle::Faulted => StreamState::Error,
        }
    }
}

struct ActiveReader {
    generation: u64,
    paused: bool,
    frame_seen: bool,
    cancel: CancellationToken,
    task: JoinHandle<ReaderOutcome>,
    frames: FrameSource,
    gate: PauseGate,
}

/// Owns the session lifecycle. The only writer of the published state.
struct Supervisor {
    config: StreamConfig,
    /// Effective auto-stop duration; `reset_timer` may replace it.
    auto_stop: Option<Duration>,
    transport: Arc<dyn Transport>,
    decoder: FrameDecoder,
    publisher: StatusPublisher,
    intake: mpsc::UnboundedSender<Request>,
    lifecycle: Lifecycle,
    watchdog: Watchdog,
    generation: u64,
}

impl Supervisor {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>, shutdown: CancellationToken) {
        debug!("session supervisor started");
        loop {
            let request = tokio::select! {
                _ = shutdown.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            self.handle(request).await;
        }
        self.stop().await;
        debug!("session supervisor exited");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Control { command, reply } => {
                let frames = self.apply(command).await;
                if let Some(reply) = reply {
                    let _ = reply.send(Reply {
                        state: self.lifecycle.state(),
                        frames,
                    });
                }
            }
            Request::ResetTimer { secs } => self.reset_timer(secs),
            Request::FrameDelivered { generation } => self.on_first_frame(generation),
            Request::ReaderExited { generation } => self.on_reader_exit(generation).await,
            Request::AutoStop { id } => {
                if let Some(after) = self.watchdog.claim(id) {
                    info!(secs = after.as_secs(), "auto-stop timer expired, stopping stream");
                    self.apply(ControlCommand::Stop).await;
                }
            }
        }
    }

    async fn apply(&mut self, command: ControlCommand) -> Option<FrameSource> {
        debug!(%command, state = %self.lifecycle.state(), "applying command");
        match command {
            ControlCommand::Start => return Some(self.start()),
            ControlCommand::Stop => self.stop().await,
            ControlCommand::Pause => self.set_paused(true),
            ControlCommand::Resume => self.set_paused(false),
        }
        None
    }

    fn start(&mut self) -> FrameSource {
        if let Lifecycle::Streaming(active) = &self.lifecycle {
            debug!(generation = active.generation, "start ignored, reader already running");
            return active.frames.clone();
        }

        self.generation += 1;
        let generation = self.generation;
        let (sink, frames, gate) = pipeline::channel();
        let cancel = CancellationToken::new();

        let ctx = ReaderContext {
            generation,
            url: self.config.url.clone(),
            max_frame_bytes: self.config.max_frame_bytes,
            transport: Arc::clone(&self.transport),
            decoder: self.decoder.clone(),
            sink,
            cancel: cancel.clone(),
            events: self.intake.clone(),
        };
        let task = spawn_traced(
            self.config.enable_log,
            info_span!("reader", generation),
            reader::run(ctx),
        );

        info!(generation, "stream started");
        self.lifecycle = Lifecycle::Streaming(ActiveReader {
            generation,
            paused: false,
            frame_seen: false,
            cancel,
            task,
            frames: frames.clone(),
            gate,
        });
        self.publish();
        frames
    }

    /// Idempotent: stopping a stopped session does nothing.
    async fn stop(&mut self) {
        self.watchdog.cancel();
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Idle) {
            Lifecycle::Idle => {
                debug!("stop ignored, already stopped");
                return;
            }
            Lifecycle::Faulted => info!("clearing error state"),
            Lifecycle::Streaming(active) => {
                active.cancel.cancel();
                let outcome = join_reader(active.task).await;
                info!(generation = active.generation, ?outcome, "stream stopped");
            }
        }
        self.publish();
    }

    fn set_paused(&mut self, paused: bool) {
        let state = self.lifecycle.state();
        match &mut self.lifecycle {
            Lifecycle::Streaming(active) if active.paused != paused => {
                active.paused = paused;
                active.gate.set_paused(paused);
                if paused {
                    info!(generation = active.generation, "frame delivery paused");
                } else {
                    info!(generation = active.generation, "frame delivery resumed");
                }
            }
            _ => {
                debug!(paused, %state, "pause/resume ignored");
                return;
            }
        }
        self.publish();
    }

    fn reset_timer(&mut self, secs: i64) {
        if secs > 0 {
            self.auto_stop = Some(Duration::from_secs(secs as u64));
        }
        self.watchdog.cancel();
        match self.auto_stop {
            Some(after) if self.lifecycle.state().is_active() => {
                info!(secs = after.as_secs(), "resetting auto-stop timer");
                self.arm_watchdog(after);
            }
            Some(after) => {
                debug!(secs = after.as_secs(), "auto-stop duration updated, armed on first frame")
            }
            None => debug!("auto-stop timer disabled"),
        }
    }

    fn on_first_frame(&mut self, generation: u64) {
        let Lifecycle::Streaming(active) = &mut self.lifecycle else {
            return;
        };
        if active.generation != generation || active.frame_seen {
            return;
        }
        active.frame_seen = true;

        if self.watchdog.is_armed() {
            debug!("first frame received, auto-stop timer already running");
            return;
        }
        match self.auto_stop {
            Some(after) => {
                info!(secs = after.as_secs(), "first frame received, starting auto-stop timer");
                self.arm_watchdog(after);
            }
            None => debug!("first frame received"),
        }
    }

    async fn on_reader_exit(&mut self, generation: u64) {
        let active = match std::mem::replace(&mut self.lifecycle, Lifecycle::Idle) {
            Lifecycle::Streaming(active) if active.generation == generation => active,
            other => {
                // Already torn down by an explicit stop.
                self.lifecycle = other;
                debug!(generation, "ignoring exit report of a stopped reader");
                return;
            }
        };

        self.watchdog.cancel();
        match join_reader(active.task).await {
            ReaderOutcome::Ended | ReaderOutcome::Cancelled => {
                info!(generation, "stream finished");
            }
            ReaderOutcome::Failed(e) => {
                error!(error = %e, generation, "stream failed");
                self.lifecycle = Lifecycle::Faulted;
            }
            ReaderOutcome::Crashed(reason) => {
                error!(reason = %reason, generation, "reader task crashed");
                self.lifecycle = Lifecycle::Faulted;
            }
        }
        self.publish();
    }

    fn arm_watchdog(&mut self, after: Duration) {
        let intake = self.intake.clone();
        self.watchdog.arm(after, move |id| {
            let _ = intake.send(Request::AutoStop { id });
        });
    }

    fn publish(&self) {
        self.publisher.publish(self.lifecycle.state());
    }
}

async fn join_reader(task: JoinHandle<ReaderOutcome>) -> ReaderOutcome {
    task.await
        .unwrap_or_else(|e| ReaderOutcome::Crashed(e.to_string()))
}

/// Spawns a session task. With logging disabled the task runs under a no-op
/// dispatcher so none of its events reach the global subscriber.
fn spawn_traced<F>(logging: bool, span: Span, task: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    if logging {
        tokio::spawn(task.instrument(span))
    } else {
        tokio::spawn(task.with_subscriber(Dispatch::none()))
    }
}
