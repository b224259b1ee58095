use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::boundary::{Boundary, Part, PartScanner};
use crate::decoder::FrameDecoder;
use crate::error::{ConnectionError, StreamError};
use crate::pipeline::FrameSink;
use crate::session::Request;
use crate::transport::Transport;

/// Everything one reader cycle owns. Dropped as a whole when the cycle
/// ends, which closes the frame pipeline and releases the transport body.
pub(crate) struct ReaderContext {
    pub(crate) generation: u64,
    pub(crate) url: String,
    pub(crate) max_frame_bytes: usize,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) decoder: FrameDecoder,
    pub(crate) sink: FrameSink,
    pub(crate) cancel: CancellationToken,
    pub(crate) events: mpsc::UnboundedSender<Request>,
}

#[derive(Debug)]
pub(crate) enum ReaderOutcome {
    /// The supervisor asked the reader to stop.
    Cancelled,
    /// The body ran out between parts.
    Ended,
    Failed(StreamError),
    /// The task panicked or was aborted.
    Crashed(String),
}

/// Reader task body. Reports its own exit to the supervisor, which then
/// joins the task to collect the outcome.
pub(crate) async fn run(ctx: ReaderContext) -> ReaderOutcome {
    let _report = ExitReport {
        generation: ctx.generation,
        events: ctx.events.clone(),
    };
    read_stream(ctx).await
}

/// Sends `ReaderExited` when dropped, so a panicking reader is reported
/// too. Tokio drops the task's future after catching the panic.
struct ExitReport {
    generation: u64,
    events: mpsc::UnboundedSender<Request>,
}

impl Drop for ExitReport {
    fn drop(&mut self) {
        let _ = self.events.send(Request::ReaderExited {
            generation: self.generation,
        });
    }
}

async fn read_stream(ctx: ReaderContext) -> ReaderOutcome {
    let ReaderContext {
        generation,
        url,
        max_frame_bytes,
        transport,
        decoder,
        sink,
        cancel,
        events,
    } = ctx;

    info!(url = %url, "connecting to MJPEG stream");
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return ReaderOutcome::Cancelled,
        response = transport.get(&url) => response,
    };
    let mut response = match response {
        Ok(r) => r,
        Err(e) => return ReaderOutcome::Failed(e.into()),
    };
    if !response.is_success() {
        return ReaderOutcome::Failed(ConnectionError::Status(response.status).into());
    }

    let boundary = Boundary::from_content_type(response.content_type.as_deref());
    let mut scanner = PartScanner::new(boundary, max_frame_bytes);
    info!(
        boundary = scanner.boundary().as_str(),
        decoder = decoder.name(),
        "reading multipart stream"
    );

    let mut delivered: u64 = 0;
    let mut skipped: u64 = 0;

    loop {
        let part = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ReaderOutcome::Cancelled,
            part = scanner.next_part(&mut response.body) => part,
        };

        let payload = match part {
            Ok(Part::Payload(payload)) => payload,
            Ok(Part::Skipped(reason)) => {
                skipped += 1;
                warn!(?reason, skipped, "skipping malformed part");
                continue;
            }
            Ok(Part::End) => {
                info!(
                    delivered,
                    skipped,
                    superseded = sink.superseded(),
                    "stream ended"
                );
                return ReaderOutcome::Ended;
            }
            Err(e) => return ReaderOutcome::Failed(e),
        };

        // The part has been read in full, so pausing here keeps the scanner
        // aligned on part boundaries.
        if sink.is_paused() {
            debug!(len = payload.len(), "paused, discarding part");
            continue;
        }

        let frame = match decoder.decode(payload).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to decode frame, skipping");
                continue;
            }
        };

        let (seq, width, height) = (frame.seq, frame.width(), frame.height());
        if !sink.offer(frame).delivered() {
            debug!(seq, "paused during decode, frame dropped");
            continue;
        }

        delivered += 1;
        if delivered == 1 {
            let _ = events.send(Request::FrameDelivered { generation });
        }
        debug!(seq, width, height, "frame delivered");
        if delivered % 100 == 0 {
            debug!(delivered, "frames delivered");
        }
    }
}
