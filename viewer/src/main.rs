mod snapshot;

use mjpeg_tap_client::{Session, SessionError, StreamState};
use mjpeg_tap_common::config::{Config, ConfigError};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        url = %config.stream.url,
        auto_stop_secs = config.stream.auto_stop_secs,
        snapshots = config.output.dir.is_some(),
        "starting mjpeg-tap viewer"
    );

    match run(config).await {
        Ok(StreamState::Error) => {
            error!("stream ended in error state");
            std::process::exit(1);
        }
        Ok(state) => info!(%state, "viewer finished"),
        Err(e) => {
            error!(error = %e, "viewer failed");
            std::process::exit(1);
        }
    }
}

/// Plays the stream until it ends, auto-stops or Ctrl-C is pressed.
/// Returns the state the session settled in.
async fn run(config: Config) -> Result<StreamState, ViewerError> {
    let session = Session::new(config.stream.clone())?;

    let mut updates = session.status_updates();
    tokio::spawn(async move {
        while let Some(state) = updates.next().await {
            info!(%state, "stream status changed");
        }
    });

    let mut settled = session.status_updates();
    let frames = session.start().await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut received: u64 = 0;
    loop {
        let frame = tokio::select! {
            frame = frames.next_frame() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = &mut ctrl_c => {
                info!("interrupted, stopping stream");
                session.stop().await?;
                break;
            }
        };

        received += 1;
        if received % config.output.log_every != 0 {
            continue;
        }
        info!(
            received,
            seq = frame.seq,
            width = frame.width(),
            height = frame.height(),
            bytes = frame.payload_len,
            "frames received"
        );

        if let Some(dir) = &config.output.dir {
            match snapshot::write_snapshot(dir, frame, config.stream.resize).await {
                Ok(path) => info!(path = %path.display(), "snapshot saved"),
                Err(e) => warn!(error = %e, "failed to save snapshot"),
            }
        }
    }

    // The frame source closes before the supervisor publishes the final state.
    let state = settled
        .wait_for(|s| !s.is_active())
        .await
        .unwrap_or_else(|| session.state());
    info!(received, "stream closed");
    Ok(state)
}
