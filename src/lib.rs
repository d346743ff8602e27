//! # kumo
//!
//! Concurrent Usenet binary retriever: reads an NZB catalog, fetches every
//! article over a fixed pool of NNTP sessions, decodes the yEnc bodies and
//! joins the parts back into the original files.
//!
//! ## Pipeline
//!
//! - **Download** - one task per article, bounded by the session pool
//! - **Decode** - yEnc decode into numbered part files, CRC-32 verification
//! - **Join** - per-file part tracking, in-order concatenation
//!
//! Per-article failures never abort a run; they are recorded as breakage.
//! When the primary pass ends broken, the repair data (`.par2` by default)
//! is fetched in a second pass.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kumo::{Config, Kumo, ServerConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         server: ServerConfig {
//!             host: "news.example.com".to_string(),
//!             port: 563,
//!             tls: true,
//!             username: Some("user".to_string()),
//!             password: Some("pass".to_string()),
//!             connections: 10,
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     };
//!
//!     let kumo = Kumo::new(config).await?;
//!
//!     let mut events = kumo.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = kumo.get(Path::new("show.nzb")).await?;
//!     println!("{} broken of {}", summary.broken, summary.total);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Subject filtering and repair-data partitioning
pub mod filter;
/// NNTP client and session pool
pub mod nntp;
/// NZB catalog parsing
pub mod nzb;
/// Retrieval pipeline and orchestrator
pub mod pipeline;
/// Progress counters and status line
pub mod progress;
/// Core types and events
pub mod types;
/// yEnc decoding, encoding and CRC-32
pub mod yenc;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, ServerConfig};
pub use error::{Error, NntpError, Result};
pub use filter::Filter;
pub use nntp::{Connector, ServerConnector, SessionPool};
pub use nzb::Nzb;
pub use pipeline::{Completion, Kumo};
pub use progress::{ByteSize, ProgressTracker};
pub use types::{Event, FileId, FragmentRef, Pass, RunSummary, Stage};

/// Cancel `kumo`'s running pass when a termination signal arrives.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// The cancelled pass flushes what it has, removes its temp directory and
/// returns [`Error::Cancelled`].
///
/// # Example
///
/// ```no_run
/// use kumo::{Config, Kumo, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let kumo = Kumo::new(Config::default()).await?;
///     tokio::spawn(run_with_shutdown(kumo.clone()));
///     kumo.get(std::path::Path::new("show.nzb")).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(kumo: Kumo) {
    let token = kumo.shutdown_token();
    tokio::select! {
        _ = wait_for_signal() => kumo.shutdown(),
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
