//! Retrieval pipeline and its orchestrator.
//!
//! One pass wires four long-lived stages together with bounded queues:
//! - [`download`] - checks out a session and fetches each article into a working file
//! - [`decode`] - decodes working files into numbered part files and verifies checksums
//! - [`join`] - tracks parts per file and concatenates them in index order
//! - the progress renderer
//!
//! [`completion`] counts the fragments that are still unresolved; the pass
//! barrier waits for it to reach zero. [`Kumo`] sequences a primary pass and,
//! when that pass recorded breakage, a repair-data pass.

mod completion;
mod decode;
mod download;
mod join;
mod pass;


pub use completion::Completion;
pub use join::PendingCounts;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::filter::{Filter, partition};
use crate::nntp::{Connector, ServerConnector, SessionPool};
use crate::nzb::{Nzb, job_name};
use crate::progress::{PRIMARY_GLYPH, ProgressTracker, REPAIR_GLYPH};
use crate::types::{Event, FragmentRef, Pass, RunSummary, Stage};
use join::JoinMessage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Retriever instance (cloneable - all fields are Arc-wrapped)
///
/// Runs are meant to be sequential: progress counters are shared by every
/// pass this instance runs.
#[derive(Clone)]
pub struct Kumo {
    pub(crate) config: Arc<Config>,
    pub(crate) filter: Arc<Filter>,
    pub(crate) pool: Arc<SessionPool>,
    pub(crate) progress: Arc<ProgressTracker>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) shutdown: CancellationToken,
}

impl Kumo {
    /// Validate the configuration, create the root directories and open the session pool
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, a directory cannot be created,
    /// a filter does not compile, or no session could connect and authenticate.
    pub async fn new(config: Config) -> Result<Self> {
        let connector = Arc::new(ServerConnector::new(config.server.clone())?);
        Self::with_connector(config, connector).await
    }

    /// Like [`Kumo::new`] with a caller-supplied session factory
    pub async fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        create_dir(config.download_dir()).await?;
        create_dir(config.temp_dir()).await?;

        let filter = Filter::new(&config.download.filters)?;
        let pool = SessionPool::acquire(config.server.connections, connector).await?;

        // Subscribers that fall more than 1000 events behind see `Lagged`.
        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            config: Arc::new(config),
            filter: Arc::new(filter),
            pool: Arc::new(pool),
            progress: Arc::new(ProgressTracker::new()),
            event_tx,
            shutdown: CancellationToken::new(),
        })
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Progress counters of the current (or last) pass
    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// The session pool
    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Token that cancels every pass of this instance when fired
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel the running pass; it flushes partial files and returns [`Error::Cancelled`]
    pub fn shutdown(&self) {
        tracing::info!("Shutdown requested");
        self.shutdown.cancel();
    }

    /// Close every pooled session
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Retrieve every file of the catalog at `path`
    ///
    /// The job name is the catalog's file stem; output lands in
    /// `<download>/<job>/`.
    pub async fn get(&self, path: &Path) -> Result<RunSummary> {
        let xml = tokio::fs::read_to_string(path).await?;
        let nzb = Nzb::parse(&xml)?;
        self.get_nzb(&job_name(path), nzb).await
    }

    /// Retrieve an already parsed catalog under `job`
    pub async fn get_nzb(&self, job: &str, nzb: Nzb) -> Result<RunSummary> {
        let nzb = self.filter.exclude(nzb);
        let (primary, repair) = partition(nzb, &self.config.download.repair_extension);

        self.progress.reset();
        self.progress.set_prefix(PRIMARY_GLYPH);
        let mut passes = vec![Pass::Primary];
        let (mut broken, mut total) = self.run_pass(job, Pass::Primary, &primary).await?;

        if broken > 0 {
            if repair.is_empty() {
                tracing::warn!(job = %job, broken, "Run is broken and has no repair data");
            } else {
                tracing::info!(
                    job = %job,
                    broken,
                    repair_files = repair.files.len(),
                    "Fetching repair data"
                );
                self.progress.reset();
                self.progress.set_prefix(REPAIR_GLYPH);
                passes.push(Pass::Repair);
                (broken, total) = self.run_pass(job, Pass::Repair, &repair).await?;
            }
        }

        Ok(RunSummary {
            job: job.to_string(),
            passes,
            broken,
            total,
            download_dir: self.config.download_dir().join(job),
        })
    }

    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

pub(crate) async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| Error::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

/// File name safe to join onto a directory: no separators, never `.`/`..`
pub(crate) fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{}", cleaned),
        _ => cleaned,
    }
}

/// State shared by the stages of one pass
pub(crate) struct StageContext {
    pub(crate) pool: Arc<SessionPool>,
    pub(crate) progress: Arc<ProgressTracker>,
    pub(crate) completion: Arc<Completion>,
    pub(crate) events: broadcast::Sender<Event>,
    /// `<temp>/<job>`
    pub(crate) work_dir: PathBuf,
    /// `<download>/<job>`
    pub(crate) output_dir: PathBuf,
    pub(crate) strict_group_selection: bool,
    pub(crate) discard_corrupt_parts: bool,
    pub(crate) shutdown: CancellationToken,
}

impl StageContext {
    pub(crate) fn emit(&self, event: Event) {
        self.events.send(event).ok();
    }

    /// Resolve a fragment that will never become a part
    ///
    /// The joiner hears about the loss before the credit is applied, so a
    /// file's tracker always accounts for it when the count reaches zero.
    pub(crate) async fn lose(
        &self,
        fragment: &FragmentRef,
        stage: Stage,
        error: String,
        join_tx: &mpsc::Sender<JoinMessage>,
    ) {
        tracing::warn!(
            fragment_id = %fragment.id,
            stage = ?stage,
            error = %error,
            "Fragment failed"
        );
        self.progress.record_broken(fragment.bytes);
        self.emit(Event::FragmentFailed {
            fragment_id: fragment.id.clone(),
            stage,
            error,
        });
        let lost = JoinMessage::Lost {
            file: fragment.file,
            fragment_id: fragment.id.clone(),
        };
        if join_tx.send(lost).await.is_err() {
            tracing::debug!(fragment_id = %fragment.id, "Join queue closed");
        }
        self.completion.credit(fragment.file, 1);
    }

    /// Wait for (or, when shutting down, abort) a stage's outstanding work
    ///
    /// Shutdown is honored while waiting, not only on entry: a stage whose
    /// queue has already closed may still hold fetches stuck on the network.
    pub(crate) async fn drain(&self, units: &mut tokio::task::JoinSet<()>) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::debug!(outstanding = units.len(), "Aborting stage work");
                    units.shutdown().await;
                    return;
                }
                next = units.join_next() => match next {
                    Some(Err(e)) => tracing::error!(error = %e, "Stage task failed"),
                    Some(Ok(())) => {}
                    None => return,
                },
            }
        }
    }
}
