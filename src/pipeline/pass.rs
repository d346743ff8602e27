//! One retrieval pass: seed, feed, wait, flush, tear down.

use super::join::{JoinMessage, Joiner, PendingCounts};
use super::{Completion, Kumo, StageContext, create_dir, decode, download};
use crate::error::{Error, Result};
use crate::nzb::Nzb;
use crate::types::{Event, FileId, Pass};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

impl Kumo {
    /// Run the pipeline over `nzb`; returns (broken, total) fragment counts
    ///
    /// # Errors
    ///
    /// Fails if the job directories cannot be created, or with
    /// [`Error::Cancelled`] after a shutdown request. A cancelled pass still
    /// flushes partial files and removes its temp directory.
    pub(crate) async fn run_pass(&self, job: &str, pass: Pass, nzb: &Nzb) -> Result<(u64, u64)> {
        let work_dir = self.config.temp_dir().join(job);
        let output_dir = self.config.download_dir().join(job);
        create_dir(&work_dir).await?;
        create_dir(&output_dir).await?;

        let completion = Arc::new(Completion::new());
        let pending = Arc::new(PendingCounts::default());

        // Every file is registered before the first fragment is queued, so the
        // count cannot touch zero while fragments are still being fed.
        let mut fragments = Vec::with_capacity(nzb.fragment_count());
        for (index, entry) in nzb.files.iter().enumerate() {
            let file = FileId(index);
            let refs = entry.fragments(file);
            completion.register(file, refs.len());
            for fragment in &refs {
                pending.seed(&fragment.id, refs.len());
            }
            fragments.extend(refs);
        }

        let total_bytes = nzb.total_bytes();
        self.progress.set_total(total_bytes, fragments.len() as u64);
        tracing::info!(
            job = %job,
            pass = ?pass,
            files = nzb.files.len(),
            fragments = fragments.len(),
            total_bytes,
            "Starting pass"
        );
        self.emit_event(Event::PassStarted {
            pass,
            files: nzb.files.len(),
            fragments: fragments.len(),
            total_bytes,
        });

        let ctx = Arc::new(StageContext {
            pool: Arc::clone(&self.pool),
            progress: Arc::clone(&self.progress),
            completion: Arc::clone(&completion),
            events: self.event_tx.clone(),
            work_dir: work_dir.clone(),
            output_dir,
            strict_group_selection: self.config.download.strict_group_selection,
            discard_corrupt_parts: self.config.download.discard_corrupt_parts,
            shutdown: self.shutdown.clone(),
        });

        let depth = self.config.download.queue_depth.max(1);
        let (fetch_tx, fetch_rx) = mpsc::channel(depth);
        let (decode_tx, decode_rx) = mpsc::channel(depth);
        let (join_tx, join_rx) = mpsc::channel(depth);
        let stop = self.shutdown.child_token();

        let joiner = tokio::spawn(Joiner::new(Arc::clone(&ctx), pending).run(join_rx));
        let decoder = tokio::spawn(decode::run(
            Arc::clone(&ctx),
            decode_rx,
            join_tx.clone(),
            stop.clone(),
        ));
        let downloader = tokio::spawn(download::run(
            Arc::clone(&ctx),
            fetch_rx,
            decode_tx,
            join_tx.clone(),
            stop.clone(),
        ));

        let rendered = CancellationToken::new();
        let renderer = (!self.config.quiet).then(|| {
            let progress = Arc::clone(&self.progress);
            let done = rendered.clone();
            tokio::spawn(async move { progress.run(done).await })
        });

        for fragment in fragments {
            tokio::select! {
                _ = stop.cancelled() => break,
                sent = fetch_tx.send(fragment) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(fetch_tx);

        let cancelled = tokio::select! {
            _ = completion.wait_for_zero() => false,
            _ = self.shutdown.cancelled() => true,
        };

        // JoinAll: force out whatever is still tracked.
        let (ack_tx, ack_rx) = oneshot::channel();
        if join_tx.send(JoinMessage::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }

        stop.cancel();
        for (stage, handle) in [("download", downloader), ("decode", decoder)] {
            if let Err(e) = handle.await {
                tracing::error!(stage, error = %e, "Stage loop panicked");
            }
        }
        drop(join_tx);
        if let Err(e) = joiner.await {
            tracing::error!(stage = "join", error = %e, "Stage loop panicked");
        }

        rendered.cancel();
        if let Some(renderer) = renderer {
            let _ = renderer.await;
        }

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            tracing::warn!(dir = %work_dir.display(), error = %e, "Failed to remove temp directory");
        }

        let snapshot = self.progress.snapshot();
        tracing::info!(
            job = %job,
            pass = ?pass,
            broken = snapshot.broken_count,
            total = snapshot.total_count,
            "Pass complete"
        );
        self.emit_event(Event::PassComplete {
            pass,
            broken: snapshot.broken_count,
            total: snapshot.total_count,
        });

        if cancelled {
            return Err(Error::Cancelled);
        }
        Ok((snapshot.broken_count, snapshot.total_count))
    }
}
