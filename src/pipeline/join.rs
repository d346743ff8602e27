//! Join stage: per-file part tracking and in-order reassembly
//!
//! The joiner task is the only owner of the trackers. Every fragment of a
//! pass reaches it exactly once, either as a written part or as a loss, so a
//! file is finalized as soon as `arrived + lost == expected`.

use super::StageContext;
use crate::types::{Event, FileId};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

/// Messages accepted by the joiner
#[derive(Debug)]
pub(crate) enum JoinMessage {
    /// A part file was written to `<work_dir>/<output_name>.<part_index>`
    Part {
        file: FileId,
        fragment_id: String,
        output_name: String,
        part_index: u32,
        is_terminal: bool,
    },
    /// The fragment will never produce a part
    Lost { file: FileId, fragment_id: String },
    /// Finalize everything still tracked, then acknowledge
    Flush(oneshot::Sender<()>),
}

/// Expected part count per fragment id, seeded before the fragment is queued
///
/// The joiner takes each fragment's entry exactly once, when that fragment's
/// message arrives; the first entry taken for a file sets its expected count.
#[derive(Debug, Default)]
pub struct PendingCounts(Mutex<HashMap<String, usize>>);

impl PendingCounts {
    /// Record the expected part count of the file `fragment_id` belongs to
    pub fn seed(&self, fragment_id: &str, expected: usize) {
        self.lock().insert(fragment_id.to_string(), expected);
    }

    /// Remove and return the entry for `fragment_id`
    pub fn take(&self, fragment_id: &str) -> Option<usize> {
        self.lock().remove(fragment_id)
    }

    /// Entries not yet taken
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether every entry was taken
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct FileTracker {
    expected: usize,
    current: usize,
    lost: usize,
    output_name: Option<String>,
    /// Index carried by the terminal part: the part count its encoder declared
    terminal_index: Option<u32>,
}

impl FileTracker {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            current: 0,
            lost: 0,
            output_name: None,
            terminal_index: None,
        }
    }

    fn is_complete(&self) -> bool {
        self.current + self.lost >= self.expected
    }

    /// Part indices to look for on disk
    ///
    /// Bounded by the catalog's fragment count; the terminal index comes from
    /// an article header and is only used to report a disagreement.
    fn part_count(&self) -> u32 {
        let expected = u32::try_from(self.expected).unwrap_or(u32::MAX);
        if let Some(terminal) = self.terminal_index
            && terminal != expected
        {
            tracing::warn!(
                file = self.output_name.as_deref().unwrap_or_default(),
                terminal,
                expected,
                "Terminal part index disagrees with catalog fragment count"
            );
        }
        expected
    }
}

/// Single-owner join task
pub(crate) struct Joiner {
    ctx: Arc<StageContext>,
    pending: Arc<PendingCounts>,
    trackers: HashMap<FileId, FileTracker>,
    /// Files already handed to a finalize task; late messages for them are dropped
    finished: HashSet<FileId>,
    finalizing: JoinSet<()>,
}

impl Joiner {
    pub(crate) fn new(ctx: Arc<StageContext>, pending: Arc<PendingCounts>) -> Self {
        Self {
            ctx,
            pending,
            trackers: HashMap::new(),
            finished: HashSet::new(),
            finalizing: JoinSet::new(),
        }
    }

    /// Process messages until every sender is gone, then flush
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<JoinMessage>) {
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(JoinMessage::Flush(ack)) => {
                        self.join_all().await;
                        let _ = ack.send(());
                    }
                    Some(message) => self.handle(message),
                    None => break,
                },
                Some(result) = self.finalizing.join_next(), if !self.finalizing.is_empty() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Finalize task failed");
                    }
                }
            }
        }
        self.join_all().await;
        tracing::debug!("Join stage stopped");
    }

    fn handle(&mut self, message: JoinMessage) {
        if let JoinMessage::Part { file, fragment_id, .. } | JoinMessage::Lost { file, fragment_id } =
            &message
            && self.finished.contains(file)
        {
            tracing::debug!(file = %file, fragment_id = %fragment_id, "File already finalized");
            return;
        }

        let file = match message {
            JoinMessage::Part {
                file,
                fragment_id,
                output_name,
                part_index,
                is_terminal,
            } => {
                let tracker = self.tracker(file, &fragment_id);
                tracker.current += 1;
                if tracker.output_name.is_none() {
                    tracker.output_name = Some(output_name);
                } else if tracker.output_name.as_deref() != Some(output_name.as_str()) {
                    tracing::debug!(file = %file, got = %output_name, "Part names disagree within one file");
                }
                if is_terminal {
                    tracker.terminal_index = Some(part_index);
                }
                file
            }
            JoinMessage::Lost { file, fragment_id } => {
                self.tracker(file, &fragment_id).lost += 1;
                file
            }
            JoinMessage::Flush(_) => return,
        };

        if self.trackers.get(&file).is_some_and(FileTracker::is_complete)
            && let Some(tracker) = self.trackers.remove(&file)
        {
            self.spawn_finalize(file, tracker, false);
        }
    }

    fn tracker(&mut self, file: FileId, fragment_id: &str) -> &mut FileTracker {
        let seeded = self.pending.take(fragment_id);
        self.trackers.entry(file).or_insert_with(|| {
            let expected = seeded.unwrap_or_else(|| {
                tracing::warn!(file = %file, fragment_id = %fragment_id, "No expected count seeded");
                1
            });
            FileTracker::new(expected)
        })
    }

    fn spawn_finalize(&mut self, file: FileId, tracker: FileTracker, forced: bool) {
        self.finished.insert(file);
        let ctx = Arc::clone(&self.ctx);
        self.finalizing
            .spawn(async move { finalize(ctx, file, tracker, forced).await });
    }

    /// Finalize every remaining tracker and wait for all finalizations
    async fn join_all(&mut self) {
        let leftovers: Vec<_> = self.trackers.drain().collect();
        for (file, tracker) in leftovers {
            tracing::debug!(
                file = %file,
                expected = tracker.expected,
                current = tracker.current,
                lost = tracker.lost,
                "Forcing incomplete file"
            );
            self.spawn_finalize(file, tracker, true);
        }
        while let Some(result) = self.finalizing.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Finalize task failed");
            }
        }
    }
}

/// Concatenate a file's parts and resolve its arrived fragments
///
/// A forced finalization also settles whatever the file still owes.
async fn finalize(ctx: Arc<StageContext>, file: FileId, tracker: FileTracker, forced: bool) {
    if let Some(name) = tracker.output_name.as_deref() {
        let target = ctx.output_dir.join(name);
        match write_output(&ctx.work_dir, name, &target, tracker.part_count()).await {
            Ok((written, missing)) => {
                // Gaps not explained by a lost fragment were never reported upstream.
                let unexplained = (missing as usize).saturating_sub(tracker.lost);
                for _ in 0..unexplained {
                    ctx.progress.record_broken(0);
                }
                if missing > 0 {
                    tracing::warn!(file = %name, written, missing, "Joined with missing parts");
                } else {
                    tracing::debug!(file = %name, parts = written, "Joined");
                }
                ctx.emit(Event::FileJoined {
                    name: name.to_string(),
                    path: target,
                    parts_written: written,
                    parts_missing: missing,
                });
            }
            Err(e) => {
                tracing::error!(file = %name, error = %e, "Failed to write output");
                for _ in 0..tracker.current {
                    ctx.progress.record_broken(0);
                }
            }
        }
    } else {
        tracing::warn!(file = %file, lost = tracker.lost, "No part arrived; nothing to join");
    }

    ctx.completion.credit(file, tracker.current);
    if forced {
        ctx.completion.settle(file);
    }
}

/// Append `<work_dir>/<name>.<i>` for `i` in `1..=parts` to `target`
///
/// Missing or unreadable parts are skipped. Returns (written, missing).
async fn write_output(
    work_dir: &Path,
    name: &str,
    target: &Path,
    parts: u32,
) -> std::io::Result<(u32, u32)> {
    let mut out = tokio::io::BufWriter::new(tokio::fs::File::create(target).await?);
    let (mut written, mut missing) = (0, 0);

    for index in 1..=parts {
        let part_path = work_dir.join(format!("{}.{}", name, index));
        match tokio::fs::read(&part_path).await {
            Ok(bytes) => {
                out.write_all(&bytes).await?;
                written += 1;
                if let Err(e) = tokio::fs::remove_file(&part_path).await {
                    tracing::debug!(part = %part_path.display(), error = %e, "Could not remove part");
                }
            }
            Err(e) => {
                tracing::debug!(part = %part_path.display(), error = %e, "Part missing");
                missing += 1;
            }
        }
    }

    out.flush().await?;
    Ok((written, missing))
}
