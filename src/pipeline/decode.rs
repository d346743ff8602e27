//! Decode stage: working file in, numbered part file out.

use super::join::JoinMessage;
use super::{StageContext, sanitize_file_name};
use crate::types::{DecodedPart, Event, FragmentRef, Stage};
use crate::yenc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A fetched article waiting to be decoded
#[derive(Debug)]
pub(crate) struct DecodeJob {
    /// Working file holding the raw body
    pub(crate) path: PathBuf,
    pub(crate) fragment: FragmentRef,
}

/// Stage loop; returns once the job queue closes or `stop` fires
pub(crate) async fn run(
    ctx: Arc<StageContext>,
    mut jobs: mpsc::Receiver<DecodeJob>,
    join_tx: mpsc::Sender<JoinMessage>,
    stop: CancellationToken,
) {
    let mut units = JoinSet::new();
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            next = jobs.recv() => match next {
                Some(job) => {
                    units.spawn(decode(Arc::clone(&ctx), job, join_tx.clone()));
                }
                None => break,
            },
            Some(result) = units.join_next(), if !units.is_empty() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Decode task failed");
                }
            }
        }
    }
    ctx.drain(&mut units).await;
    tracing::debug!("Decode stage stopped");
}

pub(super) async fn decode(
    ctx: Arc<StageContext>,
    job: DecodeJob,
    join_tx: mpsc::Sender<JoinMessage>,
) {
    let DecodeJob { path, fragment } = job;

    let raw = tokio::fs::read(&path).await;
    if let Err(e) = tokio::fs::remove_file(&path).await {
        tracing::debug!(path = %path.display(), error = %e, "Could not remove working file");
    }
    let raw = match raw {
        Ok(raw) => raw,
        Err(e) => return ctx.lose(&fragment, Stage::Decode, e.to_string(), &join_tx).await,
    };

    let fragment_id = fragment.id.clone();
    let decoded = tokio::task::spawn_blocking(move || yenc::decode(&raw, &fragment_id)).await;
    let part = match decoded {
        Ok(Ok(part)) => part,
        Ok(Err(e)) => return ctx.lose(&fragment, Stage::Decode, e.to_string(), &join_tx).await,
        Err(e) => return ctx.lose(&fragment, Stage::Decode, e.to_string(), &join_tx).await,
    };

    let DecodedPart {
        output_name,
        part_index,
        is_terminal,
        payload,
        checksum_hex,
        computed_checksum,
        fragment_id,
    } = part;
    let output_name = sanitize_file_name(&output_name);
    // The CRC itself was computed by the blocking decode above.
    let intact = checksum_hex
        .as_deref()
        .is_none_or(|hex| yenc::verify_checksum(computed_checksum, hex));

    if ctx.discard_corrupt_parts && !intact {
        ctx.emit(Event::ChecksumMismatch {
            output_name,
            part_index,
        });
        return ctx
            .lose(&fragment, Stage::Verify, "checksum mismatch".to_string(), &join_tx)
            .await;
    }

    let part_path = ctx.work_dir.join(format!("{}.{}", output_name, part_index));
    if let Err(e) = tokio::fs::write(&part_path, &payload).await {
        return ctx.lose(&fragment, Stage::Decode, e.to_string(), &join_tx).await;
    }
    tracing::debug!(
        fragment_id = %fragment_id,
        output_name = %output_name,
        part_index,
        is_terminal,
        bytes = payload.len(),
        "Decoded part"
    );

    let ready = JoinMessage::Part {
        file: fragment.file,
        fragment_id,
        output_name: output_name.clone(),
        part_index,
        is_terminal,
    };
    if join_tx.send(ready).await.is_err() {
        tracing::debug!(fragment_id = %fragment.id, "Join queue closed");
    }

    // Lenient mode: the part is already forwarded; a mismatch only marks the run broken.
    if !intact {
        tracing::warn!(
            output_name = %output_name,
            part_index,
            fragment_id = %fragment.id,
            "Checksum mismatch"
        );
        ctx.progress.record_broken(fragment.bytes);
        ctx.emit(Event::ChecksumMismatch {
            output_name,
            part_index,
        });
    }
}
