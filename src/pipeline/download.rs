//! Download stage: one spawned fetch per fragment, bounded by the session pool.

use super::decode::DecodeJob;
use super::join::JoinMessage;
use super::{StageContext, sanitize_file_name};
use crate::error::Result;
use crate::types::{FragmentRef, Stage};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufWriter;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Stage loop; returns once the fragment queue closes or `stop` fires
pub(crate) async fn run(
    ctx: Arc<StageContext>,
    mut fragments: mpsc::Receiver<FragmentRef>,
    decode_tx: mpsc::Sender<DecodeJob>,
    join_tx: mpsc::Sender<JoinMessage>,
    stop: CancellationToken,
) {
    let mut units = JoinSet::new();
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            next = fragments.recv() => match next {
                Some(fragment) => {
                    units.spawn(fetch(
                        Arc::clone(&ctx),
                        fragment,
                        decode_tx.clone(),
                        join_tx.clone(),
                    ));
                }
                None => break,
            },
            Some(result) = units.join_next(), if !units.is_empty() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Download task failed");
                }
            }
        }
    }
    ctx.drain(&mut units).await;
    tracing::debug!("Download stage stopped");
}

async fn fetch(
    ctx: Arc<StageContext>,
    fragment: FragmentRef,
    decode_tx: mpsc::Sender<DecodeJob>,
    join_tx: mpsc::Sender<JoinMessage>,
) {
    match download(&ctx, &fragment).await {
        Ok(path) => {
            ctx.progress.record_bytes(fragment.bytes);
            if let Err(mpsc::error::SendError(job)) =
                decode_tx.send(DecodeJob { path, fragment }).await
            {
                let _ = tokio::fs::remove_file(&job.path).await;
                ctx.lose(
                    &job.fragment,
                    Stage::Decode,
                    "decode queue closed".to_string(),
                    &join_tx,
                )
                .await;
            }
        }
        Err(e) => {
            ctx.lose(&fragment, Stage::Download, e.to_string(), &join_tx)
                .await
        }
    }
}

/// Fetch one article body into `<work_dir>/<id>`
async fn download(ctx: &StageContext, fragment: &FragmentRef) -> Result<PathBuf> {
    let mut session = ctx.pool.checkout().await?;

    match session.ensure_group(&fragment.group).await {
        Ok(_) => {}
        Err(e) if ctx.strict_group_selection => return Err(e.into()),
        Err(e) => {
            tracing::debug!(
                group = %fragment.group,
                fragment_id = %fragment.id,
                error = %e,
                "Group selection failed, fetching anyway"
            );
        }
    }

    let path = ctx.work_dir.join(sanitize_file_name(&fragment.id));
    let mut out = BufWriter::new(tokio::fs::File::create(&path).await?);

    match session.fetch_body(&fragment.id, &mut out).await {
        Ok(bytes) => {
            tracing::debug!(
                fragment_id = %fragment.id,
                session = session.session().id(),
                bytes,
                "Fetched article"
            );
            Ok(path)
        }
        Err(e) => {
            drop(out);
            let _ = tokio::fs::remove_file(&path).await;
            Err(e.into())
        }
    }
}
