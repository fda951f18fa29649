use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::{info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::db::models::WorkflowRecord;
use crate::registry::{MutationKind, SegmentMutation};

use super::{RestorationState, SaveContext};

/// Debounce loop: batches mutation events arriving within the quiet window
/// into a single full-snapshot write. Holds all writes until restoration has
/// been attempted.
pub(super) async fn autosave_loop(
    ctx: Arc<SaveContext>,
    mut mutation_rx: mpsc::UnboundedReceiver<SegmentMutation>,
    mut force_rx: mpsc::Receiver<oneshot::Sender<Result<()>>>,
    cancel_token: CancellationToken,
) {
    let mut dirty = false;
    let mut deadline: Option<Instant> = None;

    loop {
        let debounce_expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            maybe_mutation = mutation_rx.recv() => {
                let Some(mutation) = maybe_mutation else {
                    // Registry gone; flush anything pending and exit.
                    if dirty && restoration_complete(&ctx).await {
                        let _ = attempt_save(&ctx, &cancel_token).await;
                    }
                    break;
                };
                // Committed promotions originate inside the save path and are
                // already part of the snapshot being written; counting them as
                // new dirt would re-arm the debounce after every flush.
                if mutation.kind == MutationKind::Committed {
                    continue;
                }
                dirty = true;
                if deadline.is_none() {
                    deadline = Some(Instant::now() + ctx.config.debounce);
                }
            }
            maybe_force = force_rx.recv() => {
                let Some(reply) = maybe_force else {
                    break;
                };
                let result = attempt_save(&ctx, &cancel_token).await;
                let succeeded = result.is_ok();
                let _ = reply.send(result);
                if succeeded {
                    dirty = false;
                    deadline = None;
                } else {
                    deadline = Some(Instant::now() + ctx.config.retry_backoff);
                }
            }
            _ = debounce_expired, if deadline.is_some() => {
                if !restoration_complete(&ctx).await {
                    // Restoration still in flight; hold the write and re-check
                    // after another window.
                    deadline = Some(Instant::now() + ctx.config.debounce);
                    continue;
                }
                match attempt_save(&ctx, &cancel_token).await {
                    Ok(()) => {
                        dirty = false;
                        deadline = None;
                    }
                    Err(_) => {
                        deadline = Some(Instant::now() + ctx.config.retry_backoff);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("autosave loop for unit {} shutting down", ctx.unit.workflow_id);
                break;
            }
        }
    }
}

async fn restoration_complete(ctx: &SaveContext) -> bool {
    ctx.state.lock().await.restoration == RestorationState::Complete
}

/// One full-snapshot write. Commits pending edits first so the debounce
/// window doubles as the segment commit window. A failed write leaves the
/// in-memory segments untouched; the caller schedules a retry.
async fn attempt_save(ctx: &SaveContext, cancel_token: &CancellationToken) -> Result<()> {
    let (segments, is_complete) = {
        let mut registry = ctx.registry.lock().await;
        registry.commit_pending_edits();
        (registry.snapshot(), registry.is_complete())
    };

    ctx.publish(|state| state.is_saving = true).await;

    let workflow = WorkflowRecord {
        id: ctx.unit.workflow_id.clone(),
        project_id: ctx.unit.project_id.clone(),
        target_language: ctx.unit.target_language.clone(),
        segments,
        is_complete,
        updated_at: Utc::now(),
    };

    let result = ctx.store.save_snapshot(&workflow).await;

    if cancel_token.is_cancelled() {
        // The unit was closed while the write was in flight. The write ran to
        // completion but its result is no longer trusted or surfaced.
        return Ok(());
    }

    match result {
        Ok(()) => {
            ctx.publish(|state| {
                state.is_saving = false;
                state.last_saved_at = Some(Utc::now());
                state.last_error = None;
            })
            .await;
            Ok(())
        }
        Err(err) => {
            warn!(
                "autosave write failed for unit {}: {err:#}",
                ctx.unit.workflow_id
            );
            let message = err.to_string();
            ctx.publish(|state| {
                state.is_saving = false;
                state.last_error = Some(message);
            })
            .await;
            Err(err)
        }
    }
}
