mod hub;
mod messages;

pub use hub::CollabHub;
pub use messages::{CollabMessage, PeerIdentity, Presence, SelectionRange};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::registry::{RemoteApplyOutcome, Segment, SegmentRegistry};

/// Presence timing knobs.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub heartbeat_interval: Duration,
    /// A peer with no heartbeat inside this window is dropped from the
    /// active set.
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(2),
            heartbeat_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

struct PeerState {
    identity: PeerIdentity,
    selection: Option<SelectionRange>,
    last_seen: Instant,
}

struct SessionShared {
    /// Remote peers keyed by their session id.
    peers: Mutex<HashMap<String, PeerState>>,
    /// Held remote snapshots for segments awaiting explicit resolution.
    conflicts: Mutex<HashMap<String, Segment>>,
}

/// One viewer's connection to a translation unit: presence, content
/// broadcast/receive, and conflict surfacing.
///
/// Conflict resolution is never automatic. Exactly two actions exist:
/// `keep_local` (re-broadcast local state to override) and `accept_remote`
/// (overwrite local state with the held remote snapshot).
pub struct CollaborationSession {
    session_id: String,
    unit_id: String,
    identity: PeerIdentity,
    hub: CollabHub,
    registry: Arc<Mutex<SegmentRegistry>>,
    shared: Arc<SessionShared>,
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl CollaborationSession {
    pub fn join(
        hub: CollabHub,
        unit_id: &str,
        identity: PeerIdentity,
        registry: Arc<Mutex<SegmentRegistry>>,
        config: PresenceConfig,
    ) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let shared = Arc::new(SessionShared {
            peers: Mutex::new(HashMap::new()),
            conflicts: Mutex::new(HashMap::new()),
        });

        let rx = hub.subscribe(unit_id);
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(session_loop(
            shared.clone(),
            registry.clone(),
            hub.clone(),
            rx,
            session_id.clone(),
            unit_id.to_string(),
            config,
            cancel_token.clone(),
        ));

        let session = Self {
            session_id,
            unit_id: unit_id.to_string(),
            identity,
            hub,
            registry,
            shared,
            handle: Some(handle),
            cancel_token,
        };

        // Announce ourselves so existing viewers see us without waiting for
        // the first cursor move.
        session.publish_presence(None);
        session
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn broadcast_presence(&self, selection: Option<SelectionRange>) {
        self.publish_presence(selection);
    }

    /// Broadcast the full local segment snapshot to other viewers.
    pub async fn broadcast_content_update(&self) {
        let segments = self.registry.lock().await.snapshot();
        self.hub.publish(
            &self.unit_id,
            CollabMessage::ContentUpdate {
                session_id: self.session_id.clone(),
                segments,
                at: Utc::now(),
            },
        );
    }

    pub async fn active_peers(&self) -> Vec<Presence> {
        let peers = self.shared.peers.lock().await;
        peers
            .values()
            .map(|peer| Presence {
                user_id: peer.identity.user_id.clone(),
                display_name: peer.identity.display_name.clone(),
                color_tag: peer.identity.color_tag.clone(),
                selection_range: peer.selection.clone(),
            })
            .collect()
    }

    /// Segment ids currently awaiting a resolution decision.
    pub async fn pending_conflicts(&self) -> Vec<String> {
        let conflicts = self.shared.conflicts.lock().await;
        conflicts.keys().cloned().collect()
    }

    /// Resolution action: keep the local version and re-broadcast it so
    /// other viewers converge on it.
    pub async fn keep_local(&self, segment_id: &str) -> CoreResult<()> {
        let held = self.shared.conflicts.lock().await.remove(segment_id);
        if held.is_none() {
            return Err(CoreError::InvalidInput(format!(
                "no pending conflict for segment {segment_id}"
            )));
        }

        let local = {
            let registry = self.registry.lock().await;
            registry
                .get(segment_id)
                .cloned()
                .ok_or_else(|| CoreError::InvalidInput(format!("unknown segment {segment_id}")))?
        };

        self.hub.publish(
            &self.unit_id,
            CollabMessage::ContentUpdate {
                session_id: self.session_id.clone(),
                segments: vec![local],
                at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Resolution action: overwrite local state with the held remote
    /// snapshot, discarding the local uncommitted edit.
    pub async fn accept_remote(&self, segment_id: &str) -> CoreResult<()> {
        let held = self.shared.conflicts.lock().await.remove(segment_id);
        let Some(remote) = held else {
            return Err(CoreError::InvalidInput(format!(
                "no pending conflict for segment {segment_id}"
            )));
        };
        self.registry.lock().await.accept_remote(&remote)
    }

    pub async fn leave(mut self) {
        self.hub.publish(
            &self.unit_id,
            CollabMessage::Leave {
                session_id: self.session_id.clone(),
                at: Utc::now(),
            },
        );
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!("collab session loop failed to join: {err}");
            }
        }
    }

    fn publish_presence(&self, selection: Option<SelectionRange>) {
        self.hub.publish(
            &self.unit_id,
            CollabMessage::PresenceUpdate {
                session_id: self.session_id.clone(),
                identity: self.identity.clone(),
                selection,
                at: Utc::now(),
            },
        );
    }
}

#[allow(clippy::too_many_arguments)]
async fn session_loop(
    shared: Arc<SessionShared>,
    registry: Arc<Mutex<SegmentRegistry>>,
    hub: CollabHub,
    mut rx: broadcast::Receiver<CollabMessage>,
    own_session_id: String,
    unit_id: String,
    config: PresenceConfig,
    cancel_token: CancellationToken,
) {
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    let mut sweep = tokio::time::interval(config.sweep_interval);

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(message) => {
                        if message.session_id() != own_session_id {
                            handle_message(&shared, &registry, message).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("collab session lagged; {skipped} messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                hub.publish(&unit_id, CollabMessage::Heartbeat {
                    session_id: own_session_id.clone(),
                    at: Utc::now(),
                });
            }
            _ = sweep.tick() => {
                sweep_expired(&shared, config.heartbeat_timeout).await;
            }
            _ = cancel_token.cancelled() => {
                info!("collab session loop for unit {unit_id} shutting down");
                break;
            }
        }
    }
}

async fn handle_message(
    shared: &SessionShared,
    registry: &Mutex<SegmentRegistry>,
    message: CollabMessage,
) {
    match message {
        CollabMessage::PresenceUpdate {
            session_id,
            identity,
            selection,
            ..
        } => {
            shared.peers.lock().await.insert(
                session_id,
                PeerState {
                    identity,
                    selection,
                    last_seen: Instant::now(),
                },
            );
        }
        CollabMessage::Heartbeat { session_id, .. } => {
            if let Some(peer) = shared.peers.lock().await.get_mut(&session_id) {
                peer.last_seen = Instant::now();
            }
        }
        CollabMessage::ContentUpdate { segments, .. } => {
            for segment in segments {
                let outcome = registry.lock().await.try_apply_remote(&segment);
                if outcome == RemoteApplyOutcome::Conflict {
                    shared
                        .conflicts
                        .lock()
                        .await
                        .insert(segment.id.clone(), segment);
                }
            }
        }
        CollabMessage::Leave { session_id, .. } => {
            shared.peers.lock().await.remove(&session_id);
        }
    }
}

async fn sweep_expired(shared: &SessionShared, timeout: Duration) {
    let mut peers = shared.peers.lock().await;
    peers.retain(|_, peer| peer.last_seen.elapsed() <= timeout);
}
