use std::sync::Arc;

use chrono::Utc;
use log::warn;
use tokio::sync::{mpsc, watch, Mutex};

use crate::autosave::{AutoSaveConfig, AutoSaveCoordinator, AutoSaveState, SnapshotStore, UnitIds};
use crate::collab::{CollabHub, CollaborationSession, PeerIdentity, PresenceConfig};
use crate::content::{seed_segments, ContentSection};
use crate::db::models::{TMEntry, TMKey};
use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::events::UnitEventBus;
use crate::matching::{leverage, score, MatchResult, ScorerConfig};
use crate::registry::{SegmentRegistry, UnitProgress};

/// Everything needed to work on one translation unit: the in-memory segment
/// registry, the autosave coordinator wired to its mutation stream, optional
/// collaboration, and the TM lookup path.
///
/// `open` restores persisted state before arming the write path; a failed
/// restoration falls back to freshly seeded segments and surfaces the error
/// through `AutoSaveState::last_error` rather than refusing to open.
pub struct TranslationUnitSession {
    unit: UnitIds,
    source_language: String,
    domain_filter: Option<String>,
    events: UnitEventBus,
    registry: Arc<Mutex<SegmentRegistry>>,
    coordinator: AutoSaveCoordinator,
    collab: Option<CollaborationSession>,
    db: Database,
    scorer_config: ScorerConfig,
}

impl TranslationUnitSession {
    pub async fn open(
        db: Database,
        unit: UnitIds,
        source_language: &str,
        domain_filter: Option<String>,
        sections: &[ContentSection],
        config: AutoSaveConfig,
    ) -> CoreResult<Self> {
        let events = UnitEventBus::default();
        let (mutation_tx, mutation_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Mutex::new(SegmentRegistry::new(
            unit.workflow_id.clone(),
            seed_segments(&unit.workflow_id, sections),
            mutation_tx,
            events.clone(),
        )));

        let store: Arc<dyn SnapshotStore> = Arc::new(db.clone());
        let mut coordinator =
            AutoSaveCoordinator::new(store, unit.clone(), config, events.clone());

        match coordinator.restore().await {
            Ok(Some(restored)) => registry.lock().await.rehydrate(restored),
            Ok(None) => {}
            Err(err) => {
                // Fresh seed stands in; the failure is already visible in the
                // coordinator state.
                warn!("opening unit {} without restored state: {err}", unit.workflow_id);
            }
        }

        coordinator.start(registry.clone(), mutation_rx)?;

        Ok(Self {
            unit,
            source_language: source_language.to_string(),
            domain_filter,
            events,
            registry,
            coordinator,
            collab: None,
            db,
            scorer_config: ScorerConfig::default(),
        })
    }

    pub fn registry(&self) -> Arc<Mutex<SegmentRegistry>> {
        self.registry.clone()
    }

    pub fn events(&self) -> &UnitEventBus {
        &self.events
    }

    pub async fn save_state(&self) -> AutoSaveState {
        self.coordinator.state().await
    }

    pub fn watch_save_state(&self) -> watch::Receiver<AutoSaveState> {
        self.coordinator.watch_state()
    }

    pub async fn progress(&self) -> UnitProgress {
        self.registry.lock().await.progress()
    }

    /// Fraction of source words covered by accepted TM matches.
    pub async fn leverage(&self) -> f64 {
        leverage(self.registry.lock().await.segments())
    }

    /// Rank TM candidates for one segment's source text.
    pub async fn find_matches(&self, segment_id: &str) -> CoreResult<Vec<MatchResult>> {
        let source_text = {
            let registry = self.registry.lock().await;
            registry
                .get(segment_id)
                .map(|s| s.source_text.clone())
                .ok_or_else(|| CoreError::InvalidInput(format!("unknown segment {segment_id}")))?
        };

        let candidates = self
            .db
            .query_tm_entries(
                &self.source_language,
                &self.unit.target_language,
                self.domain_filter.as_deref(),
            )
            .await?;

        score(
            &source_text,
            &candidates,
            &self.unit.target_language,
            &self.scorer_config,
        )
    }

    /// Apply an accepted match to the segment and record its usage against
    /// the memory entry it came from.
    pub async fn accept_match(&self, segment_id: &str, result: &MatchResult) -> CoreResult<()> {
        self.registry.lock().await.apply_match(segment_id, result)?;
        self.db
            .record_tm_usage(&result.source_entry, Utc::now())
            .await?;
        Ok(())
    }

    /// Contribute a segment's current translation to the memory. Repeated
    /// contributions of the same key accumulate usage rather than duplicating
    /// rows.
    pub async fn contribute_to_memory(
        &self,
        segment_id: &str,
        quality_score: u8,
        domain_category: &str,
    ) -> CoreResult<()> {
        let (source_text, target_text, confidence) = {
            let registry = self.registry.lock().await;
            let segment = registry
                .get(segment_id)
                .ok_or_else(|| CoreError::InvalidInput(format!("unknown segment {segment_id}")))?;
            if segment.target_text.is_empty() {
                return Err(CoreError::InvalidInput(format!(
                    "segment {segment_id} has no translation to contribute"
                )));
            }
            (
                segment.source_text.clone(),
                segment.target_text.clone(),
                segment.confidence,
            )
        };

        let key = TMKey::new(
            &source_text,
            &self.source_language,
            &self.unit.target_language,
            domain_category,
        );
        let entry = TMEntry::new(key, target_text, quality_score, confidence);
        self.db.upsert_tm_entry(&entry).await?;
        Ok(())
    }

    /// Join the live-collaboration channel for this unit.
    pub fn join_collaboration(
        &mut self,
        hub: CollabHub,
        identity: PeerIdentity,
        config: PresenceConfig,
    ) -> CoreResult<&CollaborationSession> {
        if self.collab.is_some() {
            return Err(CoreError::InvalidInput(
                "already joined collaboration for this unit".into(),
            ));
        }
        let session = CollaborationSession::join(
            hub,
            &self.unit.workflow_id,
            identity,
            self.registry.clone(),
            config,
        );
        Ok(self.collab.insert(session))
    }

    pub fn collaboration(&self) -> Option<&CollaborationSession> {
        self.collab.as_ref()
    }

    pub async fn force_save(&self) -> CoreResult<()> {
        self.coordinator.force_save().await
    }

    /// Leave collaboration, stop the autosave loop, and drop the unit. An
    /// in-flight write runs to completion with its result discarded.
    pub async fn close(mut self) {
        if let Some(collab) = self.collab.take() {
            collab.leave().await;
        }
        self.coordinator.close().await;
    }
}
