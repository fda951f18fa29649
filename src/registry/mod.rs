pub mod segment;

pub use segment::{Segment, SegmentStatus, TranslationMethod, UnitProgress};

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{CoreError, CoreResult};
use crate::events::{UnitEvent, UnitEventBus};
use crate::matching::MatchResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    Edited,
    Suggested,
    Committed,
    StatusChanged,
    Locked,
    Unlocked,
    Reset,
    RemoteApplied,
}

/// Emitted once per state-changing registry call; consumed by the autosave
/// coordinator (and mirrored to collaboration by the unit session).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMutation {
    pub segment_id: String,
    pub kind: MutationKind,
    pub at: DateTime<Utc>,
}

/// Outcome of applying a remote content update to one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApplyOutcome {
    Applied,
    /// A local uncommitted edit exists for this segment; nothing was changed.
    Conflict,
    /// Segment is locked or unknown to this unit; nothing was changed.
    Ignored,
}

/// In-memory model of the segments belonging to one translation unit
/// (one asset x one target language).
///
/// Owns the per-segment state machine. Performs no I/O: persistence and
/// broadcast happen downstream of the mutation channel.
pub struct SegmentRegistry {
    unit_id: String,
    segments: Vec<Segment>,
    index: HashMap<String, usize>,
    /// Segment ids edited since the last debounced commit.
    uncommitted: HashSet<String>,
    completion_fired: bool,
    mutation_tx: mpsc::UnboundedSender<SegmentMutation>,
    events: UnitEventBus,
}

impl SegmentRegistry {
    pub fn new(
        unit_id: String,
        segments: Vec<Segment>,
        mutation_tx: mpsc::UnboundedSender<SegmentMutation>,
        events: UnitEventBus,
    ) -> Self {
        let index = segments
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        let mut registry = Self {
            unit_id,
            segments,
            index,
            uncommitted: HashSet::new(),
            completion_fired: false,
            mutation_tx,
            events,
        };

        // A fully approved unit restored from disk must not refire completion.
        if !registry.segments.is_empty() && registry.all_approved() {
            registry.completion_fired = true;
        }

        registry
    }

    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn snapshot(&self) -> Vec<Segment> {
        self.segments.clone()
    }

    pub fn get(&self, segment_id: &str) -> Option<&Segment> {
        self.index.get(segment_id).map(|&i| &self.segments[i])
    }

    pub fn has_uncommitted_edit(&self, segment_id: &str) -> bool {
        self.uncommitted.contains(segment_id)
    }

    pub fn is_complete(&self) -> bool {
        !self.segments.is_empty() && self.all_approved()
    }

    /// Replace local segment state with a restored snapshot, matched by id.
    /// Not a user mutation: emits nothing and clears the uncommitted set, so
    /// restoration can never trigger an autosave write of its own.
    pub fn rehydrate(&mut self, restored: Vec<Segment>) {
        for segment in restored {
            if let Some(&idx) = self.index.get(&segment.id) {
                self.segments[idx] = segment;
            }
        }
        self.uncommitted.clear();
        self.completion_fired = !self.segments.is_empty() && self.all_approved();
    }

    pub fn progress(&self) -> UnitProgress {
        let mut progress = UnitProgress {
            total: self.segments.len(),
            pending: 0,
            in_progress: 0,
            translated: 0,
            reviewed: 0,
            approved: 0,
        };
        for segment in &self.segments {
            match segment.status {
                SegmentStatus::Pending => progress.pending += 1,
                SegmentStatus::InProgress => progress.in_progress += 1,
                SegmentStatus::Translated => progress.translated += 1,
                SegmentStatus::Reviewed => progress.reviewed += 1,
                SegmentStatus::Approved => progress.approved += 1,
            }
        }
        progress
    }

    /// Human keystroke-level edit to the target text.
    ///
    /// First non-empty edit moves Pending -> InProgress; edits to Translated
    /// or Reviewed segments pull them back to InProgress until the next
    /// debounced commit. Approved segments must be reopened first.
    pub fn edit_target(&mut self, segment_id: &str, target_text: &str) -> CoreResult<()> {
        let idx = self.index_of(segment_id)?;
        if self.segments[idx].status == SegmentStatus::Approved {
            return Err(CoreError::InvalidInput(format!(
                "segment {segment_id} is approved; reopen it before editing"
            )));
        }

        let segment = &mut self.segments[idx];
        segment.target_text = target_text.to_string();
        segment.translation_method = match segment.translation_method {
            TranslationMethod::None | TranslationMethod::Manual => TranslationMethod::Manual,
            _ => TranslationMethod::Blended,
        };
        if segment.translation_method == TranslationMethod::Manual {
            segment.confidence = 100;
        }
        // Provenance only holds for pure memory matches.
        if segment.translation_method != TranslationMethod::MemoryMatch {
            segment.match_percentage = None;
        }
        segment.last_modified = Utc::now();

        let new_status = match segment.status {
            SegmentStatus::Pending if !target_text.is_empty() => Some(SegmentStatus::InProgress),
            SegmentStatus::Translated | SegmentStatus::Reviewed => {
                Some(SegmentStatus::InProgress)
            }
            _ => None,
        };

        self.uncommitted.insert(segment_id.to_string());
        if let Some(status) = new_status {
            self.set_status(idx, status);
        }
        self.emit_mutation(segment_id, MutationKind::Edited);
        Ok(())
    }

    /// Apply an accepted TM match. An explicit user acceptance, so the segment
    /// commits straight to Translated with provenance recorded.
    pub fn apply_match(&mut self, segment_id: &str, result: &MatchResult) -> CoreResult<()> {
        let idx = self.index_of(segment_id)?;
        if self.segments[idx].is_locked {
            return Err(CoreError::InvalidInput(format!(
                "segment {segment_id} is locked"
            )));
        }
        if self.segments[idx].status == SegmentStatus::Approved {
            return Err(CoreError::InvalidInput(format!(
                "segment {segment_id} is approved; reopen it before applying a match"
            )));
        }

        let segment = &mut self.segments[idx];
        segment.target_text = result.target_text.clone();
        segment.translation_method = TranslationMethod::MemoryMatch;
        segment.match_percentage = Some(result.match_percentage);
        segment.confidence = result.match_percentage;
        segment.last_modified = Utc::now();

        self.uncommitted.remove(segment_id);
        self.set_status(idx, SegmentStatus::Translated);
        self.emit_mutation(segment_id, MutationKind::Suggested);
        Ok(())
    }

    /// Apply a machine-generated suggestion. Lands as an uncommitted
    /// InProgress edit so the usual debounced commit path promotes it.
    pub fn apply_machine_suggestion(
        &mut self,
        segment_id: &str,
        target_text: &str,
        confidence: u8,
    ) -> CoreResult<()> {
        let idx = self.index_of(segment_id)?;
        if self.segments[idx].is_locked {
            return Err(CoreError::InvalidInput(format!(
                "segment {segment_id} is locked"
            )));
        }
        if self.segments[idx].status == SegmentStatus::Approved {
            return Err(CoreError::InvalidInput(format!(
                "segment {segment_id} is approved; reopen it before applying a suggestion"
            )));
        }

        let segment = &mut self.segments[idx];
        segment.target_text = target_text.to_string();
        segment.translation_method = TranslationMethod::MachineGenerated;
        segment.match_percentage = None;
        segment.confidence = confidence.min(100);
        segment.last_modified = Utc::now();

        self.uncommitted.insert(segment_id.to_string());
        if segment.status == SegmentStatus::Pending && !target_text.is_empty() {
            self.set_status(idx, SegmentStatus::InProgress);
        }
        self.emit_mutation(segment_id, MutationKind::Suggested);
        Ok(())
    }

    /// Debounced commit: promote uncommitted InProgress segments with
    /// non-empty targets to Translated and clear the uncommitted set.
    /// Called by the autosave loop at the end of each quiet period.
    pub fn commit_pending_edits(&mut self) {
        let ids: Vec<String> = self.uncommitted.drain().collect();
        for segment_id in ids {
            let Some(&idx) = self.index.get(&segment_id) else {
                continue;
            };
            if self.segments[idx].status == SegmentStatus::InProgress
                && !self.segments[idx].target_text.is_empty()
            {
                self.set_status(idx, SegmentStatus::Translated);
                self.emit_mutation(&segment_id, MutationKind::Committed);
            }
        }
    }

    /// Explicit user action: Translated -> Reviewed.
    pub fn mark_reviewed(&mut self, segment_id: &str) -> CoreResult<()> {
        let idx = self.index_of(segment_id)?;
        if self.segments[idx].status != SegmentStatus::Translated {
            return Err(CoreError::InvalidInput(format!(
                "segment {segment_id} must be translated before review"
            )));
        }
        self.set_status(idx, SegmentStatus::Reviewed);
        self.emit_mutation(segment_id, MutationKind::StatusChanged);
        Ok(())
    }

    /// Explicit user action: Translated/Reviewed -> Approved.
    /// Approving an already approved segment is a no-op and must not refire
    /// unit completion.
    pub fn approve(&mut self, segment_id: &str) -> CoreResult<()> {
        let idx = self.index_of(segment_id)?;
        match self.segments[idx].status {
            SegmentStatus::Approved => return Ok(()),
            SegmentStatus::Translated | SegmentStatus::Reviewed => {}
            other => {
                return Err(CoreError::InvalidInput(format!(
                    "segment {segment_id} cannot be approved from {}",
                    other.as_str()
                )));
            }
        }
        self.set_status(idx, SegmentStatus::Approved);
        self.emit_mutation(segment_id, MutationKind::StatusChanged);
        self.evaluate_completion();
        Ok(())
    }

    /// Explicit "reopen" action: Approved -> Translated. Re-arms the
    /// completion latch.
    pub fn reopen(&mut self, segment_id: &str) -> CoreResult<()> {
        let idx = self.index_of(segment_id)?;
        if self.segments[idx].status != SegmentStatus::Approved {
            return Err(CoreError::InvalidInput(format!(
                "segment {segment_id} is not approved"
            )));
        }
        self.set_status(idx, SegmentStatus::Translated);
        self.completion_fired = false;
        self.emit_mutation(segment_id, MutationKind::StatusChanged);
        Ok(())
    }

    /// Explicit lock action; only valid with a non-empty target.
    pub fn lock(&mut self, segment_id: &str) -> CoreResult<()> {
        let idx = self.index_of(segment_id)?;
        if self.segments[idx].target_text.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "segment {segment_id} has no target text to lock"
            )));
        }
        self.segments[idx].is_locked = true;
        self.segments[idx].last_modified = Utc::now();
        self.emit_mutation(segment_id, MutationKind::Locked);
        Ok(())
    }

    pub fn unlock(&mut self, segment_id: &str) -> CoreResult<()> {
        let idx = self.index_of(segment_id)?;
        self.segments[idx].is_locked = false;
        self.segments[idx].last_modified = Utc::now();
        self.emit_mutation(segment_id, MutationKind::Unlocked);
        Ok(())
    }

    /// Explicit reset: clears target, provenance and lock, returns to
    /// Pending. The only way out of Translated without passing Approved.
    pub fn reset(&mut self, segment_id: &str) -> CoreResult<()> {
        let idx = self.index_of(segment_id)?;
        let segment = &mut self.segments[idx];
        segment.target_text.clear();
        segment.translation_method = TranslationMethod::None;
        segment.match_percentage = None;
        segment.confidence = 0;
        segment.is_locked = false;
        segment.last_modified = Utc::now();

        self.uncommitted.remove(segment_id);
        if self.segments[idx].status == SegmentStatus::Approved {
            self.completion_fired = false;
        }
        self.set_status(idx, SegmentStatus::Pending);
        self.emit_mutation(segment_id, MutationKind::Reset);
        Ok(())
    }

    /// Apply one segment from a remote content update.
    ///
    /// A local uncommitted edit within the debounce window wins a conflict;
    /// the remote payload is surfaced to the caller for explicit resolution
    /// and the local text stays untouched.
    pub fn try_apply_remote(&mut self, remote: &Segment) -> RemoteApplyOutcome {
        let Some(&idx) = self.index.get(&remote.id) else {
            return RemoteApplyOutcome::Ignored;
        };

        if self.uncommitted.contains(&remote.id) {
            self.events.emit(UnitEvent::ConflictDetected {
                segment_id: remote.id.clone(),
                timestamp: Utc::now(),
            });
            return RemoteApplyOutcome::Conflict;
        }

        if self.segments[idx].is_locked {
            return RemoteApplyOutcome::Ignored;
        }

        self.overwrite_segment(idx, remote);
        RemoteApplyOutcome::Applied
    }

    /// Resolution action "accept remote": overwrite local state with the
    /// remote snapshot, discarding the local uncommitted edit.
    pub fn accept_remote(&mut self, remote: &Segment) -> CoreResult<()> {
        let idx = self.index_of(&remote.id)?;
        self.uncommitted.remove(&remote.id);
        self.overwrite_segment(idx, remote);
        Ok(())
    }

    fn overwrite_segment(&mut self, idx: usize, remote: &Segment) {
        let was_approved = self.segments[idx].status == SegmentStatus::Approved;
        let status_changed = self.segments[idx].status != remote.status;

        let local = &mut self.segments[idx];
        local.target_text = remote.target_text.clone();
        local.translation_method = remote.translation_method;
        local.match_percentage = remote.match_percentage;
        local.confidence = remote.confidence;
        local.is_locked = remote.is_locked;
        local.status = remote.status;
        local.last_modified = Utc::now();

        let segment_id = local.id.clone();
        if status_changed {
            if was_approved {
                self.completion_fired = false;
            }
            self.events.emit(UnitEvent::SegmentStatusChanged {
                segment_id: segment_id.clone(),
                status: remote.status,
                timestamp: Utc::now(),
            });
        }
        self.emit_mutation(&segment_id, MutationKind::RemoteApplied);
        self.evaluate_completion();
    }

    fn index_of(&self, segment_id: &str) -> CoreResult<usize> {
        self.index
            .get(segment_id)
            .copied()
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown segment {segment_id}")))
    }

    fn set_status(&mut self, idx: usize, status: SegmentStatus) {
        if self.segments[idx].status == status {
            return;
        }
        self.segments[idx].status = status;
        self.segments[idx].last_modified = Utc::now();
        self.events.emit(UnitEvent::SegmentStatusChanged {
            segment_id: self.segments[idx].id.clone(),
            status,
            timestamp: Utc::now(),
        });
    }

    fn all_approved(&self) -> bool {
        self.segments
            .iter()
            .all(|s| s.status == SegmentStatus::Approved)
    }

    fn evaluate_completion(&mut self) {
        if self.completion_fired || self.segments.is_empty() || !self.all_approved() {
            return;
        }
        self.completion_fired = true;
        self.events.emit(UnitEvent::UnitCompleted {
            unit_id: self.unit_id.clone(),
            timestamp: Utc::now(),
        });
    }

    fn emit_mutation(&self, segment_id: &str, kind: MutationKind) {
        let mutation = SegmentMutation {
            segment_id: segment_id.to_string(),
            kind,
            at: Utc::now(),
        };
        if self.mutation_tx.send(mutation).is_err() {
            warn!("mutation receiver dropped for unit {}", self.unit_id);
        }
    }
}
