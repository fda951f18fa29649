//! Translation memory matching and collaborative segment synchronization.
//!
//! The crate is organized around one translation unit at a time (one content
//! asset crossed with one target language):
//!
//! - [`matching`] ranks translation-memory candidates against a source text.
//! - [`registry`] holds the in-memory segment state machine for an open unit.
//! - [`autosave`] debounces registry mutations into full-snapshot writes,
//!   gated behind a one-shot restoration attempt.
//! - [`collab`] layers presence and conflict-surfacing content sync between
//!   sessions viewing the same unit.
//! - [`db`] persists projects, workflow snapshots, and the shared
//!   translation memory in SQLite.
//! - [`unit`] ties the above together behind a single session facade.

pub mod autosave;
pub mod collab;
pub mod content;
pub mod db;
pub mod error;
pub mod events;
pub mod matching;
pub mod registry;
pub mod unit;

pub use autosave::{AutoSaveConfig, AutoSaveCoordinator, AutoSaveState, RestorationState};
pub use collab::{CollabHub, CollaborationSession, PeerIdentity, Presence, PresenceConfig};
pub use content::ContentSection;
pub use db::Database;
pub use error::{CoreError, CoreResult};
pub use events::{UnitEvent, UnitEventBus};
pub use matching::{score, MatchResult, MatchType, ScorerConfig};
pub use registry::{Segment, SegmentRegistry, SegmentStatus, TranslationMethod};
pub use unit::TranslationUnitSession;
