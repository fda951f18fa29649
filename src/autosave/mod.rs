mod loop_worker;
mod state;
mod store;

pub use state::{AutoSaveConfig, AutoSaveState, RestorationState};
pub use store::SnapshotStore;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::warn;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::events::{UnitEvent, UnitEventBus};
use crate::registry::{Segment, SegmentMutation, SegmentRegistry};

use loop_worker::autosave_loop;

/// Identity of the persisted unit a coordinator writes for.
#[derive(Debug, Clone)]
pub struct UnitIds {
    pub workflow_id: String,
    pub project_id: String,
    pub target_language: String,
}

/// Shared between the coordinator handle and its debounce loop.
pub(crate) struct SaveContext {
    pub(crate) registry: Arc<Mutex<SegmentRegistry>>,
    pub(crate) store: Arc<dyn SnapshotStore>,
    pub(crate) state: Arc<Mutex<AutoSaveState>>,
    pub(crate) state_tx: Arc<watch::Sender<AutoSaveState>>,
    pub(crate) events: UnitEventBus,
    pub(crate) unit: UnitIds,
    pub(crate) config: AutoSaveConfig,
}

impl SaveContext {
    pub(crate) async fn publish<F>(&self, apply: F)
    where
        F: FnOnce(&mut AutoSaveState),
    {
        publish_update(&self.state, &self.state_tx, &self.events, apply).await;
    }
}

async fn publish_update<F>(
    state: &Mutex<AutoSaveState>,
    state_tx: &watch::Sender<AutoSaveState>,
    events: &UnitEventBus,
    apply: F,
) where
    F: FnOnce(&mut AutoSaveState),
{
    let snapshot = {
        let mut guard = state.lock().await;
        apply(&mut guard);
        guard.clone()
    };
    let _ = state_tx.send(snapshot.clone());
    events.emit(UnitEvent::SaveStatusChanged {
        is_saving: snapshot.is_saving,
        last_saved_at: snapshot.last_saved_at,
        error: snapshot.last_error,
        timestamp: Utc::now(),
    });
}

/// Debounces registry mutations into full-snapshot workflow writes and owns
/// the unit's `AutoSaveState`.
///
/// Lifecycle: construct, `restore()` exactly once, `start()` the debounce
/// loop, `close()` on unit switch. The restoration gate means the write path
/// stays disarmed until `restore()` has finished, no matter how many
/// mutations arrive in the meantime.
pub struct AutoSaveCoordinator {
    store: Arc<dyn SnapshotStore>,
    unit: UnitIds,
    config: AutoSaveConfig,
    events: UnitEventBus,
    state: Arc<Mutex<AutoSaveState>>,
    state_tx: Arc<watch::Sender<AutoSaveState>>,
    state_rx: watch::Receiver<AutoSaveState>,
    force_tx: Option<mpsc::Sender<oneshot::Sender<Result<()>>>>,
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl AutoSaveCoordinator {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        unit: UnitIds,
        config: AutoSaveConfig,
        events: UnitEventBus,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(AutoSaveState::default());
        Self {
            store,
            unit,
            config,
            events,
            state: Arc::new(Mutex::new(AutoSaveState::default())),
            state_tx: Arc::new(state_tx),
            state_rx,
            force_tx: None,
            handle: None,
            cancel_token: CancellationToken::new(),
        }
    }

    pub async fn state(&self) -> AutoSaveState {
        self.state.lock().await.clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<AutoSaveState> {
        self.state_rx.clone()
    }

    /// Attempt to load prior saved state. Allowed exactly once per
    /// coordinator: a second call while restoring or after completion is
    /// rejected rather than overlapping restorations. The attempt counts as
    /// made whether or not the load succeeds, which is what arms the write
    /// path either way.
    pub async fn restore(&self) -> CoreResult<Option<Vec<Segment>>> {
        {
            let mut guard = self.state.lock().await;
            match guard.restoration {
                RestorationState::NotStarted => guard.restoration = RestorationState::Restoring,
                RestorationState::Restoring => {
                    return Err(CoreError::InvalidInput(
                        "restoration already in flight".into(),
                    ));
                }
                RestorationState::Complete => {
                    return Err(CoreError::InvalidInput(
                        "restoration already attempted".into(),
                    ));
                }
            }
        }
        publish_update(&self.state, &self.state_tx, &self.events, |_| {}).await;

        let loaded = self
            .store
            .load_snapshot(&self.unit.project_id, &self.unit.target_language)
            .await;

        match loaded {
            Ok(workflow) => {
                publish_update(&self.state, &self.state_tx, &self.events, |state| {
                    state.restoration = RestorationState::Complete;
                })
                .await;
                Ok(workflow.map(|w| w.segments))
            }
            Err(err) => {
                warn!(
                    "failed to restore unit {}: {err:#}",
                    self.unit.workflow_id
                );
                let message = err.to_string();
                publish_update(&self.state, &self.state_tx, &self.events, |state| {
                    state.restoration = RestorationState::Complete;
                    state.last_error = Some(message.clone());
                })
                .await;
                Err(CoreError::RestorationFailure(message))
            }
        }
    }

    /// Arm the debounce loop over the given registry's mutation stream.
    pub fn start(
        &mut self,
        registry: Arc<Mutex<SegmentRegistry>>,
        mutation_rx: mpsc::UnboundedReceiver<SegmentMutation>,
    ) -> CoreResult<()> {
        if self.handle.is_some() {
            return Err(CoreError::InvalidInput(
                "autosave coordinator already started".into(),
            ));
        }

        let (force_tx, force_rx) = mpsc::channel(8);
        let ctx = Arc::new(SaveContext {
            registry,
            store: self.store.clone(),
            state: self.state.clone(),
            state_tx: self.state_tx.clone(),
            events: self.events.clone(),
            unit: self.unit.clone(),
            config: self.config.clone(),
        });

        let token = self.cancel_token.clone();
        self.handle = Some(tokio::spawn(autosave_loop(ctx, mutation_rx, force_rx, token)));
        self.force_tx = Some(force_tx);
        Ok(())
    }

    /// Manual, immediate persistence. Safe to call while a debounced save is
    /// pending: writes are total snapshots and the loop serializes them, so
    /// the later write wins.
    pub async fn force_save(&self) -> CoreResult<()> {
        {
            let guard = self.state.lock().await;
            if guard.restoration != RestorationState::Complete {
                return Err(CoreError::InvalidInput(
                    "cannot save before restoration has been attempted".into(),
                ));
            }
        }

        let Some(force_tx) = &self.force_tx else {
            return Err(CoreError::InvalidInput(
                "autosave coordinator not started".into(),
            ));
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        force_tx
            .send(reply_tx)
            .await
            .map_err(|_| CoreError::TransientIo("autosave loop is gone".into()))?;

        match reply_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(CoreError::TransientIo(err.to_string())),
            Err(_) => Err(CoreError::TransientIo(
                "autosave loop dropped the save request".into(),
            )),
        }
    }

    /// Cancel the debounce timer and any unresolved restoration, then wait
    /// for the loop to finish. An already-dispatched write runs to
    /// completion; its result is ignored.
    pub async fn close(&mut self) {
        self.cancel_token.cancel();
        self.force_tx = None;
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!("autosave loop task failed to join: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{seed_segments, ContentSection};
    use crate::db::models::WorkflowRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    struct MockStore {
        saves: std::sync::Mutex<Vec<WorkflowRecord>>,
        load_gate: Semaphore,
        restored: std::sync::Mutex<Option<WorkflowRecord>>,
        fail_saves: AtomicUsize,
        fail_load: bool,
    }

    impl MockStore {
        fn new() -> Self {
            Self {
                saves: std::sync::Mutex::new(Vec::new()),
                load_gate: Semaphore::new(usize::MAX >> 3),
                restored: std::sync::Mutex::new(None),
                fail_saves: AtomicUsize::new(0),
                fail_load: false,
            }
        }

        fn gated() -> Self {
            let mut store = Self::new();
            store.load_gate = Semaphore::new(0);
            store
        }

        fn save_count(&self) -> usize {
            self.saves.lock().unwrap().len()
        }

        fn release_load(&self) {
            self.load_gate.add_permits(1);
        }
    }

    #[async_trait::async_trait]
    impl SnapshotStore for MockStore {
        async fn load_snapshot(
            &self,
            _project_id: &str,
            _target_language: &str,
        ) -> Result<Option<WorkflowRecord>> {
            let permit = self.load_gate.acquire().await.expect("gate closed");
            permit.forget();
            if self.fail_load {
                anyhow::bail!("storage unreachable");
            }
            Ok(self.restored.lock().unwrap().clone())
        }

        async fn save_snapshot(&self, workflow: &WorkflowRecord) -> Result<()> {
            if self.fail_saves.load(Ordering::SeqCst) > 0 {
                self.fail_saves.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("transient write failure");
            }
            self.saves.lock().unwrap().push(workflow.clone());
            Ok(())
        }
    }

    fn unit_ids() -> UnitIds {
        UnitIds {
            workflow_id: "w1".into(),
            project_id: "p1".into(),
            target_language: "de".into(),
        }
    }

    fn fast_config() -> AutoSaveConfig {
        AutoSaveConfig {
            debounce: Duration::from_millis(30),
            retry_backoff: Duration::from_millis(30),
        }
    }

    fn test_registry(
        events: &UnitEventBus,
    ) -> (
        Arc<Mutex<SegmentRegistry>>,
        mpsc::UnboundedReceiver<SegmentMutation>,
    ) {
        let _ = env_logger::builder().is_test(true).try_init();
        let sections = vec![
            ContentSection {
                title: "a".into(),
                content: "first section text".into(),
            },
            ContentSection {
                title: "b".into(),
                content: "second section text".into(),
            },
        ];
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = SegmentRegistry::new(
            "w1".into(),
            seed_segments("w1", &sections),
            tx,
            events.clone(),
        );
        (Arc::new(Mutex::new(registry)), rx)
    }

    // Injected slow-restore + fast-mutation race: no write may be issued
    // until the restoration attempt has finished.
    #[tokio::test]
    async fn no_write_before_restoration_completes() {
        let store = Arc::new(MockStore::gated());
        let events = UnitEventBus::new(64);
        let (registry, mutation_rx) = test_registry(&events);

        let mut coordinator = AutoSaveCoordinator::new(
            store.clone(),
            unit_ids(),
            fast_config(),
            events.clone(),
        );
        coordinator
            .start(registry.clone(), mutation_rx)
            .unwrap();
        let coordinator = Arc::new(coordinator);

        let restore_task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.restore().await })
        };

        // Mutations land while the restore is still blocked on the store.
        registry
            .lock()
            .await
            .edit_target("w1:0", "erste Übersetzung")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.save_count(), 0, "write issued during restoration");

        store.release_load();
        let restored = restore_task.await.unwrap().unwrap();
        assert!(restored.is_none());

        // With restoration attempted, the held mutation flushes.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.save_count(), 1);
        let saved = store.saves.lock().unwrap()[0].clone();
        assert_eq!(saved.segments[0].target_text, "erste Übersetzung");
    }

    #[tokio::test]
    async fn burst_of_mutations_coalesces_into_one_snapshot_write() {
        let store = Arc::new(MockStore::new());
        let events = UnitEventBus::new(64);
        let (registry, mutation_rx) = test_registry(&events);

        let mut coordinator = AutoSaveCoordinator::new(
            store.clone(),
            unit_ids(),
            fast_config(),
            events.clone(),
        );
        coordinator.restore().await.unwrap();
        coordinator.start(registry.clone(), mutation_rx).unwrap();

        {
            let mut reg = registry.lock().await;
            reg.edit_target("w1:0", "e").unwrap();
            reg.edit_target("w1:0", "ei").unwrap();
            reg.edit_target("w1:0", "ein").unwrap();
            reg.edit_target("w1:1", "zwei").unwrap();
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.save_count(), 1);

        // Full current segment set, not a diff.
        let saved = store.saves.lock().unwrap()[0].clone();
        assert_eq!(saved.segments.len(), 2);
        assert_eq!(saved.segments[0].target_text, "ein");
        assert_eq!(saved.segments[1].target_text, "zwei");
        coordinator.close().await;
    }

    // The flush itself commits pending edits, which emits mutations; those
    // must not count as new dirt or every flush schedules a second write.
    #[tokio::test]
    async fn flush_does_not_schedule_a_followup_write() {
        let store = Arc::new(MockStore::new());
        let events = UnitEventBus::new(64);
        let (registry, mutation_rx) = test_registry(&events);

        let mut coordinator = AutoSaveCoordinator::new(
            store.clone(),
            unit_ids(),
            fast_config(),
            events.clone(),
        );
        coordinator.restore().await.unwrap();
        coordinator.start(registry.clone(), mutation_rx).unwrap();

        registry.lock().await.edit_target("w1:0", "einmal").unwrap();

        // Several quiet windows after the flush there is still exactly one write.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(store.save_count(), 1);
        coordinator.close().await;
    }

    #[tokio::test]
    async fn failed_write_sets_last_error_and_retries_without_losing_edits() {
        let store = Arc::new(MockStore::new());
        store.fail_saves.store(1, Ordering::SeqCst);
        let events = UnitEventBus::new(64);
        let (registry, mutation_rx) = test_registry(&events);

        let mut coordinator = AutoSaveCoordinator::new(
            store.clone(),
            unit_ids(),
            fast_config(),
            events.clone(),
        );
        coordinator.restore().await.unwrap();
        coordinator.start(registry.clone(), mutation_rx).unwrap();

        registry
            .lock()
            .await
            .edit_target("w1:0", "bleibt erhalten")
            .unwrap();

        // First attempt fails and surfaces through last_error.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(coordinator.state().await.last_error.is_some());
        assert_eq!(store.save_count(), 0);
        assert_eq!(
            registry.lock().await.get("w1:0").unwrap().target_text,
            "bleibt erhalten"
        );

        // Retry succeeds and clears the error.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.save_count(), 1);
        let state = coordinator.state().await;
        assert!(state.last_error.is_none());
        assert!(state.last_saved_at.is_some());
        coordinator.close().await;
    }

    #[tokio::test]
    async fn force_save_writes_immediately() {
        let store = Arc::new(MockStore::new());
        let events = UnitEventBus::new(64);
        let (registry, mutation_rx) = test_registry(&events);

        let mut coordinator = AutoSaveCoordinator::new(
            store.clone(),
            unit_ids(),
            AutoSaveConfig {
                debounce: Duration::from_secs(60),
                retry_backoff: Duration::from_secs(60),
            },
            events.clone(),
        );
        coordinator.restore().await.unwrap();
        coordinator.start(registry.clone(), mutation_rx).unwrap();

        registry.lock().await.edit_target("w1:0", "sofort").unwrap();
        coordinator.force_save().await.unwrap();
        assert_eq!(store.save_count(), 1);
        coordinator.close().await;
    }

    #[tokio::test]
    async fn restore_is_rejected_after_the_first_attempt() {
        let store = Arc::new(MockStore::new());
        let events = UnitEventBus::new(64);
        let coordinator =
            AutoSaveCoordinator::new(store, unit_ids(), fast_config(), events);

        coordinator.restore().await.unwrap();
        assert!(matches!(
            coordinator.restore().await,
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn failed_restore_still_arms_the_write_path() {
        let mut mock = MockStore::new();
        mock.fail_load = true;
        let store = Arc::new(mock);
        let events = UnitEventBus::new(64);
        let (registry, mutation_rx) = test_registry(&events);

        let mut coordinator = AutoSaveCoordinator::new(
            store.clone(),
            unit_ids(),
            fast_config(),
            events.clone(),
        );

        assert!(matches!(
            coordinator.restore().await,
            Err(CoreError::RestorationFailure(_))
        ));
        let state = coordinator.state().await;
        assert_eq!(state.restoration, RestorationState::Complete);
        assert!(state.last_error.is_some());

        // Fresh initialization proceeds and edits persist normally.
        coordinator.start(registry.clone(), mutation_rx).unwrap();
        registry.lock().await.edit_target("w1:0", "neu").unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.save_count(), 1);
        coordinator.close().await;
    }
}
