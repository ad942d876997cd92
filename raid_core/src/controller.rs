//! Optimistic read-modify-write loop over an [`EncounterStore`].

use std::sync::Arc;

use raid_proto::{Encounter, EncounterId};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    config::EngineConfig,
    encounter::{check_invariants, InvariantViolation},
    store::{EncounterStore, StoreError},
};

#[derive(Debug, Error)]
pub enum ControllerError<E> {
    /// The mutation itself refused; nothing was written.
    #[error("{0}")]
    Rejected(E),
    #[error("encounter {id} kept changing underneath us after {attempts} attempts")]
    RetryConflict { id: EncounterId, attempts: u32 },
    #[error("encounter {0} not found")]
    NotFound(EncounterId),
    #[error("store failure: {0}")]
    Store(StoreError),
    #[error("mutation of encounter {id} would break an invariant: {violation}")]
    Invariant {
        id: EncounterId,
        violation: InvariantViolation,
    },
}

impl<E> ControllerError<E> {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ControllerError::RetryConflict { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Committed<R> {
    pub value: R,
    pub encounter: Encounter,
    pub version: u64,
    pub attempts: u32,
}

pub struct ConcurrencyController<S> {
    store: Arc<S>,
    config: Arc<EngineConfig>,
}

impl<S> Clone for ConcurrencyController<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: EncounterStore> ConcurrencyController<S> {
    pub fn new(store: Arc<S>, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Load, apply `mutation`, and commit conditioned on the loaded version.
    /// On a version conflict the record is reloaded and `mutation` runs again,
    /// so it must not have side effects.
    pub async fn mutate<R, E, F>(
        &self,
        id: &EncounterId,
        mut mutation: F,
    ) -> Result<Committed<R>, ControllerError<E>>
    where
        F: FnMut(&Encounter) -> Result<(Encounter, R), E> + Send,
        R: Send,
        E: Send,
    {
        let max_attempts = self.config.controller.max_attempts;
        for attempt in 1..=max_attempts {
            let loaded = self
                .store
                .load(id)
                .await
                .map_err(ControllerError::Store)?
                .ok_or_else(|| ControllerError::NotFound(id.clone()))?;

            let (mut next, value) = mutation(&loaded).map_err(ControllerError::Rejected)?;
            next.version = loaded.version;
            check_invariants(&next, &self.config).map_err(|violation| {
                ControllerError::Invariant {
                    id: id.clone(),
                    violation,
                }
            })?;

            match self.store.commit(loaded.version, &next).await {
                Ok(version) => {
                    next.version = version;
                    debug!(
                        target: "raid::controller",
                        encounter = %id,
                        version,
                        attempt,
                        "controller.committed"
                    );
                    return Ok(Committed {
                        value,
                        encounter: next,
                        version,
                        attempts: attempt,
                    });
                }
                Err(err) if err.is_conflict() => {
                    debug!(
                        target: "raid::controller",
                        encounter = %id,
                        attempt,
                        error = %err,
                        "controller.conflict"
                    );
                }
                Err(err) => return Err(ControllerError::Store(err)),
            }
        }

        warn!(
            target: "raid::controller",
            encounter = %id,
            attempts = max_attempts,
            "controller.retry_exhausted"
        );
        Err(ControllerError::RetryConflict {
            id: id.clone(),
            attempts: max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        future::Future,
        sync::atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::store::InMemoryEncounterStore;
    use raid_proto::{EncounterStatus, MonsterEntry, RosterKind};

    fn record() -> Encounter {
        let monsters = ["Cave Bat", "Cave Bat", "Giant Rat", "Giant Rat", "Cave Bat"]
            .into_iter()
            .map(|species| MonsterEntry {
                species: species.to_string(),
                tier: 1,
                max_hearts: 2,
                current_hearts: 2,
                is_boss: false,
                damage: 1,
                defeated_at: None,
                defeated_by: None,
            })
            .collect();
        Encounter {
            id: EncounterId::new("enc-ctl"),
            region: "marsh".to_string(),
            difficulty: "Beginner".to_string(),
            roster: RosterKind::Standard,
            status: EncounterStatus::Active,
            monsters,
            current_monster_index: 0,
            participants: Vec::new(),
            current_turn: 0,
            defeated: Vec::new(),
            loot: BTreeMap::new(),
            version: 1,
            rng_seed: 1,
            created_at: 0,
            updated_at: 0,
            thread_ref: None,
            failure_reason: None,
        }
    }

    fn touch(encounter: &Encounter) -> Result<(Encounter, u64), String> {
        let mut next = encounter.clone();
        next.updated_at += 1;
        Ok((next, encounter.updated_at + 1))
    }

    /// Store whose first `conflicts` commits report a concurrent writer.
    struct FlakyStore {
        inner: InMemoryEncounterStore,
        conflicts: AtomicU32,
    }

    impl EncounterStore for FlakyStore {
        fn load(
            &self,
            id: &EncounterId,
        ) -> impl Future<Output = Result<Option<Encounter>, StoreError>> + Send {
            self.inner.load(id)
        }

        fn insert(
            &self,
            record: &Encounter,
        ) -> impl Future<Output = Result<(), StoreError>> + Send {
            self.inner.insert(record)
        }

        async fn commit(
            &self,
            expected_version: u64,
            record: &Encounter,
        ) -> Result<u64, StoreError> {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::VersionConflict {
                    id: record.id.clone(),
                    expected: expected_version,
                    actual: expected_version + 1,
                });
            }
            self.inner.commit(expected_version, record).await
        }

        fn list_active(
            &self,
            region: Option<String>,
        ) -> impl Future<Output = Result<Vec<EncounterId>, StoreError>> + Send {
            self.inner.list_active(region)
        }
    }

    async fn flaky(conflicts: u32) -> Arc<FlakyStore> {
        let store = FlakyStore {
            inner: InMemoryEncounterStore::new(),
            conflicts: AtomicU32::new(conflicts),
        };
        store.insert(&record()).await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn commits_and_bumps_version() {
        let store = Arc::new(InMemoryEncounterStore::new());
        store.insert(&record()).await.unwrap();
        let controller = ConcurrencyController::new(store, EngineConfig::builtin());
        let committed = controller
            .mutate(&EncounterId::new("enc-ctl"), touch)
            .await
            .unwrap();
        assert_eq!(committed.version, 2);
        assert_eq!(committed.encounter.version, 2);
        assert_eq!(committed.value, 1);
        assert_eq!(committed.attempts, 1);
    }

    #[tokio::test]
    async fn retries_after_a_conflict() {
        let controller = ConcurrencyController::new(flaky(2).await, EngineConfig::builtin());
        let mut calls = 0;
        let committed = controller
            .mutate(&EncounterId::new("enc-ctl"), |encounter| {
                calls += 1;
                touch(encounter)
            })
            .await
            .unwrap();
        assert_eq!(committed.attempts, 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_attempt_budget() {
        let controller = ConcurrencyController::new(flaky(3).await, EngineConfig::builtin());
        let err = controller
            .mutate(&EncounterId::new("enc-ctl"), touch)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            ControllerError::RetryConflict { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let controller = ConcurrencyController::new(flaky(0).await, EngineConfig::builtin());
        let mut calls = 0;
        let err = controller
            .mutate(&EncounterId::new("enc-ctl"), |_: &Encounter| {
                calls += 1;
                Err::<(Encounter, ()), _>("nope")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Rejected("nope")));
        assert_eq!(calls, 1);
        let stored = controller
            .store()
            .load(&EncounterId::new("enc-ctl"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn missing_encounter() {
        let store = Arc::new(InMemoryEncounterStore::new());
        let controller = ConcurrencyController::new(store, EngineConfig::builtin());
        let err = controller
            .mutate(&EncounterId::new("nowhere"), touch)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NotFound(_)));
    }

    #[tokio::test]
    async fn invariant_breaks_are_refused() {
        let controller = ConcurrencyController::new(flaky(0).await, EngineConfig::builtin());
        let err = controller
            .mutate(&EncounterId::new("enc-ctl"), |encounter: &Encounter| {
                let mut next = encounter.clone();
                next.current_monster_index = 3;
                Ok::<_, String>((next, ()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Invariant { .. }));
    }
}
