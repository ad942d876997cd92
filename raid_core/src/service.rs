//! Request surface: create, join, take a turn, sweep stale encounters.
//!
//! Every mutation goes through the [`ConcurrencyController`]; the service
//! only gathers inputs (clock, character snapshot) before the loop and
//! publishes the completion summary after a terminal commit.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use raid_proto::{CharacterId, CompletionSummary, Encounter, EncounterId, EncounterStatus};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    character::{CharacterDirectory, DirectoryError},
    clock::Clock,
    context::EngineContext,
    controller::{Committed, ConcurrencyController, ControllerError},
    encounter::{self, InvariantViolation, JoinOutcome, NewEncounter, Rejection, TurnReport},
    error::ConfigError,
    notifier::CompletionNotifier,
    roster::{RosterError, RosterMode},
    store::{EncounterStore, StoreError},
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("monster count {count} is outside {min}..={max}")]
    InvalidCount { count: usize, min: usize, max: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("encounter {id} is busy, retry later ({attempts} attempts)")]
    RetryConflict { id: EncounterId, attempts: u32 },
    #[error("encounter {0} not found")]
    NotFound(EncounterId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("encounter {id} was failed after an integrity error: {violation}")]
    Integrity {
        id: EncounterId,
        violation: InvariantViolation,
    },
}

impl ServiceError {
    /// Only lost races are worth resubmitting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::RetryConflict { .. })
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidCount { .. } => "invalid-count",
            ServiceError::Config(_) => "configuration",
            ServiceError::Rejected(rejection) => rejection.code(),
            ServiceError::RetryConflict { .. } => "retry-conflict",
            ServiceError::NotFound(_) => "not-found",
            ServiceError::Store(_) => "store",
            ServiceError::Directory(_) => "directory",
            ServiceError::Integrity { .. } => "integrity",
        }
    }
}

impl From<RosterError> for ServiceError {
    fn from(err: RosterError) -> Self {
        match err {
            RosterError::CountOutOfRange { count, min, max } => {
                ServiceError::InvalidCount { count, min, max }
            }
            RosterError::Config(err) => ServiceError::Config(err),
        }
    }
}

impl From<ControllerError<Rejection>> for ServiceError {
    fn from(err: ControllerError<Rejection>) -> Self {
        match err {
            ControllerError::Rejected(rejection) => ServiceError::Rejected(rejection),
            ControllerError::RetryConflict { id, attempts } => {
                ServiceError::RetryConflict { id, attempts }
            }
            ControllerError::NotFound(id) => ServiceError::NotFound(id),
            ControllerError::Store(err) => ServiceError::Store(err),
            ControllerError::Invariant { id, violation } => {
                ServiceError::Integrity { id, violation }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub region: String,
    pub monster_count: usize,
    pub difficulty: String,
    pub mode: RosterMode,
    /// Fixed seed for reproducible encounters; random when absent.
    pub seed: Option<u64>,
    pub thread_ref: Option<String>,
}

pub struct EncounterService<S, D> {
    ctx: EngineContext,
    controller: ConcurrencyController<S>,
    directory: Arc<D>,
    notifier: Arc<dyn CompletionNotifier>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
}

impl<S: EncounterStore, D: CharacterDirectory> EncounterService<S, D> {
    pub fn new(
        ctx: EngineContext,
        store: Arc<S>,
        directory: Arc<D>,
        notifier: Arc<dyn CompletionNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let controller = ConcurrencyController::new(store, Arc::clone(&ctx.config));
        Self {
            ctx,
            controller,
            directory,
            notifier,
            clock,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn store(&self) -> &Arc<S> {
        self.controller.store()
    }

    pub async fn create(&self, request: CreateRequest) -> Result<EncounterId, ServiceError> {
        let now = self.clock.now_ms();
        let sequence = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = EncounterId::new(format!("enc-{now}-{sequence}"));
        let rng_seed = request.seed.unwrap_or_else(rand::random);

        let record = encounter::create(
            &NewEncounter {
                id: id.clone(),
                region: request.region,
                difficulty: request.difficulty,
                mode: request.mode,
                monster_count: request.monster_count,
                rng_seed,
                created_at: now,
                thread_ref: request.thread_ref,
            },
            &self.ctx,
        )?;
        self.store().insert(&record).await?;
        Ok(id)
    }

    pub async fn join(
        &self,
        id: &EncounterId,
        character_id: &CharacterId,
    ) -> Result<JoinOutcome, ServiceError> {
        let profile = self.directory.character(character_id).await?;
        let now = self.clock.now_ms();
        let ctx = &self.ctx;
        let result = self
            .controller
            .mutate(id, |loaded| {
                encounter::join(loaded, &profile, now, ctx)
                    .map(|transition| (transition.encounter, transition.outcome))
            })
            .await;
        let committed = self.settle(id, result).await?;
        Ok(committed.value)
    }

    pub async fn take_turn(
        &self,
        id: &EncounterId,
        character_id: &CharacterId,
    ) -> Result<TurnReport, ServiceError> {
        let now = self.clock.now_ms();
        let ctx = &self.ctx;
        let result = self
            .controller
            .mutate(id, |loaded| {
                encounter::take_turn(loaded, character_id, now, ctx)
                    .map(|transition| (transition.encounter, transition.outcome))
            })
            .await;
        let committed = self.settle(id, result).await?;
        Ok(committed.value)
    }

    /// Force-fail every active encounter idle past the stale threshold.
    /// Returns the ids that were failed.
    pub async fn sweep_stale(&self) -> Result<Vec<EncounterId>, ServiceError> {
        let now = self.clock.now_ms();
        let threshold = self.ctx.config.lifecycle.stale_after_ms;
        let mut failed = Vec::new();
        for id in self.store().list_active(None).await? {
            let result = self
                .controller
                .mutate(&id, |loaded| {
                    encounter::force_fail_if_stale(loaded, now, threshold)
                        .map(|transition| (transition.encounter, transition.outcome))
                })
                .await;
            match result {
                Ok(committed) => {
                    self.publish(&committed.encounter);
                    failed.push(id);
                }
                Err(ControllerError::Rejected(rejection)) => {
                    debug!(
                        target: "raid::encounter",
                        encounter = %id,
                        reason = rejection.code(),
                        "sweep.skipped"
                    );
                }
                Err(ControllerError::RetryConflict { .. }) => {
                    debug!(target: "raid::encounter", encounter = %id, "sweep.contended");
                }
                Err(err) => {
                    warn!(
                        target: "raid::encounter",
                        encounter = %id,
                        error = %err,
                        "sweep.failed"
                    );
                }
            }
        }
        if !failed.is_empty() {
            info!(target: "raid::encounter", count = failed.len(), "sweep.completed");
        }
        Ok(failed)
    }

    pub async fn encounter(&self, id: &EncounterId) -> Result<Encounter, ServiceError> {
        self.store()
            .load(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.clone()))
    }

    pub async fn active_in_region(&self, region: &str) -> Result<Vec<EncounterId>, ServiceError> {
        Ok(self.store().list_active(Some(region.to_string())).await?)
    }

    /// Publish the summary after a terminal commit, and fail the encounter when
    /// a mutation would have corrupted it.
    async fn settle<R>(
        &self,
        id: &EncounterId,
        result: Result<Committed<R>, ControllerError<Rejection>>,
    ) -> Result<Committed<R>, ServiceError> {
        match result {
            Ok(committed) => {
                self.publish(&committed.encounter);
                Ok(committed)
            }
            Err(ControllerError::Invariant { id: bad, violation }) => {
                self.fail_for_integrity(id, &violation).await;
                Err(ServiceError::Integrity { id: bad, violation })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn fail_for_integrity(&self, id: &EncounterId, violation: &InvariantViolation) {
        let now = self.clock.now_ms();
        let reason = format!("integrity: {violation}");
        let result = self
            .controller
            .mutate(id, |loaded| {
                encounter::force_fail(loaded, &reason, now)
                    .map(|transition| (transition.encounter, transition.outcome))
            })
            .await;
        match result {
            Ok(committed) => self.publish(&committed.encounter),
            Err(err) => {
                error!(
                    target: "raid::encounter",
                    encounter = %id,
                    error = %err,
                    "encounter.force_fail_failed"
                );
            }
        }
    }

    fn publish(&self, record: &Encounter) {
        if record.status == EncounterStatus::Active {
            return;
        }
        if let Some(summary) = CompletionSummary::from_encounter(record) {
            self.notifier.notify(&summary);
        }
    }
}
