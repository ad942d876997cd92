//! Core engine for raid and wave encounters.
//!
//! Rosters are generated from weighted difficulty profiles, encounters advance
//! through pure transitions, and every mutation is committed through an
//! optimistic retry loop against an [`EncounterStore`].

pub mod battle;
pub mod catalog;
pub mod character;
pub mod clock;
pub mod config;
pub mod context;
pub mod controller;
pub mod difficulty;
pub mod encounter;
mod error;
pub mod loot;
pub mod notifier;
pub mod roster;
pub mod service;
pub mod store;

pub use battle::{OutcomeClass, TurnOutcome};
pub use catalog::{FactionRank, MonsterCatalog, MonsterTemplate};
pub use character::{CharacterDirectory, CharacterProfile, DirectoryError, StaticDirectory};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use controller::{Committed, ConcurrencyController, ControllerError};
pub use difficulty::{DifficultyProfile, DifficultyProfiles, TierDistribution, TierWeight};
pub use encounter::{InvariantViolation, JoinOutcome, Rejection, Transition, TurnReport};
pub use error::ConfigError;
pub use loot::{LootItem, LootTable};
pub use notifier::{ChannelNotifier, CompletionNotifier, LogNotifier};
pub use roster::{RosterError, RosterGenerator, RosterMode};
pub use service::{CreateRequest, EncounterService, ServiceError};
pub use store::{EncounterStore, InMemoryEncounterStore, StoreError};
