use std::{io, path::PathBuf};

use thiserror::Error;

use raid_proto::{CharacterId, Rarity};

use crate::catalog::FactionRank;

/// Fatal configuration problems. These abort encounter creation, or fail the
/// encounter when they surface mid-fight, and are never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read configuration from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("tier distribution `{0}` is empty")]
    EmptyDistribution(String),
    #[error("tier distribution `{name}` has non-positive total weight {total}")]
    NonPositiveWeight { name: String, total: f64 },
    #[error("tier distribution `{name}` has invalid weight {weight} for tier {tier}")]
    InvalidWeight { name: String, tier: u8, weight: f64 },
    #[error("tier {tier} in distribution `{name}` is outside 1..=10")]
    TierOutOfRange { name: String, tier: u8 },
    #[error("tier {tier} in distribution `{name}` has no monsters in the catalog")]
    UnknownTier { name: String, tier: u8 },
    #[error("duplicate difficulty profile `{0}`")]
    DuplicateProfile(String),
    #[error("unknown difficulty profile `{0}`")]
    UnknownProfile(String),
    #[error("difficulty profile `{0}` has no boss tier (5-10)")]
    NoBossTier(String),
    #[error("difficulty profile `{0}` has no support tiers (1-4)")]
    NoSupportTiers(String),
    #[error("no monsters of tier {tier} roam region `{region}`")]
    NoCandidates { tier: u8, region: String },
    #[error("faction `{faction}` has no {rank:?} monsters")]
    NoFactionCandidates { faction: String, rank: FactionRank },
    #[error("species runs could not be arranged after {attempts} attempts")]
    GroupingInfeasible { attempts: u32 },
    #[error("battle configuration is invalid: {0}")]
    InvalidBattle(String),
    #[error("roster configuration is invalid: {0}")]
    InvalidRoster(String),
    #[error("loot table has no items")]
    EmptyLootTable,
    #[error("loot item `{name}` has invalid weight {weight}")]
    InvalidLootWeight { name: String, weight: f64 },
    #[error("no {rarity:?} loot item can be awarded to {character}")]
    NoLootCandidate {
        character: CharacterId,
        rarity: Rarity,
    },
    #[error("controller configuration is invalid: {0}")]
    InvalidController(String),
    #[error("loot thresholds are invalid: {0}")]
    InvalidLootThresholds(String),
}
