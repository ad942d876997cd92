//! Tunable engine constants.
//!
//! Loaded from `engine_config.json` with an environment override
//! (`RAID_ENGINE_CONFIG_PATH`). Missing sections fall back to the defaults
//! below, which mirror the bundled file.

use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;

use crate::{battle::OutcomeClass, error::ConfigError};

pub const BUILTIN_ENGINE_CONFIG: &str = include_str!("data/engine_config.json");

/// Bounds on the size of any roster a record may carry.
pub const MIN_MONSTER_COUNT: usize = 5;
pub const MAX_MONSTER_COUNT: usize = 15;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub battle: BattleConfig,
    pub roster: RosterConfig,
    pub loot: LootThresholds,
    pub controller: ControllerConfig,
    pub lifecycle: LifecycleConfig,
}

impl EngineConfig {
    pub fn builtin() -> Arc<Self> {
        Self::from_json_str(BUILTIN_ENGINE_CONFIG)
            .map(Arc::new)
            .expect("builtin engine config should parse")
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.battle.validate()?;
        self.roster.validate()?;
        self.loot.validate()?;
        self.controller.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BattleConfig {
    /// Roll penalty for every party member beyond the first.
    pub party_penalty_per_member: i32,
    /// Roll penalty per monster tier.
    pub tier_penalty_per_tier: i32,
    pub low_tier: LowTierConfig,
    /// Outcome bands for tier 5+ monsters, ascending by `max_roll`.
    pub bands: Vec<BandConfig>,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            party_penalty_per_member: 2,
            tier_penalty_per_tier: 2,
            low_tier: LowTierConfig::default(),
            bands: default_bands(),
        }
    }
}

fn default_bands() -> Vec<BandConfig> {
    vec![
        BandConfig {
            class: OutcomeClass::Critical,
            max_roll: 15,
            monster_hearts: 0,
            participant_damage_pct: 200,
        },
        BandConfig {
            class: OutcomeClass::FullHit,
            max_roll: 45,
            monster_hearts: 1,
            participant_damage_pct: 100,
        },
        BandConfig {
            class: OutcomeClass::PartialHit,
            max_roll: 75,
            monster_hearts: 2,
            participant_damage_pct: 50,
        },
        BandConfig {
            class: OutcomeClass::Dodge,
            max_roll: 100,
            monster_hearts: 3,
            participant_damage_pct: 0,
        },
    ]
}

impl BattleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.bands.is_empty() {
            return Err(ConfigError::InvalidBattle("no outcome bands".to_string()));
        }
        if self
            .bands
            .windows(2)
            .any(|pair| pair[0].max_roll >= pair[1].max_roll)
        {
            return Err(ConfigError::InvalidBattle(
                "outcome bands must be strictly ascending by max_roll".to_string(),
            ));
        }
        if self.bands.last().map(|band| band.max_roll).unwrap_or(0) < 100 {
            return Err(ConfigError::InvalidBattle(
                "the last outcome band must cover a roll of 100".to_string(),
            ));
        }
        if self.low_tier.roll_per_heart <= 0 {
            return Err(ConfigError::InvalidBattle(
                "low_tier.roll_per_heart must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LowTierConfig {
    /// Adjusted roll points per heart of damage dealt to the monster.
    pub roll_per_heart: i32,
    pub max_hearts_per_turn: u32,
    /// Adjusted rolls below this let the monster land its hit.
    pub counter_threshold: i32,
}

impl Default for LowTierConfig {
    fn default() -> Self {
        Self {
            roll_per_heart: 25,
            max_hearts_per_turn: 3,
            counter_threshold: 35,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BandConfig {
    pub class: OutcomeClass,
    pub max_roll: i32,
    pub monster_hearts: u32,
    pub participant_damage_pct: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    pub min_count: usize,
    pub max_count: usize,
    pub group_min: usize,
    pub group_max: usize,
    /// Chance that a faction slot after the first is filled by an elite.
    pub elite_chance: f64,
    pub max_attempts: u32,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            min_count: 5,
            max_count: 15,
            group_min: 2,
            group_max: 3,
            elite_chance: 0.3,
            max_attempts: 8,
        }
    }
}

impl RosterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_count < MIN_MONSTER_COUNT
            || self.max_count > MAX_MONSTER_COUNT
            || self.min_count > self.max_count
        {
            return Err(ConfigError::InvalidRoster(format!(
                "count range {}..={} must be non-empty and within {}..={}",
                self.min_count, self.max_count, MIN_MONSTER_COUNT, MAX_MONSTER_COUNT
            )));
        }
        if self.group_min < 2 || self.group_min > self.group_max {
            return Err(ConfigError::InvalidRoster(format!(
                "group size range {}..={} must start at 2 or more",
                self.group_min, self.group_max
            )));
        }
        if !(0.0..=1.0).contains(&self.elite_chance) {
            return Err(ConfigError::InvalidRoster(format!(
                "elite_chance {} is not a probability",
                self.elite_chance
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRoster(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Minimum cumulative damage for each rarity above common.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LootThresholds {
    pub uncommon: u32,
    pub rare: u32,
    pub epic: u32,
    pub legendary: u32,
}

impl Default for LootThresholds {
    fn default() -> Self {
        Self {
            uncommon: 2,
            rare: 4,
            epic: 6,
            legendary: 8,
        }
    }
}

impl LootThresholds {
    fn validate(&self) -> Result<(), ConfigError> {
        let ordered = [self.uncommon, self.rare, self.epic, self.legendary];
        if ordered.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::InvalidLootThresholds(format!(
                "uncommon {} < rare {} < epic {} < legendary {} does not hold",
                self.uncommon, self.rare, self.epic, self.legendary
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub max_attempts: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl ControllerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidController(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Active encounters idle for at least this long may be force-failed.
    pub stale_after_ms: u64,
    /// Affliction severity at which a character may not join.
    pub disqualifying_severity: u8,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 60 * 60 * 1_000,
            disqualifying_severity: 3,
        }
    }
}

pub fn load_engine_config_from_env() -> Arc<EngineConfig> {
    let override_path = env::var("RAID_ENGINE_CONFIG_PATH").ok().map(PathBuf::from);

    if let Some(path) = override_path {
        match EngineConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "raid::config",
                    path = %path.display(),
                    "engine_config.loaded=file"
                );
                return Arc::new(config);
            }
            Err(err) => {
                tracing::warn!(
                    target: "raid::config",
                    path = %path.display(),
                    error = %err,
                    "engine_config.load_failed"
                );
            }
        }
    }

    tracing::info!(target: "raid::config", "engine_config.loaded=builtin");
    EngineConfig::builtin()
}
