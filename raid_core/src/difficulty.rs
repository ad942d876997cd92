//! Difficulty profiles and the weighted tier sampler.
//!
//! A profile is either flat (one distribution over tiers) or boss-split (one
//! boss tier drawn once plus a tier 1-4 support distribution). Flat profiles
//! that reach tier 5 are promoted to boss-split when they are loaded.

use std::{
    collections::{BTreeSet, HashMap},
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use rand::Rng;
use serde::Deserialize;

use crate::{catalog::MonsterCatalog, error::ConfigError};

pub const BUILTIN_DIFFICULTY_PROFILES: &str = include_str!("data/difficulty_profiles.json");

pub const MIN_TIER: u8 = 1;
pub const MAX_TIER: u8 = 10;
/// Highest tier that may appear as a support monster.
pub const SUPPORT_MAX_TIER: u8 = 4;
pub const BOSS_MIN_TIER: u8 = 5;

#[derive(Debug, Clone, Deserialize)]
struct DifficultyProfilesData {
    profiles: Vec<TierDistribution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TierWeight {
    pub tier: u8,
    pub weight: f64,
}

/// Raw profile as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct TierDistribution {
    pub name: String,
    pub tiers: Vec<TierWeight>,
    #[serde(default)]
    pub boss_tiers: Vec<TierWeight>,
}

/// Cumulative-weight sampler over a fixed set of tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct TierSampler {
    tiers: Vec<u8>,
    cumulative: Vec<f64>,
    total: f64,
}

impl TierSampler {
    pub fn new(name: &str, weights: &[TierWeight]) -> Result<Self, ConfigError> {
        if weights.is_empty() {
            return Err(ConfigError::EmptyDistribution(name.to_string()));
        }

        let mut tiers = Vec::with_capacity(weights.len());
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut total = 0.0;
        for entry in weights {
            if !(MIN_TIER..=MAX_TIER).contains(&entry.tier) {
                return Err(ConfigError::TierOutOfRange {
                    name: name.to_string(),
                    tier: entry.tier,
                });
            }
            if !entry.weight.is_finite() || entry.weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    name: name.to_string(),
                    tier: entry.tier,
                    weight: entry.weight,
                });
            }
            total += entry.weight;
            tiers.push(entry.tier);
            cumulative.push(total);
        }

        if total <= 0.0 {
            return Err(ConfigError::NonPositiveWeight {
                name: name.to_string(),
                total,
            });
        }

        Ok(Self {
            tiers,
            cumulative,
            total,
        })
    }

    /// Draw uniformly in `[0, total)` and return the first tier whose
    /// cumulative weight exceeds the draw.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u8 {
        let draw = rng.gen_range(0.0..self.total);
        let idx = self
            .cumulative
            .partition_point(|cumulative| *cumulative <= draw)
            .min(self.tiers.len() - 1);
        self.tiers[idx]
    }

    pub fn tiers(&self) -> &[u8] {
        &self.tiers
    }

    pub fn total_weight(&self) -> f64 {
        self.total
    }

    /// Probability of drawing `tier`, for diagnostics and tests.
    pub fn probability(&self, tier: u8) -> f64 {
        let mut previous = 0.0;
        let mut mass = 0.0;
        for (idx, cumulative) in self.cumulative.iter().enumerate() {
            if self.tiers[idx] == tier {
                mass += cumulative - previous;
            }
            previous = *cumulative;
        }
        mass / self.total
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DifficultyShape {
    Flat(TierSampler),
    BossSplit {
        boss: TierSampler,
        support: TierSampler,
    },
}

#[derive(Debug, Clone)]
pub struct DifficultyProfile {
    name: String,
    shape: DifficultyShape,
    declared: BTreeSet<u8>,
}

impl DifficultyProfile {
    pub fn from_distribution(distribution: &TierDistribution) -> Result<Self, ConfigError> {
        let name = distribution.name.as_str();
        let declared: BTreeSet<u8> = distribution
            .tiers
            .iter()
            .chain(distribution.boss_tiers.iter())
            .map(|entry| entry.tier)
            .collect();

        let shape = if !distribution.boss_tiers.is_empty() {
            if distribution
                .boss_tiers
                .iter()
                .any(|entry| entry.tier < BOSS_MIN_TIER)
            {
                return Err(ConfigError::NoBossTier(name.to_string()));
            }
            if distribution
                .tiers
                .iter()
                .any(|entry| entry.tier > SUPPORT_MAX_TIER)
            {
                return Err(ConfigError::NoSupportTiers(name.to_string()));
            }
            DifficultyShape::BossSplit {
                boss: TierSampler::new(name, &distribution.boss_tiers)?,
                support: TierSampler::new(name, &distribution.tiers)?,
            }
        } else {
            let flat = TierSampler::new(name, &distribution.tiers)?;
            let highest = flat.tiers().iter().copied().max().unwrap_or(MIN_TIER);
            if highest >= BOSS_MIN_TIER {
                derive_boss_split(name, &distribution.tiers, highest)?
            } else {
                DifficultyShape::Flat(flat)
            }
        };

        Ok(Self {
            name: name.to_string(),
            shape,
            declared,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &DifficultyShape {
        &self.shape
    }

    pub fn is_boss_split(&self) -> bool {
        matches!(self.shape, DifficultyShape::BossSplit { .. })
    }

    /// Every tier the profile names, boss tiers included.
    pub fn declared_tiers(&self) -> &BTreeSet<u8> {
        &self.declared
    }
}

/// Promote a flat profile reaching tier 5+: its highest tier becomes the boss
/// and its tier 1-4 weights, renormalised, become the support distribution.
fn derive_boss_split(
    name: &str,
    tiers: &[TierWeight],
    boss_tier: u8,
) -> Result<DifficultyShape, ConfigError> {
    let support_mass: f64 = tiers
        .iter()
        .filter(|entry| entry.tier <= SUPPORT_MAX_TIER)
        .map(|entry| entry.weight)
        .sum();
    if support_mass <= 0.0 {
        return Err(ConfigError::NoSupportTiers(name.to_string()));
    }
    let support: Vec<TierWeight> = tiers
        .iter()
        .filter(|entry| entry.tier <= SUPPORT_MAX_TIER)
        .map(|entry| TierWeight {
            tier: entry.tier,
            weight: entry.weight / support_mass,
        })
        .collect();

    Ok(DifficultyShape::BossSplit {
        boss: TierSampler::new(
            name,
            &[TierWeight {
                tier: boss_tier,
                weight: 1.0,
            }],
        )?,
        support: TierSampler::new(name, &support)?,
    })
}

#[derive(Debug, Clone)]
pub struct DifficultyProfiles {
    profiles: Vec<DifficultyProfile>,
    index: HashMap<String, usize>,
}

impl DifficultyProfiles {
    pub fn builtin() -> Arc<Self> {
        Self::from_json_str(BUILTIN_DIFFICULTY_PROFILES)
            .map(Arc::new)
            .expect("builtin difficulty profiles should parse")
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let data: DifficultyProfilesData = serde_json::from_str(input)?;
        Self::from_distributions(&data.profiles)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_distributions(distributions: &[TierDistribution]) -> Result<Self, ConfigError> {
        let mut profiles = Vec::with_capacity(distributions.len());
        let mut index = HashMap::new();
        for distribution in distributions {
            let key = distribution.name.to_ascii_lowercase();
            if index.insert(key, profiles.len()).is_some() {
                return Err(ConfigError::DuplicateProfile(distribution.name.clone()));
            }
            profiles.push(DifficultyProfile::from_distribution(distribution)?);
        }
        Ok(Self { profiles, index })
    }

    /// Case-insensitive lookup by profile name.
    pub fn get(&self, name: &str) -> Result<&DifficultyProfile, ConfigError> {
        self.index
            .get(&name.to_ascii_lowercase())
            .and_then(|idx| self.profiles.get(*idx))
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &DifficultyProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Every tier a profile references must exist in the catalog.
    pub fn validate_against(&self, catalog: &MonsterCatalog) -> Result<(), ConfigError> {
        for profile in &self.profiles {
            for tier in profile.declared_tiers() {
                if !catalog.has_tier(*tier) {
                    return Err(ConfigError::UnknownTier {
                        name: profile.name.clone(),
                        tier: *tier,
                    });
                }
            }
        }
        Ok(())
    }
}

pub fn load_difficulty_profiles_from_env() -> Arc<DifficultyProfiles> {
    if let Some(path) = env::var("RAID_DIFFICULTY_PROFILES_PATH")
        .ok()
        .map(PathBuf::from)
    {
        match DifficultyProfiles::from_file(&path) {
            Ok(profiles) => {
                tracing::info!(
                    target: "raid::config",
                    path = %path.display(),
                    profiles = profiles.len(),
                    "difficulty_profiles.loaded=file"
                );
                return Arc::new(profiles);
            }
            Err(err) => {
                tracing::warn!(
                    target: "raid::config",
                    path = %path.display(),
                    error = %err,
                    "difficulty_profiles.load_failed"
                );
            }
        }
    }

    let profiles = DifficultyProfiles::builtin();
    tracing::info!(
        target: "raid::config",
        profiles = profiles.len(),
        "difficulty_profiles.loaded=builtin"
    );
    profiles
}
