//! Loot allocation: contribution decides rarity, defeated species decide the item.

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use rand::{distributions::WeightedIndex, prelude::Distribution, Rng};
use raid_proto::{CharacterId, Encounter, Participant, Rarity, Reward};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{config::LootThresholds, error::ConfigError};

pub const BUILTIN_LOOT_TABLE: &str = include_str!("data/loot_table.json");

#[derive(Debug, Clone, Deserialize)]
struct LootTableData {
    items: Vec<LootItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootItem {
    pub name: String,
    pub rarity: Rarity,
    pub weight: f64,
    /// Species that drop this item. Empty means it can drop from anything.
    #[serde(default)]
    pub sources: Vec<String>,
}

impl LootItem {
    pub fn is_universal(&self) -> bool {
        self.sources.is_empty()
    }

    /// First species in `species` that drops this item.
    fn source_among<'s>(&self, species: &'s [&str]) -> Option<&'s str> {
        species.iter().copied().find(|candidate| {
            self.sources
                .iter()
                .any(|source| source.eq_ignore_ascii_case(candidate))
        })
    }
}

#[derive(Debug, Clone)]
pub struct LootTable {
    items: Vec<LootItem>,
}

impl LootTable {
    pub fn builtin() -> Arc<Self> {
        Self::from_json_str(BUILTIN_LOOT_TABLE)
            .map(Arc::new)
            .expect("builtin loot table should parse")
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let data: LootTableData = serde_json::from_str(input)?;
        Self::new(data.items)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn new(items: Vec<LootItem>) -> Result<Self, ConfigError> {
        if items.is_empty() {
            return Err(ConfigError::EmptyLootTable);
        }
        if let Some(item) = items
            .iter()
            .find(|item| !item.weight.is_finite() || item.weight <= 0.0)
        {
            return Err(ConfigError::InvalidLootWeight {
                name: item.name.clone(),
                weight: item.weight,
            });
        }
        Ok(Self { items })
    }

    pub fn items(&self) -> &[LootItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Candidate items of `rarity` for one participant: items those species
    /// drop, else universal items.
    fn candidates(&self, rarity: Rarity, species: &[&str]) -> Vec<&LootItem> {
        let specific: Vec<&LootItem> = self
            .items
            .iter()
            .filter(|item| item.rarity == rarity && item.source_among(species).is_some())
            .collect();
        if !specific.is_empty() {
            return specific;
        }
        self.items
            .iter()
            .filter(|item| item.rarity == rarity && item.is_universal())
            .collect()
    }
}

pub fn load_loot_table_from_env() -> Arc<LootTable> {
    if let Some(path) = env::var("RAID_LOOT_TABLE_PATH").ok().map(PathBuf::from) {
        match LootTable::from_file(&path) {
            Ok(table) => {
                tracing::info!(
                    target: "raid::config",
                    path = %path.display(),
                    items = table.len(),
                    "loot_table.loaded=file"
                );
                return Arc::new(table);
            }
            Err(err) => {
                tracing::warn!(
                    target: "raid::config",
                    path = %path.display(),
                    error = %err,
                    "loot_table.load_failed"
                );
            }
        }
    }

    let table = LootTable::builtin();
    tracing::info!(
        target: "raid::config",
        items = table.len(),
        "loot_table.loaded=builtin"
    );
    table
}

pub fn rarity_for_damage(damage: u32, thresholds: &LootThresholds) -> Rarity {
    if damage >= thresholds.legendary {
        Rarity::Legendary
    } else if damage >= thresholds.epic {
        Rarity::Epic
    } else if damage >= thresholds.rare {
        Rarity::Rare
    } else if damage >= thresholds.uncommon {
        Rarity::Uncommon
    } else {
        Rarity::Common
    }
}

/// Species this participant damaged that ended up defeated, in roster order.
pub fn defeated_species<'e>(encounter: &'e Encounter, participant: &Participant) -> Vec<&'e str> {
    let mut species: Vec<&str> = Vec::new();
    for index in &participant.damaged_monsters {
        if let Some(monster) = encounter.monsters.get(*index) {
            if monster.is_defeated() && !species.contains(&monster.species.as_str()) {
                species.push(monster.species.as_str());
            }
        }
    }
    species
}

pub fn is_eligible(encounter: &Encounter, participant: &Participant) -> bool {
    !defeated_species(encounter, participant).is_empty()
}

/// Roll one reward per eligible participant. An eligible participant with no
/// item of their rarity is a configuration error.
pub fn allocate<R: Rng + ?Sized>(
    encounter: &Encounter,
    table: &LootTable,
    thresholds: &LootThresholds,
    rng: &mut R,
) -> Result<BTreeMap<CharacterId, Reward>, ConfigError> {
    let mut rewards = BTreeMap::new();
    for participant in &encounter.participants {
        let species = defeated_species(encounter, participant);
        if species.is_empty() {
            continue;
        }
        let rarity = rarity_for_damage(participant.damage_dealt, thresholds);
        let candidates = table.candidates(rarity, &species);
        let Some(item) = draw(&candidates, rng) else {
            error!(
                target: "raid::loot",
                encounter = %encounter.id,
                character = %participant.character_id,
                rarity = rarity.as_str(),
                "loot.no_candidate"
            );
            return Err(ConfigError::NoLootCandidate {
                character: participant.character_id.clone(),
                rarity,
            });
        };

        let reward = Reward {
            item: item.name.clone(),
            rarity: item.rarity,
            source_species: item.source_among(&species).map(str::to_string),
        };
        debug!(
            target: "raid::loot",
            encounter = %encounter.id,
            character = %participant.character_id,
            damage = participant.damage_dealt,
            item = %reward.item,
            rarity = reward.rarity.as_str(),
            "loot.awarded"
        );
        rewards.insert(participant.character_id.clone(), reward);
    }
    Ok(rewards)
}

fn draw<'t, R: Rng + ?Sized>(candidates: &[&'t LootItem], rng: &mut R) -> Option<&'t LootItem> {
    let weights = WeightedIndex::new(candidates.iter().map(|item| item.weight)).ok()?;
    candidates.get(weights.sample(rng)).copied()
}
