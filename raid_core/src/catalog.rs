//! Monster catalog: the templates rosters are drawn from.
//!
//! Faction monsters are kept out of ordinary rosters and only appear in
//! restricted-faction encounters.

use std::{
    collections::BTreeSet,
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use raid_proto::MonsterEntry;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const BUILTIN_MONSTER_CATALOG: &str = include_str!("data/monster_catalog.json");

#[derive(Debug, Clone, Deserialize)]
struct MonsterCatalogData {
    monsters: Vec<MonsterTemplate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactionRank {
    Regular,
    Elite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonsterTemplate {
    pub species: String,
    pub tier: u8,
    pub hearts: u32,
    pub damage: u32,
    /// Regions this monster roams. Empty means every region.
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub faction: Option<String>,
    #[serde(default)]
    pub rank: Option<FactionRank>,
}

impl MonsterTemplate {
    pub fn roams(&self, region: &str) -> bool {
        self.regions.is_empty()
            || self
                .regions
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(region))
    }

    pub fn spawn(&self, is_boss: bool) -> MonsterEntry {
        MonsterEntry {
            species: self.species.clone(),
            tier: self.tier,
            max_hearts: self.hearts,
            current_hearts: self.hearts,
            is_boss,
            damage: self.damage,
            defeated_at: None,
            defeated_by: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonsterCatalog {
    monsters: Vec<MonsterTemplate>,
}

impl MonsterCatalog {
    pub fn builtin() -> Arc<Self> {
        Self::from_json_str(BUILTIN_MONSTER_CATALOG)
            .map(Arc::new)
            .expect("builtin monster catalog should parse")
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let data: MonsterCatalogData = serde_json::from_str(input)?;
        Ok(Self::new(data.monsters))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn new(monsters: Vec<MonsterTemplate>) -> Self {
        Self { monsters }
    }

    /// Non-faction templates of `tier` roaming `region`, in catalog order.
    pub fn candidates(&self, tier: u8, region: &str) -> Vec<&MonsterTemplate> {
        self.monsters
            .iter()
            .filter(|monster| {
                monster.faction.is_none() && monster.tier == tier && monster.roams(region)
            })
            .collect()
    }

    pub fn faction_candidates(&self, faction: &str, rank: FactionRank) -> Vec<&MonsterTemplate> {
        self.monsters
            .iter()
            .filter(|monster| {
                monster.rank == Some(rank)
                    && monster
                        .faction
                        .as_deref()
                        .is_some_and(|tag| tag.eq_ignore_ascii_case(faction))
            })
            .collect()
    }

    /// Tiers with at least one non-faction template anywhere.
    pub fn tiers(&self) -> BTreeSet<u8> {
        self.monsters
            .iter()
            .filter(|monster| monster.faction.is_none())
            .map(|monster| monster.tier)
            .collect()
    }

    pub fn has_tier(&self, tier: u8) -> bool {
        self.monsters
            .iter()
            .any(|monster| monster.faction.is_none() && monster.tier == tier)
    }

    pub fn len(&self) -> usize {
        self.monsters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monsters.is_empty()
    }
}

pub fn load_monster_catalog_from_env() -> Arc<MonsterCatalog> {
    if let Some(path) = env::var("RAID_MONSTER_CATALOG_PATH").ok().map(PathBuf::from) {
        match MonsterCatalog::from_file(&path) {
            Ok(catalog) => {
                tracing::info!(
                    target: "raid::config",
                    path = %path.display(),
                    monsters = catalog.len(),
                    "monster_catalog.loaded=file"
                );
                return Arc::new(catalog);
            }
            Err(err) => {
                tracing::warn!(
                    target: "raid::config",
                    path = %path.display(),
                    error = %err,
                    "monster_catalog.load_failed"
                );
            }
        }
    }

    let catalog = MonsterCatalog::builtin();
    tracing::info!(
        target: "raid::config",
        monsters = catalog.len(),
        "monster_catalog.loaded=builtin"
    );
    catalog
}
