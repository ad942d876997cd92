use std::sync::Arc;

use crate::{
    catalog::{load_monster_catalog_from_env, MonsterCatalog},
    config::{load_engine_config_from_env, EngineConfig},
    difficulty::{load_difficulty_profiles_from_env, DifficultyProfiles},
    error::ConfigError,
    loot::{load_loot_table_from_env, LootTable},
};

/// Immutable configuration shared by every encounter transition.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub profiles: Arc<DifficultyProfiles>,
    pub catalog: Arc<MonsterCatalog>,
    pub loot_table: Arc<LootTable>,
    pub config: Arc<EngineConfig>,
}

impl EngineContext {
    /// Bundle the parts, checking that every profile tier exists in the catalog.
    pub fn new(
        profiles: Arc<DifficultyProfiles>,
        catalog: Arc<MonsterCatalog>,
        loot_table: Arc<LootTable>,
        config: Arc<EngineConfig>,
    ) -> Result<Self, ConfigError> {
        profiles.validate_against(&catalog)?;
        config.validate()?;
        Ok(Self {
            profiles,
            catalog,
            loot_table,
            config,
        })
    }

    pub fn builtin() -> Self {
        Self {
            profiles: DifficultyProfiles::builtin(),
            catalog: MonsterCatalog::builtin(),
            loot_table: LootTable::builtin(),
            config: EngineConfig::builtin(),
        }
    }

    /// Builtins with any `RAID_*_PATH` overrides applied.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Self::new(
            load_difficulty_profiles_from_env(),
            load_monster_catalog_from_env(),
            load_loot_table_from_env(),
            load_engine_config_from_env(),
        )
    }

    pub fn with_config(self, config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_parts_agree() {
        let ctx = EngineContext::builtin();
        EngineContext::new(ctx.profiles, ctx.catalog, ctx.loot_table, ctx.config)
            .expect("builtin configuration is consistent");
    }

    #[test]
    fn profile_tiers_must_exist_in_the_catalog() {
        let ctx = EngineContext::builtin();
        let sparse = MonsterCatalog::from_json_str(
            r#"{ "monsters": [
                { "species": "Cave Bat", "tier": 1, "hearts": 2, "damage": 1 }
            ] }"#,
        )
        .unwrap();
        let err = EngineContext::new(ctx.profiles, Arc::new(sparse), ctx.loot_table, ctx.config)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTier { .. }));
    }
}
