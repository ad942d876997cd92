#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};

use anyhow::{bail, Context, Result};
use raid_core::{
    ChannelNotifier, CharacterProfile, CreateRequest, EncounterService, EngineConfig,
    EngineContext, InMemoryEncounterStore, ManualClock, RosterMode, StaticDirectory,
};
use raid_proto::{CharacterId, CompletionSummary, Encounter, EncounterId, EncounterStatus};

pub type Service = EncounterService<InMemoryEncounterStore, StaticDirectory>;

pub const START_MS: u64 = 1_700_000_000_000;

static INIT: Once = Once::new();

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Point the engine config override at a fixture for the whole test binary.
pub fn ensure_test_config(name: &str) {
    INIT.call_once(|| {
        let config_path = fixture_path(name);
        debug_assert!(
            config_path.exists(),
            "missing test engine config at {}",
            config_path.display()
        );
        std::env::set_var("RAID_ENGINE_CONFIG_PATH", &config_path);
    });
}

pub fn fixture_config(name: &str) -> Result<EngineConfig> {
    let path = fixture_path(name);
    EngineConfig::from_file(&path).with_context(|| format!("loading {}", path.display()))
}

/// Every strike lands one heart and nothing strikes back.
pub fn steady_context() -> Result<EngineContext> {
    Ok(EngineContext::builtin().with_config(fixture_config("steady_battle_config.json")?))
}

/// Every strike misses and the monster always hits back.
pub fn lethal_context() -> Result<EngineContext> {
    Ok(EngineContext::builtin().with_config(fixture_config("lethal_battle_config.json")?))
}

pub fn hero(id: &str, hearts: u32) -> CharacterProfile {
    CharacterProfile {
        character_id: CharacterId::new(id),
        user_id: format!("user-{id}"),
        display_name: format!("Hero {id}"),
        region: "marsh".to_string(),
        current_hearts: hearts,
        current_stamina: 10,
        affliction_severity: 0,
    }
}

pub struct TestBed {
    pub service: Arc<Service>,
    pub directory: Arc<StaticDirectory>,
    pub store: Arc<InMemoryEncounterStore>,
    pub clock: Arc<ManualClock>,
    pub summaries: raid_core::notifier::SummaryReceiver,
}

impl TestBed {
    pub fn new(ctx: EngineContext, heroes: impl IntoIterator<Item = CharacterProfile>) -> Self {
        let store = Arc::new(InMemoryEncounterStore::new());
        let directory = Arc::new(StaticDirectory::new(heroes));
        let clock = Arc::new(ManualClock::new(START_MS));
        let (notifier, summaries) = ChannelNotifier::channel();
        let service = Arc::new(EncounterService::new(
            ctx,
            Arc::clone(&store),
            Arc::clone(&directory),
            Arc::new(notifier),
            clock.clone(),
        ));
        Self {
            service,
            directory,
            store,
            clock,
            summaries,
        }
    }

    pub async fn create(&self, difficulty: &str, count: usize, seed: u64) -> Result<EncounterId> {
        Ok(self
            .service
            .create(CreateRequest {
                region: "marsh".to_string(),
                monster_count: count,
                difficulty: difficulty.to_string(),
                mode: RosterMode::Standard,
                seed: Some(seed),
                thread_ref: Some("thread-1".to_string()),
            })
            .await?)
    }

    /// Let whoever holds the turn strike until the encounter ends.
    pub async fn fight_to_end(&self, id: &EncounterId, max_turns: usize) -> Result<Encounter> {
        for _ in 0..max_turns {
            let record = self.service.encounter(id).await?;
            if record.status != EncounterStatus::Active {
                return Ok(record);
            }
            let actor = record
                .current_participant()
                .context("active encounter without a participant")?
                .character_id
                .clone();
            self.clock.advance(1_000);
            self.service.take_turn(id, &actor).await?;
        }
        bail!("encounter {id} still active after {max_turns} turns")
    }

    pub fn drain_summaries(&self) -> Vec<CompletionSummary> {
        self.summaries.try_iter().collect()
    }
}
