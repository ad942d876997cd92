//! Persisted record layout and payloads for raid encounters.
//!
//! The engine in `raid_core` owns the behaviour; this crate only describes
//! what is written to the document store and what is handed to notification
//! collaborators, plus the codecs for both.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a persisted encounter record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncounterId(pub String);

impl EncounterId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EncounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a character record owned by the character service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub String);

impl CharacterId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an encounter. Terminal states are never left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterStatus {
    Active,
    Completed,
    Failed,
}

impl EncounterStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EncounterStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EncounterStatus::Active => "active",
            EncounterStatus::Completed => "completed",
            EncounterStatus::Failed => "failed",
        }
    }
}

/// How the monster list of an encounter was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterKind {
    Standard,
    Boss,
    Faction,
}

impl RosterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RosterKind::Standard => "standard",
            RosterKind::Boss => "boss",
            RosterKind::Faction => "faction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterEntry {
    pub species: String,
    pub tier: u8,
    pub max_hearts: u32,
    pub current_hearts: u32,
    pub is_boss: bool,
    pub damage: u32,
    pub defeated_at: Option<u64>,
    pub defeated_by: Option<CharacterId>,
}

impl MonsterEntry {
    pub fn is_defeated(&self) -> bool {
        self.current_hearts == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub character_id: CharacterId,
    pub user_id: String,
    pub display_name: String,
    pub current_hearts: u32,
    pub current_stamina: u32,
    pub damage_dealt: u32,
    pub is_ko: bool,
    pub joined_before_first_defeat: bool,
    pub turn_position: usize,
    /// Indices into the monster list this participant has damaged, ascending.
    pub damaged_monsters: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub item: String,
    pub rarity: Rarity,
    pub source_species: Option<String>,
}

/// The persisted encounter document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    pub id: EncounterId,
    pub region: String,
    pub difficulty: String,
    pub roster: RosterKind,
    pub status: EncounterStatus,
    pub monsters: Vec<MonsterEntry>,
    pub current_monster_index: usize,
    pub participants: Vec<Participant>,
    pub current_turn: usize,
    /// Monster indices in the order they were defeated.
    pub defeated: Vec<usize>,
    pub loot: BTreeMap<CharacterId, Reward>,
    pub version: u64,
    pub rng_seed: u64,
    pub created_at: u64,
    pub updated_at: u64,
    pub thread_ref: Option<String>,
    pub failure_reason: Option<String>,
}

impl Encounter {
    pub fn current_monster(&self) -> Option<&MonsterEntry> {
        self.monsters.get(self.current_monster_index)
    }

    pub fn participant(&self, character_id: &CharacterId) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|participant| &participant.character_id == character_id)
    }

    pub fn participant_index(&self, character_id: &CharacterId) -> Option<usize> {
        self.participants
            .iter()
            .position(|participant| &participant.character_id == character_id)
    }

    pub fn current_participant(&self) -> Option<&Participant> {
        self.participants.get(self.current_turn)
    }

    pub fn all_defeated(&self) -> bool {
        self.current_monster_index >= self.monsters.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterResult {
    Victory,
    Defeat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub character_id: CharacterId,
    pub display_name: String,
    pub damage_dealt: u32,
    pub reward: Option<Reward>,
}

/// Payload handed to the notification collaborator once an encounter ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub encounter_id: EncounterId,
    pub region: String,
    pub result: EncounterResult,
    pub participants: Vec<ParticipantSummary>,
    pub monsters_defeated: usize,
    pub duration_ms: u64,
    pub thread_ref: Option<String>,
}

impl CompletionSummary {
    /// Build the summary for a terminal record. Returns `None` while active.
    pub fn from_encounter(encounter: &Encounter) -> Option<Self> {
        let result = match encounter.status {
            EncounterStatus::Active => return None,
            EncounterStatus::Completed => EncounterResult::Victory,
            EncounterStatus::Failed => EncounterResult::Defeat,
        };
        let participants = encounter
            .participants
            .iter()
            .map(|participant| ParticipantSummary {
                character_id: participant.character_id.clone(),
                display_name: participant.display_name.clone(),
                damage_dealt: participant.damage_dealt,
                reward: encounter.loot.get(&participant.character_id).cloned(),
            })
            .collect();
        Some(Self {
            encounter_id: encounter.id.clone(),
            region: encounter.region.clone(),
            result,
            participants,
            monsters_defeated: encounter.defeated.len(),
            duration_ms: encounter.updated_at.saturating_sub(encounter.created_at),
            thread_ref: encounter.thread_ref.clone(),
        })
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("binary record codec failed: {0}")]
    Binary(#[from] bincode::Error),
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stable digest of a record, independent of process and platform hashing seeds.
pub fn hash_encounter(encounter: &Encounter) -> Result<u64, CodecError> {
    let encoded = bincode::serialize(encounter)?;
    let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    hasher.write(&encoded);
    Ok(hasher.finish())
}

pub fn encode_encounter(encounter: &Encounter) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serialize(encounter)?)
}

pub fn decode_encounter(data: &[u8]) -> Result<Encounter, CodecError> {
    Ok(bincode::deserialize(data)?)
}

pub fn encode_encounter_json(encounter: &Encounter) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(encounter)?)
}

pub fn decode_encounter_json(data: &str) -> Result<Encounter, CodecError> {
    Ok(serde_json::from_str(data)?)
}

pub fn encode_summary_json(summary: &CompletionSummary) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(summary)?)
}
