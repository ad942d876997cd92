//! Character lookup collaborator used when a character joins.

use std::{collections::HashMap, future::Future, sync::RwLock};

use raid_proto::CharacterId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot of a character at join time. Hearts and stamina are copied into
/// the participant as working values; the source record is never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub character_id: CharacterId,
    pub user_id: String,
    pub display_name: String,
    pub region: String,
    pub current_hearts: u32,
    pub current_stamina: u32,
    /// Worst active affliction; 0 means healthy.
    #[serde(default)]
    pub affliction_severity: u8,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("character {0} not found")]
    NotFound(CharacterId),
    #[error("character directory unavailable: {0}")]
    Unavailable(String),
}

pub trait CharacterDirectory: Send + Sync {
    fn character(
        &self,
        id: &CharacterId,
    ) -> impl Future<Output = Result<CharacterProfile, DirectoryError>> + Send;
}

/// Directory backed by a map, for tests and the harness.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    characters: RwLock<HashMap<CharacterId, CharacterProfile>>,
}

impl StaticDirectory {
    pub fn new(characters: impl IntoIterator<Item = CharacterProfile>) -> Self {
        let directory = Self::default();
        for profile in characters {
            directory.upsert(profile);
        }
        directory
    }

    pub fn upsert(&self, profile: CharacterProfile) {
        self.characters
            .write()
            .expect("character directory lock poisoned")
            .insert(profile.character_id.clone(), profile);
    }
}

impl CharacterDirectory for StaticDirectory {
    async fn character(&self, id: &CharacterId) -> Result<CharacterProfile, DirectoryError> {
        self.characters
            .read()
            .expect("character directory lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(id.clone()))
    }
}
