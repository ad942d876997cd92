//! Per-turn battle math. Pure: the caller owns the rng and applies the result.

use rand::Rng;
use raid_proto::{MonsterEntry, Participant};
use serde::{Deserialize, Serialize};

use crate::config::BattleConfig;

/// Highest tier resolved with the low-tier step function.
pub const LOW_TIER_MAX: u8 = 4;
pub const MIN_ROLL: i32 = 1;
pub const MAX_ROLL: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    /// Low-tier exchange.
    Skirmish,
    Dodge,
    PartialHit,
    FullHit,
    Critical,
}

impl OutcomeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeClass::Skirmish => "skirmish",
            OutcomeClass::Dodge => "dodge",
            OutcomeClass::PartialHit => "partial_hit",
            OutcomeClass::FullHit => "full_hit",
            OutcomeClass::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub base_roll: i32,
    pub adjusted_roll: i32,
    pub outcome_class: OutcomeClass,
    /// Hearts removed from the monster, already clamped to what it had left.
    pub monster_damage: u32,
    /// Hearts removed from the participant, already clamped.
    pub participant_damage: u32,
}

pub fn resolve<R: Rng + ?Sized>(
    participant: &Participant,
    monster: &MonsterEntry,
    party_size: usize,
    config: &BattleConfig,
    rng: &mut R,
) -> TurnOutcome {
    let base_roll = rng.gen_range(MIN_ROLL..=MAX_ROLL);
    resolve_with_roll(base_roll, participant, monster, party_size, config)
}

pub fn adjusted_roll(base_roll: i32, tier: u8, party_size: usize, config: &BattleConfig) -> i32 {
    let extra_members = party_size.saturating_sub(1).min(i32::MAX as usize) as i32;
    let penalty = config
        .party_penalty_per_member
        .saturating_mul(extra_members)
        .saturating_add(config.tier_penalty_per_tier.saturating_mul(i32::from(tier)));
    base_roll.saturating_sub(penalty).clamp(MIN_ROLL, MAX_ROLL)
}

pub fn resolve_with_roll(
    base_roll: i32,
    participant: &Participant,
    monster: &MonsterEntry,
    party_size: usize,
    config: &BattleConfig,
) -> TurnOutcome {
    let adjusted = adjusted_roll(base_roll, monster.tier, party_size, config);

    let (outcome_class, monster_damage, participant_damage) = if monster.tier <= LOW_TIER_MAX {
        let low = &config.low_tier;
        let hearts = (adjusted / low.roll_per_heart).max(0) as u32;
        let countered = if adjusted < low.counter_threshold {
            monster.damage
        } else {
            0
        };
        (
            OutcomeClass::Skirmish,
            hearts.min(low.max_hearts_per_turn),
            countered,
        )
    } else {
        let band = config
            .bands
            .iter()
            .find(|band| adjusted <= band.max_roll)
            .or_else(|| config.bands.last());
        match band {
            Some(band) => (
                band.class,
                band.monster_hearts,
                scaled_damage(monster.damage, band.participant_damage_pct),
            ),
            None => (OutcomeClass::Dodge, 0, 0),
        }
    };

    TurnOutcome {
        base_roll,
        adjusted_roll: adjusted,
        outcome_class,
        monster_damage: monster_damage.min(monster.current_hearts),
        participant_damage: participant_damage.min(participant.current_hearts),
    }
}

/// `damage * pct / 100`, rounded up so any non-zero share lands at least one heart.
fn scaled_damage(damage: u32, pct: u32) -> u32 {
    let scaled = u64::from(damage) * u64::from(pct);
    scaled.div_ceil(100).min(u64::from(u32::MAX)) as u32
}
