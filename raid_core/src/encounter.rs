//! Encounter state machine.
//!
//! Every transition takes the loaded record by reference and returns a new
//! record plus an outcome. Randomness comes from [`transition_rng`], seeded by
//! the record's seed and version, so re-running a transition against the same
//! loaded record always produces the same result. The caller persists the new
//! record; the version bump belongs to the store.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use raid_proto::{
    CharacterId, Encounter, EncounterId, EncounterStatus, Participant, RosterKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
    battle::{self, TurnOutcome},
    character::CharacterProfile,
    config::EngineConfig,
    context::EngineContext,
    loot,
    roster::{longest_species_run, RosterError, RosterGenerator, RosterMode, MAX_SPECIES_RUN},
};

/// Version carried by a freshly created record.
pub const INITIAL_VERSION: u64 = 1;

pub const STALE_REASON: &str = "stale";
pub const ALL_KO_REASON: &str = "all participants knocked out";
/// Prefix of the reason recorded when configuration breaks mid-encounter.
pub const CONFIGURATION_REASON: &str = "configuration";

#[derive(Debug, Clone)]
pub struct Transition<T> {
    pub encounter: Encounter,
    pub outcome: T,
}

/// Validation rejections. Never retried and never change state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("encounter is {} and accepts no further actions", .0.as_str())]
    NotActive(EncounterStatus),
    #[error("character {0} (or its owner) has already joined")]
    AlreadyJoined(CharacterId),
    #[error("character is in region `{actual}` but the encounter is in `{expected}`")]
    WrongRegion { expected: String, actual: String },
    #[error("character {character} cannot fight: {reason}")]
    DisqualifiedStatus {
        character: CharacterId,
        reason: String,
    },
    #[error("it is not {0}'s turn")]
    NotYourTurn(CharacterId),
    #[error("character {0} is not part of this encounter")]
    NotAParticipant(CharacterId),
    #[error("encounter has been idle {idle_ms}ms, below the {threshold_ms}ms stale threshold")]
    NotStale { idle_ms: u64, threshold_ms: u64 },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::NotActive(_) => "not-active",
            Rejection::AlreadyJoined(_) => "already-joined",
            Rejection::WrongRegion { .. } => "wrong-region",
            Rejection::DisqualifiedStatus { .. } => "disqualified-status",
            Rejection::NotYourTurn(_) => "not-your-turn",
            Rejection::NotAParticipant(_) => "not-a-participant",
            Rejection::NotStale { .. } => "not-stale",
        }
    }
}

/// Structural problems in a record that is about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("roster has {count} monsters, expected {min}..={max}")]
    MonsterCount { count: usize, min: usize, max: usize },
    #[error("current monster index is {actual}, first living monster is {expected}")]
    CurrentMonster { expected: usize, actual: usize },
    #[error("roster has {0} bosses")]
    MultipleBosses(usize),
    #[error("species run of {length} exceeds {max}")]
    SpeciesRun { length: usize, max: usize },
    #[error("turn pointer {0} does not reference a fighting participant")]
    TurnPointer(usize),
    #[error("active encounter has every participant knocked out")]
    ActiveWithoutFighters,
    #[error("loot recorded on a {} encounter", .0.as_str())]
    UnexpectedLoot(EncounterStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReport {
    pub character_id: CharacterId,
    pub outcome: TurnOutcome,
    pub monster_index: usize,
    pub species: String,
    pub monster_defeated: bool,
    pub participant_ko: bool,
    pub status: EncounterStatus,
    pub encounter_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOutcome {
    pub turn_position: usize,
    /// Present when the joiner was first in and opened the fight.
    pub turn: Option<TurnReport>,
}

#[derive(Debug, Clone)]
pub struct NewEncounter {
    pub id: EncounterId,
    pub region: String,
    pub difficulty: String,
    pub mode: RosterMode,
    pub monster_count: usize,
    pub rng_seed: u64,
    pub created_at: u64,
    pub thread_ref: Option<String>,
}

fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Rng for the transition applied on top of `version`.
pub fn transition_rng(rng_seed: u64, version: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(splitmix64(rng_seed ^ version.rotate_left(32)))
}

/// Build a fresh active encounter with a generated roster.
pub fn create(request: &NewEncounter, ctx: &EngineContext) -> Result<Encounter, RosterError> {
    let profile = ctx.profiles.get(&request.difficulty)?;
    let generator = RosterGenerator::new(&ctx.catalog, &ctx.config.roster);
    let mut rng = transition_rng(request.rng_seed, 0);
    let roster = generator.generate(
        request.monster_count,
        profile,
        &request.region,
        &request.mode,
        &mut rng,
    )?;

    let encounter = Encounter {
        id: request.id.clone(),
        region: request.region.clone(),
        difficulty: profile.name().to_string(),
        roster: roster.kind,
        status: EncounterStatus::Active,
        monsters: roster.monsters,
        current_monster_index: 0,
        participants: Vec::new(),
        current_turn: 0,
        defeated: Vec::new(),
        loot: BTreeMap::new(),
        version: INITIAL_VERSION,
        rng_seed: request.rng_seed,
        created_at: request.created_at,
        updated_at: request.created_at,
        thread_ref: request.thread_ref.clone(),
        failure_reason: None,
    };
    info!(
        target: "raid::encounter",
        encounter = %encounter.id,
        region = %encounter.region,
        difficulty = %encounter.difficulty,
        monsters = encounter.monsters.len(),
        roster = encounter.roster.as_str(),
        "encounter.created"
    );
    Ok(encounter)
}

fn ensure_active(encounter: &Encounter) -> Result<(), Rejection> {
    if encounter.status.is_terminal() {
        return Err(Rejection::NotActive(encounter.status));
    }
    Ok(())
}

pub fn join(
    encounter: &Encounter,
    character: &CharacterProfile,
    now: u64,
    ctx: &EngineContext,
) -> Result<Transition<JoinOutcome>, Rejection> {
    ensure_active(encounter)?;
    if encounter.participants.iter().any(|participant| {
        participant.character_id == character.character_id
            || participant.user_id == character.user_id
    }) {
        return Err(Rejection::AlreadyJoined(character.character_id.clone()));
    }
    let lifecycle = &ctx.config.lifecycle;
    if character.affliction_severity >= lifecycle.disqualifying_severity {
        return Err(Rejection::DisqualifiedStatus {
            character: character.character_id.clone(),
            reason: format!("affliction severity {}", character.affliction_severity),
        });
    }
    if character.current_hearts == 0 {
        return Err(Rejection::DisqualifiedStatus {
            character: character.character_id.clone(),
            reason: "no hearts left".to_string(),
        });
    }
    if !character.region.eq_ignore_ascii_case(&encounter.region) {
        return Err(Rejection::WrongRegion {
            expected: encounter.region.clone(),
            actual: character.region.clone(),
        });
    }

    let mut next = encounter.clone();
    let turn_position = next.participants.len();
    next.participants.push(Participant {
        character_id: character.character_id.clone(),
        user_id: character.user_id.clone(),
        display_name: character.display_name.clone(),
        current_hearts: character.current_hearts,
        current_stamina: character.current_stamina,
        damage_dealt: 0,
        is_ko: false,
        joined_before_first_defeat: next.defeated.is_empty(),
        turn_position,
        damaged_monsters: Vec::new(),
    });
    next.updated_at = now;
    debug!(
        target: "raid::encounter",
        encounter = %next.id,
        character = %character.character_id,
        turn_position,
        "encounter.joined"
    );

    let turn = if turn_position == 0 {
        next.current_turn = 0;
        let mut rng = transition_rng(encounter.rng_seed, encounter.version);
        Some(resolve_turn(&mut next, 0, now, ctx, &mut rng))
    } else {
        None
    };

    Ok(Transition {
        encounter: next,
        outcome: JoinOutcome {
            turn_position,
            turn,
        },
    })
}

pub fn take_turn(
    encounter: &Encounter,
    character_id: &CharacterId,
    now: u64,
    ctx: &EngineContext,
) -> Result<Transition<TurnReport>, Rejection> {
    ensure_active(encounter)?;
    let actor = encounter
        .participant_index(character_id)
        .ok_or_else(|| Rejection::NotAParticipant(character_id.clone()))?;
    if actor != encounter.current_turn {
        return Err(Rejection::NotYourTurn(character_id.clone()));
    }

    let mut next = encounter.clone();
    let mut rng = transition_rng(encounter.rng_seed, encounter.version);
    let report = resolve_turn(&mut next, actor, now, ctx, &mut rng);
    Ok(Transition {
        encounter: next,
        outcome: report,
    })
}

/// Fail an active encounter that has been idle for at least `stale_after_ms`.
pub fn force_fail_if_stale(
    encounter: &Encounter,
    now: u64,
    stale_after_ms: u64,
) -> Result<Transition<()>, Rejection> {
    ensure_active(encounter)?;
    let idle_ms = now.saturating_sub(encounter.updated_at);
    if idle_ms < stale_after_ms {
        return Err(Rejection::NotStale {
            idle_ms,
            threshold_ms: stale_after_ms,
        });
    }
    info!(
        target: "raid::encounter",
        encounter = %encounter.id,
        idle_ms,
        "encounter.stale"
    );
    force_fail(encounter, STALE_REASON, now)
}

/// Move an active encounter to `failed`, recording `reason`. No loot.
pub fn force_fail(
    encounter: &Encounter,
    reason: &str,
    now: u64,
) -> Result<Transition<()>, Rejection> {
    ensure_active(encounter)?;
    let mut next = encounter.clone();
    next.status = EncounterStatus::Failed;
    next.failure_reason = Some(reason.to_string());
    next.updated_at = now;
    if reason != STALE_REASON {
        error!(
            target: "raid::encounter",
            encounter = %next.id,
            reason,
            "encounter.force_failed"
        );
    }
    Ok(Transition {
        encounter: next,
        outcome: (),
    })
}

fn first_fighter(encounter: &Encounter) -> Option<usize> {
    encounter
        .participants
        .iter()
        .position(|participant| !participant.is_ko)
}

fn next_fighter_after(encounter: &Encounter, actor: usize) -> Option<usize> {
    let count = encounter.participants.len();
    (1..=count)
        .map(|step| (actor + step) % count)
        .find(|idx| !encounter.participants[*idx].is_ko)
}

fn first_living_monster(encounter: &Encounter) -> usize {
    encounter
        .monsters
        .iter()
        .position(|monster| monster.current_hearts > 0)
        .unwrap_or(encounter.monsters.len())
}

/// Resolve one strike by `actor` against the current monster and advance the
/// record. The caller has already checked that it is `actor`'s turn.
fn resolve_turn(
    next: &mut Encounter,
    actor: usize,
    now: u64,
    ctx: &EngineContext,
    rng: &mut ChaCha8Rng,
) -> TurnReport {
    let monster_index = next.current_monster_index;
    let party_size = next.participants.len();
    let outcome = battle::resolve(
        &next.participants[actor],
        &next.monsters[monster_index],
        party_size,
        &ctx.config.battle,
        rng,
    );
    let character_id = next.participants[actor].character_id.clone();

    let monster = &mut next.monsters[monster_index];
    monster.current_hearts -= outcome.monster_damage;
    let species = monster.species.clone();
    let monster_defeated = monster.current_hearts == 0;
    if monster_defeated {
        monster.defeated_at = Some(now);
        monster.defeated_by = Some(character_id.clone());
    }

    let participant = &mut next.participants[actor];
    if outcome.monster_damage > 0 {
        participant.damage_dealt += outcome.monster_damage;
        if participant.damaged_monsters.last() != Some(&monster_index) {
            participant.damaged_monsters.push(monster_index);
        }
    }
    participant.current_hearts -= outcome.participant_damage;
    let participant_ko = participant.current_hearts == 0;
    if participant_ko {
        participant.is_ko = true;
    }
    next.updated_at = now;

    if monster_defeated {
        next.defeated.push(monster_index);
        next.current_monster_index = first_living_monster(next);
        debug!(
            target: "raid::encounter",
            encounter = %next.id,
            monster = monster_index,
            species = %species,
            by = %character_id,
            "encounter.monster_defeated"
        );
    }

    if next.all_defeated() {
        next.current_turn = first_fighter(next).unwrap_or(next.current_turn);
        match loot::allocate(next, &ctx.loot_table, &ctx.config.loot, rng) {
            Ok(rewards) => {
                next.status = EncounterStatus::Completed;
                next.loot = rewards;
                info!(
                    target: "raid::encounter",
                    encounter = %next.id,
                    participants = next.participants.len(),
                    rewards = next.loot.len(),
                    "encounter.completed"
                );
            }
            Err(err) => {
                next.status = EncounterStatus::Failed;
                next.failure_reason = Some(format!("{CONFIGURATION_REASON}: {err}"));
                error!(
                    target: "raid::encounter",
                    encounter = %next.id,
                    error = %err,
                    "encounter.configuration_failed"
                );
            }
        }
    } else {
        let successor = if monster_defeated {
            first_fighter(next)
        } else {
            next_fighter_after(next, actor)
        };
        match successor {
            Some(turn) => next.current_turn = turn,
            None => {
                next.status = EncounterStatus::Failed;
                next.failure_reason = Some(ALL_KO_REASON.to_string());
                info!(
                    target: "raid::encounter",
                    encounter = %next.id,
                    monsters_defeated = next.defeated.len(),
                    "encounter.failed"
                );
            }
        }
    }

    TurnReport {
        character_id,
        outcome,
        monster_index,
        species,
        monster_defeated,
        participant_ko,
        status: next.status,
        encounter_completed: next.status == EncounterStatus::Completed,
    }
}

/// Check the invariants a record must satisfy before it is persisted.
///
/// Roster and turn structure only matter while the encounter is still being
/// played; a record being closed out is checked for loot consistency alone, so
/// a corrupted encounter can always be failed.
pub fn check_invariants(
    encounter: &Encounter,
    config: &EngineConfig,
) -> Result<(), InvariantViolation> {
    if encounter.status != EncounterStatus::Completed && !encounter.loot.is_empty() {
        return Err(InvariantViolation::UnexpectedLoot(encounter.status));
    }
    if encounter.status == EncounterStatus::Failed {
        return Ok(());
    }

    let count = encounter.monsters.len();
    let (min, max) = (config.roster.min_count, config.roster.max_count);
    if !(min..=max).contains(&count) {
        return Err(InvariantViolation::MonsterCount { count, min, max });
    }

    let expected = first_living_monster(encounter);
    if encounter.current_monster_index != expected {
        return Err(InvariantViolation::CurrentMonster {
            expected,
            actual: encounter.current_monster_index,
        });
    }

    let bosses = encounter.monsters.iter().filter(|m| m.is_boss).count();
    if bosses > 1 {
        return Err(InvariantViolation::MultipleBosses(bosses));
    }

    if encounter.roster != RosterKind::Faction {
        let length = longest_species_run(&encounter.monsters);
        if length > MAX_SPECIES_RUN {
            return Err(InvariantViolation::SpeciesRun {
                length,
                max: MAX_SPECIES_RUN,
            });
        }
    }

    if encounter.status == EncounterStatus::Active && !encounter.participants.is_empty() {
        if first_fighter(encounter).is_none() {
            return Err(InvariantViolation::ActiveWithoutFighters);
        }
        let fighting = encounter
            .participants
            .get(encounter.current_turn)
            .is_some_and(|participant| !participant.is_ko);
        if !fighting {
            return Err(InvariantViolation::TurnPointer(encounter.current_turn));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{BattleConfig, LowTierConfig},
        loot::LootTable,
    };
    use raid_proto::MonsterEntry;

    fn hero(id: &str, hearts: u32) -> CharacterProfile {
        CharacterProfile {
            character_id: CharacterId::new(id),
            user_id: format!("user-{id}"),
            display_name: id.to_string(),
            region: "marsh".to_string(),
            current_hearts: hearts,
            current_stamina: 10,
            affliction_severity: 0,
        }
    }

    /// Every strike lands exactly one heart and nothing hits back.
    fn steady_context() -> EngineContext {
        let config = EngineConfig {
            battle: BattleConfig {
                low_tier: LowTierConfig {
                    roll_per_heart: 1,
                    max_hearts_per_turn: 1,
                    counter_threshold: 0,
                },
                ..BattleConfig::default()
            },
            ..EngineConfig::default()
        };
        EngineContext::builtin().with_config(config)
    }

    /// Every strike misses and knocks the striker out.
    fn lethal_context() -> EngineContext {
        let config = EngineConfig {
            battle: BattleConfig {
                low_tier: LowTierConfig {
                    roll_per_heart: 1_000,
                    max_hearts_per_turn: 0,
                    counter_threshold: 101,
                },
                ..BattleConfig::default()
            },
            ..EngineConfig::default()
        };
        EngineContext::builtin().with_config(config)
    }

    fn slime(species: &str) -> MonsterEntry {
        MonsterEntry {
            species: species.to_string(),
            tier: 1,
            max_hearts: 2,
            current_hearts: 2,
            is_boss: false,
            damage: 1,
            defeated_at: None,
            defeated_by: None,
        }
    }

    /// Five two-heart tier 1 monsters in two species.
    fn fixed_encounter() -> Encounter {
        let monsters = ["Mire Slime", "Mire Slime", "Giant Rat", "Giant Rat", "Mire Slime"]
            .into_iter()
            .map(slime)
            .collect();
        Encounter {
            id: EncounterId::new("enc-1"),
            region: "marsh".to_string(),
            difficulty: "Beginner".to_string(),
            roster: RosterKind::Standard,
            status: EncounterStatus::Active,
            monsters,
            current_monster_index: 0,
            participants: Vec::new(),
            current_turn: 0,
            defeated: Vec::new(),
            loot: BTreeMap::new(),
            version: INITIAL_VERSION,
            rng_seed: 42,
            created_at: 1_000,
            updated_at: 1_000,
            thread_ref: Some("thread-9".to_string()),
            failure_reason: None,
        }
    }

    fn commit(transition: Encounter) -> Encounter {
        let mut record = transition;
        record.version += 1;
        record
    }

    fn join_all(
        mut record: Encounter,
        heroes: &[CharacterProfile],
        ctx: &EngineContext,
    ) -> Encounter {
        for (offset, hero) in heroes.iter().enumerate() {
            let transition = join(&record, hero, 2_000 + offset as u64, ctx).expect("join");
            record = commit(transition.encounter);
        }
        record
    }

    #[test]
    fn create_builds_a_valid_active_record() {
        let ctx = EngineContext::builtin();
        let request = NewEncounter {
            id: EncounterId::new("enc-new"),
            region: "coast".to_string(),
            difficulty: "raid".to_string(),
            mode: RosterMode::Standard,
            monster_count: 9,
            rng_seed: 17,
            created_at: 500,
            thread_ref: None,
        };
        let record = create(&request, &ctx).unwrap();
        assert_eq!(record.status, EncounterStatus::Active);
        assert_eq!(record.difficulty, "Raid");
        assert_eq!(record.roster, RosterKind::Boss);
        assert_eq!(record.monsters.len(), 9);
        assert_eq!(record.version, INITIAL_VERSION);
        check_invariants(&record, &ctx.config).unwrap();
        assert_eq!(create(&request, &ctx).unwrap(), record);
    }

    #[test]
    fn create_rejects_unknown_difficulty() {
        let ctx = EngineContext::builtin();
        let request = NewEncounter {
            id: EncounterId::new("enc-new"),
            region: "coast".to_string(),
            difficulty: "Nightmare".to_string(),
            mode: RosterMode::Standard,
            monster_count: 5,
            rng_seed: 1,
            created_at: 0,
            thread_ref: None,
        };
        assert!(matches!(
            create(&request, &ctx),
            Err(RosterError::Config(crate::error::ConfigError::UnknownProfile(_)))
        ));
    }

    #[test]
    fn first_joiner_opens_the_fight() {
        let ctx = steady_context();
        let record = fixed_encounter();
        let transition = join(&record, &hero("a", 5), 2_000, &ctx).unwrap();
        let turn = transition.outcome.turn.expect("first join strikes");
        assert_eq!(transition.outcome.turn_position, 0);
        assert_eq!(turn.monster_index, 0);
        assert_eq!(turn.outcome.monster_damage, 1);
        assert_eq!(transition.encounter.monsters[0].current_hearts, 1);
        assert_eq!(transition.encounter.participants[0].damage_dealt, 1);
        assert_eq!(transition.encounter.participants[0].damaged_monsters, vec![0]);
        assert_eq!(transition.encounter.current_turn, 0);
        assert_eq!(transition.encounter.updated_at, 2_000);
        assert_eq!(record.participants.len(), 0, "input record is untouched");

        let second = join(&commit(transition.encounter), &hero("b", 5), 2_001, &ctx).unwrap();
        assert!(second.outcome.turn.is_none());
        assert_eq!(second.outcome.turn_position, 1);
        assert!(second.encounter.participants[1].joined_before_first_defeat);
    }

    #[test]
    fn join_rejections() {
        let ctx = EngineContext::builtin();
        let record = join_all(fixed_encounter(), &[hero("a", 5)], &steady_context());

        let again = join(&record, &hero("a", 5), 3_000, &ctx).unwrap_err();
        assert_eq!(again.code(), "already-joined");

        let mut same_user = hero("alt", 5);
        same_user.user_id = "user-a".to_string();
        assert_eq!(
            join(&record, &same_user, 3_000, &ctx).unwrap_err().code(),
            "already-joined"
        );

        let mut afflicted = hero("sick", 5);
        afflicted.affliction_severity = 3;
        assert_eq!(
            join(&record, &afflicted, 3_000, &ctx).unwrap_err().code(),
            "disqualified-status"
        );
        let mut mildly = hero("mild", 5);
        mildly.affliction_severity = 2;
        assert!(join(&record, &mildly, 3_000, &ctx).is_ok());

        assert_eq!(
            join(&record, &hero("empty", 0), 3_000, &ctx).unwrap_err().code(),
            "disqualified-status"
        );

        let mut traveller = hero("far", 5);
        traveller.region = "Highlands".to_string();
        assert_eq!(
            join(&record, &traveller, 3_000, &ctx).unwrap_err().code(),
            "wrong-region"
        );
        let mut local = hero("local", 5);
        local.region = "MARSH".to_string();
        assert!(join(&record, &local, 3_000, &ctx).is_ok());
    }

    #[test]
    fn turn_order_is_enforced() {
        let ctx = steady_context();
        let record = join_all(fixed_encounter(), &[hero("a", 5), hero("b", 5)], &ctx);
        assert_eq!(record.current_turn, 0);

        let err = take_turn(&record, &CharacterId::new("b"), 3_000, &ctx).unwrap_err();
        assert_eq!(err, Rejection::NotYourTurn(CharacterId::new("b")));
        let err = take_turn(&record, &CharacterId::new("z"), 3_000, &ctx).unwrap_err();
        assert_eq!(err.code(), "not-a-participant");

        let turn = take_turn(&record, &CharacterId::new("a"), 3_000, &ctx).unwrap();
        assert!(turn.outcome.monster_defeated);
        assert_eq!(turn.encounter.current_monster_index, 1);
        assert_eq!(turn.encounter.monsters[0].defeated_by, Some(CharacterId::new("a")));
        assert_eq!(turn.encounter.monsters[0].defeated_at, Some(3_000));
        assert_eq!(turn.encounter.defeated, vec![0]);
        assert_eq!(turn.encounter.current_turn, 0, "defeat resets to first fighter");

        let record = commit(turn.encounter);
        let turn = take_turn(&record, &CharacterId::new("a"), 3_001, &ctx).unwrap();
        assert!(!turn.outcome.monster_defeated);
        assert_eq!(turn.encounter.current_turn, 1, "rotation moves on");
    }

    #[test]
    fn rotation_skips_knocked_out_participants() {
        let ctx = steady_context();
        let mut record = join_all(
            fixed_encounter(),
            &[hero("a", 5), hero("b", 5), hero("c", 5)],
            &ctx,
        );
        record.participants[1].is_ko = true;
        record.participants[1].current_hearts = 0;

        let turn = take_turn(&record, &CharacterId::new("a"), 3_000, &ctx).unwrap();
        assert!(turn.outcome.monster_defeated);
        assert_eq!(turn.encounter.current_turn, 0);

        let record = commit(turn.encounter);
        let turn = take_turn(&record, &CharacterId::new("a"), 3_001, &ctx).unwrap();
        assert!(!turn.outcome.monster_defeated);
        assert_eq!(turn.encounter.current_turn, 2);

        let record = commit(turn.encounter);
        let turn = take_turn(&record, &CharacterId::new("c"), 3_002, &ctx).unwrap();
        assert!(turn.outcome.monster_defeated);
        assert_eq!(turn.encounter.current_turn, 0);
    }

    #[test]
    fn defeat_resets_to_lowest_fighter() {
        let ctx = steady_context();
        let mut record = join_all(
            fixed_encounter(),
            &[hero("a", 5), hero("b", 5), hero("c", 5)],
            &ctx,
        );
        record.participants[0].is_ko = true;
        record.participants[0].current_hearts = 0;
        record.current_turn = 2;

        let turn = take_turn(&record, &CharacterId::new("c"), 3_000, &ctx).unwrap();
        assert!(turn.outcome.monster_defeated);
        assert_eq!(turn.encounter.current_turn, 1);
    }

    #[test]
    fn fighting_to_victory_allocates_loot_once() {
        let ctx = steady_context();
        let mut record = join_all(fixed_encounter(), &[hero("a", 20), hero("b", 20)], &ctx);
        let mut now = 3_000;
        while record.status == EncounterStatus::Active {
            let actor = record.participants[record.current_turn].character_id.clone();
            let turn = take_turn(&record, &actor, now, &ctx).unwrap();
            record = commit(turn.encounter);
            check_invariants(&record, &ctx.config).unwrap();
            now += 1;
        }
        assert_eq!(record.status, EncounterStatus::Completed);
        assert!(record.all_defeated());
        assert_eq!(record.defeated, vec![0, 1, 2, 3, 4]);
        assert_eq!(record.loot.len(), 2);
        let damage: u32 = record.participants.iter().map(|p| p.damage_dealt).sum();
        assert_eq!(damage, 10);

        let err = take_turn(&record, &CharacterId::new("a"), now, &ctx).unwrap_err();
        assert_eq!(err, Rejection::NotActive(EncounterStatus::Completed));
    }

    #[test]
    fn unawardable_loot_fails_the_encounter() {
        let table = LootTable::from_json_str(
            r#"{ "items": [ { "name": "Pebble", "rarity": "common", "weight": 1.0 } ] }"#,
        )
        .unwrap();
        let ctx = EngineContext {
            loot_table: Arc::new(table),
            ..steady_context()
        };
        let mut record = join_all(fixed_encounter(), &[hero("a", 20)], &ctx);
        let mut now = 3_000;
        while record.status == EncounterStatus::Active {
            let turn = take_turn(&record, &CharacterId::new("a"), now, &ctx).unwrap();
            record = commit(turn.encounter);
            now += 1;
        }
        assert_eq!(record.status, EncounterStatus::Failed);
        assert!(record.all_defeated());
        assert!(record.loot.is_empty());
        assert!(record
            .failure_reason
            .as_deref()
            .is_some_and(|reason| reason.starts_with(CONFIGURATION_REASON)));
        check_invariants(&record, &ctx.config).unwrap();
    }

    #[test]
    fn total_knockout_fails_without_loot() {
        let ctx = lethal_context();
        let record = join_all(fixed_encounter(), &[hero("a", 1)], &ctx);
        assert_eq!(record.status, EncounterStatus::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some(ALL_KO_REASON));
        assert!(record.loot.is_empty());
        check_invariants(&record, &ctx.config).unwrap();
        assert_eq!(
            join(&record, &hero("late", 5), 5_000, &ctx).unwrap_err().code(),
            "not-active"
        );
    }

    #[test]
    fn transitions_repeat_for_the_same_version() {
        let ctx = EngineContext::builtin();
        let record = join_all(fixed_encounter(), &[hero("a", 20), hero("b", 20)], &ctx);
        let actor = record.participants[record.current_turn].character_id.clone();
        let first = take_turn(&record, &actor, 9_000, &ctx).unwrap();
        let second = take_turn(&record, &actor, 9_000, &ctx).unwrap();
        assert_eq!(first.encounter, second.encounter);
        assert_eq!(first.outcome, second.outcome);
        assert_ne!(
            transition_rng(42, 3).get_seed(),
            transition_rng(42, 4).get_seed()
        );
    }

    #[test]
    fn stale_encounters_fail() {
        let record = fixed_encounter();
        let err = force_fail_if_stale(&record, 1_500, 1_000).unwrap_err();
        assert_eq!(err.code(), "not-stale");

        let failed = force_fail_if_stale(&record, 2_000, 1_000).unwrap().encounter;
        assert_eq!(failed.status, EncounterStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some(STALE_REASON));
        assert_eq!(
            force_fail_if_stale(&failed, 9_000, 1_000).unwrap_err().code(),
            "not-active"
        );
    }

    #[test]
    fn invariant_checks_catch_corruption() {
        let config = EngineConfig::default();
        let mut record = fixed_encounter();
        check_invariants(&record, &config).unwrap();

        record.current_monster_index = 2;
        assert!(matches!(
            check_invariants(&record, &config),
            Err(InvariantViolation::CurrentMonster { expected: 0, actual: 2 })
        ));

        let mut record = fixed_encounter();
        record.monsters[0].is_boss = true;
        record.monsters[1].is_boss = true;
        assert_eq!(
            check_invariants(&record, &config),
            Err(InvariantViolation::MultipleBosses(2))
        );

        let mut record = fixed_encounter();
        record.monsters = ["Mire Slime"; 5].into_iter().map(slime).collect();
        assert!(matches!(
            check_invariants(&record, &config),
            Err(InvariantViolation::SpeciesRun { length: 5, .. })
        ));
        record.roster = RosterKind::Faction;
        check_invariants(&record, &config).unwrap();

        let mut record = fixed_encounter();
        record.monsters.truncate(4);
        assert!(matches!(
            check_invariants(&record, &config),
            Err(InvariantViolation::MonsterCount { count: 4, .. })
        ));

        record.status = EncounterStatus::Failed;
        check_invariants(&record, &config).unwrap();
    }

    #[test]
    fn shared_context_is_cheap_to_clone() {
        let ctx = EngineContext::builtin();
        let clone = ctx.clone();
        assert!(Arc::ptr_eq(&ctx.catalog, &clone.catalog));
    }
}
