use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::Parser;
use raid_core::{
    ChannelNotifier, CharacterProfile, CreateRequest, EncounterService, EngineContext,
    Clock, InMemoryEncounterStore, ManualClock, RosterMode, StaticDirectory, SystemClock,
};
use raid_proto::{
    encode_encounter_json, encode_summary_json, CharacterId, EncounterId, EncounterStatus,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a seeded raid encounter end to end", long_about = None)]
struct Args {
    /// Region the encounter takes place in
    #[arg(long, default_value = "marsh")]
    region: String,

    /// Number of monsters (5-15)
    #[arg(long, default_value_t = 8)]
    count: usize,

    /// Difficulty profile name
    #[arg(long, default_value = "Beginner")]
    difficulty: String,

    /// Roster mode: standard, boss or faction:<tag>
    #[arg(long, default_value = "standard")]
    mode: String,

    /// Number of generated participants (ignored with --characters)
    #[arg(long, default_value_t = 3)]
    party: usize,

    /// Starting hearts of generated participants
    #[arg(long, default_value_t = 30)]
    hearts: u32,

    /// JSON file with an array of character profiles to use instead
    #[arg(long)]
    characters: Option<PathBuf>,

    /// Encounter seed; random when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Give up after this many turns
    #[arg(long, default_value_t = 1_000)]
    max_turns: usize,

    /// Print every turn report
    #[arg(long)]
    turns: bool,

    /// Write the final encounter record as JSON to this file
    #[arg(long)]
    dump_record: Option<PathBuf>,
}

fn parse_mode(raw: &str) -> Result<RosterMode> {
    match raw.split_once(':') {
        Some(("faction", tag)) if !tag.is_empty() => Ok(RosterMode::Faction(tag.to_string())),
        None if raw.eq_ignore_ascii_case("standard") => Ok(RosterMode::Standard),
        None if raw.eq_ignore_ascii_case("boss") => Ok(RosterMode::Boss),
        _ => bail!("unknown roster mode '{raw}' (expected standard, boss or faction:<tag>)"),
    }
}

fn load_party(args: &Args) -> Result<Vec<CharacterProfile>> {
    if let Some(path) = &args.characters {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read characters at {}", path.display()))?;
        let party: Vec<CharacterProfile> = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse characters at {}", path.display()))?;
        if party.is_empty() {
            bail!("{} lists no characters", path.display());
        }
        return Ok(party);
    }
    if args.party == 0 {
        bail!("--party must be at least 1");
    }
    Ok((0..args.party)
        .map(|slot| CharacterProfile {
            character_id: CharacterId::new(format!("hero-{slot}")),
            user_id: format!("user-{slot}"),
            display_name: format!("Hero {}", slot + 1),
            region: args.region.clone(),
            current_hearts: args.hearts,
            current_stamina: 10,
            affliction_severity: 0,
        })
        .collect())
}

type HarnessService = EncounterService<InMemoryEncounterStore, StaticDirectory>;

/// Join every character in order, one second apart. Stops early once the
/// encounter is over. Returns how many joined.
async fn join_party(
    service: &HarnessService,
    clock: &ManualClock,
    id: &EncounterId,
    party: &[CharacterProfile],
    print_turns: bool,
) -> Result<usize> {
    let mut joined_count = 0;
    for character in party {
        if service.encounter(id).await?.status != EncounterStatus::Active {
            info!(
                target: "raid::harness",
                encounter = %id,
                character = %character.character_id,
                "harness.join_skipped"
            );
            break;
        }
        clock.advance(1_000);
        let joined = service
            .join(id, &character.character_id)
            .await
            .with_context(|| format!("{} could not join", character.character_id))?;
        joined_count += 1;
        if let (true, Some(turn)) = (print_turns, joined.turn) {
            println!("{}", serde_json::to_string(&turn)?);
        }
    }
    Ok(joined_count)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mode = parse_mode(&args.mode)?;
    let party = load_party(&args)?;
    let ctx = EngineContext::load_from_env().context("Engine configuration is invalid")?;

    // Simulated turns are a second apart starting from now.
    let clock = Arc::new(ManualClock::new(SystemClock.now_ms()));
    let (notifier, summaries) = ChannelNotifier::channel();
    let service = EncounterService::new(
        ctx,
        Arc::new(InMemoryEncounterStore::new()),
        Arc::new(StaticDirectory::new(party.clone())),
        Arc::new(notifier),
        clock.clone(),
    );

    let id = service
        .create(CreateRequest {
            region: args.region.clone(),
            monster_count: args.count,
            difficulty: args.difficulty.clone(),
            mode,
            seed: args.seed,
            thread_ref: None,
        })
        .await
        .with_context(|| "Failed to create encounter")?;
    let record = service.encounter(&id).await?;
    info!(
        target: "raid::harness",
        encounter = %id,
        seed = record.rng_seed,
        monsters = record.monsters.len(),
        "harness.created"
    );

    join_party(&service, &clock, &id, &party, args.turns).await?;

    for _ in 0..args.max_turns {
        let record = service.encounter(&id).await?;
        if record.status != EncounterStatus::Active {
            break;
        }
        let Some(actor) = record.current_participant() else {
            bail!("encounter {id} is active without participants");
        };
        clock.advance(1_000);
        let report = service.take_turn(&id, &actor.character_id).await?;
        if args.turns {
            println!("{}", serde_json::to_string(&report)?);
        }
    }

    if let Some(path) = &args.dump_record {
        let record = service.encounter(&id).await?;
        fs::write(path, encode_encounter_json(&record)?)
            .with_context(|| format!("Failed to write record to {}", path.display()))?;
    }

    let Ok(summary) = summaries.try_recv() else {
        bail!("encounter {id} did not finish within {} turns", args.max_turns);
    };
    println!("{}", encode_summary_json(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use raid_core::{EngineConfig, LogNotifier};

    fn hero(slot: usize) -> CharacterProfile {
        CharacterProfile {
            character_id: CharacterId::new(format!("hero-{slot}")),
            user_id: format!("user-{slot}"),
            display_name: format!("Hero {slot}"),
            region: "marsh".to_string(),
            current_hearts: 1,
            current_stamina: 10,
            affliction_severity: 0,
        }
    }

    #[tokio::test]
    async fn party_stops_joining_after_a_wipe() -> Result<()> {
        // Every strike misses and the monster always hits back.
        let config = EngineConfig::from_json_str(
            r#"{ "battle": { "low_tier": {
                "roll_per_heart": 1000, "max_hearts_per_turn": 0, "counter_threshold": 101
            } } }"#,
        )?;
        let party = vec![hero(0), hero(1), hero(2)];
        let clock = Arc::new(ManualClock::new(0));
        let service = EncounterService::new(
            EngineContext::builtin().with_config(config),
            Arc::new(InMemoryEncounterStore::new()),
            Arc::new(StaticDirectory::new(party.clone())),
            Arc::new(LogNotifier),
            clock.clone(),
        );
        let id = service
            .create(CreateRequest {
                region: "marsh".to_string(),
                monster_count: 5,
                difficulty: "Beginner".to_string(),
                mode: RosterMode::Standard,
                seed: Some(3),
                thread_ref: None,
            })
            .await?;

        let joined = join_party(&service, &clock, &id, &party, false).await?;
        assert_eq!(joined, 1);
        let record = service.encounter(&id).await?;
        assert_eq!(record.status, EncounterStatus::Failed);
        assert_eq!(record.participants.len(), 1);
        Ok(())
    }

    #[test]
    fn roster_modes_parse() {
        assert!(matches!(parse_mode("boss"), Ok(RosterMode::Boss)));
        assert!(matches!(
            parse_mode("faction:cult"),
            Ok(RosterMode::Faction(tag)) if tag == "cult"
        ));
        assert!(parse_mode("faction:").is_err());
    }
}
