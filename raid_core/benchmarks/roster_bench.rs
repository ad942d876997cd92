use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use raid_core::{
    encounter::{self, transition_rng, NewEncounter},
    CharacterProfile, EngineContext, MonsterCatalog, RosterGenerator, RosterMode,
};
use raid_proto::{CharacterId, EncounterId};

fn bench_roster(c: &mut Criterion) {
    let ctx = EngineContext::builtin();
    let catalog: &MonsterCatalog = &ctx.catalog;
    let generator = RosterGenerator::new(catalog, &ctx.config.roster);
    let mut group = c.benchmark_group("roster");

    for profile in ["Beginner", "Elite", "Raid"] {
        let Ok(difficulty) = ctx.profiles.get(profile) else {
            continue;
        };
        for count in [5usize, 10, 15] {
            let id = format!("{profile}/{count}");
            group.bench_with_input(BenchmarkId::new("generate", id), &count, |b, &count| {
                let mut seed = 0u64;
                b.iter(|| {
                    seed += 1;
                    let mut rng = transition_rng(seed, 0);
                    generator
                        .generate(count, difficulty, "marsh", &RosterMode::Standard, &mut rng)
                        .map(|roster| roster.monsters.len())
                })
            });
        }
    }

    group.finish();
}

fn bench_turns(c: &mut Criterion) {
    let ctx = EngineContext::builtin();
    let mut group = c.benchmark_group("encounter");

    for party in [1usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("join_and_fight", party), &party, |b, &party| {
            b.iter_batched(
                || {
                    encounter::create(
                        &NewEncounter {
                            id: EncounterId::new("bench"),
                            region: "marsh".to_string(),
                            difficulty: "Intermediate".to_string(),
                            mode: RosterMode::Standard,
                            monster_count: 10,
                            rng_seed: 7,
                            created_at: 0,
                            thread_ref: None,
                        },
                        &ctx,
                    )
                    .ok()
                },
                |record| {
                    let Some(mut record) = record else {
                        return;
                    };
                    for slot in 0..party {
                        let hero = CharacterProfile {
                            character_id: CharacterId::new(format!("c{slot}")),
                            user_id: format!("u{slot}"),
                            display_name: format!("Hero {slot}"),
                            region: "marsh".to_string(),
                            current_hearts: 40,
                            current_stamina: 10,
                            affliction_severity: 0,
                        };
                        if let Ok(transition) = encounter::join(&record, &hero, 1, &ctx) {
                            record = transition.encounter;
                            record.version += 1;
                        }
                    }
                    for tick in 0..50u64 {
                        let Some(actor) = record.current_participant() else {
                            break;
                        };
                        let actor = actor.character_id.clone();
                        match encounter::take_turn(&record, &actor, 2 + tick, &ctx) {
                            Ok(transition) => {
                                record = transition.encounter;
                                record.version += 1;
                            }
                            Err(_) => break,
                        }
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(encounter_benches, bench_roster, bench_turns);
criterion_main!(encounter_benches);
