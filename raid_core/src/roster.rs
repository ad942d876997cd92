//! Roster generation: the ordered monster list of one encounter.
//!
//! Standard rosters are drawn in species groups of 2-3 and then passed through
//! [`arrange_species_runs`], which reorders (never replaces) monsters so that
//! no species occupies more than three consecutive slots. Boss rosters apply
//! the same pass to the support monsters and drop the boss at a random slot.
//! Faction rosters follow their own rank ordering instead.

use std::collections::VecDeque;

use rand::Rng;
use raid_proto::{MonsterEntry, RosterKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    catalog::{FactionRank, MonsterCatalog, MonsterTemplate},
    config::RosterConfig,
    difficulty::{DifficultyProfile, DifficultyShape, TierSampler},
    error::ConfigError,
};

/// Longest run of one species allowed in a standard roster.
pub const MAX_SPECIES_RUN: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterMode {
    #[default]
    Standard,
    /// Force a boss even when the profile is flat.
    Boss,
    /// Restrict the roster to one faction tag.
    Faction(String),
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("monster count {count} is outside {min}..={max}")]
    CountOutOfRange { count: usize, min: usize, max: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug)]
pub struct GeneratedRoster {
    pub kind: RosterKind,
    pub monsters: Vec<MonsterEntry>,
}

pub struct RosterGenerator<'a> {
    catalog: &'a MonsterCatalog,
    config: &'a RosterConfig,
}

impl<'a> RosterGenerator<'a> {
    pub fn new(catalog: &'a MonsterCatalog, config: &'a RosterConfig) -> Self {
        Self { catalog, config }
    }

    pub fn generate<R: Rng + ?Sized>(
        &self,
        count: usize,
        profile: &DifficultyProfile,
        region: &str,
        mode: &RosterMode,
        rng: &mut R,
    ) -> Result<GeneratedRoster, RosterError> {
        if !(self.config.min_count..=self.config.max_count).contains(&count) {
            return Err(RosterError::CountOutOfRange {
                count,
                min: self.config.min_count,
                max: self.config.max_count,
            });
        }

        let roster = match (mode, profile.shape()) {
            (RosterMode::Faction(tag), _) => GeneratedRoster {
                kind: RosterKind::Faction,
                monsters: self.faction_roster(count, tag, rng)?,
            },
            (_, DifficultyShape::BossSplit { boss, support }) => GeneratedRoster {
                kind: RosterKind::Boss,
                monsters: self.boss_roster(count, boss, support, region, rng)?,
            },
            (RosterMode::Boss, DifficultyShape::Flat(_)) => {
                return Err(ConfigError::NoBossTier(profile.name().to_string()).into());
            }
            (RosterMode::Standard, DifficultyShape::Flat(sampler)) => GeneratedRoster {
                kind: RosterKind::Standard,
                monsters: self.standard_roster(count, sampler, region, rng)?,
            },
        };

        debug!(
            target: "raid::roster",
            profile = profile.name(),
            region,
            kind = roster.kind.as_str(),
            count = roster.monsters.len(),
            "roster.generated"
        );
        Ok(roster)
    }

    fn standard_roster<R: Rng + ?Sized>(
        &self,
        count: usize,
        sampler: &TierSampler,
        region: &str,
        rng: &mut R,
    ) -> Result<Vec<MonsterEntry>, ConfigError> {
        for attempt in 1..=self.config.max_attempts {
            let drawn = self.draw_groups(count, sampler, region, rng)?;
            if let Some(arranged) = arrange_species_runs(drawn) {
                return Ok(arranged);
            }
            debug!(target: "raid::roster", attempt, region, "roster.regroup_retry");
        }
        Err(ConfigError::GroupingInfeasible {
            attempts: self.config.max_attempts,
        })
    }

    fn draw_groups<R: Rng + ?Sized>(
        &self,
        count: usize,
        sampler: &TierSampler,
        region: &str,
        rng: &mut R,
    ) -> Result<Vec<MonsterEntry>, ConfigError> {
        let mut monsters = Vec::with_capacity(count);
        while monsters.len() < count {
            let tier = sampler.sample(rng);
            let template = pick(&self.catalog.candidates(tier, region), rng).ok_or_else(|| {
                ConfigError::NoCandidates {
                    tier,
                    region: region.to_string(),
                }
            })?;
            let remaining = count - monsters.len();
            let group = rng
                .gen_range(self.config.group_min..=self.config.group_max)
                .min(remaining);
            monsters.extend((0..group).map(|_| template.spawn(false)));
        }
        Ok(monsters)
    }

    fn boss_roster<R: Rng + ?Sized>(
        &self,
        count: usize,
        boss: &TierSampler,
        support: &TierSampler,
        region: &str,
        rng: &mut R,
    ) -> Result<Vec<MonsterEntry>, ConfigError> {
        let boss_tier = boss.sample(rng);
        let boss = pick(&self.catalog.candidates(boss_tier, region), rng)
            .ok_or_else(|| ConfigError::NoCandidates {
                tier: boss_tier,
                region: region.to_string(),
            })?
            .spawn(true);

        let mut monsters = self.standard_roster(count - 1, support, region, rng)?;
        let position = rng.gen_range(0..count);
        monsters.insert(position, boss);
        Ok(monsters)
    }

    fn faction_roster<R: Rng + ?Sized>(
        &self,
        count: usize,
        faction: &str,
        rng: &mut R,
    ) -> Result<Vec<MonsterEntry>, ConfigError> {
        let regulars = self.catalog.faction_candidates(faction, FactionRank::Regular);
        let elites = self.catalog.faction_candidates(faction, FactionRank::Elite);
        for (pool, rank) in [
            (&regulars, FactionRank::Regular),
            (&elites, FactionRank::Elite),
        ] {
            if pool.is_empty() {
                return Err(ConfigError::NoFactionCandidates {
                    faction: faction.to_string(),
                    rank,
                });
            }
        }

        let mut regular_count = 0usize;
        let mut elite_count = 0usize;
        let mut monsters = Vec::with_capacity(count);
        for slot in 0..count {
            let wants_elite = slot > 0 && rng.gen_bool(self.config.elite_chance);
            let pool = if wants_elite && elite_count + 1 < regular_count {
                elite_count += 1;
                &elites
            } else {
                regular_count += 1;
                &regulars
            };
            if let Some(template) = pick(pool, rng) {
                monsters.push(template.spawn(false));
            }
        }
        Ok(monsters)
    }
}

fn pick<'t, R: Rng + ?Sized>(
    candidates: &[&'t MonsterTemplate],
    rng: &mut R,
) -> Option<&'t MonsterTemplate> {
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rng.gen_range(0..candidates.len())])
}

/// Split a run length into chunks of at most [`MAX_SPECIES_RUN`], avoiding a
/// trailing chunk of one (4 becomes 2 + 2).
fn chunk_sizes(run: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut left = run;
    while left > MAX_SPECIES_RUN {
        let take = if left - MAX_SPECIES_RUN == 1 {
            MAX_SPECIES_RUN - 1
        } else {
            MAX_SPECIES_RUN
        };
        sizes.push(take);
        left -= take;
    }
    sizes.push(left);
    sizes
}

/// Reorder monsters so that no species run exceeds [`MAX_SPECIES_RUN`].
///
/// Runs are cut into chunks of 2-3, single monsters are moved to the tail and
/// chunks are then laid out so neighbours never share a species. The result is
/// a permutation of the input and depends only on its order. Returns `None`
/// when one species dominates so heavily that no layout exists.
pub fn arrange_species_runs(monsters: Vec<MonsterEntry>) -> Option<Vec<MonsterEntry>> {
    let mut grouped: Vec<Vec<MonsterEntry>> = Vec::new();
    let mut singles: Vec<Vec<MonsterEntry>> = Vec::new();

    let mut runs: Vec<Vec<MonsterEntry>> = Vec::new();
    for monster in monsters {
        match runs.last_mut() {
            Some(run) if run[0].species == monster.species => run.push(monster),
            _ => runs.push(vec![monster]),
        }
    }
    for run in runs {
        let mut rest = run.into_iter();
        for size in chunk_sizes(rest.len()) {
            let chunk: Vec<MonsterEntry> = rest.by_ref().take(size).collect();
            if chunk.len() == 1 {
                singles.push(chunk);
            } else {
                grouped.push(chunk);
            }
        }
    }

    let mut pending: VecDeque<Vec<MonsterEntry>> = grouped.into_iter().chain(singles).collect();
    let mut placed: Vec<Vec<MonsterEntry>> = Vec::with_capacity(pending.len());
    while let Some(chunk) = pending.pop_front() {
        let species = chunk[0].species.clone();
        let clashes = placed
            .last()
            .is_some_and(|last| last[0].species == species);
        if !clashes {
            placed.push(chunk);
            continue;
        }

        if let Some(pos) = pending
            .iter()
            .position(|candidate| candidate[0].species != species)
        {
            if let Some(other) = pending.remove(pos) {
                placed.push(other);
            }
            pending.push_front(chunk);
            continue;
        }

        let slot = (0..placed.len()).find(|&idx| {
            let before_ok = idx == 0 || placed[idx - 1][0].species != species;
            before_ok && placed[idx][0].species != species
        })?;
        placed.insert(slot, chunk);
    }

    Some(placed.into_iter().flatten().collect())
}

/// Length of the longest run of a single species.
pub fn longest_species_run(monsters: &[MonsterEntry]) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<&str> = None;
    for monster in monsters {
        if previous == Some(monster.species.as_str()) {
            current += 1;
        } else {
            current = 1;
            previous = Some(monster.species.as_str());
        }
        longest = longest.max(current);
    }
    longest
}
