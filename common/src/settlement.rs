//! Scoring of bets against the official draw and aggregation into prize tiers.
//!
//! Everything in here is pure: callers load bets from the store, run the
//! settlement and write the results back themselves.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SettlementError;
use crate::Bet;

pub const MIN_NUMBER: u8 = 1;
pub const MAX_NUMBER: u8 = 25;
pub const DRAW_SIZE: usize = 15;
pub const BET_SIZE: usize = 10;
pub const DEFAULT_PRIZE_TIERS: [u8; 4] = [10, 9, 8, 0];

/// The official draw: exactly [`DRAW_SIZE`] distinct numbers, ascending.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "Vec<i32>", into = "Vec<u8>")]
pub struct DrawnSet(Vec<u8>);

impl DrawnSet {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn contains(&self, number: u8) -> bool {
        self.0.binary_search(&number).is_ok()
    }
}

impl TryFrom<Vec<i32>> for DrawnSet {
    type Error = SettlementError;

    fn try_from(value: Vec<i32>) -> Result<Self, Self::Error> {
        validate_drawn_numbers(&value)
    }
}

impl From<DrawnSet> for Vec<u8> {
    fn from(value: DrawnSet) -> Self {
        value.0
    }
}

/// The numbers chosen for one bet: exactly [`BET_SIZE`] distinct numbers, ascending.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "Vec<i32>", into = "Vec<u8>")]
pub struct BetNumbers(Vec<u8>);

impl BetNumbers {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }
}

impl TryFrom<Vec<i32>> for BetNumbers {
    type Error = SettlementError;

    fn try_from(value: Vec<i32>) -> Result<Self, Self::Error> {
        validate_bet_numbers(&value)
    }
}

impl From<BetNumbers> for Vec<u8> {
    fn from(value: BetNumbers) -> Self {
        value.0
    }
}

/// Score values that are aggregated for prizes. Scores outside the set are
/// still computed, they just never count towards a tier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct PrizeTiers(Vec<u8>);

impl PrizeTiers {
    pub fn new(scores: impl IntoIterator<Item = u8>) -> Result<Self, SettlementError> {
        let mut tiers = Vec::new();
        for score in scores {
            if usize::from(score) > BET_SIZE {
                return Err(SettlementError::InvalidPrizeTier {
                    score,
                    reason: "above the bet size",
                });
            }
            if tiers.contains(&score) {
                return Err(SettlementError::InvalidPrizeTier {
                    score,
                    reason: "listed twice",
                });
            }
            tiers.push(score);
        }
        Ok(Self(tiers))
    }

    pub fn tracks(&self, score: u8) -> bool {
        self.0.contains(&score)
    }

    pub fn scores(&self) -> &[u8] {
        &self.0
    }

    pub fn labels(&self) -> impl Iterator<Item = String> + '_ {
        self.0.iter().map(|score| tier_label(*score))
    }
}

impl Default for PrizeTiers {
    fn default() -> Self {
        Self(DEFAULT_PRIZE_TIERS.to_vec())
    }
}

impl TryFrom<Vec<u8>> for PrizeTiers {
    type Error = SettlementError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PrizeTiers> for Vec<u8> {
    fn from(value: PrizeTiers) -> Self {
        value.0
    }
}

pub fn tier_label(score: u8) -> String {
    score.to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BetScore {
    pub hits: Vec<u8>,
    pub score: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BetResult {
    pub bet_id: String,
    pub hits: Vec<u8>,
    pub score: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub results: Vec<BetResult>,
    pub tier_counts: BTreeMap<String, u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GameSlot {
    pub player_name: String,
    pub game_index: u32,
}

fn parse_numbers(candidate: &[i32]) -> Result<Vec<u8>, SettlementError> {
    let numbers = candidate
        .iter()
        .map(|&value| {
            u8::try_from(value)
                .ok()
                .filter(|number| (MIN_NUMBER..=MAX_NUMBER).contains(number))
                .ok_or(SettlementError::InvalidNumberRange {
                    value,
                    min: MIN_NUMBER,
                    max: MAX_NUMBER,
                })
        })
        .collect::<Result<Vec<u8>, _>>()?;

    let mut seen = BTreeSet::new();
    for &number in &numbers {
        if !seen.insert(number) {
            return Err(SettlementError::DuplicateNumber(number));
        }
    }
    Ok(seen.into_iter().collect())
}

pub fn validate_drawn_numbers(candidate: &[i32]) -> Result<DrawnSet, SettlementError> {
    if candidate.len() != DRAW_SIZE {
        return Err(SettlementError::InvalidDrawSize {
            expected: DRAW_SIZE,
            actual: candidate.len(),
        });
    }
    Ok(DrawnSet(parse_numbers(candidate)?))
}

pub fn validate_bet_numbers(candidate: &[i32]) -> Result<BetNumbers, SettlementError> {
    let invalid = || SettlementError::InvalidBetSize {
        expected: BET_SIZE,
        min: MIN_NUMBER,
        max: MAX_NUMBER,
        numbers: candidate.to_vec(),
    };
    if candidate.len() != BET_SIZE {
        return Err(invalid());
    }
    parse_numbers(candidate)
        .map(BetNumbers)
        .map_err(|_| invalid())
}

pub fn score_bet(numbers: &BetNumbers, drawn: &DrawnSet) -> BetScore {
    let hits: Vec<u8> = numbers.iter().filter(|number| drawn.contains(*number)).collect();
    // a bet never holds more than BET_SIZE numbers
    let score = hits.len() as u8;
    BetScore { hits, score }
}

pub fn settle_draw(bets: &[Bet], drawn: &DrawnSet, tiers: &PrizeTiers) -> Settlement {
    let mut tier_counts: BTreeMap<String, u32> = tiers.labels().map(|label| (label, 0)).collect();
    let mut results = Vec::with_capacity(bets.len());

    for bet in bets {
        let BetScore { hits, score } = score_bet(&bet.numbers, drawn);
        if tiers.tracks(score) {
            *tier_counts.entry(tier_label(score)).or_default() += 1;
        }
        results.push(BetResult {
            bet_id: bet.id.clone(),
            hits,
            score,
        });
    }

    Settlement {
        results,
        tier_counts,
    }
}

/// 1-based index of the next game of `player_name`. Only unique within one pool.
pub fn next_game_index(player_name: &str, existing: &[GameSlot]) -> u32 {
    let played = existing
        .iter()
        .filter(|slot| slot.player_name == player_name)
        .count();
    played as u32 + 1
}

fn sample_ascending<R: Rng + ?Sized>(rng: &mut R, count: usize, pool_size: u8) -> Vec<u8> {
    let mut picked: Vec<u8> = rand::seq::index::sample(rng, usize::from(pool_size), count)
        .into_iter()
        .map(|index| index as u8 + 1)
        .collect();
    picked.sort_unstable();
    picked
}

pub fn draw_random_numbers<R: Rng + ?Sized>(
    rng: &mut R,
    count: usize,
    pool_size: u8,
) -> Result<Vec<u8>, SettlementError> {
    if count > usize::from(pool_size) {
        return Err(SettlementError::SampleTooLarge { count, pool_size });
    }
    Ok(sample_ascending(rng, count, pool_size))
}

/// Random bet for the "surprise me" button. Not used for the official draw.
pub fn random_pick() -> BetNumbers {
    BetNumbers(sample_ascending(&mut rand::thread_rng(), BET_SIZE, MAX_NUMBER))
}
