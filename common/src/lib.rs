use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod error;
pub mod network;
pub mod players;
pub mod policy;
pub mod ranking;
pub mod settlement;

pub use error::SettlementError;
pub use policy::{Action, Role};
pub use settlement::{BetNumbers, BetResult, DrawnSet, PrizeTiers};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Profile {
    pub name: String,
    pub role: Role,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Open,
    Closed,
    Drawn,
    Concluded,
}

impl PoolStatus {
    pub fn accepts_bets(self) -> bool {
        self == PoolStatus::Open
    }

    pub fn allows_bet_removal(self) -> bool {
        matches!(self, PoolStatus::Open | PoolStatus::Closed)
    }

    /// Re-settling an already drawn pool is allowed so an operator can fix a mistyped draw.
    pub fn allows_settlement(self) -> bool {
        matches!(self, PoolStatus::Closed | PoolStatus::Drawn)
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    PendingValidation,
    Validated,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub status: PoolStatus,
    pub drawn_numbers: Option<DrawnSet>,
    /// Declared prize per tier label, in cents.
    pub prizes: BTreeMap<String, u64>,
    /// Unix timestamp in milliseconds.
    pub created_at: i64,
    pub version: u64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Bet {
    pub id: String,
    pub pool_id: String,
    /// Profile that registered the bet. Casual suggestions have none.
    pub recorder: Option<String>,
    pub player_name: String,
    pub numbers: BetNumbers,
    pub game_index: u32,
    pub status: BetStatus,
    pub hits: Option<Vec<u8>>,
    pub score: Option<u8>,
}

impl Bet {
    pub fn label(&self) -> String {
        players::format_game_label(&self.player_name, self.game_index)
    }
}

// A potential, unrealised bet. Numbers are checked by the server before anything is stored
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
pub struct PotentialBet {
    pub player_name: String,
    pub numbers: Vec<i32>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct BatchOutcome {
    pub saved: Vec<Bet>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct BatchFailure {
    /// Position of the bet in the submitted batch.
    pub index: usize,
    pub player_name: String,
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct RankingEntry {
    pub position: u32,
    pub player_name: String,
    pub game_index: u32,
    pub score: u8,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct SettlementSummary {
    pub pool: Pool,
    pub results: Vec<BetResult>,
    pub tier_counts: BTreeMap<String, u32>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct PoolResults {
    pub pool: Pool,
    /// Bets of the pool, best score first.
    pub bets: Vec<Bet>,
}
