use std::collections::BTreeMap;

use common::settlement::GameSlot;
use common::{BetNumbers, BetStatus, DrawnSet, PoolStatus, RankingEntry, Role};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::sql::{Id, Thing};
use surrealdb::{Result, Surreal};

use crate::config::DatabaseConfig;

const PROFILE: &str = "profile";
const POOL: &str = "pool";
const BET: &str = "bet";
const PUBLIC_RANKING: &str = "public_ranking";

fn thing(table: &str, id: &str) -> Thing {
    Thing {
        tb: table.into(),
        id: Id::String(id.into()),
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Record {
    #[allow(dead_code)]
    pub id: Thing,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbProfile {
    #[serde(skip_serializing)]
    pub id: Thing,
    pub name: String,
    pub role: Role,
}

impl DbProfile {
    pub fn new(name: impl Into<String> + Clone, role: Role) -> Self {
        Self {
            id: Thing {
                tb: PROFILE.into(),
                id: Id::String(name.clone().into()),
            },
            name: name.into(),
            role,
        }
    }
}

impl From<DbProfile> for common::Profile {
    fn from(value: DbProfile) -> Self {
        common::Profile {
            name: value.name,
            role: value.role,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbPool {
    #[serde(skip_serializing)]
    pub id: Thing,
    pub name: String,
    pub status: PoolStatus,
    pub drawn_numbers: Option<DrawnSet>,
    pub prizes: BTreeMap<String, u64>,
    pub created_at: i64,
    pub version: u64,
}

impl DbPool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Thing {
                tb: POOL.into(),
                id: Id::rand(),
            },
            name: name.into(),
            status: PoolStatus::Open,
            drawn_numbers: None,
            prizes: BTreeMap::new(),
            created_at: now_millis(),
            version: 0,
        }
    }
}

impl From<DbPool> for common::Pool {
    fn from(value: DbPool) -> Self {
        common::Pool {
            id: value.id.id.to_raw(),
            name: value.name,
            status: value.status,
            drawn_numbers: value.drawn_numbers,
            prizes: value.prizes,
            created_at: value.created_at,
            version: value.version,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbBet {
    #[serde(skip_serializing)]
    pub id: Thing,
    pub pool: String,
    pub recorder: Option<String>,
    pub player_name: String,
    pub numbers: BetNumbers,
    pub game_index: u32,
    pub status: BetStatus,
    pub hits: Option<Vec<u8>>,
    pub score: Option<u8>,
    pub created_at: i64,
}

impl DbBet {
    pub fn new(
        pool: impl Into<String>,
        recorder: Option<String>,
        player_name: impl Into<String>,
        numbers: BetNumbers,
        game_index: u32,
        status: BetStatus,
    ) -> Self {
        Self {
            id: Thing {
                tb: BET.into(),
                id: Id::rand(),
            },
            pool: pool.into(),
            recorder,
            player_name: player_name.into(),
            numbers,
            game_index,
            status,
            hits: None,
            score: None,
            created_at: now_millis(),
        }
    }
}

impl From<DbBet> for common::Bet {
    fn from(value: DbBet) -> Self {
        common::Bet {
            id: value.id.id.to_raw(),
            pool_id: value.pool,
            recorder: value.recorder,
            player_name: value.player_name,
            numbers: value.numbers,
            game_index: value.game_index,
            status: value.status,
            hits: value.hits,
            score: value.score,
        }
    }
}

#[derive(Serialize, Debug)]
struct BetResultPatch {
    hits: Vec<u8>,
    score: u8,
}

#[derive(Serialize, Debug)]
struct BetStatusPatch {
    status: BetStatus,
}

/// Filters for listing the bets of a pool.
#[derive(Debug, Clone, Default)]
pub struct BetFilter {
    pub recorder: Option<String>,
    pub status: Option<BetStatus>,
}

pub struct DatabaseConnection {
    connection: Surreal<Any>,
}

impl DatabaseConnection {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let db = surrealdb::engine::any::connect(config.address.as_str()).await?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            db.signin(Root {
                username: username.as_str(),
                password: password.as_str(),
            })
            .await?;
        }

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await?;

        Ok(Self { connection: db })
    }

    pub async fn add_profile(&mut self, profile: &DbProfile) -> Result<()> {
        let _: Option<Record> = self
            .connection
            .create((PROFILE, profile.name.as_str()))
            .content(profile)
            .await?;

        Ok(())
    }

    pub async fn get_profile(&self, name: &str) -> Result<Option<DbProfile>> {
        self.connection.select((PROFILE, name)).await
    }

    pub async fn add_pool(&mut self, pool: &DbPool) -> Result<Option<DbPool>> {
        let raw_id = pool.id.id.to_raw();
        self.connection
            .create((POOL, raw_id.as_str()))
            .content(pool)
            .await
    }

    pub async fn get_pool(&self, pool_id: &str) -> Result<Option<DbPool>> {
        self.connection.select((POOL, pool_id)).await
    }

    /// Most recently created pool whose status is one of `statuses`.
    pub async fn latest_pool_with_status(&self, statuses: &[PoolStatus]) -> Result<Option<DbPool>> {
        let pools: Vec<DbPool> = self
            .connection
            .query("SELECT * FROM pool WHERE status INSIDE $statuses ORDER BY created_at DESC LIMIT 1;")
            .bind(("statuses", statuses.to_vec()))
            .await?
            .take(0)?;
        Ok(pools.into_iter().next())
    }

    /// Moves a pool to `to` only if it is currently in one of `from`. Returns
    /// `None` when the guard did not match.
    pub async fn transition_pool(
        &mut self,
        pool_id: &str,
        from: &[PoolStatus],
        to: PoolStatus,
    ) -> Result<Option<DbPool>> {
        let updated: Vec<DbPool> = self
            .connection
            .query("UPDATE $pool SET status = $to, version += 1 WHERE status INSIDE $from;")
            .bind(("pool", thing(POOL, pool_id)))
            .bind(("to", to))
            .bind(("from", from.to_vec()))
            .await?
            .take(0)?;
        Ok(updated.into_iter().next())
    }

    /// Writes the draw and declared prizes if nobody else has written the pool
    /// since `expected_version` was read.
    pub async fn record_settlement(
        &mut self,
        pool_id: &str,
        expected_version: u64,
        drawn: &DrawnSet,
        prizes: &BTreeMap<String, u64>,
    ) -> Result<Option<DbPool>> {
        let updated: Vec<DbPool> = self
            .connection
            .query(
                "UPDATE $pool SET status = $status, drawn_numbers = $drawn, prizes = $prizes, version += 1 \
                 WHERE version = $version AND status INSIDE $allowed;",
            )
            .bind(("pool", thing(POOL, pool_id)))
            .bind(("status", PoolStatus::Drawn))
            .bind(("drawn", drawn.clone()))
            .bind(("prizes", prizes.clone()))
            .bind(("version", expected_version))
            .bind(("allowed", vec![PoolStatus::Closed, PoolStatus::Drawn]))
            .await?
            .take(0)?;
        Ok(updated.into_iter().next())
    }

    pub async fn add_bet(&mut self, bet: &DbBet) -> Result<Option<DbBet>> {
        let raw_id = bet.id.id.to_raw();
        self.connection
            .create((BET, raw_id.as_str()))
            .content(bet)
            .await
    }

    pub async fn get_bet(&self, bet_id: &str) -> Result<Option<DbBet>> {
        self.connection.select((BET, bet_id)).await
    }

    pub async fn remove_bet(&mut self, bet_id: &str) -> Result<Option<DbBet>> {
        self.connection.delete((BET, bet_id)).await
    }

    pub async fn set_bet_status(&mut self, bet_id: &str, status: BetStatus) -> Result<Option<DbBet>> {
        self.merge_into_bet(bet_id, BetStatusPatch { status }).await
    }

    pub async fn record_bet_result(&mut self, bet_id: &str, hits: Vec<u8>, score: u8) -> Result<Option<DbBet>> {
        self.merge_into_bet(bet_id, BetResultPatch { hits, score }).await
    }

    /// Updates a bet only if it still exists; a removed bet is never recreated
    /// as a partial record. Returns `None` when nothing matched.
    async fn merge_into_bet(&mut self, bet_id: &str, patch: impl Serialize) -> Result<Option<DbBet>> {
        let updated: Vec<DbBet> = self
            .connection
            .query("UPDATE $bet MERGE $patch WHERE pool != NONE;")
            .bind(("bet", thing(BET, bet_id)))
            .bind(("patch", patch))
            .await?
            .take(0)?;
        Ok(updated.into_iter().next())
    }

    pub async fn get_bets_for_pool(&self, pool_id: &str, filter: &BetFilter) -> Result<Vec<DbBet>> {
        let mut sql = String::from("SELECT * FROM bet WHERE pool = $pool");
        if filter.recorder.is_some() {
            sql.push_str(" AND recorder = $recorder");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = $status");
        }
        sql.push_str(" ORDER BY player_name ASC, game_index ASC;");

        self.connection
            .query(sql)
            .bind(("pool", pool_id.to_string()))
            .bind(("recorder", filter.recorder.clone()))
            .bind(("status", filter.status))
            .await?
            .take(0)
    }

    pub async fn get_game_slots(&self, pool_id: &str, player_name: &str) -> Result<Vec<GameSlot>> {
        self.connection
            .query("SELECT player_name, game_index FROM bet WHERE pool = $pool AND player_name = $player;")
            .bind(("pool", pool_id.to_string()))
            .bind(("player", player_name.to_string()))
            .await?
            .take(0)
    }

    /// Every bet ever recorded, newest first, optionally only those of one recorder.
    pub async fn get_bet_history(&self, recorder: Option<&str>) -> Result<Vec<DbBet>> {
        let sql = match recorder {
            Some(_) => "SELECT * FROM bet WHERE recorder = $recorder ORDER BY created_at DESC;",
            None => "SELECT * FROM bet ORDER BY created_at DESC;",
        };
        self.connection
            .query(sql)
            .bind(("recorder", recorder.map(str::to_string)))
            .await?
            .take(0)
    }

    /// Wholesale replacement: the old projection is deleted before the new one is written.
    pub async fn replace_public_ranking(&mut self, entries: &[RankingEntry]) -> Result<()> {
        let _: Vec<Record> = self.connection.delete(PUBLIC_RANKING).await?;
        for entry in entries {
            let _: Vec<Record> = self.connection.create(PUBLIC_RANKING).content(entry).await?;
        }
        Ok(())
    }

    pub async fn get_public_ranking(&self) -> Result<Vec<RankingEntry>> {
        self.connection
            .query("SELECT position, player_name, game_index, score FROM public_ranking ORDER BY position ASC;")
            .await?
            .take(0)
    }
}
