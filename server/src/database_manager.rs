use std::collections::{BTreeMap, HashMap};

use common::players::normalize_player_name;
use common::settlement::{next_game_index, validate_bet_numbers, GameSlot};
use common::{
    Action, BatchFailure, BatchOutcome, Bet, BetResult, BetStatus, DrawnSet, Pool, PoolStatus, PotentialBet,
    Profile, RankingEntry, Role,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::database::{BetFilter, DatabaseConnection, DbBet, DbPool, DbProfile};
use crate::error::{ServiceError, ServiceResult};

pub type Responder<T> = oneshot::Sender<ServiceResult<T>>;

pub enum DatabaseRequest {
    GetProfile {
        name: String,
        responder: Responder<Option<Profile>>,
    },
    EnsureProfile {
        name: String,
        role: Role,
        responder: Responder<()>,
    },
    GetPool {
        id: String,
        responder: Responder<Option<Pool>>,
    },
    LatestPool {
        statuses: Vec<PoolStatus>,
        responder: Responder<Option<Pool>>,
    },
    CreatePool {
        name: String,
        responder: Responder<Pool>,
    },
    TransitionPool {
        id: String,
        from: Vec<PoolStatus>,
        to: PoolStatus,
        responder: Responder<Option<Pool>>,
    },
    RecordSettlement {
        pool_id: String,
        expected_version: u64,
        drawn: DrawnSet,
        prizes: BTreeMap<String, u64>,
        responder: Responder<Option<Pool>>,
    },
    GetBet {
        id: String,
        responder: Responder<Option<Bet>>,
    },
    GetBets {
        pool_id: String,
        filter: BetFilter,
        responder: Responder<Vec<Bet>>,
    },
    GetBetHistory {
        recorder: Option<String>,
        responder: Responder<Vec<Bet>>,
    },
    AddBets {
        pool_id: String,
        recorder: Option<String>,
        status: BetStatus,
        bets: Vec<PotentialBet>,
        responder: Responder<BatchOutcome>,
    },
    /// `recorder` restricts the removal to bets recorded by that profile.
    RemoveBet {
        id: String,
        recorder: Option<String>,
        responder: Responder<Bet>,
    },
    ValidateBet {
        id: String,
        responder: Responder<Bet>,
    },
    /// Answers with the ids of bets that no longer exist.
    RecordBetResults {
        results: Vec<BetResult>,
        responder: Responder<Vec<String>>,
    },
    ReplaceRanking {
        entries: Vec<RankingEntry>,
        responder: Responder<()>,
    },
    GetRanking {
        responder: Responder<Vec<RankingEntry>>,
    },
}

pub struct DatabaseManager {
    db_connection: DatabaseConnection,
    work_queue: mpsc::Receiver<DatabaseRequest>,
}

pub fn transform_err<T>(result: surrealdb::Result<T>) -> ServiceResult<T> {
    result.map_err(ServiceError::from)
}

/// Sends one request to the database manager and waits for its answer.
pub async fn request<T>(
    db_tx: &mpsc::Sender<DatabaseRequest>,
    make: impl FnOnce(Responder<T>) -> DatabaseRequest,
) -> ServiceResult<T> {
    let (resp_tx, resp_rx) = oneshot::channel();
    db_tx.send(make(resp_tx)).await?;
    resp_rx.await?
}

impl DatabaseManager {
    pub fn new(db_connection: DatabaseConnection, work_queue: mpsc::Receiver<DatabaseRequest>) -> Self {
        Self {
            db_connection,
            work_queue,
        }
    }

    pub async fn manage(&mut self) {
        while let Some(request) = self.work_queue.recv().await {
            match request {
                DatabaseRequest::GetProfile { name, responder } => {
                    let resp = transform_err(self.db_connection.get_profile(&name).await);
                    let _ = responder.send(resp.map(|profile| profile.map(Into::into)));
                }
                DatabaseRequest::EnsureProfile { name, role, responder } => {
                    let _ = responder.send(self.ensure_profile(name, role).await);
                }
                DatabaseRequest::GetPool { id, responder } => {
                    let resp = transform_err(self.db_connection.get_pool(&id).await);
                    let _ = responder.send(resp.map(|pool| pool.map(Into::into)));
                }
                DatabaseRequest::LatestPool { statuses, responder } => {
                    let resp = transform_err(self.db_connection.latest_pool_with_status(&statuses).await);
                    let _ = responder.send(resp.map(|pool| pool.map(Into::into)));
                }
                DatabaseRequest::CreatePool { name, responder } => {
                    let _ = responder.send(self.create_pool(name).await);
                }
                DatabaseRequest::TransitionPool {
                    id,
                    from,
                    to,
                    responder,
                } => {
                    let resp = transform_err(self.db_connection.transition_pool(&id, &from, to).await);
                    let _ = responder.send(resp.map(|pool| pool.map(Into::into)));
                }
                DatabaseRequest::RecordSettlement {
                    pool_id,
                    expected_version,
                    drawn,
                    prizes,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .record_settlement(&pool_id, expected_version, &drawn, &prizes)
                        .await;
                    let _ = responder.send(transform_err(resp).map(|pool| pool.map(Into::into)));
                }
                DatabaseRequest::GetBet { id, responder } => {
                    let resp = transform_err(self.db_connection.get_bet(&id).await);
                    let _ = responder.send(resp.map(|bet| bet.map(Into::into)));
                }
                DatabaseRequest::GetBets {
                    pool_id,
                    filter,
                    responder,
                } => {
                    let resp = transform_err(self.db_connection.get_bets_for_pool(&pool_id, &filter).await);
                    let _ = responder.send(resp.map(|bets| bets.into_iter().map(Into::into).collect()));
                }
                DatabaseRequest::GetBetHistory { recorder, responder } => {
                    let resp = transform_err(self.db_connection.get_bet_history(recorder.as_deref()).await);
                    let _ = responder.send(resp.map(|bets| bets.into_iter().map(Into::into).collect()));
                }
                DatabaseRequest::AddBets {
                    pool_id,
                    recorder,
                    status,
                    bets,
                    responder,
                } => {
                    let _ = responder.send(self.add_bets(&pool_id, recorder, status, bets).await);
                }
                DatabaseRequest::RemoveBet {
                    id,
                    recorder,
                    responder,
                } => {
                    let _ = responder.send(self.remove_bet(&id, recorder).await);
                }
                DatabaseRequest::ValidateBet { id, responder } => {
                    let _ = responder.send(self.validate_bet(&id).await);
                }
                DatabaseRequest::RecordBetResults { results, responder } => {
                    let _ = responder.send(self.record_bet_results(results).await);
                }
                DatabaseRequest::ReplaceRanking { entries, responder } => {
                    let resp = self.db_connection.replace_public_ranking(&entries).await;
                    let _ = responder.send(transform_err(resp));
                }
                DatabaseRequest::GetRanking { responder } => {
                    let resp = transform_err(self.db_connection.get_public_ranking().await);
                    let _ = responder.send(resp);
                }
            }
        }
    }

    async fn ensure_profile(&mut self, name: String, role: Role) -> ServiceResult<()> {
        if self.db_connection.get_profile(&name).await?.is_none() {
            self.db_connection.add_profile(&DbProfile::new(name.clone(), role)).await?;
            info!(%name, ?role, "created profile");
        }
        Ok(())
    }

    // Runs inside the manager so the check for another open pool and the insert cannot interleave.
    async fn create_pool(&mut self, name: String) -> ServiceResult<Pool> {
        if let Some(open) = self.db_connection.latest_pool_with_status(&[PoolStatus::Open]).await? {
            return Err(ServiceError::Conflict(format!(
                "pool {} is still open",
                open.name
            )));
        }
        let created = self
            .db_connection
            .add_pool(&DbPool::new(name))
            .await?
            .ok_or_else(|| ServiceError::Internal("pool was not created".into()))?;
        info!(pool = %created.id, name = %created.name, "opened pool");
        Ok(created.into())
    }

    // Game indices are assigned here, one bet at a time, so two sessions adding
    // bets for the same player cannot hand out the same index.
    async fn add_bets(
        &mut self,
        pool_id: &str,
        recorder: Option<String>,
        status: BetStatus,
        bets: Vec<PotentialBet>,
    ) -> ServiceResult<BatchOutcome> {
        let pool = self
            .db_connection
            .get_pool(pool_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("pool {pool_id}")))?;
        if !pool.status.accepts_bets() {
            return Err(ServiceError::InvalidState {
                status: pool.status,
                operation: "accept bets",
            });
        }

        let mut outcome = BatchOutcome::default();
        let mut slots: HashMap<String, Vec<GameSlot>> = HashMap::new();

        for (index, potential) in bets.into_iter().enumerate() {
            let validated = normalize_player_name(&potential.player_name)
                .and_then(|name| validate_bet_numbers(&potential.numbers).map(|numbers| (name, numbers)));
            let (player_name, numbers) = match validated {
                Ok(valid) => valid,
                Err(error) => {
                    debug!(index, %error, "rejected bet in batch");
                    outcome.failed.push(BatchFailure {
                        index,
                        player_name: potential.player_name,
                        reason: error.to_string(),
                    });
                    continue;
                }
            };

            if !slots.contains_key(&player_name) {
                let existing = self.db_connection.get_game_slots(pool_id, &player_name).await?;
                slots.insert(player_name.clone(), existing);
            }
            let player_slots = slots.entry(player_name.clone()).or_default();
            let game_index = next_game_index(&player_name, player_slots);

            let bet = DbBet::new(pool_id, recorder.clone(), player_name.clone(), numbers, game_index, status);
            match self.db_connection.add_bet(&bet).await {
                Ok(Some(saved)) => {
                    player_slots.push(GameSlot {
                        player_name,
                        game_index,
                    });
                    outcome.saved.push(saved.into());
                }
                Ok(None) => outcome.failed.push(BatchFailure {
                    index,
                    player_name,
                    reason: "bet was not stored".into(),
                }),
                Err(error) => {
                    warn!(index, %error, "failed to store bet");
                    outcome.failed.push(BatchFailure {
                        index,
                        player_name,
                        reason: ServiceError::from(error).to_string(),
                    });
                }
            }
        }

        info!(
            pool = pool_id,
            saved = outcome.saved.len(),
            failed = outcome.failed.len(),
            "stored bet batch"
        );
        Ok(outcome)
    }

    // Guard and write run inside one request, so a settlement can never land between them.
    async fn mutable_bet(&self, bet_id: &str, operation: &'static str) -> ServiceResult<DbBet> {
        let bet = self
            .db_connection
            .get_bet(bet_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("bet {bet_id}")))?;
        let pool = self
            .db_connection
            .get_pool(&bet.pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("pool {}", bet.pool)))?;
        if !pool.status.allows_bet_removal() {
            return Err(ServiceError::InvalidState {
                status: pool.status,
                operation,
            });
        }
        Ok(bet)
    }

    async fn remove_bet(&mut self, bet_id: &str, recorder: Option<String>) -> ServiceResult<Bet> {
        let bet = self.mutable_bet(bet_id, "remove bets").await?;
        if recorder.is_some() && bet.recorder != recorder {
            return Err(ServiceError::Forbidden(Action::RemoveBet));
        }
        let removed: Bet = self
            .db_connection
            .remove_bet(bet_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("bet {bet_id}")))?
            .into();
        info!(bet = bet_id, label = %removed.label(), "removed bet");
        Ok(removed)
    }

    async fn validate_bet(&mut self, bet_id: &str) -> ServiceResult<Bet> {
        self.mutable_bet(bet_id, "validate bets").await?;
        let validated = self
            .db_connection
            .set_bet_status(bet_id, BetStatus::Validated)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("bet {bet_id}")))?;
        Ok(validated.into())
    }

    async fn record_bet_results(&mut self, results: Vec<BetResult>) -> ServiceResult<Vec<String>> {
        let mut missing = Vec::new();
        for result in results {
            let recorded = self
                .db_connection
                .record_bet_result(&result.bet_id, result.hits, result.score)
                .await?;
            if recorded.is_none() {
                warn!(bet = %result.bet_id, "bet removed before its result was recorded");
                missing.push(result.bet_id);
            }
        }
        Ok(missing)
    }
}
