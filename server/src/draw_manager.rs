use std::collections::BTreeMap;

use common::ranking::build_ranking;
use common::settlement::{settle_draw, validate_drawn_numbers};
use common::{BetStatus, Pool, PoolStatus, PrizeTiers, RankingEntry, SettlementSummary};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::database::BetFilter;
use crate::database_manager::{self, DatabaseRequest, Responder};
use crate::error::{ServiceError, ServiceResult};

pub enum DrawRequest {
    CloseBetting {
        pool_id: String,
        responder: Responder<Pool>,
    },
    SettleDraw {
        pool_id: String,
        drawn: Vec<i32>,
        prizes: BTreeMap<String, u64>,
        expected_version: u64,
        responder: Responder<SettlementSummary>,
    },
    ConcludePool {
        pool_id: String,
        responder: Responder<Pool>,
    },
    PublishRanking {
        pool_id: String,
        responder: Responder<Vec<RankingEntry>>,
    },
}

pub async fn request<T>(
    draw_tx: &mpsc::Sender<DrawRequest>,
    make: impl FnOnce(Responder<T>) -> DrawRequest,
) -> ServiceResult<T> {
    let (resp_tx, resp_rx) = oneshot::channel();
    draw_tx.send(make(resp_tx)).await?;
    resp_rx.await?
}

pub struct DrawManager {
    work_queue: mpsc::Receiver<DrawRequest>,
    database_requester: mpsc::Sender<DatabaseRequest>,
    tiers: PrizeTiers,
}

//NOTE: No functions in this impl may crash
impl DrawManager {
    pub fn new(
        work_queue: mpsc::Receiver<DrawRequest>,
        database_requester: mpsc::Sender<DatabaseRequest>,
        tiers: PrizeTiers,
    ) -> Self {
        Self {
            work_queue,
            database_requester,
            tiers,
        }
    }

    pub async fn manage(&mut self) {
        while let Some(request) = self.work_queue.recv().await {
            // we do not care if the receiver has already disappeared
            match request {
                DrawRequest::CloseBetting { pool_id, responder } => {
                    responder.send(self.close_betting(pool_id).await).ok();
                }
                DrawRequest::SettleDraw {
                    pool_id,
                    drawn,
                    prizes,
                    expected_version,
                    responder,
                } => {
                    responder
                        .send(self.settle(pool_id, drawn, prizes, expected_version).await)
                        .ok();
                }
                DrawRequest::ConcludePool { pool_id, responder } => {
                    responder.send(self.conclude(pool_id).await).ok();
                }
                DrawRequest::PublishRanking { pool_id, responder } => {
                    responder.send(self.publish_ranking(pool_id).await).ok();
                }
            }
        }
    }

    async fn fetch_pool(&self, pool_id: &str) -> ServiceResult<Pool> {
        let id = pool_id.to_string();
        database_manager::request(&self.database_requester, |responder| DatabaseRequest::GetPool { id, responder })
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("pool {pool_id}")))
    }

    async fn validated_bets(&self, pool_id: &str) -> ServiceResult<Vec<common::Bet>> {
        let pool_id = pool_id.to_string();
        database_manager::request(&self.database_requester, |responder| DatabaseRequest::GetBets {
            pool_id,
            filter: BetFilter {
                recorder: None,
                status: Some(BetStatus::Validated),
            },
            responder,
        })
        .await
    }

    async fn transition(
        &self,
        pool_id: String,
        from: Vec<PoolStatus>,
        to: PoolStatus,
        operation: &'static str,
    ) -> ServiceResult<Pool> {
        let pool = self.fetch_pool(&pool_id).await?;
        if !from.contains(&pool.status) {
            return Err(ServiceError::InvalidState {
                status: pool.status,
                operation,
            });
        }

        let id = pool_id.clone();
        let updated = database_manager::request(&self.database_requester, |responder| DatabaseRequest::TransitionPool {
            id,
            from,
            to,
            responder,
        })
        .await?;
        // the guard can only miss if another writer moved the pool in between
        let updated = updated.ok_or_else(|| ServiceError::Conflict(format!("pool {pool_id} changed concurrently")))?;
        info!(pool = %pool_id, from = ?pool.status, to = ?updated.status, "pool transition");
        Ok(updated)
    }

    async fn close_betting(&mut self, pool_id: String) -> ServiceResult<Pool> {
        self.transition(pool_id, vec![PoolStatus::Open], PoolStatus::Closed, "close betting")
            .await
    }

    async fn conclude(&mut self, pool_id: String) -> ServiceResult<Pool> {
        self.transition(pool_id, vec![PoolStatus::Drawn], PoolStatus::Concluded, "conclude")
            .await
    }

    /// Every tracked tier gets an amount; unknown labels are refused rather than silently dropped.
    fn declared_prizes(&self, mut prizes: BTreeMap<String, u64>) -> ServiceResult<BTreeMap<String, u64>> {
        let tracked: Vec<String> = self.tiers.labels().collect();
        if let Some(unknown) = prizes.keys().find(|label| !tracked.contains(label)) {
            return Err(ServiceError::BadRequest(format!("{unknown} is not a prize tier")));
        }
        for label in tracked {
            prizes.entry(label).or_insert(0);
        }
        Ok(prizes)
    }

    async fn settle(
        &mut self,
        pool_id: String,
        drawn: Vec<i32>,
        prizes: BTreeMap<String, u64>,
        expected_version: u64,
    ) -> ServiceResult<SettlementSummary> {
        let drawn = validate_drawn_numbers(&drawn)?;
        let prizes = self.declared_prizes(prizes)?;

        let pool = self.fetch_pool(&pool_id).await?;
        if !pool.status.allows_settlement() {
            return Err(ServiceError::InvalidState {
                status: pool.status,
                operation: "settle the draw",
            });
        }
        if pool.version != expected_version {
            return Err(ServiceError::Conflict(format!(
                "pool {} is at version {}, not {}",
                pool_id, pool.version, expected_version
            )));
        }

        let bets = self.validated_bets(&pool_id).await?;
        let settlement = settle_draw(&bets, &drawn, &self.tiers);

        // pool first: a lost version race must not leave bets scored against a draw nobody kept
        let id = pool_id.clone();
        let settled_pool = database_manager::request(&self.database_requester, |responder| {
            DatabaseRequest::RecordSettlement {
                pool_id: id,
                expected_version,
                drawn: drawn.clone(),
                prizes,
                responder,
            }
        })
        .await?
        .ok_or_else(|| ServiceError::Conflict(format!("pool {pool_id} changed concurrently")))?;

        let results = settlement.results.clone();
        let missing = database_manager::request(&self.database_requester, |responder| {
            DatabaseRequest::RecordBetResults { results, responder }
        })
        .await?;
        // bets removed after they were loaded must not be counted
        let settlement = if missing.is_empty() {
            settlement
        } else {
            let remaining: Vec<_> = bets.into_iter().filter(|bet| !missing.contains(&bet.id)).collect();
            settle_draw(&remaining, &drawn, &self.tiers)
        };

        info!(
            pool = %pool_id,
            bets = settlement.results.len(),
            tiers = ?settlement.tier_counts,
            "settled draw"
        );
        Ok(SettlementSummary {
            pool: settled_pool,
            results: settlement.results,
            tier_counts: settlement.tier_counts,
        })
    }

    async fn publish_ranking(&mut self, pool_id: String) -> ServiceResult<Vec<RankingEntry>> {
        let pool = self.fetch_pool(&pool_id).await?;
        if !matches!(pool.status, PoolStatus::Drawn | PoolStatus::Concluded) {
            return Err(ServiceError::InvalidState {
                status: pool.status,
                operation: "publish a ranking",
            });
        }

        let mut bets = self.validated_bets(&pool_id).await?;
        common::ranking::order_by_score(&mut bets);
        let entries = build_ranking(&bets);

        let to_store = entries.clone();
        database_manager::request(&self.database_requester, |responder| DatabaseRequest::ReplaceRanking {
            entries: to_store,
            responder,
        })
        .await?;
        info!(pool = %pool_id, entries = entries.len(), "published ranking");
        Ok(entries)
    }
}
