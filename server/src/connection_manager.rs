use anyhow::Context;
use common::network::{Connection, ErrorKind, ErrorReply, Packet, Request, Response};
use common::players::{filter_by_player_name, sort_by_player_name};
use common::policy::{can_perform, sees_only_own_bets};
use common::ranking::order_by_score;
use common::settlement::random_pick;
use common::{Action, Bet, BetStatus, Pool, PoolResults, PoolStatus, PotentialBet, Role};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::database::BetFilter;
use crate::database_manager::{self, DatabaseRequest};
use crate::draw_manager::{self, DrawRequest};
use crate::error::{ServiceError, ServiceResult};

/// Who is on the other end of a connection. Casual sessions have no profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: Option<String>,
    pub role: Role,
}

impl Session {
    pub fn casual() -> Self {
        Self {
            username: None,
            role: Role::Casual,
        }
    }

    /// Recorder filter applied to bet listings for this session.
    fn recorder_scope(&self) -> Option<String> {
        if sees_only_own_bets(self.role) {
            self.username.clone()
        } else {
            None
        }
    }

    fn owns(&self, bet: &Bet) -> bool {
        !sees_only_own_bets(self.role) || (bet.recorder.is_some() && bet.recorder == self.username)
    }
}

#[derive(Clone)]
pub struct Services {
    pub db_tx: mpsc::Sender<DatabaseRequest>,
    pub draw_tx: mpsc::Sender<DrawRequest>,
}

pub async fn handle_listen_server(listen_address: String, services: Services) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&listen_address)
        .await
        .with_context(|| format!("binding {listen_address}"))?;
    info!(address = %listen_address, "listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(%error, "failed to accept connection");
                continue;
            }
        };
        let services = services.clone();

        tokio::spawn(async move {
            match Connection::from_tcp_stream(stream).await {
                Ok(connection) => handle_connection(connection, services).await,
                Err(error) => warn!(%peer, %error, "websocket handshake failed"),
            }
        });
    }
}

async fn handle_connection(mut connection: Connection, services: Services) {
    let session = match handle_login(&mut connection, &services).await {
        Ok(session) => session,
        Err(error) => {
            warn!(%error, "login failed");
            let reply = match error.downcast_ref::<ServiceError>() {
                Some(service_error) => service_error.reply(),
                None => ErrorReply {
                    kind: ErrorKind::BadRequest,
                    message: error.to_string(),
                },
            };
            connection.send(Packet::Error(reply)).await.ok();
            return;
        }
    };

    info!(user = ?session.username, role = ?session.role, "session started");
    if let Err(error) = handle_client(&session, &mut connection, &services).await {
        warn!(user = ?session.username, %error, "session ended with an error");
    }
}

async fn handle_login(connection: &mut Connection, services: &Services) -> anyhow::Result<Session> {
    let session = match connection.read().await? {
        Packet::RequestPacket(Request::Login { user }) => {
            let name = user.clone();
            let profile = database_manager::request(&services.db_tx, |responder| DatabaseRequest::GetProfile {
                name,
                responder,
            })
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("profile {user}")))?;
            Session {
                username: Some(profile.name),
                role: profile.role,
            }
        }
        Packet::RequestPacket(Request::CasualAccess) => Session::casual(),
        packet => {
            return Err(ServiceError::BadRequest(format!("expected a login, got {packet:?}")).into());
        }
    };

    connection
        .send(Packet::ResponsePacket(Response::SuccessfulLogin {
            username: session.username.clone(),
            role: session.role,
        }))
        .await?;
    Ok(session)
}

async fn handle_client(session: &Session, connection: &mut Connection, services: &Services) -> anyhow::Result<()> {
    loop {
        let packet = match connection.read().await {
            Ok(packet) => packet,
            Err(error) => {
                return match error.downcast_ref::<std::io::Error>() {
                    //connection aborted is considered successful
                    Some(io_error) if io_error.kind() == std::io::ErrorKind::ConnectionAborted => Ok(()),
                    _ => Err(error),
                };
            }
        };

        let reply = match packet {
            Packet::RequestPacket(request) => match handle_request(session, request, services).await {
                Ok(response) => Packet::ResponsePacket(response),
                Err(error) => {
                    warn!(user = ?session.username, %error, "request rejected");
                    Packet::Error(error.reply())
                }
            },
            packet => Packet::Error(ServiceError::BadRequest(format!("unexpected packet {packet:?}")).reply()),
        };
        connection.send(reply).await?;
    }
}

/// The permission a request needs. `None` for requests every session may make.
fn required_action(request: &Request) -> Option<Action> {
    let action = match request {
        Request::Login { .. } | Request::CasualAccess | Request::WhoAmI => return None,
        Request::CurrentPool | Request::ActivePool | Request::PublicBets { .. } => Action::ViewCurrentPool,
        Request::CreatePool { .. } => Action::CreatePool,
        Request::CloseBetting { .. } => Action::CloseBetting,
        Request::RegisterBets { .. } => Action::RegisterBets,
        Request::SuggestBets { .. } => Action::SuggestBets,
        Request::ValidateBet { .. } => Action::ValidateBet,
        Request::RemoveBet { .. } => Action::RemoveBet,
        Request::PoolBets { .. } | Request::BetHistory { .. } => Action::ListBets,
        Request::RepeatBets { .. } => Action::RepeatBets,
        Request::RandomPick => Action::RandomPick,
        Request::SettleDraw { .. } => Action::SettleDraw,
        Request::ConcludePool { .. } => Action::ConcludePool,
        Request::PublishRanking { .. } => Action::PublishRanking,
        Request::PublicRanking | Request::LatestResults => Action::ViewResults,
    };
    Some(action)
}

/// Serves one request of a logged-in session.
pub async fn handle_request(session: &Session, request: Request, services: &Services) -> ServiceResult<Response> {
    if let Some(action) = required_action(&request) {
        if !can_perform(session.role, action) {
            return Err(ServiceError::Forbidden(action));
        }
        debug!(user = ?session.username, ?action, "routing request");
    }

    match request {
        Request::Login { .. } | Request::CasualAccess => {
            Err(ServiceError::BadRequest("session is already logged in".into()))
        }
        Request::WhoAmI => Ok(Response::WhoAmI {
            username: session.username.clone(),
            role: session.role,
        }),
        Request::CurrentPool => Ok(Response::Pool(latest_pool(services, vec![PoolStatus::Open]).await?)),
        Request::ActivePool => {
            let statuses = vec![PoolStatus::Open, PoolStatus::Closed, PoolStatus::Drawn];
            Ok(Response::Pool(latest_pool(services, statuses).await?))
        }
        Request::CreatePool { name } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ServiceError::BadRequest("pool name must not be empty".into()));
            }
            let pool = database_manager::request(&services.db_tx, |responder| DatabaseRequest::CreatePool {
                name,
                responder,
            })
            .await?;
            Ok(Response::Pool(Some(pool)))
        }
        Request::CloseBetting { pool_id } => {
            let pool = draw_manager::request(&services.draw_tx, |responder| DrawRequest::CloseBetting {
                pool_id,
                responder,
            })
            .await?;
            Ok(Response::Pool(Some(pool)))
        }
        Request::RegisterBets { bets } => {
            add_bets(services, session.username.clone(), BetStatus::Validated, bets).await
        }
        Request::SuggestBets { bets } => add_bets(services, None, BetStatus::PendingValidation, bets).await,
        Request::ValidateBet { bet_id } => {
            let validated = database_manager::request(&services.db_tx, |responder| {
                DatabaseRequest::ValidateBet { id: bet_id, responder }
            })
            .await?;
            Ok(Response::Bets(vec![validated]))
        }
        Request::RemoveBet { bet_id } => {
            let recorder = session.recorder_scope();
            let removed = database_manager::request(&services.db_tx, |responder| DatabaseRequest::RemoveBet {
                id: bet_id,
                recorder,
                responder,
            })
            .await?;
            Ok(Response::Bets(vec![removed]))
        }
        Request::PoolBets { pool_id, search } => {
            let filter = BetFilter {
                recorder: session.recorder_scope(),
                status: None,
            };
            let bets = database_manager::request(&services.db_tx, |responder| DatabaseRequest::GetBets {
                pool_id,
                filter,
                responder,
            })
            .await?;
            let mut bets = filter_by_player_name(bets, search.as_deref().unwrap_or(""));
            sort_by_player_name(&mut bets);
            Ok(Response::Bets(bets))
        }
        Request::PublicBets { search } => {
            let Some(pool) = latest_pool(services, vec![PoolStatus::Open]).await? else {
                return Ok(Response::Bets(Vec::new()));
            };
            let bets = database_manager::request(&services.db_tx, |responder| DatabaseRequest::GetBets {
                pool_id: pool.id,
                filter: BetFilter {
                    recorder: None,
                    status: Some(BetStatus::Validated),
                },
                responder,
            })
            .await?;
            let mut bets = filter_by_player_name(bets, search.as_deref().unwrap_or(""));
            sort_by_player_name(&mut bets);
            Ok(Response::Bets(bets))
        }
        Request::BetHistory { search } => {
            let recorder = session.recorder_scope();
            let bets = database_manager::request(&services.db_tx, |responder| DatabaseRequest::GetBetHistory {
                recorder,
                responder,
            })
            .await?;
            Ok(Response::Bets(filter_by_player_name(bets, search.as_deref().unwrap_or(""))))
        }
        Request::RepeatBets { bet_ids } => {
            let mut repeated = Vec::with_capacity(bet_ids.len());
            for bet_id in &bet_ids {
                let bet = fetch_bet(services, bet_id).await?;
                if !session.owns(&bet) {
                    return Err(ServiceError::Forbidden(Action::RepeatBets));
                }
                repeated.push(PotentialBet {
                    player_name: bet.player_name,
                    numbers: bet.numbers.iter().map(i32::from).collect(),
                });
            }
            add_bets(services, session.username.clone(), BetStatus::Validated, repeated).await
        }
        Request::RandomPick => Ok(Response::Numbers(random_pick().into())),
        Request::SettleDraw {
            pool_id,
            drawn,
            prizes,
            expected_version,
        } => {
            let summary = draw_manager::request(&services.draw_tx, |responder| DrawRequest::SettleDraw {
                pool_id,
                drawn,
                prizes,
                expected_version,
                responder,
            })
            .await?;
            Ok(Response::Settled(summary))
        }
        Request::ConcludePool { pool_id } => {
            let pool = draw_manager::request(&services.draw_tx, |responder| DrawRequest::ConcludePool {
                pool_id,
                responder,
            })
            .await?;
            Ok(Response::Pool(Some(pool)))
        }
        Request::PublishRanking { pool_id } => {
            let entries = draw_manager::request(&services.draw_tx, |responder| DrawRequest::PublishRanking {
                pool_id,
                responder,
            })
            .await?;
            Ok(Response::Ranking(entries))
        }
        Request::PublicRanking => {
            let entries =
                database_manager::request(&services.db_tx, |responder| DatabaseRequest::GetRanking { responder })
                    .await?;
            Ok(Response::Ranking(entries))
        }
        Request::LatestResults => {
            let Some(pool) = latest_pool(services, vec![PoolStatus::Concluded]).await? else {
                return Ok(Response::Results(None));
            };
            let pool_id = pool.id.clone();
            let mut bets = database_manager::request(&services.db_tx, |responder| DatabaseRequest::GetBets {
                pool_id,
                filter: BetFilter {
                    recorder: None,
                    status: Some(BetStatus::Validated),
                },
                responder,
            })
            .await?;
            order_by_score(&mut bets);
            Ok(Response::Results(Some(PoolResults { pool, bets })))
        }
    }
}

async fn latest_pool(services: &Services, statuses: Vec<PoolStatus>) -> ServiceResult<Option<Pool>> {
    database_manager::request(&services.db_tx, |responder| DatabaseRequest::LatestPool {
        statuses,
        responder,
    })
    .await
}

async fn fetch_bet(services: &Services, bet_id: &str) -> ServiceResult<Bet> {
    let id = bet_id.to_string();
    database_manager::request(&services.db_tx, |responder| DatabaseRequest::GetBet { id, responder })
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("bet {bet_id}")))
}

/// New bets always land in the pool that is currently open.
async fn add_bets(
    services: &Services,
    recorder: Option<String>,
    status: BetStatus,
    bets: Vec<PotentialBet>,
) -> ServiceResult<Response> {
    if bets.is_empty() {
        return Err(ServiceError::BadRequest("no bets given".into()));
    }
    let pool = latest_pool(services, vec![PoolStatus::Open])
        .await?
        .ok_or_else(|| ServiceError::NotFound("open pool".into()))?;

    let outcome = database_manager::request(&services.db_tx, |responder| DatabaseRequest::AddBets {
        pool_id: pool.id,
        recorder,
        status,
        bets,
        responder,
    })
    .await?;
    Ok(Response::Batch(outcome))
}
