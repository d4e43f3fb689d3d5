use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::net::TcpStream;

use crate::{BatchOutcome, Bet, Pool, PoolResults, PotentialBet, RankingEntry, Role, SettlementSummary};

#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub enum Request {
    Login { user: String },
    CasualAccess,
    WhoAmI,
    CurrentPool,
    ActivePool,
    CreatePool { name: String },
    CloseBetting { pool_id: String },
    RegisterBets { bets: Vec<PotentialBet> },
    SuggestBets { bets: Vec<PotentialBet> },
    ValidateBet { bet_id: String },
    RemoveBet { bet_id: String },
    PoolBets { pool_id: String, search: Option<String> },
    /// Validated bets of the open pool, readable by every session.
    PublicBets { search: Option<String> },
    BetHistory { search: Option<String> },
    RepeatBets { bet_ids: Vec<String> },
    RandomPick,
    SettleDraw {
        pool_id: String,
        drawn: Vec<i32>,
        /// Prize per tier label, in cents.
        prizes: BTreeMap<String, u64>,
        expected_version: u64,
    },
    ConcludePool { pool_id: String },
    PublishRanking { pool_id: String },
    PublicRanking,
    LatestResults,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum Response {
    None,
    SuccessfulLogin { username: Option<String>, role: Role },
    WhoAmI { username: Option<String>, role: Role },
    Pool(Option<Pool>),
    Bets(Vec<Bet>),
    Batch(BatchOutcome),
    Numbers(Vec<u8>),
    Settled(SettlementSummary),
    Ranking(Vec<RankingEntry>),
    Results(Option<PoolResults>),
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    InvalidDrawSize,
    InvalidNumberRange,
    DuplicateNumber,
    InvalidBetSize,
    InvalidPlayerName,
    Forbidden,
    NotFound,
    InvalidState,
    Conflict,
    UpstreamUnavailable,
    BadRequest,
    Internal,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct ErrorReply {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Packet {
    RequestPacket(Request),
    ResponsePacket(Response),
    Error(ErrorReply),
}

pub struct Connection {
    connection: socket::TungsteniteWebSocket,
}

impl Connection {
    pub async fn from_tcp_stream(connection: TcpStream) -> anyhow::Result<Self> {
        let ws = socket::TungsteniteWebSocket::new(connection).await?;

        Ok(Self { connection: ws })
    }

    pub async fn read(&mut self) -> anyhow::Result<Packet> {
        Ok(rmp_serde::from_slice(&self.connection.read().await?)?)
    }

    pub async fn send(&mut self, data: Packet) -> anyhow::Result<()> {
        self.connection.write_all(&rmp_serde::to_vec(&data)?).await
    }
}

mod socket {
    use anyhow::{anyhow, bail};
    use futures_util::{SinkExt, StreamExt};
    use std::io::ErrorKind;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;

    pub struct TungsteniteWebSocket {
        socket: tokio_tungstenite::WebSocketStream<TcpStream>,
    }

    impl TungsteniteWebSocket {
        pub async fn new(stream: TcpStream) -> anyhow::Result<Self> {
            let ws_stream = tokio_tungstenite::accept_async(stream).await?;
            Ok(Self { socket: ws_stream })
        }

        /// A closed socket surfaces as `ConnectionAborted` so callers can end the session quietly.
        pub async fn read(&mut self) -> anyhow::Result<Vec<u8>> {
            loop {
                let message = self.socket.next().await.ok_or(anyhow!(std::io::Error::new(
                    ErrorKind::ConnectionAborted,
                    "connection closed",
                )))??;
                match message {
                    Message::Binary(data) => return Ok(data),
                    Message::Ping(_) | Message::Pong(_) => continue,
                    Message::Close(_) => {
                        return Err(std::io::Error::new(ErrorKind::ConnectionAborted, "connection closed").into())
                    }
                    _ => bail!("incorrect data type received"),
                }
            }
        }

        pub async fn write_all(&mut self, buf: &[u8]) -> anyhow::Result<()> {
            Ok(self.socket.send(Message::Binary(buf.to_vec())).await?)
        }
    }
}
