use std::collections::BTreeMap;

use bolao_server::config::DatabaseConfig;
use bolao_server::connection_manager::{handle_request, Services, Session};
use bolao_server::database::DatabaseConnection;
use bolao_server::database_manager::{self, DatabaseManager, DatabaseRequest};
use bolao_server::draw_manager::DrawManager;
use bolao_server::error::ServiceError;
use common::network::{ErrorKind, Request, Response};
use common::{
    Action, BatchOutcome, Bet, BetResult, BetStatus, Pool, PoolStatus, PotentialBet, PrizeTiers, RankingEntry, Role,
};
use tokio::sync::mpsc;

async fn start_services() -> Services {
    let database = DatabaseConnection::connect(&DatabaseConfig::in_memory())
        .await
        .unwrap();
    let (db_tx, db_rx) = mpsc::channel(8);
    let mut db_manager = DatabaseManager::new(database, db_rx);
    tokio::spawn(async move { db_manager.manage().await });

    let (draw_tx, draw_rx) = mpsc::channel(8);
    let mut draw_manager = DrawManager::new(draw_rx, db_tx.clone(), PrizeTiers::default());
    tokio::spawn(async move { draw_manager.manage().await });

    Services { db_tx, draw_tx }
}

fn admin() -> Session {
    Session {
        username: Some("admin".into()),
        role: Role::Admin,
    }
}

fn seller(name: &str) -> Session {
    Session {
        username: Some(name.into()),
        role: Role::Seller,
    }
}

fn potential(player: &str, numbers: impl IntoIterator<Item = i32>) -> PotentialBet {
    PotentialBet {
        player_name: player.into(),
        numbers: numbers.into_iter().collect(),
    }
}

fn draw() -> Vec<i32> {
    (1..=15).collect()
}

async fn create_pool(services: &Services, name: &str) -> Pool {
    let request = Request::CreatePool { name: name.into() };
    match handle_request(&admin(), request, services).await.unwrap() {
        Response::Pool(Some(pool)) => pool,
        other => panic!("unexpected response {other:?}"),
    }
}

async fn register(services: &Services, session: &Session, bets: Vec<PotentialBet>) -> BatchOutcome {
    match handle_request(session, Request::RegisterBets { bets }, services).await.unwrap() {
        Response::Batch(outcome) => outcome,
        other => panic!("unexpected response {other:?}"),
    }
}

async fn pool_bets(services: &Services, session: &Session, pool_id: &str) -> Vec<Bet> {
    let request = Request::PoolBets {
        pool_id: pool_id.into(),
        search: None,
    };
    match handle_request(session, request, services).await.unwrap() {
        Response::Bets(bets) => bets,
        other => panic!("unexpected response {other:?}"),
    }
}

async fn close(services: &Services, pool_id: &str) -> Pool {
    let request = Request::CloseBetting {
        pool_id: pool_id.into(),
    };
    match handle_request(&admin(), request, services).await.unwrap() {
        Response::Pool(Some(pool)) => pool,
        other => panic!("unexpected response {other:?}"),
    }
}

fn settle_request(pool_id: &str, expected_version: u64) -> Request {
    Request::SettleDraw {
        pool_id: pool_id.into(),
        drawn: draw(),
        prizes: BTreeMap::from([("10".to_string(), 500_000)]),
        expected_version,
    }
}

#[tokio::test]
async fn full_pool_lifecycle() {
    let services = start_services().await;
    let pool = create_pool(&services, "Concurso 3000").await;
    assert_eq!(pool.status, PoolStatus::Open);
    assert_eq!(pool.version, 0);

    let outcome = register(
        &services,
        &seller("vera"),
        vec![
            potential("Ana", 1..=10),
            potential(" ana ", 6..=15),
            potential("Bia", (1..=9).chain([25])),
            potential("Caio", 1..=9),
        ],
    )
    .await;
    assert_eq!(outcome.saved.len(), 3);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].index, 3);

    let suggestion = handle_request(
        &Session::casual(),
        Request::SuggestBets {
            bets: vec![potential("Duda", 16..=25)],
        },
        &services,
    )
    .await
    .unwrap();
    let Response::Batch(suggested) = suggestion else {
        panic!("unexpected response {suggestion:?}");
    };
    assert_eq!(suggested.saved[0].status, BetStatus::PendingValidation);
    assert_eq!(suggested.saved[0].recorder, None);

    let closed = close(&services, &pool.id).await;
    assert_eq!(closed.status, PoolStatus::Closed);
    assert_eq!(closed.version, 1);

    let settled = handle_request(&admin(), settle_request(&pool.id, 1), &services).await.unwrap();
    let Response::Settled(summary) = settled else {
        panic!("unexpected response {settled:?}");
    };
    assert_eq!(summary.pool.status, PoolStatus::Drawn);
    assert_eq!(summary.pool.version, 2);
    assert_eq!(summary.pool.prizes.get("10"), Some(&500_000));
    assert_eq!(summary.pool.prizes.get("0"), Some(&0));
    // the pending suggestion is not settled
    assert_eq!(summary.results.len(), 3);
    assert_eq!(summary.tier_counts.get("10"), Some(&2));
    assert_eq!(summary.tier_counts.get("9"), Some(&1));
    assert_eq!(summary.tier_counts.get("8"), Some(&0));
    assert_eq!(summary.tier_counts.get("0"), Some(&0));

    // a second settlement with the current version reproduces the same scores
    let resettled = handle_request(&admin(), settle_request(&pool.id, 2), &services).await.unwrap();
    let Response::Settled(again) = resettled else {
        panic!("unexpected response {resettled:?}");
    };
    assert_eq!(again.results, summary.results);
    assert_eq!(again.tier_counts, summary.tier_counts);
    assert_eq!(again.pool.version, 3);

    let stale = handle_request(&admin(), settle_request(&pool.id, 2), &services).await;
    assert!(matches!(stale, Err(ServiceError::Conflict(_))));

    let published = handle_request(
        &admin(),
        Request::PublishRanking {
            pool_id: pool.id.clone(),
        },
        &services,
    )
    .await
    .unwrap();
    let Response::Ranking(entries) = published else {
        panic!("unexpected response {published:?}");
    };
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].position, 1);
    assert_eq!(entries[0].score, 10);
    assert_eq!(entries[2].player_name, "BIA");
    assert_eq!(entries[2].score, 9);

    let public = handle_request(&Session::casual(), Request::PublicRanking, &services)
        .await
        .unwrap();
    assert_eq!(public, Response::Ranking(entries));

    let concluded = handle_request(
        &admin(),
        Request::ConcludePool {
            pool_id: pool.id.clone(),
        },
        &services,
    )
    .await
    .unwrap();
    let Response::Pool(Some(concluded)) = concluded else {
        panic!("unexpected response {concluded:?}");
    };
    assert_eq!(concluded.status, PoolStatus::Concluded);

    let latest = handle_request(&seller("vera"), Request::LatestResults, &services)
        .await
        .unwrap();
    let Response::Results(Some(results)) = latest else {
        panic!("unexpected response {latest:?}");
    };
    assert_eq!(results.pool.id, pool.id);
    let scores: Vec<Option<u8>> = results.bets.iter().map(|bet| bet.score).collect();
    assert_eq!(scores, vec![Some(10), Some(10), Some(9)]);
}

#[tokio::test]
async fn same_player_gets_consecutive_game_indices() {
    let services = start_services().await;
    let pool = create_pool(&services, "indices").await;

    let outcome = register(
        &services,
        &seller("vera"),
        vec![potential("Ana", 1..=10), potential("ANA", 11..=20)],
    )
    .await;
    let indices: Vec<u32> = outcome.saved.iter().map(|bet| bet.game_index).collect();
    assert_eq!(indices, vec![1, 2]);
    assert_eq!(outcome.saved[1].label(), "ANA | 02");

    let later = register(&services, &seller("rui"), vec![potential("ana", 16..=25)]).await;
    assert_eq!(later.saved[0].game_index, 3);
    assert_eq!(later.saved[0].pool_id, pool.id);
}

#[tokio::test]
async fn only_one_pool_may_be_open() {
    let services = start_services().await;
    create_pool(&services, "first").await;

    let second = handle_request(
        &admin(),
        Request::CreatePool {
            name: "second".into(),
        },
        &services,
    )
    .await;
    assert!(matches!(second, Err(ServiceError::Conflict(_))));
}

#[tokio::test]
async fn roles_are_checked_before_routing() {
    let services = start_services().await;
    let pool = create_pool(&services, "roles").await;

    let casual = handle_request(&Session::casual(), settle_request(&pool.id, 0), &services).await;
    assert!(matches!(casual, Err(ServiceError::Forbidden(Action::SettleDraw))));

    let casual_register = handle_request(
        &Session::casual(),
        Request::RegisterBets {
            bets: vec![potential("Ana", 1..=10)],
        },
        &services,
    )
    .await;
    assert_eq!(casual_register.unwrap_err().kind(), ErrorKind::Forbidden);

    let seller_close = handle_request(
        &seller("vera"),
        Request::CloseBetting {
            pool_id: pool.id.clone(),
        },
        &services,
    )
    .await;
    assert!(matches!(seller_close, Err(ServiceError::Forbidden(Action::CloseBetting))));
}

#[tokio::test]
async fn settling_an_open_pool_is_refused() {
    let services = start_services().await;
    let pool = create_pool(&services, "still open").await;

    let result = handle_request(&admin(), settle_request(&pool.id, 0), &services).await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidState);

    let short_draw = Request::SettleDraw {
        pool_id: pool.id.clone(),
        drawn: (1..=14).collect(),
        prizes: BTreeMap::new(),
        expected_version: 0,
    };
    let result = handle_request(&admin(), short_draw, &services).await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidDrawSize);
}

#[tokio::test]
async fn unknown_prize_tier_is_a_bad_request() {
    let services = start_services().await;
    let pool = create_pool(&services, "prizes").await;
    close(&services, &pool.id).await;

    let request = Request::SettleDraw {
        pool_id: pool.id.clone(),
        drawn: draw(),
        prizes: BTreeMap::from([("7".to_string(), 100)]),
        expected_version: 1,
    };
    let result = handle_request(&admin(), request, &services).await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::BadRequest);
}

#[tokio::test]
async fn sellers_see_and_remove_only_their_own_bets() {
    let services = start_services().await;
    let pool = create_pool(&services, "ownership").await;

    let vera = register(&services, &seller("vera"), vec![potential("Ana", 1..=10)]).await;
    let rui = register(&services, &seller("rui"), vec![potential("Bia", 11..=20)]).await;

    let seen = pool_bets(&services, &seller("vera"), &pool.id).await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].player_name, "ANA");
    assert_eq!(pool_bets(&services, &admin(), &pool.id).await.len(), 2);

    let foreign = handle_request(
        &seller("vera"),
        Request::RemoveBet {
            bet_id: rui.saved[0].id.clone(),
        },
        &services,
    )
    .await;
    assert!(matches!(foreign, Err(ServiceError::Forbidden(Action::RemoveBet))));

    handle_request(
        &seller("vera"),
        Request::RemoveBet {
            bet_id: vera.saved[0].id.clone(),
        },
        &services,
    )
    .await
    .unwrap();
    assert!(pool_bets(&services, &seller("vera"), &pool.id).await.is_empty());
}

#[tokio::test]
async fn suggestions_wait_for_validation() {
    let services = start_services().await;
    let pool = create_pool(&services, "suggestions").await;

    let suggested = handle_request(
        &Session::casual(),
        Request::SuggestBets {
            bets: vec![potential("Duda", 16..=25)],
        },
        &services,
    )
    .await
    .unwrap();
    let Response::Batch(outcome) = suggested else {
        panic!("unexpected response {suggested:?}");
    };

    let validated = handle_request(
        &admin(),
        Request::ValidateBet {
            bet_id: outcome.saved[0].id.clone(),
        },
        &services,
    )
    .await
    .unwrap();
    let Response::Bets(bets) = validated else {
        panic!("unexpected response {validated:?}");
    };
    assert_eq!(bets[0].status, BetStatus::Validated);

    close(&services, &pool.id).await;
    let settled = handle_request(&admin(), settle_request(&pool.id, 1), &services).await.unwrap();
    let Response::Settled(summary) = settled else {
        panic!("unexpected response {settled:?}");
    };
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.results[0].score, 0);
    assert_eq!(summary.tier_counts.get("0"), Some(&1));
}

#[tokio::test]
async fn repeated_bets_land_in_the_open_pool() {
    let services = start_services().await;
    let first = create_pool(&services, "first").await;
    let original = register(&services, &seller("vera"), vec![potential("Ana", 1..=10)]).await;

    close(&services, &first.id).await;
    handle_request(&admin(), settle_request(&first.id, 1), &services).await.unwrap();
    handle_request(
        &admin(),
        Request::ConcludePool {
            pool_id: first.id.clone(),
        },
        &services,
    )
    .await
    .unwrap();

    let second = create_pool(&services, "second").await;
    let repeated = handle_request(
        &seller("vera"),
        Request::RepeatBets {
            bet_ids: vec![original.saved[0].id.clone()],
        },
        &services,
    )
    .await
    .unwrap();
    let Response::Batch(outcome) = repeated else {
        panic!("unexpected response {repeated:?}");
    };
    assert_eq!(outcome.saved.len(), 1);
    assert_eq!(outcome.saved[0].pool_id, second.id);
    assert_eq!(outcome.saved[0].game_index, 1);
    assert_eq!(outcome.saved[0].numbers, original.saved[0].numbers);
    assert_eq!(outcome.saved[0].score, None);
}

#[tokio::test]
async fn bootstrap_profile_is_created_once() {
    let services = start_services().await;
    for _ in 0..2 {
        database_manager::request(&services.db_tx, |responder| DatabaseRequest::EnsureProfile {
            name: "admin".into(),
            role: Role::Admin,
            responder,
        })
        .await
        .unwrap();
    }

    let profile = database_manager::request(&services.db_tx, |responder| DatabaseRequest::GetProfile {
        name: "admin".into(),
        responder,
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(profile.role, Role::Admin);
}

fn names(response: Response) -> Vec<String> {
    match response {
        Response::Bets(bets) => bets.into_iter().map(|bet| bet.player_name).collect(),
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn results_for_a_removed_bet_are_not_written() {
    let services = start_services().await;
    create_pool(&services, "removal").await;
    let outcome = register(&services, &seller("vera"), vec![potential("Ana", 1..=10)]).await;
    let bet_id = outcome.saved[0].id.clone();

    handle_request(
        &seller("vera"),
        Request::RemoveBet {
            bet_id: bet_id.clone(),
        },
        &services,
    )
    .await
    .unwrap();

    let results = vec![BetResult {
        bet_id: bet_id.clone(),
        hits: vec![1],
        score: 1,
    }];
    let missing = database_manager::request(&services.db_tx, |responder| {
        DatabaseRequest::RecordBetResults { results, responder }
    })
    .await
    .unwrap();
    assert_eq!(missing, vec![bet_id.clone()]);

    let history = handle_request(&admin(), Request::BetHistory { search: None }, &services)
        .await
        .unwrap();
    assert_eq!(history, Response::Bets(Vec::new()));

    let stored = database_manager::request(&services.db_tx, |responder| DatabaseRequest::GetBet {
        id: bet_id,
        responder,
    })
    .await
    .unwrap();
    assert_eq!(stored, None);
}

#[tokio::test]
async fn settled_bets_are_frozen() {
    let services = start_services().await;
    let pool = create_pool(&services, "frozen").await;
    let outcome = register(&services, &seller("vera"), vec![potential("Ana", 1..=10)]).await;
    let bet_id = outcome.saved[0].id.clone();
    close(&services, &pool.id).await;
    handle_request(&admin(), settle_request(&pool.id, 1), &services)
        .await
        .unwrap();

    let removal = handle_request(
        &admin(),
        Request::RemoveBet {
            bet_id: bet_id.clone(),
        },
        &services,
    )
    .await;
    assert_eq!(removal.unwrap_err().kind(), ErrorKind::InvalidState);

    let validation = handle_request(&admin(), Request::ValidateBet { bet_id }, &services).await;
    assert_eq!(validation.unwrap_err().kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn anyone_can_read_the_open_pool_bets() {
    let services = start_services().await;
    let pool = create_pool(&services, "public").await;
    register(
        &services,
        &seller("vera"),
        vec![potential("Caio", 1..=10), potential("Ana", 11..=20)],
    )
    .await;
    handle_request(
        &Session::casual(),
        Request::SuggestBets {
            bets: vec![potential("Duda", 16..=25)],
        },
        &services,
    )
    .await
    .unwrap();

    let all = handle_request(&Session::casual(), Request::PublicBets { search: None }, &services)
        .await
        .unwrap();
    assert_eq!(names(all), vec!["ANA", "CAIO"]);

    let searched = handle_request(
        &Session::casual(),
        Request::PublicBets {
            search: Some("ca".into()),
        },
        &services,
    )
    .await
    .unwrap();
    assert_eq!(names(searched), vec!["CAIO"]);

    close(&services, &pool.id).await;
    let after_close = handle_request(&Session::casual(), Request::PublicBets { search: None }, &services)
        .await
        .unwrap();
    assert!(names(after_close).is_empty());
}

#[tokio::test]
async fn publishing_replaces_the_previous_ranking() {
    let services = start_services().await;
    let pool = create_pool(&services, "ranking").await;
    register(
        &services,
        &seller("vera"),
        vec![potential("Ana", 1..=10), potential("Bia", 16..=25)],
    )
    .await;
    close(&services, &pool.id).await;

    let publish = || Request::PublishRanking {
        pool_id: pool.id.clone(),
    };

    handle_request(&admin(), settle_request(&pool.id, 1), &services)
        .await
        .unwrap();
    handle_request(&admin(), publish(), &services).await.unwrap();

    let corrected_draw = Request::SettleDraw {
        pool_id: pool.id.clone(),
        drawn: (11..=25).collect(),
        prizes: BTreeMap::new(),
        expected_version: 2,
    };
    handle_request(&admin(), corrected_draw, &services).await.unwrap();
    handle_request(&admin(), publish(), &services).await.unwrap();

    let public = handle_request(&Session::casual(), Request::PublicRanking, &services)
        .await
        .unwrap();
    let expected = vec![
        RankingEntry {
            position: 1,
            player_name: "BIA".into(),
            game_index: 1,
            score: 10,
        },
        RankingEntry {
            position: 2,
            player_name: "ANA".into(),
            game_index: 1,
            score: 0,
        },
    ];
    assert_eq!(public, Response::Ranking(expected));
}
