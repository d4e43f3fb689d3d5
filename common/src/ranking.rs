use crate::{Bet, RankingEntry};

/// Scored bets, best first. Ties keep their incoming order; unscored bets are left out.
pub fn build_ranking(bets: &[Bet]) -> Vec<RankingEntry> {
    let mut scored: Vec<(&Bet, u8)> = bets
        .iter()
        .filter_map(|bet| bet.score.map(|score| (bet, score)))
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    scored
        .into_iter()
        .zip(1..)
        .map(|((bet, score), position)| RankingEntry {
            position,
            player_name: bet.player_name.clone(),
            game_index: bet.game_index,
            score,
        })
        .collect()
}

/// Orders a pool's bets for the results page: best score first, unscored last.
pub fn order_by_score(bets: &mut [Bet]) {
    bets.sort_by(|a, b| b.score.cmp(&a.score));
}
