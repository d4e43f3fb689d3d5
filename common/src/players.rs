use crate::error::SettlementError;
use crate::Bet;

pub const MAX_PLAYER_NAME_LEN: usize = 30;

/// Player names are stored trimmed and upper-cased so that "joão " and "JOÃO"
/// share one game sequence.
pub fn normalize_player_name(raw: &str) -> Result<String, SettlementError> {
    let name = raw.trim().to_uppercase();
    let len = name.chars().count();
    if len == 0 || len > MAX_PLAYER_NAME_LEN {
        return Err(SettlementError::InvalidPlayerName {
            max: MAX_PLAYER_NAME_LEN,
        });
    }
    Ok(name)
}

pub fn format_game_label(player_name: &str, game_index: u32) -> String {
    format!("{} | {:02}", player_name, game_index)
}

pub fn sort_by_player_name(bets: &mut [Bet]) {
    bets.sort_by(|a, b| {
        a.player_name
            .cmp(&b.player_name)
            .then(a.game_index.cmp(&b.game_index))
    });
}

pub fn filter_by_player_name(bets: Vec<Bet>, search: &str) -> Vec<Bet> {
    let needle = search.trim().to_lowercase();
    if needle.is_empty() {
        return bets;
    }
    bets.into_iter()
        .filter(|bet| bet.player_name.to_lowercase().contains(&needle))
        .collect()
}
