use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Seller,
    Casual,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Action {
    ViewCurrentPool,
    CreatePool,
    CloseBetting,
    RegisterBets,
    SuggestBets,
    ValidateBet,
    ListBets,
    RemoveBet,
    RepeatBets,
    RandomPick,
    SettleDraw,
    ConcludePool,
    PublishRanking,
    ViewResults,
}

/// The one place where a role is matched against what it may do.
pub fn can_perform(role: Role, action: Action) -> bool {
    use Action::*;

    match role {
        Role::Admin => true,
        Role::Seller => matches!(
            action,
            ViewCurrentPool | RegisterBets | ListBets | RemoveBet | RepeatBets | RandomPick | ViewResults
        ),
        Role::Casual => matches!(action, ViewCurrentPool | SuggestBets | RandomPick | ViewResults),
    }
}

/// Sellers only ever see and touch the bets they recorded themselves.
pub fn sees_only_own_bets(role: Role) -> bool {
    role == Role::Seller
}
