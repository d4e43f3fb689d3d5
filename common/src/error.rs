use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("a draw needs exactly {expected} numbers, got {actual}")]
    InvalidDrawSize { expected: usize, actual: usize },
    #[error("number {value} is outside {min}..={max}")]
    InvalidNumberRange { value: i32, min: u8, max: u8 },
    #[error("number {0} appears more than once")]
    DuplicateNumber(u8),
    #[error("a bet needs exactly {expected} distinct numbers between {min} and {max}, got {numbers:?}")]
    InvalidBetSize {
        expected: usize,
        min: u8,
        max: u8,
        numbers: Vec<i32>,
    },
    #[error("player name must have between 1 and {max} characters")]
    InvalidPlayerName { max: usize },
    #[error("prize tier {score} is {reason}")]
    InvalidPrizeTier { score: u8, reason: &'static str },
    #[error("cannot pick {count} distinct numbers out of {pool_size}")]
    SampleTooLarge { count: usize, pool_size: u8 },
}
