//! Error types for the statistics engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatsError {
    /// No packet was ever recorded, so no average or rate is defined.
    #[error("no packets were processed")]
    NoPackets,

    /// Packets were counted but no address statistics exist.
    #[error("statistics could not be collected: {0} packets without any sender address")]
    NoSenders(u64),

    #[error("config parse error: {0}")]
    Config(#[from] ron::error::SpannedError),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, StatsError>;
