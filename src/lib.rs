mod table;
pub mod anomaly;
pub mod config;
pub mod conversation;
pub mod entropy;
pub mod error;
pub mod event;
pub mod interval;
pub mod pipeline;
pub mod rows;
pub mod sink;
pub mod stats;

pub use table::*;
pub use config::StatsConfig;
pub use error::{Result, StatsError};
pub use event::{PacketEvent, TcpFlags};
pub use pipeline::Pipeline;
pub use stats::StatisticsAccumulator;

pub use stats_derive::*;

pub fn default<T: Default>() -> T {
    Default::default()
}

/// Difference of a counter snapshot against an earlier one.
pub trait Delta {
    fn delta(&self, baseline: &Self) -> Self;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Delta)]
    struct Pair {
        a: u64,
        b: u64,
    }

    #[test]
    fn test_derived_delta_saturates() {
        let now = Pair { a: 10, b: 3 };
        let then = Pair { a: 4, b: 5 };
        assert_eq!(now.delta(&then), Pair { a: 6, b: 0 });
        assert_eq!(now.delta(&default()), now);
    }
}
