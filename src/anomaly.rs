//! Mahoney-style novelty score for addresses appearing for the first time in a role.

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

/// `s_t · n / s_r` where `n` is the packet count so far, `s_r` the number of distinct
/// addresses seen in the role (this one included) and `s_t = n - previous + 1` the
/// packets elapsed since the previous first appearance in that role. Without a
/// previous first appearance `s_t` is 1. Returns 0 for addresses already known.
pub fn score(
    role: Role,
    is_new: bool,
    packets: u64,
    distinct: u64,
    previous_first: Option<u64>,
) -> f64
{
    if !is_new || distinct == 0 {
        return 0.0;
    }
    let previous = previous_first.unwrap_or(packets);
    let elapsed = packets.saturating_sub(previous) + 1;
    let score = elapsed as f64 * packets as f64 / distinct as f64;
    trace!(%role, packets, distinct, elapsed, score, "first appearance");
    score
}

#[derive(Debug, Clone, Copy, Default)]
struct RoleNovelty {
    distinct: u64,
    last_first_appearance: Option<u64>,
}

/// Keeps the per-role state the score depends on.
#[derive(Debug, Clone, Default)]
pub struct AnomalyScorer {
    senders: RoleNovelty,
    receivers: RoleNovelty,
}

impl AnomalyScorer {
    /// Registers a new address in `role` at packet index `packets` and returns its score.
    pub fn first_appearance(&mut self, role: Role, packets: u64) -> f64 {
        let state = match role {
            Role::Sender => &mut self.senders,
            Role::Receiver => &mut self.receivers,
        };
        state.distinct += 1;
        let score = score(role, true, packets, state.distinct, state.last_first_appearance);
        state.last_first_appearance = Some(packets);
        score
    }

    pub fn distinct(&self, role: Role) -> u64 {
        match role {
            Role::Sender => self.senders.distinct,
            Role::Receiver => self.receivers.distinct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_address_scores_one() {
        assert_eq!(score(Role::Sender, true, 1, 1, None), 1.0);
        let mut scorer = AnomalyScorer::default();
        assert_eq!(scorer.first_appearance(Role::Sender, 1), 1.0);
        assert_eq!(scorer.first_appearance(Role::Receiver, 1), 1.0);
    }

    #[test]
    fn test_known_or_empty_role_scores_zero() {
        assert_eq!(score(Role::Receiver, false, 10, 3, Some(2)), 0.0);
        assert_eq!(score(Role::Receiver, true, 10, 0, Some(2)), 0.0);
    }

    #[test]
    fn test_rare_novelty_outscores_frequent_novelty() {
        // scan: a new receiver on every packet
        let mut scan = AnomalyScorer::default();
        let scan_score = (1..=100)
            .map(|n| scan.first_appearance(Role::Receiver, n))
            .last()
            .unwrap_or_default();
        // quiet: second receiver only shows up at packet 100
        let mut quiet = AnomalyScorer::default();
        quiet.first_appearance(Role::Receiver, 1);
        let quiet_score = quiet.first_appearance(Role::Receiver, 100);
        // s_t = 2, n = 100, s_r = 100
        assert_eq!(scan_score, 2.0);
        // s_t = 100, n = 100, s_r = 2
        assert_eq!(quiet_score, 5000.0);
        assert_eq!(quiet.distinct(Role::Receiver), 2);
        assert_eq!(quiet.distinct(Role::Sender), 0);
    }
}
