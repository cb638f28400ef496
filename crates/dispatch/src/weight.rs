//! Quota cost of messaging a single recipient.

use broadcast_core::BroadcastConfig;

/// Every payload costs one operation. A recipient without an open session also
/// pays for session setup (our invite, the peer invite, and the consent step);
/// reusing an open session costs a single extra operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightModel {
    pub new_session_cost: u64,
    pub reused_session_cost: u64,
}

impl Default for WeightModel {
    fn default() -> Self {
        Self {
            new_session_cost: 3,
            reused_session_cost: 1,
        }
    }
}

impl WeightModel {
    pub fn from_config(config: &BroadcastConfig) -> Self {
        Self {
            new_session_cost: config.new_session_cost,
            reused_session_cost: config.reused_session_cost,
        }
    }

    pub fn weight(&self, payload_count: usize, has_session: bool) -> u64 {
        let setup = if has_session {
            self.reused_session_cost
        } else {
            self.new_session_cost
        };
        (payload_count as u64).saturating_add(setup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_costs_more() {
        let model = WeightModel::default();
        assert_eq!(model.weight(1, false), 4);
        assert_eq!(model.weight(1, true), 2);
        assert_eq!(model.weight(5, true), 6);
        assert!(model.weight(0, false) > model.weight(0, true));
    }

    #[test]
    fn test_from_config() {
        let config = BroadcastConfig {
            new_session_cost: 7,
            reused_session_cost: 2,
            ..Default::default()
        };
        let model = WeightModel::from_config(&config);
        assert_eq!(model.weight(3, false), 10);
        assert_eq!(model.weight(3, true), 5);
    }

    #[test]
    fn test_weight_saturates() {
        let model = WeightModel {
            new_session_cost: u64::MAX,
            reused_session_cost: 1,
        };
        assert_eq!(model.weight(5, false), u64::MAX);
        assert_eq!(model.weight(5, true), 6);
    }
}
