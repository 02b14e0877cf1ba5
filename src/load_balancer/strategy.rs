//! Selection strategies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::load_balancer::least_conn::LeastConnections;
use crate::load_balancer::least_time::LeastResponseTime;
use crate::load_balancer::random::Random;
use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::weighted::WeightedRoundRobin;
use crate::load_balancer::Selector;

/// Load balancing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
    WeightedRoundRobin,
    LeastResponseTime,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::RoundRobin,
        Strategy::Random,
        Strategy::LeastConnections,
        Strategy::WeightedRoundRobin,
        Strategy::LeastResponseTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::Random => "random",
            Strategy::LeastConnections => "least_connections",
            Strategy::WeightedRoundRobin => "weighted_round_robin",
            Strategy::LeastResponseTime => "least_response_time",
        }
    }

    pub fn selector(&self) -> &'static dyn Selector {
        match self {
            Strategy::RoundRobin => &RoundRobin,
            Strategy::Random => &Random,
            Strategy::LeastConnections => &LeastConnections,
            Strategy::WeightedRoundRobin => &WeightedRoundRobin,
            Strategy::LeastResponseTime => &LeastResponseTime,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown load balancing strategy '{0}'")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.as_str().parse::<Strategy>(), Ok(strategy));
        }
        assert_eq!(
            "fastest".parse::<Strategy>(),
            Err(UnknownStrategy("fastest".into()))
        );
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&Strategy::LeastResponseTime).unwrap();
        assert_eq!(json, "\"least_response_time\"");
    }
}
