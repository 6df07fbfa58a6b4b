//! Load-balancing strategies over a chain's provider pool.
//!
//! Every strategy exposes the same two-phase contract: `borrow` picks a
//! provider and hands back a release callback that the dispatcher must invoke
//! exactly once with the outcome of the upstream call. The provider lists are
//! frozen at construction; only per-provider stats mutate afterwards.

mod least_connection;
mod p2c_ewma;
mod round_robin;

pub use least_connection::LeastConnection;
pub use p2c_ewma::{P2cEwma, P2cParams};
pub use round_robin::RoundRobin;

use std::time::Duration;

/// Provider identity handed out by a balancer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub name: String,
    pub url: String,
}

impl Payload {
    /// An empty payload marks a borrow from a balancer with no providers.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.url.is_empty()
    }
}

/// Callback reporting the outcome of a borrowed provider: whether the
/// upstream delivered a usable response and the end-to-end latency.
pub type Release = Box<dyn FnOnce(bool, Duration) + Send>;

pub(crate) fn noop_release() -> Release {
    Box::new(|_, _| {})
}

/// The balancing strategy configured for a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    P2cEwma,
    RoundRobin,
    LeastConnection,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::P2cEwma => "p2cewma",
            Kind::RoundRobin => "round-robin",
            Kind::LeastConnection => "least-connection",
        }
    }

    pub fn parse(s: &str) -> Option<Kind> {
        match s {
            "p2cewma" => Some(Kind::P2cEwma),
            "round-robin" => Some(Kind::RoundRobin),
            "least-connection" => Some(Kind::LeastConnection),
            _ => None,
        }
    }
}

/// A chain's balancer, one variant per configured kind.
pub enum Balancer {
    P2cEwma(P2cEwma),
    RoundRobin(RoundRobin),
    LeastConnection(LeastConnection),
}

impl Balancer {
    pub fn kind(&self) -> Kind {
        match self {
            Balancer::P2cEwma(_) => Kind::P2cEwma,
            Balancer::RoundRobin(_) => Kind::RoundRobin,
            Balancer::LeastConnection(_) => Kind::LeastConnection,
        }
    }

    /// Picks a provider. The returned release callback must be invoked after
    /// the upstream call completes.
    pub fn borrow(&self) -> (Payload, Release) {
        match self {
            Balancer::P2cEwma(b) => b.borrow(),
            Balancer::RoundRobin(b) => b.borrow(),
            Balancer::LeastConnection(b) => b.borrow(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_names() {
        for kind in [Kind::P2cEwma, Kind::RoundRobin, Kind::LeastConnection] {
            assert_eq!(Kind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(Kind::parse("weighted"), None);
    }

    #[test]
    fn empty_payload_is_detected() {
        assert!(Payload::default().is_empty());
        let payload = Payload { name: "a".into(), url: "http://a".into() };
        assert!(!payload.is_empty());
    }
}
