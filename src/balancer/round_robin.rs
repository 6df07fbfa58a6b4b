use parking_lot::Mutex;

use super::{noop_release, Payload, Release};

/// Cyclic selection over a static provider list. Fair under uniform request
/// cost; keeps no latency or health state, so the release is a no-op.
pub struct RoundRobin {
    providers: Vec<Payload>,
    cursor: Mutex<usize>,
}

impl RoundRobin {
    pub fn new(providers: Vec<Payload>) -> Self {
        Self { providers, cursor: Mutex::new(0) }
    }

    /// Returns the provider at the cursor and advances it, wrapping at the
    /// end of the list.
    pub fn borrow(&self) -> (Payload, Release) {
        if self.providers.is_empty() {
            return (Payload::default(), noop_release());
        }

        let mut cursor = self.cursor.lock();
        let payload = self.providers[*cursor].clone();
        *cursor += 1;
        if *cursor == self.providers.len() {
            *cursor = 0;
        }

        (payload, noop_release())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str) -> Payload {
        Payload { name: name.to_string(), url: format!("http://{name}") }
    }

    #[test]
    fn empty_pool_yields_empty_payload() {
        let rr = RoundRobin::new(Vec::new());
        let (payload, release) = rr.borrow();
        assert!(payload.is_empty());
        release(true, std::time::Duration::ZERO);
    }

    #[test]
    fn cycles_in_configuration_order() {
        let rr = RoundRobin::new(vec![provider("a"), provider("b"), provider("c")]);

        let mut seen = Vec::new();
        for _ in 0..8 {
            let (payload, _) = rr.borrow();
            seen.push(payload.name);
        }
        assert_eq!(seen, ["a", "b", "c", "a", "b", "c", "a", "b"]);
    }

    #[test]
    fn single_provider_is_always_returned() {
        let rr = RoundRobin::new(vec![provider("only")]);
        for _ in 0..3 {
            let (payload, _) = rr.borrow();
            assert_eq!(payload.name, "only");
        }
    }
}
