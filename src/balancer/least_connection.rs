use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use rand::Rng;

use super::{noop_release, Payload, Release};

/// Selection by minimum in-flight request count.
///
/// The scan seeds its minimum at a uniformly random provider so that
/// tie-breaks rotate instead of pinning to the first index when every
/// counter reads the same. Counters are read relaxed; the policy tolerates
/// slightly stale values.
pub struct LeastConnection {
    providers: Vec<Arc<LcProvider>>,
}

struct LcProvider {
    payload: Payload,
    inflight: AtomicI64,
}

impl LeastConnection {
    pub fn new(providers: Vec<Payload>) -> Self {
        let providers = providers
            .into_iter()
            .map(|payload| Arc::new(LcProvider { payload, inflight: AtomicI64::new(0) }))
            .collect();
        Self { providers }
    }

    /// Returns the provider with the fewest outstanding borrows. The release
    /// callback decrements the in-flight counter; its arguments are ignored.
    pub fn borrow(&self) -> (Payload, Release) {
        let Some(provider) = self.pick_least() else {
            return (Payload::default(), noop_release());
        };

        provider.inflight.fetch_add(1, Ordering::Relaxed);
        let held = Arc::clone(provider);
        let release: Release = Box::new(move |_, _| {
            held.inflight.fetch_sub(1, Ordering::Relaxed);
        });
        (provider.payload.clone(), release)
    }

    fn pick_least(&self) -> Option<&Arc<LcProvider>> {
        let n = self.providers.len();
        if n == 0 {
            return None;
        }
        if n == 1 {
            return Some(&self.providers[0]);
        }

        let seed = rand::thread_rng().gen_range(0..n);
        let mut min_provider = &self.providers[seed];
        let mut min_inflight = min_provider.inflight.load(Ordering::Relaxed);

        for provider in &self.providers {
            let inflight = provider.inflight.load(Ordering::Relaxed);
            if inflight < min_inflight {
                min_provider = provider;
                min_inflight = inflight;
            }
        }
        Some(min_provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn provider(name: &str) -> Payload {
        Payload { name: name.to_string(), url: format!("http://{name}") }
    }

    #[test]
    fn empty_pool_yields_empty_payload() {
        let lc = LeastConnection::new(Vec::new());
        let (payload, release) = lc.borrow();
        assert!(payload.is_empty());
        release(true, Duration::ZERO);
    }

    #[test]
    fn single_provider_is_always_returned() {
        let lc = LeastConnection::new(vec![provider("only")]);
        let (first, _) = lc.borrow();
        let (second, _) = lc.borrow();
        assert_eq!(first, second);
    }

    #[test]
    fn held_borrow_diverts_to_the_other_provider() {
        let lc = LeastConnection::new(vec![provider("a"), provider("b")]);

        let (first, release_first) = lc.borrow();
        let (second, release_second) = lc.borrow();
        assert_ne!(first.name, second.name);

        // Releasing the first makes it the least-loaded again.
        release_first(true, Duration::ZERO);
        let (third, _) = lc.borrow();
        assert_eq!(third.name, first.name);

        release_second(true, Duration::ZERO);
        let (fourth, _) = lc.borrow();
        assert_eq!(fourth.name, second.name);
    }

    #[test]
    fn inflight_never_goes_negative_under_contention() {
        let lc = Arc::new(LeastConnection::new(vec![provider("a"), provider("b")]));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lc = Arc::clone(&lc);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let (_, release) = lc.borrow();
                    release(true, Duration::ZERO);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for provider in &lc.providers {
            assert_eq!(provider.inflight.load(Ordering::Relaxed), 0);
        }
    }
}
