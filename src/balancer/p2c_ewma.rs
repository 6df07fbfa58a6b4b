use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rand::Rng;

use super::{noop_release, Payload, Release};

/// Latency assumed for a provider with no observations yet, in milliseconds.
/// Keeps an unmeasured provider competitive with a moderately loaded
/// known-good one instead of starving it cold.
const SEED_EWMA_MS: f64 = 75.0;

/// Penalty applied on a provider-level failure.
const PENALTY_ON_FAILURE: f64 = 0.5;

/// Below this the decayed penalty snaps to zero.
const PENALTY_FLOOR: f64 = 0.05;

/// Tuning parameters for [`P2cEwma`], validated at config time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct P2cParams {
    /// EWMA smoothing factor, in [0, 1].
    pub smooth: f64,
    /// Divisor turning the in-flight count into a load multiplier, > 0.
    pub load_normalizer: f64,
    /// Multiplicative penalty decay on success, in [0, 1].
    pub penalty_decay: f64,
    /// How long a failed provider scores +inf.
    pub cooldown: Duration,
}

impl Default for P2cParams {
    fn default() -> Self {
        Self {
            smooth: 0.3,
            load_normalizer: 8.0,
            penalty_decay: 0.8,
            cooldown: Duration::from_secs(10),
        }
    }
}

/// "Power of two choices" balancer scoring candidates by EWMA latency,
/// in-flight load and error penalty.
pub struct P2cEwma {
    params: P2cParams,
    providers: Vec<Arc<Provider>>,
}

/// An upstream provider with its runtime stats.
pub(crate) struct Provider {
    payload: Payload,
    stats: Mutex<Stats>,
    inflight: AtomicI64,
}

#[derive(Debug, Default)]
struct Stats {
    ewma_ms: f64,
    penalty: f64,
    unhealthy_until: Option<Instant>,
}

impl P2cEwma {
    pub fn new(providers: Vec<Payload>, params: P2cParams) -> Self {
        let providers = providers
            .into_iter()
            .map(|payload| {
                Arc::new(Provider {
                    payload,
                    stats: Mutex::new(Stats::default()),
                    inflight: AtomicI64::new(0),
                })
            })
            .collect();
        Self { params, providers }
    }

    pub fn with_defaults(providers: Vec<Payload>) -> Self {
        Self::new(providers, P2cParams::default())
    }

    /// Picks the lower-scored of two random candidates and returns its
    /// payload plus a release callback. The callback must be invoked once
    /// the upstream call completes, with `ok` reporting provider-level
    /// success and the end-to-end latency.
    pub fn borrow(&self) -> (Payload, Release) {
        let Some(provider) = self.p2c() else {
            return (Payload::default(), noop_release());
        };

        provider.inflight.fetch_add(1, Ordering::Relaxed);
        let held = Arc::clone(provider);
        let params = self.params;
        let release: Release = Box::new(move |ok, latency| {
            held.on_release(ok, latency, &params);
            held.inflight.fetch_sub(1, Ordering::Relaxed);
        });
        (provider.payload.clone(), release)
    }

    /// Draws two distinct candidates uniformly and returns the one with the
    /// lower score at the current instant.
    fn p2c(&self) -> Option<&Arc<Provider>> {
        let n = self.providers.len();
        if n == 0 {
            return None;
        }
        if n == 1 {
            return Some(&self.providers[0]);
        }

        let mut rng = rand::thread_rng();
        let i = rng.gen_range(0..n);
        let mut j = rng.gen_range(0..n - 1);
        if i == j {
            j += 1;
        }

        let now = Instant::now();
        let pi = &self.providers[i];
        let pj = &self.providers[j];

        if pi.score(now, self.params.load_normalizer) < pj.score(now, self.params.load_normalizer) {
            Some(pi)
        } else {
            Some(pj)
        }
    }
}

impl Provider {
    /// Lower-is-better score from EWMA latency, in-flight load and error
    /// penalty. +inf while the provider is cooling down.
    fn score(&self, now: Instant, load_normalizer: f64) -> f64 {
        let (base, penalty, until) = {
            let stats = self.stats.lock();
            (stats.ewma_ms, stats.penalty, stats.unhealthy_until)
        };

        if let Some(until) = until {
            if now < until {
                return f64::INFINITY;
            }
        }

        let base = if base == 0.0 { SEED_EWMA_MS } else { base };
        let inflight = self.inflight.load(Ordering::Relaxed) as f64;
        let load = 1.0 + inflight / load_normalizer;

        base * load * (1.0 + penalty)
    }

    /// Folds the observed latency into the EWMA and sets or decays the error
    /// penalty. Failures start the cooldown window.
    fn on_release(&self, ok: bool, latency: Duration, params: &P2cParams) {
        let latency_ms = latency.as_millis() as f64;

        let mut stats = self.stats.lock();
        if stats.ewma_ms == 0.0 {
            stats.ewma_ms = latency_ms;
        }
        stats.ewma_ms = (1.0 - params.smooth) * stats.ewma_ms + latency_ms * params.smooth;

        if !ok {
            stats.penalty = PENALTY_ON_FAILURE;
            stats.unhealthy_until = Some(Instant::now() + params.cooldown);
        } else {
            stats.penalty *= params.penalty_decay;
            if stats.penalty < PENALTY_FLOOR {
                stats.penalty = 0.0;
            }
        }
    }
}
