//! Per-source-IP sliding-window rate limiter.
//!
//! In-process only: a concurrent map of recent request instants keyed by
//! IP, good for single-node deployments. Multi-node deployments need a
//! shared store behind the same interface.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Idle entries are dropped once the map grows past this many sources.
const EVICTION_THRESHOLD: usize = 10_000;

pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    inner: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter sized from config: N requests per source per minute.
    pub fn per_minute(max_per_minute: u32) -> Self {
        Self::new(max_per_minute, Duration::from_secs(60))
    }

    /// Record a request from `ip` and report whether it is allowed.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.len() > EVICTION_THRESHOLD {
            let window = self.window;
            inner.retain(|_, hits| {
                hits.back()
                    .map(|last| now.duration_since(*last) < window)
                    .unwrap_or(false)
            });
        }

        let hits = inner.entry(ip).or_default();

        while let Some(oldest) = hits.front() {
            if now.duration_since(*oldest) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() >= self.max_per_window as usize {
            return false;
        }

        hits.push_back(now);
        true
    }
}
