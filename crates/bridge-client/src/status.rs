//! Rate-limit-aware, de-duplicating cache for the `/status` endpoint.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bridge_core::BridgeUiStatus;
use tokio::sync::Notify;
use tokio::time::Instant;

/// How long a computed result is served to new callers as-is.
///
/// Absorbs bursts of near-simultaneous callers, for example several widgets
/// mounting at once.
const FRESH_WINDOW: Duration = Duration::from_millis(2_500);

#[derive(Debug, Clone)]
struct CachedStatus {
    ui: BridgeUiStatus,
    fetched_at: Instant,
    /// Set only for rate-limited results; the cooldown deadline.
    retry_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct PollerState {
    last: Option<CachedStatus>,
    in_flight: bool,
}

/// Coordinates independent `/status` callers into at most one outstanding
/// network request, with policy-driven reuse of recent results.
///
/// Instances are independent; construct one per bridge connection and share
/// it by cloning. All state is internal, so tests and multiple connections
/// never interfere with each other.
#[derive(Clone, Default)]
pub struct StatusPoller {
    state: Arc<Mutex<PollerState>>,
    done: Arc<Notify>,
}

impl StatusPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the current bridge status, reusing cached or in-flight work.
    ///
    /// Policy, in priority order:
    /// 1. a rate-limited result inside its cooldown is returned verbatim,
    ///    regardless of age;
    /// 2. a result younger than the freshness window is returned as-is;
    /// 3. an in-flight request is awaited instead of starting another;
    /// 4. otherwise `fetch` runs once and its result is cached for everyone.
    pub async fn fetch_status<F, Fut>(&self, fetch: F) -> BridgeUiStatus
    where
        F: Fn() -> Fut,
        Fut: Future<Output = BridgeUiStatus>,
    {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);

            let is_leader = {
                let mut state = self.lock_state();
                let now = Instant::now();

                if let Some(cached) = &state.last {
                    match cached.retry_until {
                        Some(retry_until) if now < retry_until => {
                            return cached.ui.clone();
                        }
                        // Cooldown expired: always refetch, even if the
                        // cached entry is still inside the freshness window.
                        Some(_) => {}
                        None => {
                            if now.duration_since(cached.fetched_at) < FRESH_WINDOW {
                                return cached.ui.clone();
                            }
                        }
                    }
                }

                if state.in_flight {
                    // Register while the lock is held so a fetch completing
                    // right after release cannot be missed.
                    notified.as_mut().enable();
                    false
                } else {
                    state.in_flight = true;
                    true
                }
            };

            if !is_leader {
                notified.await;
                continue;
            }

            let _guard = FlightGuard { poller: self };
            let ui = fetch().await;
            let now = Instant::now();
            let retry_until = match &ui {
                BridgeUiStatus::RateLimited {
                    retry_after_secs, ..
                } => Some(now + Duration::from_secs(*retry_after_secs)),
                _ => None,
            };

            self.lock_state().last = Some(CachedStatus {
                ui: ui.clone(),
                fetched_at: now,
                retry_until,
            });

            return ui;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the single-flight slot and wakes waiters, also when the leading
/// caller is dropped mid-fetch.
struct FlightGuard<'a> {
    poller: &'a StatusPoller,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.poller.lock_state().in_flight = false;
        self.poller.done.notify_waiters();
    }
}
