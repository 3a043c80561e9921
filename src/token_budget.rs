//! Token Budget Manager
//!
//! Gate for every call to the completion service. Two fixed windows (per
//! minute, per UTC day) are checked and updated under one mutex; a call
//! proceeds only if both have headroom for its reservation.
//!
//! Reservations are RAII guards: dropping one without `commit` releases it,
//! so a cancelled request never charges the budget.

use crate::config::BudgetConfig;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// Source of "now"; swapped out in tests to cross window boundaries
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DenialReason {
    PerMinuteExceeded,
    PerDailyExceeded,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::PerMinuteExceeded => write!(f, "per-minute token limit reached"),
            DenialReason::PerDailyExceeded => write!(f, "daily token limit reached"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}: requested {requested} tokens, {available} available")]
pub struct BudgetDenied {
    pub reason: DenialReason,
    pub requested: u64,
    pub available: u64,
}

#[derive(Debug, Clone)]
struct Window {
    start: DateTime<Utc>,
    span: Duration,
    used: u64,
    limit: u64,
}

impl Window {
    fn new(span: Duration, limit: u64, now: DateTime<Utc>) -> Self {
        Self {
            start: align(now, span),
            span,
            used: 0,
            limit,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if now >= self.start + self.span {
            self.start = align(now, self.span);
            self.used = 0;
        }
    }

    fn available(&self, in_flight: u64) -> u64 {
        self.limit.saturating_sub(self.used.saturating_add(in_flight))
    }
}

/// Start of the fixed window containing `now`
fn align(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    let span_secs = span.num_seconds().max(1);
    let ts = now.timestamp();
    Utc.timestamp_opt(ts - ts.rem_euclid(span_secs), 0)
        .single()
        .unwrap_or(now)
}

#[derive(Debug)]
struct BudgetState {
    minute: Window,
    day: Window,
    /// Outstanding reservations. Not cleared on rollover: tokens reserved in
    /// one window may be committed in the next and must still count.
    in_flight: u64,
}

/// Per-window view for operators
#[derive(Debug, Clone, Serialize)]
pub struct WindowStatus {
    pub window_start: DateTime<Utc>,
    pub tokens_used: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub per_minute: WindowStatus,
    pub per_day: WindowStatus,
    pub in_flight: u64,
}

pub struct TokenBudgetManager {
    state: Mutex<BudgetState>,
    clock: Arc<dyn Clock>,
}

impl TokenBudgetManager {
    pub fn new(config: &BudgetConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &BudgetConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let now = clock.now();
        Arc::new(Self {
            state: Mutex::new(BudgetState {
                minute: Window::new(Duration::minutes(1), config.per_minute_limit, now),
                day: Window::new(Duration::days(1), config.per_day_limit, now),
                in_flight: 0,
            }),
            clock,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BudgetState> {
        // Every update keeps the counters consistent before it can panic
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Largest reservation either window could ever grant
    pub fn max_reservation(&self) -> u64 {
        let state = self.lock();
        state.minute.limit.min(state.day.limit)
    }

    /// Atomically set aside `tokens` in both windows
    pub fn reserve(self: &Arc<Self>, tokens: u64) -> Result<Reservation, BudgetDenied> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.minute.roll(now);
        state.day.roll(now);

        let day_available = state.day.available(state.in_flight);
        if tokens > day_available {
            warn!("Token budget denied: {} > {} left today", tokens, day_available);
            return Err(BudgetDenied {
                reason: DenialReason::PerDailyExceeded,
                requested: tokens,
                available: day_available,
            });
        }
        let minute_available = state.minute.available(state.in_flight);
        if tokens > minute_available {
            warn!("Token budget denied: {} > {} left this minute", tokens, minute_available);
            return Err(BudgetDenied {
                reason: DenialReason::PerMinuteExceeded,
                requested: tokens,
                available: minute_available,
            });
        }

        state.in_flight += tokens;
        debug!("Reserved {} tokens ({} in flight)", tokens, state.in_flight);
        Ok(Reservation {
            manager: Arc::clone(self),
            tokens,
            settled: false,
        })
    }

    /// Charge `actual` against both windows, capped at what was reserved
    fn settle(&self, reserved: u64, actual: u64) -> u64 {
        let charged = actual.min(reserved);
        if actual > reserved {
            warn!("Completion used {} tokens, over its {} reservation", actual, reserved);
        }
        let now = self.clock.now();
        let mut state = self.lock();
        state.minute.roll(now);
        state.day.roll(now);
        state.in_flight = state.in_flight.saturating_sub(reserved);
        state.minute.used += charged;
        state.day.used += charged;
        charged
    }

    pub fn status(&self) -> BudgetStatus {
        let now = self.clock.now();
        let mut state = self.lock();
        state.minute.roll(now);
        state.day.roll(now);
        BudgetStatus {
            per_minute: WindowStatus {
                window_start: state.minute.start,
                tokens_used: state.minute.used,
                limit: state.minute.limit,
            },
            per_day: WindowStatus {
                window_start: state.day.start,
                tokens_used: state.day.used,
                limit: state.day.limit,
            },
            in_flight: state.in_flight,
        }
    }
}

/// Tokens held against the budget until committed or released
#[must_use = "a reservation is released as soon as it is dropped"]
pub struct Reservation {
    manager: Arc<TokenBudgetManager>,
    tokens: u64,
    settled: bool,
}

impl Reservation {
    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Record actual usage. Returns the tokens charged.
    pub fn commit(mut self, actual_tokens: u64) -> u64 {
        self.settled = true;
        self.manager.settle(self.tokens, actual_tokens)
    }

    /// Give the reservation back without charging anything
    pub fn release(mut self) {
        self.settled = true;
        self.manager.settle(self.tokens, 0);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            debug!("Reservation of {} tokens dropped unsettled; releasing", self.tokens);
            self.manager.settle(self.tokens, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn at(start: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(start)))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now = *now + by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn config(minute: u64, day: u64) -> BudgetConfig {
        BudgetConfig {
            per_minute_limit: minute,
            per_day_limit: day,
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_reserve_commit_charges_actual() {
        let budget = TokenBudgetManager::new(&config(1000, 10_000));
        let reservation = budget.reserve(500).unwrap();
        assert_eq!(budget.status().in_flight, 500);
        assert_eq!(reservation.commit(320), 320);

        let status = budget.status();
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.per_minute.tokens_used, 320);
        assert_eq!(status.per_day.tokens_used, 320);
    }

    #[test]
    fn test_commit_is_capped_at_reservation() {
        let budget = TokenBudgetManager::new(&config(1000, 10_000));
        let charged = budget.reserve(100).unwrap().commit(450);
        assert_eq!(charged, 100);
        assert_eq!(budget.status().per_minute.tokens_used, 100);
    }

    #[test]
    fn test_max_reservation_ignores_usage() {
        let budget = TokenBudgetManager::new(&config(1000, 600));
        assert_eq!(budget.max_reservation(), 600);
        budget.reserve(400).unwrap().commit(400);
        assert_eq!(budget.max_reservation(), 600);
    }

    #[test]
    fn test_minute_limit_denies_then_recovers() {
        let clock = ManualClock::at(noon());
        let budget = TokenBudgetManager::with_clock(&config(1000, 10_000), clock.clone());

        budget.reserve(800).unwrap().commit(800);
        let denied = budget.reserve(500).err().unwrap();
        assert_eq!(denied.reason, DenialReason::PerMinuteExceeded);
        assert_eq!(denied.available, 200);

        clock.advance(Duration::seconds(61));
        assert!(budget.reserve(500).is_ok());
    }

    #[test]
    fn test_daily_limit_reported_first() {
        let clock = ManualClock::at(noon());
        let budget = TokenBudgetManager::with_clock(&config(1000, 1500), clock.clone());
        budget.reserve(1000).unwrap().commit(1000);
        clock.advance(Duration::minutes(2));
        budget.reserve(500).unwrap().commit(500);

        let denied = budget.reserve(100).err().unwrap();
        assert_eq!(denied.reason, DenialReason::PerDailyExceeded);

        clock.advance(Duration::hours(12));
        assert!(budget.reserve(100).is_ok());
    }

    #[test]
    fn test_drop_releases_reservation() {
        let budget = TokenBudgetManager::new(&config(1000, 10_000));
        {
            let _held = budget.reserve(600).unwrap();
            assert!(budget.reserve(600).is_err());
        }
        assert_eq!(budget.status().in_flight, 0);
        assert_eq!(budget.status().per_minute.tokens_used, 0);
        assert!(budget.reserve(600).is_ok());
    }

    #[test]
    fn test_in_flight_survives_rollover() {
        let clock = ManualClock::at(noon());
        let budget = TokenBudgetManager::with_clock(&config(1000, 10_000), clock.clone());
        let held = budget.reserve(900).unwrap();
        clock.advance(Duration::seconds(90));

        // The new window still has 900 tokens in flight
        assert!(budget.reserve(200).is_err());
        held.commit(900);
        assert_eq!(budget.status().per_minute.tokens_used, 900);
    }

    #[test]
    fn test_concurrent_reservations_never_overcommit() {
        let budget = TokenBudgetManager::new(&config(5_000, 5_000));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let budget = Arc::clone(&budget);
                std::thread::spawn(move || {
                    let mut charged = 0;
                    for _ in 0..50 {
                        if let Ok(r) = budget.reserve(70) {
                            charged += r.commit(70);
                        }
                    }
                    charged
                })
            })
            .collect();

        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(total <= 5_000);
        assert_eq!(total, budget.status().per_day.tokens_used);
    }

    proptest! {
        #[test]
        fn prop_windows_never_exceeded(
            ops in proptest::collection::vec((1u64..400, 0u64..500, 0u64..30, any::<bool>()), 1..80)
        ) {
            let clock = ManualClock::at(noon());
            let budget = TokenBudgetManager::with_clock(&config(1_000, 4_000), clock.clone());
            let mut charged_today = 0u64;

            for (reserve, actual, advance_secs, commit) in ops {
                clock.advance(Duration::seconds(advance_secs as i64));
                if let Ok(r) = budget.reserve(reserve) {
                    if commit {
                        charged_today += r.commit(actual);
                    } else {
                        r.release();
                    }
                }
                let status = budget.status();
                prop_assert!(status.per_minute.tokens_used <= 1_000);
                prop_assert!(status.per_day.tokens_used <= 4_000);
                prop_assert_eq!(status.in_flight, 0);
            }
            prop_assert_eq!(charged_today, budget.status().per_day.tokens_used);
        }
    }
}
