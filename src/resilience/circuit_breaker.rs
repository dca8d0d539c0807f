use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::GenerationError;
use crate::events::{self, Event, EventHandler};

/// Externally visible breaker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial call.
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: BreakerState,
    pub failure_threshold: u32,
    pub cool_down_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { since: Instant },
    HalfOpen { trial_in_flight: bool },
}

impl Phase {
    fn public(&self) -> BreakerState {
        match self {
            Phase::Closed => BreakerState::Closed,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct State {
    phase: Phase,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    /// Bumped on every phase change. Permits carry the value they were
    /// issued under; outcomes from an older phase never move the breaker.
    generation: u64,
}

/// Admission ticket for one provider attempt.
///
/// Hand it back through exactly one of [`CircuitBreaker::on_success`],
/// [`CircuitBreaker::on_failure`] or [`CircuitBreaker::on_abandon`].
#[must_use]
#[derive(Debug)]
pub struct Permit {
    trial: bool,
    generation: u64,
}

impl Permit {
    /// Whether this permit is the single half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

/// Process-wide circuit breaker guarding the generation provider.
///
/// - Closed: calls pass; each failure increments the consecutive counter,
///   each success zeroes it; reaching the threshold opens the breaker.
/// - Open: calls are rejected with [`GenerationError::CircuitOpen`] until
///   the cool-down elapses.
/// - HalfOpen: exactly one trial call passes; success closes, failure
///   reopens with a fresh cool-down.
///
/// Time is read from `tokio::time::Instant`, so a paused test clock drives
/// the cool-down.
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("cfg", &self.cfg)
            .field("state", &self.lock().phase.public())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                phase: Phase::Closed,
                consecutive_failures: 0,
                last_failure: None,
                generation: 0,
            }),
            event_handler: None,
        }
    }

    pub fn with_event_handler(mut self, handler: Option<Arc<dyn EventHandler>>) -> Self {
        self.event_handler = handler;
        self
    }

    // The state is a handful of plain values; a panic mid-update cannot
    // leave it half-written, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, st: &mut State, to: Phase) {
        let from = st.phase.public();
        st.phase = to;
        let to = to.public();
        if from != to {
            st.generation = st.generation.wrapping_add(1);
            match to {
                BreakerState::Open => warn!(
                    consecutive_failures = st.consecutive_failures,
                    cool_down_ms = self.cfg.cool_down.as_millis() as u64,
                    "circuit breaker opened"
                ),
                _ => info!(from = ?from, to = ?to, "circuit breaker transition"),
            }
            events::emit(&self.event_handler, Event::BreakerTransition { from, to });
        }
    }

    /// Ask to make one provider attempt.
    pub fn try_acquire(&self) -> Result<Permit, GenerationError> {
        let mut st = self.lock();
        let now = Instant::now();
        match st.phase {
            Phase::Closed => Ok(Permit {
                trial: false,
                generation: st.generation,
            }),
            Phase::Open { since } => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed >= self.cfg.cool_down {
                    self.transition(
                        &mut st,
                        Phase::HalfOpen {
                            trial_in_flight: true,
                        },
                    );
                    Ok(Permit {
                        trial: true,
                        generation: st.generation,
                    })
                } else {
                    Err(GenerationError::CircuitOpen {
                        retry_in: self.cfg.cool_down - elapsed,
                    })
                }
            }
            Phase::HalfOpen {
                trial_in_flight: true,
            } => Err(GenerationError::CircuitOpen {
                retry_in: Duration::ZERO,
            }),
            Phase::HalfOpen {
                trial_in_flight: false,
            } => {
                st.phase = Phase::HalfOpen {
                    trial_in_flight: true,
                };
                Ok(Permit {
                    trial: true,
                    generation: st.generation,
                })
            }
        }
    }

    pub fn on_success(&self, permit: Permit) {
        let mut st = self.lock();
        if permit.generation != st.generation {
            debug!(trial = permit.trial, "ignoring success from an earlier breaker phase");
            return;
        }
        match st.phase {
            Phase::Closed => st.consecutive_failures = 0,
            Phase::HalfOpen { .. } if permit.trial => {
                st.consecutive_failures = 0;
                self.transition(&mut st, Phase::Closed);
            }
            _ => {}
        }
    }

    pub fn on_failure(&self, permit: Permit) {
        let mut st = self.lock();
        if permit.generation != st.generation {
            debug!(trial = permit.trial, "ignoring failure from an earlier breaker phase");
            return;
        }
        let now = Instant::now();
        match st.phase {
            Phase::Closed => {
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                st.last_failure = Some(now);
                if st.consecutive_failures >= self.cfg.failure_threshold {
                    self.transition(&mut st, Phase::Open { since: now });
                }
            }
            Phase::HalfOpen { .. } if permit.trial => {
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                st.last_failure = Some(now);
                self.transition(&mut st, Phase::Open { since: now });
            }
            _ => {}
        }
    }

    /// The attempt was cancelled before an outcome was observed. Nothing is
    /// recorded; a half-open trial slot is handed back.
    pub fn on_abandon(&self, permit: Permit) {
        if !permit.trial {
            return;
        }
        let mut st = self.lock();
        if permit.generation != st.generation {
            return;
        }
        if let Phase::HalfOpen { .. } = st.phase {
            st.phase = Phase::HalfOpen {
                trial_in_flight: false,
            };
        }
    }

    /// Operator reset: close the breaker and forget past failures.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.consecutive_failures = 0;
        st.last_failure = None;
        self.transition(&mut st, Phase::Closed);
    }

    pub fn state(&self) -> BreakerState {
        self.lock().phase.public()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Time since the most recent recorded failure.
    pub fn since_last_failure(&self) -> Option<Duration> {
        self.lock()
            .last_failure
            .map(|at| Instant::now().saturating_duration_since(at))
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let st = self.lock();
        let open_remaining_ms = match st.phase {
            Phase::Open { since } => {
                let elapsed = Instant::now().saturating_duration_since(since);
                self.cfg
                    .cool_down
                    .checked_sub(elapsed)
                    .map(|d| d.as_millis() as u64)
            }
            _ => None,
        };
        CircuitBreakerSnapshot {
            state: st.phase.public(),
            failure_threshold: self.cfg.failure_threshold,
            cool_down_ms: self.cfg.cool_down.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            open_remaining_ms,
        }
    }
}
