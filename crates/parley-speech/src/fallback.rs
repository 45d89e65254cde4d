//! Ordered fallback over interchangeable speech engines.
//!
//! A [`FallbackChain`] tries its engines in order and stops at the first
//! success. Each run walks the state machine:
//! - Idle -> PrimaryAttempt (first engine)
//! - PrimaryAttempt -> Success | FallbackAttempt | Failure
//! - FallbackAttempt -> Success | FallbackAttempt | Failure
//! - Idle -> Failure (no engines configured)
//!
//! An engine that reports itself unavailable counts as a failed attempt.
//! There are no retries: every engine gets exactly one attempt per run.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parley_core::error::{ParleyError, Result};

/// Common surface of every speech engine.
pub trait Engine: Send + Sync {
    /// Short stable name used in logs and health reports.
    fn name(&self) -> &str;

    /// Whether the engine initialized and can be attempted.
    fn is_available(&self) -> bool {
        true
    }
}

/// State of one run through a fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainState {
    Idle,
    PrimaryAttempt,
    FallbackAttempt,
    Success,
    Failure,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainState::Idle => write!(f, "Idle"),
            ChainState::PrimaryAttempt => write!(f, "PrimaryAttempt"),
            ChainState::FallbackAttempt => write!(f, "FallbackAttempt"),
            ChainState::Success => write!(f, "Success"),
            ChainState::Failure => write!(f, "Failure"),
        }
    }
}

impl ChainState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &ChainState) -> bool {
        matches!(
            (self, target),
            (ChainState::Idle, ChainState::PrimaryAttempt)
                | (ChainState::Idle, ChainState::Failure)
                | (ChainState::PrimaryAttempt, ChainState::Success)
                | (ChainState::PrimaryAttempt, ChainState::FallbackAttempt)
                | (ChainState::PrimaryAttempt, ChainState::Failure)
                | (ChainState::FallbackAttempt, ChainState::Success)
                | (ChainState::FallbackAttempt, ChainState::FallbackAttempt)
                | (ChainState::FallbackAttempt, ChainState::Failure)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainState::Success | ChainState::Failure)
    }
}

/// Result of one run through a chain.
#[derive(Debug)]
pub struct ChainOutcome<T> {
    /// The first successful value, or the error of the last attempt.
    pub result: Result<T>,
    /// Name of the engine that produced the value.
    pub engine: Option<String>,
    /// Every state visited, starting at `Idle`.
    pub trail: Vec<ChainState>,
}

impl<T> ChainOutcome<T> {
    /// Terminal state of the run.
    pub fn state(&self) -> ChainState {
        self.trail.last().copied().unwrap_or(ChainState::Idle)
    }
}

/// Ordered list of engines sharing one capability.
pub struct FallbackChain<E: ?Sized> {
    capability: &'static str,
    engines: Vec<Arc<E>>,
    failure: fn(String) -> ParleyError,
}

impl<E: Engine + ?Sized> FallbackChain<E> {
    /// Create a chain; `failure` builds the error reported for skipped engines.
    pub fn new(
        capability: &'static str,
        engines: Vec<Arc<E>>,
        failure: fn(String) -> ParleyError,
    ) -> Self {
        Self {
            capability,
            engines,
            failure,
        }
    }

    pub fn capability(&self) -> &'static str {
        self.capability
    }

    /// `(name, available)` of every engine, in chain order.
    pub fn availability(&self) -> Vec<(String, bool)> {
        self.engines
            .iter()
            .map(|e| (e.name().to_string(), e.is_available()))
            .collect()
    }

    /// Try `call` on each engine in order until one succeeds.
    pub async fn run<T, F, Fut>(&self, mut call: F) -> ChainOutcome<T>
    where
        F: FnMut(Arc<E>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut trail = vec![ChainState::Idle];
        let mut last_error = None;

        for (index, engine) in self.engines.iter().enumerate() {
            let attempt = if index == 0 {
                ChainState::PrimaryAttempt
            } else {
                ChainState::FallbackAttempt
            };
            self.advance(&mut trail, attempt);
            let name = engine.name().to_string();

            if !engine.is_available() {
                tracing::debug!(capability = self.capability, engine = %name, "Engine unavailable, skipping");
                last_error = Some((self.failure)(format!("{} is unavailable", name)));
                continue;
            }

            match call(Arc::clone(engine)).await {
                Ok(value) => {
                    self.advance(&mut trail, ChainState::Success);
                    tracing::debug!(capability = self.capability, engine = %name, "Engine succeeded");
                    return ChainOutcome {
                        result: Ok(value),
                        engine: Some(name),
                        trail,
                    };
                }
                Err(e) => {
                    tracing::warn!(capability = self.capability, engine = %name, error = %e, "Engine failed");
                    last_error = Some(e);
                }
            }
        }

        self.advance(&mut trail, ChainState::Failure);
        let error = last_error
            .unwrap_or_else(|| (self.failure)(format!("no {} engine configured", self.capability)));
        tracing::error!(capability = self.capability, error = %error, "All engines failed");
        ChainOutcome {
            result: Err(error),
            engine: None,
            trail,
        }
    }

    fn advance(&self, trail: &mut Vec<ChainState>, next: ChainState) {
        let current = trail.last().copied().unwrap_or(ChainState::Idle);
        debug_assert!(
            current.can_transition_to(&next),
            "invalid chain transition {} -> {}",
            current,
            next
        );
        tracing::trace!(capability = self.capability, "Chain state: {} -> {}", current, next);
        trail.push(next);
    }
}
