//! Buffer slot selection.
//!
//! A strategy hands out slot numbers from a fixed inclusive range
//! `[start, end]`. Two policies are available:
//! - `RandomStrategy`: uniform pick per call
//! - `RoundRobinStrategy`: lock-free shared cursor advanced by CAS
//!
//! Strategies are constructed once per node and shared by reference with the
//! gateway, so there is no process-wide cursor.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use serde::Deserialize;

/// Selection policy over an inclusive integer range.
pub trait LoadBalance: Send + Sync {
    /// Return a slot in `[start, end]`. Never fails.
    fn acquire(&self) -> usize;
}

/// Load-balance strategy names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LoadBalanceKind {
    RoundRobin,
    Random,
}

impl LoadBalanceKind {
    /// Build a strategy over `[start, end]`.
    pub fn build(self, start: usize, end: usize) -> Box<dyn LoadBalance> {
        match self {
            Self::RoundRobin => Box::new(RoundRobinStrategy::new(start, end)),
            Self::Random => Box::new(RandomStrategy::new(start, end)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "RoundRobin",
            Self::Random => "Random",
        }
    }
}

/// Error for strategy names that are not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown load-balance strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for LoadBalanceKind {
    type Err = UnknownStrategy;

    /// Names are matched exactly; there is no fallback strategy.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RoundRobin" => Ok(Self::RoundRobin),
            "Random" => Ok(Self::Random),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for LoadBalanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniformly random slot per call.
#[derive(Debug, Clone)]
pub struct RandomStrategy {
    start: usize,
    end: usize,
}

impl RandomStrategy {
    /// `end < start` is a caller misconfiguration.
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "empty load-balance range");
        Self { start, end }
    }
}

impl LoadBalance for RandomStrategy {
    fn acquire(&self) -> usize {
        rand::rng().random_range(self.start..=self.end)
    }
}

/// Cyclic slot selection shared by concurrent callers.
///
/// The cursor holds the last slot handed out. It starts one before `start`
/// (represented as `end`, which wraps to `start`), so the first call returns
/// `start`.
#[derive(Debug)]
pub struct RoundRobinStrategy {
    start: usize,
    end: usize,
    last: AtomicUsize,
}

impl RoundRobinStrategy {
    /// `end < start` is a caller misconfiguration.
    ///
    /// The cursor is seeded with `end`, so the first `acquire` wraps and
    /// returns `start` rather than `start + 1`.
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "empty load-balance range");
        Self {
            start,
            end,
            last: AtomicUsize::new(end),
        }
    }

    fn successor(&self, current: usize) -> usize {
        if current >= self.end || current < self.start {
            self.start
        } else {
            current + 1
        }
    }
}

impl LoadBalance for RoundRobinStrategy {
    /// Advance the cursor with a compare-and-swap retry loop.
    ///
    /// Returns the value this call installed. Two callers can never both win
    /// the same transition, so no slot is handed out twice for one step of
    /// the cursor.
    fn acquire(&self) -> usize {
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let next = self.successor(current);
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests;
