//! Rate limiting and cost budget for metered model calls.
//!
//! The orchestrator consults the gate once per model invocation and obeys
//! the answer: proceed, wait the indicated duration and ask again, or deny
//! (budget exhausted) and record a stage failure.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::warn;

/// Answer from the gate for one prospective call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Wait(Duration),
    Deny,
}

/// Consulted before each metered backend call.
pub trait BudgetGate {
    fn before_call(&mut self, estimated_cost: f64) -> GateDecision;

    /// Whether a call of this cost would be denied outright. Unlike
    /// [`before_call`](Self::before_call) this consumes nothing, so callers
    /// can check before committing to work that precedes the call.
    fn would_deny(&self, estimated_cost: f64) -> bool {
        let _ = estimated_cost;
        false
    }
}

/// Gate that always proceeds. Used for dry runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnmeteredGate;

impl BudgetGate for UnmeteredGate {
    fn before_call(&mut self, _estimated_cost: f64) -> GateDecision {
        GateDecision::Proceed
    }
}

/// Sliding-window call limiter combined with a daily spend ceiling.
#[derive(Debug)]
pub struct RateBudget {
    max_calls: usize,
    period: Duration,
    calls: VecDeque<Instant>,
    daily_budget: f64,
    spent: f64,
    alert_threshold: f64,
    alerted: bool,
    throttled: u32,
}

impl RateBudget {
    pub fn new(max_calls: usize, period: Duration, daily_budget: f64) -> Self {
        Self {
            max_calls,
            period,
            calls: VecDeque::new(),
            daily_budget,
            spent: 0.0,
            alert_threshold: 0.8,
            alerted: false,
            throttled: 0,
        }
    }

    pub fn spent(&self) -> f64 {
        self.spent
    }

    pub fn remaining_budget(&self) -> f64 {
        (self.daily_budget - self.spent).max(0.0)
    }

    /// Times the gate answered `Wait` so far.
    pub fn throttled(&self) -> u32 {
        self.throttled
    }

    fn decide_at(&mut self, now: Instant, estimated_cost: f64) -> GateDecision {
        if self.spent + estimated_cost > self.daily_budget {
            warn!(
                spent = self.spent,
                budget = self.daily_budget,
                "daily model budget exhausted, denying call"
            );
            return GateDecision::Deny;
        }

        while let Some(&oldest) = self.calls.front() {
            if now.duration_since(oldest) >= self.period {
                self.calls.pop_front();
            } else {
                break;
            }
        }

        if self.calls.len() >= self.max_calls {
            // With a zero call limit the window is empty; wait a full period
            // rather than panicking on the missing front entry.
            let wait = match self.calls.front() {
                Some(&oldest) => self.period - now.duration_since(oldest),
                None => self.period,
            };
            self.throttled += 1;
            return GateDecision::Wait(wait);
        }

        self.calls.push_back(now);
        self.spent += estimated_cost;
        if !self.alerted && self.spent >= self.daily_budget * self.alert_threshold {
            self.alerted = true;
            warn!(
                spent = self.spent,
                budget = self.daily_budget,
                "model spend passed {}% of the daily budget",
                (self.alert_threshold * 100.0) as u32
            );
        }
        GateDecision::Proceed
    }
}

impl BudgetGate for RateBudget {
    fn before_call(&mut self, estimated_cost: f64) -> GateDecision {
        self.decide_at(Instant::now(), estimated_cost)
    }

    fn would_deny(&self, estimated_cost: f64) -> bool {
        self.spent + estimated_cost > self.daily_budget
    }
}
