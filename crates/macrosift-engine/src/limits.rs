use std::time::{Duration, Instant};

use log::error;

use crate::cache::ConstCache;
use crate::error::EngineError;

/// Resource budgets for one analysis run.
///
/// Adversarial macros recurse without bound, loop forever, or both; these
/// limits are the engine's only defense. The defaults mirror the behavior
/// observed in real droppers: deep enough for legitimate obfuscation layers,
/// bounded enough to terminate.
#[derive(Clone, Debug)]
pub struct EmulationPolicy {
    /// Maximum nominal evaluation depth. The guard trips at 50% of this
    /// value so there is always headroom left to unwind and report.
    pub max_depth: usize,
    /// Optional wall-clock budget for the whole run. `None` means unlimited.
    pub time_budget: Option<Duration>,
    /// Upper bound on iterations of a single emulated loop.
    pub max_loop_iterations: u64,
}

impl Default for EmulationPolicy {
    fn default() -> Self {
        Self {
            max_depth: 1024,
            time_budget: None,
            max_loop_iterations: 10_000_000,
        }
    }
}

impl EmulationPolicy {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    pub fn with_max_loop_iterations(mut self, iterations: u64) -> Self {
        self.max_loop_iterations = iterations;
        self
    }
}

/// Mutable per-run state threaded through evaluation: the recursion/time
/// guard, the constant-expression cache, and JIT bookkeeping counters.
///
/// Scoped to a single analysis run so repeated runs never cross-contaminate.
pub struct RunState {
    pub policy: EmulationPolicy,
    pub cache: ConstCache,
    deadline: Option<Instant>,
    depth: usize,
    /// Number of loops offered to the JIT and number it fully handled.
    /// Exposed so hosts (and tests) can verify which path ran a loop.
    pub jit_attempts: u64,
    pub jit_handled: u64,
}

impl RunState {
    pub fn new(policy: EmulationPolicy) -> Self {
        let deadline = policy.time_budget.map(|budget| Instant::now() + budget);
        Self {
            policy,
            cache: ConstCache::default(),
            deadline,
            depth: 0,
            jit_attempts: 0,
            jit_handled: 0,
        }
    }

    /// Check the recursion and wall-clock budgets. With `throw` set, a
    /// tripped limit raises the fatal abort; otherwise the caller gets the
    /// boolean and decides (loops use this to short-circuit gracefully).
    pub fn check_limits(&self, throw: bool) -> Result<bool, EngineError> {
        let recursion_exceeded = self.depth > self.policy.max_depth / 2;
        let time_exceeded = match self.deadline {
            Some(deadline) => Instant::now() > deadline,
            None => false,
        };

        if recursion_exceeded {
            error!("call recursion depth approaching limit");
            if throw {
                return Err(EngineError::RecursionLimit);
            }
        }
        if time_exceeded {
            error!("emulation time exceeded");
            if throw {
                return Err(EngineError::Timeout);
            }
        }
        Ok(recursion_exceeded || time_exceeded)
    }

    /// Enter one evaluation/traversal level, tripping the guard if needed.
    /// Every `enter` must be paired with a `leave` on the way out.
    pub fn enter(&mut self) -> Result<(), EngineError> {
        self.depth += 1;
        self.check_limits(true)?;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_trips_at_half_configured_depth() {
        let mut st = RunState::new(EmulationPolicy::default().with_max_depth(10));
        for _ in 0..5 {
            st.enter().unwrap();
        }
        // Depth 6 exceeds 50% of 10.
        let err = st.enter().unwrap_err();
        assert!(matches!(err, EngineError::RecursionLimit));
        assert!(err.is_fatal());
    }

    #[test]
    fn expired_budget_is_fatal_only_when_thrown() {
        let st = RunState::new(EmulationPolicy::default().with_time_budget(Duration::ZERO));
        assert!(st.check_limits(false).unwrap());
        assert!(matches!(st.check_limits(true), Err(EngineError::Timeout)));
    }
}
