//! Iteration budget shared by both controller variants.

/// Counts planning iterations against a hard limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationBudget {
    max_iterations: u32,
    used: u32,
}

impl IterationBudget {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            used: 0,
        }
    }

    /// Claim one iteration. Returns `false` once the budget is spent.
    pub fn try_start(&mut self) -> bool {
        if self.used >= self.max_iterations {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.max_iterations - self.used
    }
}
