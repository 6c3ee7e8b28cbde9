use crit_core::TokenUsage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::pricing::PricingRate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

/// Running token and cost totals of one run, shared by every in-flight comparison.
#[derive(Debug)]
pub struct UsageAccumulator {
    rate: PricingRate,
    totals: Mutex<UsageTotals>,
}

impl UsageAccumulator {
    pub fn new(rate: PricingRate) -> Self {
        Self {
            rate,
            totals: Mutex::new(UsageTotals::default()),
        }
    }

    /// Adds one successful call and returns the totals including it.
    pub fn record(&self, usage: TokenUsage) -> UsageTotals {
        let mut totals = self.totals.lock();
        totals.calls += 1;
        totals.input_tokens += usage.input_tokens;
        totals.output_tokens += usage.output_tokens;
        totals.cost += self.rate.cost(usage);
        *totals
    }

    pub fn snapshot(&self) -> UsageTotals {
        *self.totals.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_records_are_not_lost() {
        let rate = PricingRate {
            prompt_per_1k: 1.0,
            completion_per_1k: 3.0,
        };
        let usage = Arc::new(UsageAccumulator::new(rate));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let usage = Arc::clone(&usage);
                thread::spawn(move || {
                    for _ in 0..250 {
                        usage.record(TokenUsage {
                            input_tokens: 10,
                            output_tokens: 2,
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let totals = usage.snapshot();
        assert_eq!(totals.calls, 2000);
        assert_eq!(totals.input_tokens, 20_000);
        assert_eq!(totals.output_tokens, 4_000);
        let expected = rate.cost(TokenUsage {
            input_tokens: 20_000,
            output_tokens: 4_000,
        });
        assert!((totals.cost - expected).abs() < 1e-6);
    }
}
