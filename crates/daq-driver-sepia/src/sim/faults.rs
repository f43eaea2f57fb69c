//! Fault injection for the simulated transport.

use std::collections::HashMap;

use crate::transport::StatusCode;

/// A failure the simulator should produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultScenario {
    /// Every call of `operation` fails with `code`.
    FailOn {
        /// Transport method name.
        operation: &'static str,
        /// Status returned on failure.
        code: StatusCode,
    },
    /// The first `count` calls of `operation` succeed, later ones fail.
    FailAfterN {
        /// Transport method name.
        operation: &'static str,
        /// Calls that still succeed.
        count: u32,
        /// Status returned on failure.
        code: StatusCode,
    },
    /// Every call on any device fails with `code` once triggered.
    CommunicationLoss { code: StatusCode },
}

/// Scenario list plus per-operation counters.
#[derive(Debug, Default)]
pub(crate) struct FaultState {
    scenarios: Vec<FaultScenario>,
    counts: HashMap<&'static str, u32>,
    decode_failures: HashMap<i32, StatusCode>,
}

impl FaultState {
    pub(crate) fn add(&mut self, scenario: FaultScenario) {
        self.scenarios.push(scenario);
    }

    pub(crate) fn fail_decode_of(&mut self, code: StatusCode, failure: StatusCode) {
        self.decode_failures.insert(code.0, failure);
    }

    pub(crate) fn decode_failure(&self, code: StatusCode) -> Option<StatusCode> {
        self.decode_failures.get(&code.0).copied()
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    /// Decide whether `operation` fails now.
    pub(crate) fn check(&mut self, operation: &'static str) -> Result<(), StatusCode> {
        let seen = {
            let count = self.counts.entry(operation).or_insert(0);
            *count += 1;
            *count
        };
        for scenario in &self.scenarios {
            match scenario {
                FaultScenario::CommunicationLoss { code } => return Err(*code),
                FaultScenario::FailOn { operation: op, code } if *op == operation => {
                    return Err(*code)
                }
                FaultScenario::FailAfterN {
                    operation: op,
                    count,
                    code,
                } if *op == operation && seen > *count => return Err(*code),
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_after_n() {
        let mut faults = FaultState::default();
        faults.add(FaultScenario::FailAfterN {
            operation: "read",
            count: 2,
            code: StatusCode(-1),
        });
        assert!(faults.check("read").is_ok());
        assert!(faults.check("other").is_ok());
        assert!(faults.check("read").is_ok());
        assert_eq!(faults.check("read"), Err(StatusCode(-1)));
    }

    #[test]
    fn test_clear() {
        let mut faults = FaultState::default();
        faults.add(FaultScenario::CommunicationLoss { code: StatusCode(-9) });
        assert!(faults.check("anything").is_err());
        faults.clear();
        assert!(faults.check("anything").is_ok());
    }
}
