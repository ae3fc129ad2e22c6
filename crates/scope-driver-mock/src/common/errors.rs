//! Failure injection for simulated devices.
//!
//! Each simulated command calls [`ErrorConfig::check_operation`] with its
//! operation name (`"move"`, `"home"`, `"read_frame"`, ...) before acting.

use super::rng::MockRng;
use parking_lot::Mutex;
use scope_core::error::{DriverError, DriverErrorKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Failure configuration shared by clones of one device.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Probability that any operation fails at random.
    failure_rate: f64,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Let `count` calls of `operation` succeed, fail every later one.
    FailAfterN {
        operation: &'static str,
        count: u32,
    },
    /// Every call of `operation` reports a timeout.
    Timeout { operation: &'static str },
    /// The first checked call loses the link; all later calls fail.
    CommunicationLoss,
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    communication_lost: bool,
}

impl ErrorScenario {
    /// The failure this scenario injects into `operation`, if any.
    fn trip(
        &self,
        operation: &'static str,
        state: &mut ErrorState,
    ) -> Option<(DriverErrorKind, String)> {
        match *self {
            Self::FailAfterN { operation: op, count } if op == operation => {
                let seen = state.operation_counts.entry(operation).or_insert(0);
                *seen += 1;
                (*seen > count).then(|| {
                    (
                        DriverErrorKind::Hardware,
                        format!("{operation} refused after {count} calls"),
                    )
                })
            }
            Self::Timeout { operation: op } if op == operation => Some((
                DriverErrorKind::Timeout,
                format!("no acknowledgement for {operation}"),
            )),
            Self::CommunicationLoss => {
                state.communication_lost = true;
                Some((DriverErrorKind::Communication, "link down".to_string()))
            }
            _ => None,
        }
    }
}

impl ErrorConfig {
    /// No injected failures.
    pub fn none() -> Self {
        Self::scenarios(Vec::new())
    }

    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            failure_rate: 0.0,
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(None)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Uniform random failures with a reproducible seed.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        Self {
            failure_rate: rate.clamp(0.0, 1.0),
            scenarios: Arc::new(Vec::new()),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Decide whether `operation` fails now.
    pub fn check_operation(
        &self,
        driver_type: &str,
        operation: &'static str,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        let injected = if state.communication_lost {
            Some((DriverErrorKind::Communication, "link down".to_string()))
        } else {
            self.scenarios
                .iter()
                .find_map(|scenario| scenario.trip(operation, &mut state))
        };
        let injected = injected.or_else(|| {
            self.rng
                .should_fail(self.failure_rate)
                .then(|| (DriverErrorKind::Hardware, format!("random fault during {operation}")))
        });
        match injected {
            Some((kind, message)) => Err(DriverError::new(driver_type, kind, message)),
            None => Ok(()),
        }
    }

    /// Clear counters and restore communication.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_fails() {
        let config = ErrorConfig::none();
        assert!((0..100).all(|_| config.check_operation("mock", "move").is_ok()));
    }

    #[test]
    fn fail_after_n_counts_per_operation() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "read_frame",
            count: 2,
        });
        assert!(config.check_operation("mock", "read_frame").is_ok());
        assert!(config.check_operation("mock", "move").is_ok());
        assert!(config.check_operation("mock", "read_frame").is_ok());
        assert!(config.check_operation("mock", "read_frame").is_err());

        config.reset();
        assert!(config.check_operation("mock", "read_frame").is_ok());
    }

    #[test]
    fn timeout_scenario_reports_timeout_kind() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout { operation: "home" });
        let err = config.check_operation("mock", "home").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
        assert!(config.check_operation("mock", "move").is_ok());
    }

    #[test]
    fn communication_loss_is_sticky() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss);
        assert!(config.check_operation("mock", "move").is_err());
        let err = config.check_operation("mock", "read_frame").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Communication);
    }

    #[test]
    fn random_failures_are_roughly_proportional() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("mock", "move").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "got {failures}");
    }
}
