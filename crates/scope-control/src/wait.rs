//! Busy-flag polling with optional wall-clock budgets.

use scope_core::capabilities::StageDriver;
use scope_core::error::{ScopeError, ScopeResult};
use tokio::time::{sleep, Duration, Instant};

/// Absolute deadline shared by every wait of one multi-step operation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    operation: &'static str,
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn start(operation: &'static str, budget: Duration) -> Self {
        Self {
            operation,
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn expired(&self) -> bool {
        self.elapsed() > self.budget
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn timeout_error(&self) -> ScopeError {
        ScopeError::HardwareTimeout {
            operation: self.operation.to_string(),
            elapsed: self.elapsed(),
        }
    }
}

/// Poll `is_busy` every `poll` until the device reports idle.
///
/// Without a deadline this waits indefinitely.
pub async fn wait_till_idle(
    stage: &dyn StageDriver,
    poll: Duration,
    deadline: Option<&Deadline>,
) -> ScopeResult<()> {
    loop {
        if !stage.is_busy().await? {
            return Ok(());
        }
        if let Some(deadline) = deadline {
            if deadline.expired() {
                tracing::error!(
                    operation = deadline.operation(),
                    elapsed = ?deadline.elapsed(),
                    "Device still busy past deadline"
                );
                return Err(deadline.timeout_error());
            }
        }
        sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scope_driver_mock::MockMicrocontroller;

    #[tokio::test(start_paused = true)]
    async fn returns_once_idle() {
        let mcu = MockMicrocontroller::builder().busy_polls(3).build();
        mcu.move_usteps(scope_core::types::Axis::X, 10).await.unwrap();
        wait_till_idle(&mcu, Duration::from_millis(5), None)
            .await
            .unwrap();
        assert!(!mcu.is_busy().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_device_hits_deadline() {
        let mcu = MockMicrocontroller::new();
        mcu.stall();
        let deadline = Deadline::start("test move", Duration::from_secs(1));
        let err = wait_till_idle(&mcu, Duration::from_millis(5), Some(&deadline))
            .await
            .unwrap_err();
        match err {
            ScopeError::HardwareTimeout { operation, elapsed } => {
                assert_eq!(operation, "test move");
                assert!(elapsed >= Duration::from_secs(1));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
