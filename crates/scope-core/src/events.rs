//! Broadcast notifications for display and logging consumers.
//!
//! Events are fire-and-forget: publishing never blocks and succeeds with no
//! subscribers. Control hand-offs between controllers are direct async calls,
//! never events.

use crate::data::Frame;
use crate::types::{Position, SlidePosition, TriggerMode};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity of the event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum ScopeEvent {
    PositionUpdated(Position),
    /// Joystick button pressed while the button action is enabled.
    ExternalInputActivated,
    /// Processed frame ready for display.
    ImageToDisplay(Arc<Frame>),
    LiveStarted(TriggerMode),
    LiveStopped,
    FpsMeasured(f64),
    FocusScore {
        step: usize,
        score: f64,
    },
    AutofocusFinished {
        best_index: usize,
        at_range_edge: bool,
    },
    LaserAfDisplacement(f64),
    SlidePositionChanged(SlidePosition),
    AcquisitionProgress {
        time_point: u32,
        region: String,
        i: u32,
        j: u32,
        k: u32,
    },
    AcquisitionFinished {
        aborted: bool,
    },
}

/// Cloneable publisher for [`ScopeEvent`]s.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ScopeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScopeEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ScopeEvent) {
        // No subscribers is not an error for notifications.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(ScopeEvent::LiveStopped);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(ScopeEvent::LaserAfDisplacement(1.5));
        match rx.recv().await.unwrap() {
            ScopeEvent::LaserAfDisplacement(um) => assert_eq!(um, 1.5),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
