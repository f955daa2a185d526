use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use trading_core::{ClosedPosition, Position, Signal};

/// Lifecycle of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Stopped,
    Initializing,
    Running,
    Stopping,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Stopped => "stopped",
            EngineState::Initializing => "initializing",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
        }
    }
}

/// Everything the engine broadcasts to listeners.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged(EngineState),
    /// Ranked signal set of one cycle
    Signals {
        cycle: u64,
        signals: Vec<Signal>,
    },
    PositionOpened(Position),
    PositionClosed(ClosedPosition),
    OrderFailed {
        instrument: String,
        error: String,
    },
    TradingHalted {
        reason: String,
        at: DateTime<Utc>,
    },
    DailyReset(DateTime<Utc>),
}

/// Fan-out of engine events. Sending never blocks; receivers that fall
/// behind by more than the capacity see `RecvError::Lagged` and lose the
/// oldest events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of listeners that received the event.
    pub fn publish(&self, event: EngineEvent) -> usize {
        // No listeners is not an error
        self.tx.send(event).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
