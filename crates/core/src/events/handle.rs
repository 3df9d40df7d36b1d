use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::ConversionEvent;

/// Envelope wrapping an event with the time it was emitted
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: ConversionEvent,
}

/// Handle for emitting events.
///
/// Cheaply cloneable; events travel through a channel to the [`EventWriter`](super::EventWriter).
/// Emitting never fails the caller: a full or closed channel is only logged.
#[derive(Debug, Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<EventEnvelope>,
}

impl EventHandle {
    pub fn new(tx: mpsc::Sender<EventEnvelope>) -> Self {
        Self { tx }
    }

    fn envelope(event: ConversionEvent) -> EventEnvelope {
        EventEnvelope {
            timestamp: Utc::now(),
            event,
        }
    }

    /// Emit an event, waiting for channel capacity.
    pub async fn emit(&self, event: ConversionEvent) {
        if let Err(e) = self.tx.send(Self::envelope(event)).await {
            tracing::error!("Failed to emit event: {}", e);
        }
    }

    /// Emit without waiting. Returns false if the event was dropped.
    pub fn try_emit(&self, event: ConversionEvent) -> bool {
        match self.tx.try_send(Self::envelope(event)) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to emit event: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> ConversionEvent {
        ConversionEvent::RunStarted {
            version: "0.1.0".to_string(),
            inputs: 2,
            max_concurrency: 4,
        }
    }

    #[tokio::test]
    async fn test_emit_event() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = EventHandle::new(tx);

        let before = Utc::now();
        handle.emit(started()).await;

        let envelope = rx.recv().await.expect("Should receive event");
        assert!(matches!(envelope.event, ConversionEvent::RunStarted { .. }));
        assert!(envelope.timestamp >= before);
    }

    #[test]
    fn test_try_emit_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = EventHandle::new(tx);

        assert!(handle.try_emit(started()));
        assert!(!handle.try_emit(started()));
    }

    #[tokio::test]
    async fn test_emit_closed_channel() {
        let (tx, rx) = mpsc::channel::<EventEnvelope>(10);
        let handle = EventHandle::new(tx);
        drop(rx);

        // Logged, not propagated
        handle.emit(started()).await;
        assert!(!handle.try_emit(started()));
    }
}
