//! Events produced while a chat turn runs

use docchat_common::models::{
    Message, MessageSubProcess, SubProcessMetadata, SubProcessSource, SubProcessStatus,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// One observable step of a chat turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TurnEvent {
    /// An intermediate record such as an answered sub-question
    SubProcess(MessageSubProcess),
    /// A fragment of the answer text
    Delta(String),
    /// The final state of the assistant message
    Completed(Message),
}

impl TurnEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            TurnEvent::SubProcess(_) => "sub_process",
            TurnEvent::Delta(_) => "delta",
            TurnEvent::Completed(_) => "completed",
        }
    }
}

/// Sending half handed to chat engines.
///
/// Emitting never fails: once the receiver is gone events are discarded.
#[derive(Clone)]
pub struct EventSink {
    message_id: Uuid,
    tx: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl EventSink {
    pub fn new(message_id: Uuid, tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        Self {
            message_id,
            tx: Some(tx),
        }
    }

    /// Sink that drops everything
    pub fn disabled() -> Self {
        Self {
            message_id: Uuid::nil(),
            tx: None,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!(message_id = %self.message_id, "Event receiver closed, dropping event");
            }
        }
    }

    pub fn delta(&self, fragment: impl Into<String>) {
        self.emit(TurnEvent::Delta(fragment.into()));
    }

    /// Emit a finished sub-process attached to this sink's message
    pub fn sub_process(&self, source: SubProcessSource, metadata: SubProcessMetadata) {
        self.emit(TurnEvent::SubProcess(MessageSubProcess::new(
            self.message_id,
            source,
            SubProcessStatus::Finished,
            Some(metadata),
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sub_process_is_bound_to_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let message_id = Uuid::new_v4();
        let sink = EventSink::new(message_id, tx);

        sink.sub_process(
            SubProcessSource::FunctionCall,
            SubProcessMetadata::with_function_output("done"),
        );
        sink.delta("Hello");

        match rx.recv().await.unwrap() {
            TurnEvent::SubProcess(sp) => {
                assert_eq!(sp.message_id, message_id);
                assert_eq!(sp.status, SubProcessStatus::Finished);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(rx.recv().await.unwrap(), TurnEvent::Delta("Hello".into()));
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = EventSink::new(Uuid::new_v4(), tx);
        sink.delta("lost");
        EventSink::disabled().delta("also lost");
    }

    #[test]
    fn test_event_wire_shape() {
        let value = serde_json::to_value(TurnEvent::Delta("Hi".into())).unwrap();
        assert_eq!(value["type"], "delta");
        assert_eq!(value["data"], "Hi");
    }
}
