//! Streaming sinks for agent runs.
//!
//! The request [`Context`](crate::context::Context) carries an [`EventSink`];
//! the pipeline and orchestrator emit [`AgentEvent`]s through it. Sends are
//! non-blocking: a full channel drops the event rather than stalling the run.

use std::sync::Arc;

use serde_json::Value;
use stream_event::{AgentEvent, EnvelopeState};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Sink for stream events. `emit` returns true when the event was accepted.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent) -> bool;
}

/// Sink that drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: AgentEvent) -> bool {
        false
    }
}

/// Sink for forked calls: logs events instead of streaming them to a client,
/// so a peer-agent call keeps an independent record without sharing the root
/// request's channel.
pub struct LogSink {
    agent_id: String,
}

impl LogSink {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }
}

impl EventSink for LogSink {
    fn emit(&self, event: AgentEvent) -> bool {
        match event.to_value() {
            Ok(v) => tracing::debug!(agent_id = %self.agent_id, event = %v, "stream event"),
            Err(e) => tracing::warn!(agent_id = %self.agent_id, "unserializable event: {}", e),
        }
        true
    }
}

/// Channel-backed sink: stamps the envelope and forwards enveloped JSON
/// values over an mpsc channel with `try_send`.
pub struct ChannelSink {
    tx: mpsc::Sender<Value>,
    state: std::sync::Mutex<EnvelopeState>,
}

impl ChannelSink {
    pub fn new(request_id: impl Into<String>, tx: mpsc::Sender<Value>) -> Self {
        Self {
            tx,
            state: std::sync::Mutex::new(EnvelopeState::new(request_id.into())),
        }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: AgentEvent) -> bool {
        let value = {
            let mut state = self.state.lock().unwrap();
            match stream_event::to_json(&event, &mut state) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("unserializable event: {}", e);
                    return false;
                }
            }
        };
        self.tx.try_send(value).is_ok()
    }
}

/// Builds a channel sink plus the stream a transport layer can forward.
pub fn channel_sink(
    request_id: impl Into<String>,
    capacity: usize,
) -> (Arc<ChannelSink>, ReceiverStream<Value>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Arc::new(ChannelSink::new(request_id, tx)), ReceiverStream::new(rx))
}

/// Recording sink for tests: collects every event.
pub struct CollectSink {
    events: std::sync::Mutex<Vec<AgentEvent>>,
}

impl CollectSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectSink {
    fn emit(&self, event: AgentEvent) -> bool {
        self.events.lock().unwrap().push(event);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_stamps_increasing_event_ids() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = ChannelSink::new("req-1", tx);
        assert!(sink.emit(AgentEvent::MessageChunk {
            content: "a".into(),
            id: "m".into()
        }));
        assert!(sink.emit(AgentEvent::Done {
            request_id: "req-1".into()
        }));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first["request_id"], "req-1");
        assert_eq!(first["event_id"], 1);
        assert_eq!(second["event_id"], 2);
    }

    #[tokio::test]
    async fn channel_sink_drops_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = ChannelSink::new("req-1", tx);
        assert!(sink.emit(AgentEvent::Custom {
            value: serde_json::json!(1)
        }));
        // Channel capacity exhausted; try_send fails and the event is dropped.
        assert!(!sink.emit(AgentEvent::Custom {
            value: serde_json::json!(2)
        }));
    }

    #[tokio::test]
    async fn channel_sink_pairs_with_stream() {
        use tokio_stream::StreamExt;
        let (sink, mut stream) = channel_sink("req-2", 4);
        sink.emit(AgentEvent::Done {
            request_id: "req-2".into(),
        });
        drop(sink);
        let value = stream.next().await.unwrap();
        assert_eq!(value["type"], "done");
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn collect_sink_records_events() {
        let sink = CollectSink::new();
        sink.emit(AgentEvent::Error {
            message: "boom".into(),
        });
        assert_eq!(sink.events().len(), 1);
    }
}
