//! Stream event protocol: type + payload + envelope.
//!
//! This crate defines the wire shape of a single agent stream event and envelope
//! injection. It does not depend on trellis. The runtime bridges its internal
//! events into [`AgentEvent`] and calls [`to_json`].

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::AgentEvent;
