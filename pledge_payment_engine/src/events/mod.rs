//! Event contracts and the broker seam.
//!
//! Everything that leaves the write path travels as an outbox row first; this module defines the typed payloads that
//! go into those rows, the wire message the relay hands to the broker, and the [`EventPublisher`] seam behind which
//! the broker lives. The in-process broker here is a broadcast-channel fan-out; a deployment with an external broker
//! implements [`EventPublisher`] against it and the rest of the system is unchanged.
mod broker;
mod payloads;

pub use broker::{BrokerError, BrokerMessage, EventPublisher, InMemoryBroker, MalformedEventError};
pub use payloads::{OutboxEventType, PaymentCapturedPayload, PledgeCreatedPayload, UnknownEventType};
