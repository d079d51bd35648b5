//! Transactional outbox.
//!
//! Domain events are written to the store in the same unit of work as the
//! business state change they describe ([`Outbox::record`]). A background
//! [`OutboxPublisher`] forwards unprocessed records to an [`EventBroker`] and
//! marks them processed only after the broker acknowledges, which makes
//! delivery at-least-once. Consumers deduplicate with an [`Inbox`].

pub mod broker;
pub mod error;
pub mod inbox;
pub mod outbox;
pub mod publisher;
pub mod record;

pub use broker::{Ack, BrokerMessage, EventBroker, EventHandler, InMemoryBroker};
pub use error::{BrokerError, HandlerError, OutboxError, Result};
pub use inbox::{IdempotentHandler, Inbox, InboxOutcome};
pub use outbox::Outbox;
pub use publisher::{FlushReport, OutboxPublisher, PublisherConfig, PublisherHandle};
pub use record::OutboxRecord;
