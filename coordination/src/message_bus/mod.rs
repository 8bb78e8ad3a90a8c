//! Agent message bus: durable, per-agent inboxes plus a run-scoped history
//! index. See [`bus::MessageBus`] for the backend-agnostic contract and
//! [`bus::FileMessageBus`] for the reference file-backed implementation.

mod bus;
mod types;

pub use bus::{BusError, BusResult, FileMessageBus, MessageBus};
pub use types::{AgentMessage, BusBackendKind, MessageId, MessagePayload};
