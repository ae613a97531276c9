//! Message protocol between the host and the execution unit.
//!
//! Messages travel over [`MessagePort`]s as [`Envelope`]s: a JSON object carrying a numeric
//! `type` tag plus scalar fields, and an attachment list for objects that are moved or shared
//! rather than serialized (buffers, ports, the shared heap, compiled modules). Fields that refer
//! to an attachment hold its index in the list.
//!
//! Envelopes are decoded exactly once at the port boundary into [`CoreMessage`] (unit → host)
//! or [`HostMessage`] (host → unit). The clock unit only receives [`ClockMessage`].

mod envelope;
mod error;
mod message;
mod port;
mod tags;

pub use envelope::{Attachment, CompiledModule, Envelope};
pub use error::{DecodeError, PortClosed};
pub use message::{
    ClockMessage, CompileReply, ContextInfo, CoreMessage, DbgState, DisasMode, DiskType,
    HostMessage, IoRequest,
};
pub use port::{channel, MessagePort, PortReceiver, PortSender};
pub use tags::Tag;
