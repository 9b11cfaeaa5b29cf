//! sm_notify
//! Collect what a monitoring run found into one batch report, render it, and
//! deliver it. Rendering never depends on the sink used for delivery.

mod report;
mod sink;

pub use report::{AuditMismatch, BatchReport, Message, ProtocolChange, Severity};
pub use sink::{ConsoleSink, EmailSink, Sink, SinkKind};
