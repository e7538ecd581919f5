//! stumbler-agent: async runtime around `stumbler-core`.
//!
//! Hosts the concurrent report assembler, the source and sink seams it talks
//! to, and the pieces behind the `stumbler` binary (offline decoding and log
//! replay).

pub mod assembler;
pub mod error;
pub mod inspect;
pub mod replay;
pub mod sink;
pub mod source;

pub use assembler::ReportAssembler;
pub use error::AgentError;
pub use sink::{ChannelSink, JsonLinesSink, ReportSink};
pub use source::{BroadcastSources, ObservationSources};
