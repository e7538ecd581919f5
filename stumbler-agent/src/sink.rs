//! Report sinks: where finished reports are handed over.
//!
//! The assembler calls `persist` once per report, in order, and never
//! retries. What happens to a report after that is the sink's business.

use stumbler_core::ReportData;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use crate::error::AgentError;

#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    async fn persist(&self, report: ReportData) -> Result<(), AgentError>;
}

/// Forwards reports into an mpsc channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ReportData>,
}

impl ChannelSink {
    /// A sink plus the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ReportData>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ChannelSink { tx }, rx)
    }
}

#[async_trait::async_trait]
impl ReportSink for ChannelSink {
    async fn persist(&self, report: ReportData) -> Result<(), AgentError> {
        self.tx
            .send(report)
            .await
            .map_err(|_| AgentError::SinkClosed)
    }
}

/// Writes one JSON object per line to any async writer.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send> ReportSink for JsonLinesSink<W> {
    async fn persist(&self, report: ReportData) -> Result<(), AgentError> {
        let mut line = serde_json::to_vec(&report)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}
