//! Ingestors: the three shapes an `AuditSource` can take, each producing a
//! stream of canonical `AuditEvent`s on a bounded channel.

pub mod cloud;
pub mod file;
pub mod webhook;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::IngestError;
use crate::model::checkpoint::Checkpoint;
use crate::model::event::AuditEvent;

/// Bound on the ingestor-to-pipeline channel. An ingestor that fills this
/// applies backpressure at its own read loop rather than buffering
/// unboundedly in memory.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A running source of audit events. Each concrete ingestor owns its own
/// read loop and resume state; the pipeline only needs the channel and an
/// up-to-date checkpoint to persist on flush.
///
/// `async_trait` is used here, and nowhere else in this crate, because this
/// is the one place three structurally different ingestors (file tailer,
/// HTTPS server, cloud-bus subscriber) are driven through a single
/// supervisor loop as trait objects; every other async boundary in this
/// crate is a concrete function.
#[async_trait]
pub trait Ingestor: Send {
    /// Start producing events, returning the receiving half of the channel
    /// they arrive on. The ingestor runs its read loop on its own spawned
    /// task(s) and stops when `cancel` fires or the source ends.
    async fn start(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<AuditEvent>, IngestError>;

    /// A snapshot of resume state as of the last successfully processed
    /// event. Called by the pipeline at each checkpoint flush interval.
    fn checkpoint(&self) -> Checkpoint;
}
