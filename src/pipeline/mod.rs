//! Per-item fetch → parse → store pipeline over bounded queues.

pub mod context;
pub mod coordinator;
pub mod queue;
pub mod workers;

pub use crate::engine::signal::StopSignal;
pub use context::{PipelineConfig, PipelineContext, PipelineStats, StageCounts};
pub use coordinator::{CoordinatorState, PipelineCoordinator};
pub use queue::WorkQueue;
