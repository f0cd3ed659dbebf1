//! Queue dispatch: tasks handed off to a pool of worker threads.

pub mod pool;
pub mod task;

pub use pool::{PoolConfig, TaskHandler, WorkerPool};
pub use task::{Dispatcher, DownloadTask, TaskOutcome, TaskReport};
