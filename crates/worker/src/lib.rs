//! Background offload pipeline for overlay rendering work.
//!
//! * [`monitor`]: measures how long the primary thread was blocked by long tasks
//! * [`executor`]: one async call contract with inline and background variants
//! * [`factory`]: spawns background contexts from in-memory script bodies
//! * [`protocol`]: request/reply messages exchanged with a context
//! * [`host`]: the context-spawning seam a host environment implements

pub mod class;
pub mod config;
pub mod error;
pub mod executor;
pub mod factory;
pub mod host;
pub mod monitor;
pub mod protocol;
mod spawn;

pub use class::TaskClass;
pub use config::{ConfigError, MonitorConfig, OffloadConfig, WorkerConfig};
pub use error::{ExecutorError, MonitorError, Result, SpawnError};
pub use executor::{BackgroundExecutor, CallOptions, InlineFallbackExecutor, WorkerBackedExecutor, select_executor};
pub use factory::{HandleState, InlineWorkerFactory, WorkerHandle};
pub use host::{ContextChannel, ContextHost, ResourceTable, ScriptResource};
pub use monitor::{BlockingTime, LongTaskFacility, LongTaskSample, ObservationHandle, TaskMonitor, TaskTimeline, accumulated_time};
pub use protocol::{Inbound, Reply, RequestId, Transferable, WorkerMessage};
pub use spawn::{spawn, spawn_named_thread};
