//! Primary-thread stall monitoring.
//!
//! [`TaskMonitor`] subscribes to a host's long-task observation facility and
//! keeps [`BlockingTime`]: the summed duration of the most recent batch of
//! long tasks. Each batch replaces the stored value; it is not a running total
//! across batches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::error::MonitorError;

mod timeline;

pub use timeline::TaskTimeline;

/// Entry type name for long-running primary-thread tasks.
pub const LONG_TASK: &str = "longtask";

/// One primary-thread task that exceeded the host's blocking threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongTaskSample {
	pub start: Instant,
	pub duration: Duration,
}

impl LongTaskSample {
	pub fn new(start: Instant, duration: Duration) -> Self {
		Self { start, duration }
	}
}

/// Callback receiving one ordered, non-empty batch of samples.
pub type BatchSink = Arc<dyn Fn(&[LongTaskSample]) + Send + Sync>;

/// Subscription-style long-task observation API of a host.
pub trait LongTaskFacility: Send + Sync {
	/// Entry types this host can observe.
	fn supported_entry_types(&self) -> &[&'static str];

	/// Registers `sink` for batches of `entry_type` entries.
	fn subscribe(&self, entry_type: &str, sink: BatchSink) -> Subscription;
}

/// Registration with a [`LongTaskFacility`]; unsubscribes when dropped.
pub struct Subscription {
	detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
	pub fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
		Self {
			detach: Some(Box::new(detach)),
		}
	}

	/// A subscription with nothing to undo.
	pub fn detached() -> Self {
		Self { detach: None }
	}

	pub fn disconnect(mut self) {
		self.run_detach();
	}

	fn run_detach(&mut self) {
		if let Some(detach) = self.detach.take() {
			detach();
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.run_detach();
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription").field("attached", &self.detach.is_some()).finish()
	}
}

static GLOBAL_BLOCKING_TIME: OnceLock<Arc<BlockingTime>> = OnceLock::new();

/// Blocking time of the most recent long-task batch.
///
/// Single writer (the monitor's batch handler), any number of readers.
#[derive(Debug, Default)]
pub struct BlockingTime {
	nanos: AtomicU64,
}

impl BlockingTime {
	pub fn new() -> Self {
		Self::default()
	}

	/// The process-wide counter, created on first use.
	pub fn global() -> &'static Arc<BlockingTime> {
		GLOBAL_BLOCKING_TIME.get_or_init(|| Arc::new(BlockingTime::new()))
	}

	pub fn get(&self) -> Duration {
		Duration::from_nanos(self.nanos.load(Ordering::Acquire))
	}

	fn replace(&self, total: Duration) {
		let nanos = u64::try_from(total.as_nanos()).unwrap_or(u64::MAX);
		self.nanos.store(nanos, Ordering::Release);
	}
}

/// Reads the process-wide blocking time. Zero until a monitor has seen a batch.
pub fn accumulated_time() -> Duration {
	GLOBAL_BLOCKING_TIME.get().map_or(Duration::ZERO, |counter| counter.get())
}

/// Tracks how long the primary thread spent in long tasks.
#[derive(Debug, Clone)]
pub struct TaskMonitor {
	counter: Arc<BlockingTime>,
}

impl Default for TaskMonitor {
	fn default() -> Self {
		Self::new()
	}
}

impl TaskMonitor {
	/// Monitor writing to the process-wide counter.
	pub fn new() -> Self {
		Self::with_counter(Arc::clone(BlockingTime::global()))
	}

	/// Monitor writing to a caller-owned counter.
	pub fn with_counter(counter: Arc<BlockingTime>) -> Self {
		Self { counter }
	}

	/// Subscribes to long-task batches from `facility`.
	///
	/// Fails fast when the facility cannot observe long tasks. Dropping the
	/// returned handle stops observation; the last value stays readable.
	pub fn start(&self, facility: &dyn LongTaskFacility) -> Result<ObservationHandle, MonitorError> {
		if !facility.supported_entry_types().contains(&LONG_TASK) {
			tracing::debug!(supported = ?facility.supported_entry_types(), "monitor.unsupported");
			return Err(MonitorError::UnsupportedEnvironment {
				entry_type: LONG_TASK.to_string(),
			});
		}

		let counter = Arc::clone(&self.counter);
		let sink: BatchSink = Arc::new(move |batch: &[LongTaskSample]| record_batch(&counter, batch));
		let subscription = facility.subscribe(LONG_TASK, sink);
		tracing::debug!("monitor.start");
		Ok(ObservationHandle {
			subscription,
			counter: Arc::clone(&self.counter),
		})
	}

	pub fn accumulated_time(&self) -> Duration {
		self.counter.get()
	}
}

fn record_batch(counter: &BlockingTime, batch: &[LongTaskSample]) {
	if batch.is_empty() {
		return;
	}
	let total: Duration = batch.iter().map(|sample| sample.duration).sum();
	counter.replace(total);
	tracing::trace!(samples = batch.len(), total_ms = total.as_secs_f64() * 1000.0, "monitor.batch");
}

/// Disposable observation returned by [`TaskMonitor::start`].
#[derive(Debug)]
pub struct ObservationHandle {
	subscription: Subscription,
	counter: Arc<BlockingTime>,
}

impl ObservationHandle {
	pub fn accumulated_time(&self) -> Duration {
		self.counter.get()
	}

	/// Stops observation.
	pub fn disconnect(self) {
		self.subscription.disconnect();
	}
}
