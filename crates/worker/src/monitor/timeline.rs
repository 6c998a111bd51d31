use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{BatchSink, LONG_TASK, LongTaskFacility, LongTaskSample, Subscription};
use crate::TaskClass;
use crate::config::MonitorConfig;

#[derive(Default)]
struct TimelineInner {
	buffer: Mutex<Vec<LongTaskSample>>,
	sinks: Mutex<Vec<(u64, BatchSink)>>,
	next_sink: AtomicU64,
}

/// In-process long-task observation facility.
///
/// The primary loop reports how long each unit of work took through
/// [`Self::record`] or [`Self::measure`]; work that overran the threshold is
/// buffered and handed to subscribers as one batch per [`Self::flush`].
#[derive(Clone)]
pub struct TaskTimeline {
	threshold: Duration,
	inner: Arc<TimelineInner>,
}

impl TaskTimeline {
	pub fn new(threshold: Duration) -> Self {
		Self {
			threshold,
			inner: Arc::default(),
		}
	}

	pub fn from_config(config: &MonitorConfig) -> Self {
		Self::new(config.threshold())
	}

	pub fn threshold(&self) -> Duration {
		self.threshold
	}

	/// Buffers a sample if `duration` exceeds the threshold. Returns whether it did.
	pub fn record(&self, start: Instant, duration: Duration) -> bool {
		if duration <= self.threshold {
			return false;
		}
		self.inner.buffer.lock().push(LongTaskSample::new(start, duration));
		true
	}

	/// Runs `work` on the calling thread and records how long it took.
	pub fn measure<R>(&self, work: impl FnOnce() -> R) -> R {
		let start = Instant::now();
		let out = work();
		self.record(start, start.elapsed());
		out
	}

	/// Samples buffered since the last flush.
	pub fn buffered(&self) -> usize {
		self.inner.buffer.lock().len()
	}

	/// Delivers buffered samples to every subscriber as one batch.
	///
	/// Returns the batch size; nothing is delivered when the buffer is empty.
	pub fn flush(&self) -> usize {
		let batch = std::mem::take(&mut *self.inner.buffer.lock());
		if batch.is_empty() {
			return 0;
		}
		let sinks: Vec<BatchSink> = self.inner.sinks.lock().iter().map(|(_, sink)| Arc::clone(sink)).collect();
		for sink in &sinks {
			sink(&batch);
		}
		tracing::trace!(samples = batch.len(), subscribers = sinks.len(), "monitor.timeline.flush");
		batch.len()
	}

	/// Flushes on every `interval` tick until `cancel` fires.
	pub fn spawn_flush_loop(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
		let timeline = self.clone();
		crate::spawn(TaskClass::MonitorFlush, async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					biased;
					_ = cancel.cancelled() => break,
					_ = ticker.tick() => {
						timeline.flush();
					}
				}
			}
			tracing::debug!("monitor.timeline.flush_loop.stopped");
		})
	}
}

impl LongTaskFacility for TaskTimeline {
	fn supported_entry_types(&self) -> &[&'static str] {
		&[LONG_TASK]
	}

	fn subscribe(&self, entry_type: &str, sink: BatchSink) -> Subscription {
		if entry_type != LONG_TASK {
			return Subscription::detached();
		}
		let id = self.inner.next_sink.fetch_add(1, Ordering::Relaxed);
		self.inner.sinks.lock().push((id, sink));

		let inner = Arc::downgrade(&self.inner);
		Subscription::new(move || {
			if let Some(inner) = inner.upgrade() {
				inner.sinks.lock().retain(|(sink_id, _)| *sink_id != id);
			}
		})
	}
}

impl std::fmt::Debug for TaskTimeline {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TaskTimeline")
			.field("threshold", &self.threshold)
			.field("buffered", &self.buffered())
			.finish_non_exhaustive()
	}
}
