use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use super::{BackgroundExecutor, CallOptions};
use crate::TaskClass;
use crate::error::{ExecutorError, Result, SpawnError};
use crate::factory::{InlineWorkerFactory, WorkerHandle};
use crate::protocol::WorkerMessage;

type Spawned = std::result::Result<Arc<WorkerHandle>, SpawnError>;

/// One lazy context setup shared by every call that races on it.
///
/// The spawn runs as its own task, so a caller that gives up mid-setup does
/// not abort it and the next caller never starts a second one.
struct Setup {
	/// Taken by the call that starts the spawn task.
	starter: Mutex<Option<watch::Sender<Option<Spawned>>>>,
	outcome: watch::Receiver<Option<Spawned>>,
}

impl Setup {
	fn new() -> Self {
		let (starter, outcome) = watch::channel(None);
		Self {
			starter: Mutex::new(Some(starter)),
			outcome,
		}
	}

	fn finished(&self) -> Option<Spawned> {
		self.outcome.borrow().clone()
	}
}

/// Dispatches calls to an isolated background context.
///
/// The context is spawned from `script` by the first call. A failed spawn is
/// kept: that call and every later one report the same
/// [`ExecutorError::ContextSpawnFailed`], and falling back to inline execution
/// is left to the caller.
pub struct WorkerBackedExecutor<I, O> {
	factory: InlineWorkerFactory,
	script: Arc<str>,
	/// `None` once destroyed.
	setup: Mutex<Option<Arc<Setup>>>,
	_io: PhantomData<fn(I) -> O>,
}

impl<I, O> WorkerBackedExecutor<I, O>
where
	I: Serialize + Send + 'static,
	O: DeserializeOwned + Send + 'static,
{
	/// Nothing is spawned until the first call.
	pub fn new(factory: InlineWorkerFactory, script: impl Into<Arc<str>>) -> Self {
		Self {
			factory,
			script: script.into(),
			setup: Mutex::new(Some(Arc::new(Setup::new()))),
			_io: PhantomData,
		}
	}

	async fn handle(&self, setup: &Setup) -> Result<Arc<WorkerHandle>> {
		let starter = setup.starter.lock().take();
		if let Some(starter) = starter {
			let factory = self.factory.clone();
			let script = Arc::clone(&self.script);
			tracing::debug!(bytes = script.len(), "executor.worker.setup");
			crate::spawn(TaskClass::ContextSetup, async move {
				let spawned = factory.create(&script).await.map(Arc::new);
				if starter.send(Some(spawned)).is_err() {
					tracing::debug!("executor.worker.setup.unclaimed");
				}
			});
		}

		let mut outcome = setup.outcome.clone();
		let spawned = outcome
			.wait_for(Option::is_some)
			.await
			.ok()
			.and_then(|finished| (*finished).clone())
			.unwrap_or(Err(SpawnError::Disconnected));
		spawned.map_err(ExecutorError::ContextSpawnFailed)
	}
}

#[async_trait]
impl<I, O> BackgroundExecutor<I, O> for WorkerBackedExecutor<I, O>
where
	I: Serialize + Send + 'static,
	O: DeserializeOwned + Send + 'static,
{
	async fn call_with(&self, input: I, options: CallOptions) -> Result<O> {
		let setup = self.setup.lock().clone().ok_or(ExecutorError::ExecutorDestroyed)?;
		let payload = serde_json::to_value(&input).map_err(ExecutorError::Serialize)?;
		let handle = self.handle(&setup).await?;

		tracing::trace!(address = handle.address(), transfers = options.transfer.len(), "executor.worker.call");
		let reply = handle.request(WorkerMessage::ping(payload), options.transfer).await?;
		serde_json::from_value(reply).map_err(|err| {
			tracing::warn!(address = handle.address(), error = %err, "executor.worker.reply.malformed");
			ExecutorError::MalformedReply(err)
		})
	}

	fn destroy(&self) {
		let Some(setup) = self.setup.lock().take() else {
			return;
		};
		// A setup still in flight is released once its last waiting call drops it.
		if let Some(Ok(handle)) = setup.finished() {
			handle.terminate();
		}
		tracing::debug!("executor.worker.destroy");
	}

	fn sync(&self) -> bool {
		false
	}
}
