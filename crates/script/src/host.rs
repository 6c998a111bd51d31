//! [`ContextHost`] that runs script bodies in an embedded JavaScript engine.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use offpaint_worker::{ContextChannel, ContextHost, ScriptResource, SpawnError, TaskClass, WorkerConfig, spawn_named_thread};
use tokio::sync::{mpsc, oneshot};

use crate::context;

/// Spawns one OS thread per context, each owning its own engine instance.
///
/// Contexts share no memory with the caller or with each other; the only way
/// in or out is the [`ContextChannel`].
#[derive(Debug)]
pub struct ScriptHost {
	config: WorkerConfig,
	spawned: AtomicU64,
}

impl Default for ScriptHost {
	fn default() -> Self {
		Self::new()
	}
}

impl ScriptHost {
	pub fn new() -> Self {
		Self::from_config(&WorkerConfig::default())
	}

	pub fn from_config(config: &WorkerConfig) -> Self {
		Self {
			config: config.clone(),
			spawned: AtomicU64::new(0),
		}
	}

	/// Contexts started so far.
	pub fn spawned(&self) -> u64 {
		self.spawned.load(Ordering::Relaxed)
	}
}

#[async_trait]
impl ContextHost for ScriptHost {
	async fn spawn(&self, resource: &ScriptResource) -> Result<ContextChannel, SpawnError> {
		if !self.config.allow_spawn {
			tracing::warn!(address = resource.address(), "script.host.denied");
			return Err(SpawnError::Denied);
		}
		let body = resource.load()?;

		let (inbox, requests) = mpsc::unbounded_channel();
		let (replies_tx, replies) = mpsc::unbounded_channel();
		let (ready_tx, ready_rx) = oneshot::channel();
		let seq = self.spawned.fetch_add(1, Ordering::Relaxed);
		let name = format!("{}-{seq}", self.config.thread_name);
		let address = resource.address().to_string();

		spawn_named_thread(TaskClass::RenderContext, name, move || context::run(address, body, requests, replies_tx, ready_tx))
			.map_err(|err| SpawnError::Thread(err.to_string()))?;

		match ready_rx.await {
			Ok(Ok(())) => Ok(ContextChannel { inbox, replies }),
			Ok(Err(err)) => {
				tracing::debug!(address = resource.address(), error = %err, "script.host.load_failed");
				Err(err)
			}
			Err(_) => Err(SpawnError::Disconnected),
		}
	}
}
