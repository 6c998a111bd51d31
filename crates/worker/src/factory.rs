//! Materializes background contexts from in-memory script bodies.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::TaskClass;
use crate::config::WorkerConfig;
use crate::error::{ExecutorError, SpawnError};
use crate::host::{ContextChannel, ContextHost, ResourceTable};
use crate::protocol::{Envelope, Inbound, Reply, RequestId, RequestIds, Transferable, WorkerMessage};

/// Produces running [`WorkerHandle`]s from script text without a hosted file.
///
/// The body is registered as a process-local resource, handed to the host's
/// spawn primitive, and revoked again once the host has loaded it. The
/// factory keeps no per-context state after that.
#[derive(Clone)]
pub struct InlineWorkerFactory {
	host: Arc<dyn ContextHost>,
	resources: Arc<ResourceTable>,
}

impl InlineWorkerFactory {
	pub fn new(host: Arc<dyn ContextHost>) -> Self {
		Self::with_resources(host, Arc::new(ResourceTable::default()))
	}

	pub fn from_config(host: Arc<dyn ContextHost>, config: &WorkerConfig) -> Self {
		Self::with_resources(host, Arc::new(ResourceTable::new(config.resource_scheme.clone())))
	}

	pub fn with_resources(host: Arc<dyn ContextHost>, resources: Arc<ResourceTable>) -> Self {
		Self { host, resources }
	}

	pub fn resources(&self) -> &Arc<ResourceTable> {
		&self.resources
	}

	/// Spawns one context running `script_body`.
	pub async fn create(&self, script_body: &str) -> Result<WorkerHandle, SpawnError> {
		let resource = self.resources.register(script_body);
		let _revoke = RevokeOnDrop {
			table: &self.resources,
			address: resource.address(),
		};
		tracing::debug!(address = resource.address(), bytes = script_body.len(), "factory.create");

		let spawned = self.host.spawn(&resource).await;

		match spawned {
			Ok(channel) => Ok(WorkerHandle::start(resource.address(), channel)),
			Err(err) => {
				tracing::debug!(address = resource.address(), error = %err, "factory.create.failed");
				Err(err)
			}
		}
	}
}

/// Revokes a registered address even when `create` is dropped mid-spawn.
struct RevokeOnDrop<'a> {
	table: &'a ResourceTable,
	address: &'a str,
}

impl Drop for RevokeOnDrop<'_> {
	fn drop(&mut self) {
		self.table.revoke(self.address);
	}
}

/// Lifecycle of a [`WorkerHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
	/// Channel exists but replies are not being routed yet.
	Created,
	/// Accepting requests.
	Active,
	/// Terminated, or the context exited. Every further post is rejected.
	Destroyed,
}

type Waiter = oneshot::Sender<Result<Value, String>>;

struct Pending {
	state: HandleState,
	/// Set when the context went away without `terminate`.
	lost: bool,
	waiters: HashMap<RequestId, Waiter>,
}

/// Exclusive handle to one running background context.
///
/// Requests are tagged with a fresh [`RequestId`]; a pump task routes each
/// reply to the caller waiting on that ID, so replies may arrive in any order.
/// Dropping the handle closes the context's inbox, which ends the context.
pub struct WorkerHandle {
	address: String,
	inbox: mpsc::UnboundedSender<Inbound>,
	/// Taken by [`WorkerHandle::activate`].
	replies: Mutex<Option<mpsc::UnboundedReceiver<Reply>>>,
	pending: Arc<Mutex<Pending>>,
	ids: RequestIds,
}

impl WorkerHandle {
	/// Wraps a freshly spawned channel in the `Created` state.
	///
	/// Requests may be posted right away; their replies are held in the
	/// channel until [`Self::activate`] starts routing them.
	pub fn new(address: impl Into<String>, channel: ContextChannel) -> Self {
		let ContextChannel { inbox, replies } = channel;
		Self {
			address: address.into(),
			inbox,
			replies: Mutex::new(Some(replies)),
			pending: Arc::new(Mutex::new(Pending {
				state: HandleState::Created,
				lost: false,
				waiters: HashMap::new(),
			})),
			ids: RequestIds::new(),
		}
	}

	/// [`Self::new`] followed by [`Self::activate`].
	pub fn start(address: impl Into<String>, channel: ContextChannel) -> Self {
		let handle = Self::new(address, channel);
		handle.activate();
		handle
	}

	/// Starts the reply pump. Returns `false` unless the handle was `Created`.
	pub fn activate(&self) -> bool {
		let Some(replies) = self.replies.lock().take() else {
			return false;
		};
		{
			let mut pending = self.pending.lock();
			if pending.state != HandleState::Created {
				return false;
			}
			pending.state = HandleState::Active;
		}

		let pending = Arc::clone(&self.pending);
		crate::spawn(TaskClass::ReplyPump, pump_replies(self.address.clone(), replies, pending));
		tracing::debug!(address = %self.address, "worker.handle.active");
		true
	}

	pub fn address(&self) -> &str {
		&self.address
	}

	pub fn state(&self) -> HandleState {
		self.pending.lock().state
	}

	/// Number of requests still waiting for a reply.
	pub fn outstanding(&self) -> usize {
		self.pending.lock().waiters.len()
	}

	/// Posts `message` and returns the receiver its reply will arrive on.
	pub fn post(&self, message: WorkerMessage, transfer: Vec<Transferable>) -> Result<oneshot::Receiver<Result<Value, String>>, ExecutorError> {
		let mut pending = self.pending.lock();
		if pending.lost {
			return Err(ExecutorError::ContextLost);
		}
		if pending.state == HandleState::Destroyed {
			return Err(ExecutorError::ExecutorDestroyed);
		}

		let id = self.ids.next();
		let (tx, rx) = oneshot::channel();
		pending.waiters.insert(id, tx);
		if self.inbox.send(Inbound::Request(Envelope { id, message, transfer })).is_err() {
			pending.waiters.remove(&id);
			return Err(ExecutorError::ContextLost);
		}
		tracing::trace!(address = %self.address, id, "worker.post");
		Ok(rx)
	}

	/// Posts `message` and waits for its correlated reply.
	pub async fn request(&self, message: WorkerMessage, transfer: Vec<Transferable>) -> Result<Value, ExecutorError> {
		let rx = self.post(message, transfer)?;
		match rx.await {
			Ok(Ok(value)) => Ok(value),
			Ok(Err(message)) => Err(ExecutorError::Handler(message)),
			Err(_) => Err(ExecutorError::ContextLost),
		}
	}

	/// Stops accepting requests and asks the context to exit.
	///
	/// The terminate signal queues behind requests that were already posted,
	/// so those still get their replies. Calling this again is a no-op.
	pub fn terminate(&self) {
		let mut pending = self.pending.lock();
		if pending.state == HandleState::Destroyed {
			return;
		}
		pending.state = HandleState::Destroyed;
		let _ = self.inbox.send(Inbound::Terminate);
		tracing::debug!(address = %self.address, outstanding = pending.waiters.len(), "worker.handle.terminate");
	}
}

impl std::fmt::Debug for WorkerHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkerHandle")
			.field("address", &self.address)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

async fn pump_replies(address: String, mut replies: mpsc::UnboundedReceiver<Reply>, pending: Arc<Mutex<Pending>>) {
	while let Some(reply) = replies.recv().await {
		let Some(id) = reply.id else {
			tracing::warn!(%address, "worker.reply.unsolicited");
			continue;
		};
		let waiter = pending.lock().waiters.remove(&id);
		match waiter {
			Some(tx) => {
				if tx.send(reply.outcome).is_err() {
					tracing::trace!(%address, id, "worker.reply.abandoned");
				}
			}
			None => tracing::warn!(%address, id, "worker.reply.uncorrelated"),
		}
	}

	// Dropping the senders fails every remaining waiter with `ContextLost`.
	let mut pending = pending.lock();
	let dropped = pending.waiters.len();
	pending.waiters.clear();
	if pending.state != HandleState::Destroyed {
		pending.lost = true;
		pending.state = HandleState::Destroyed;
	}
	tracing::debug!(%address, dropped, "worker.context.closed");
}

#[cfg(test)]
mod tests;
