//! Host abstraction for spawning background contexts from in-memory scripts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SpawnError;
use crate::protocol::{Inbound, Reply};

/// Both ends of the message channel to one running context.
pub struct ContextChannel {
	/// Requests and the terminate signal flow in here.
	pub inbox: mpsc::UnboundedSender<Inbound>,
	/// Every value the context posts comes out here.
	pub replies: mpsc::UnboundedReceiver<Reply>,
}

/// Context-spawning primitive of a host environment.
///
/// Given a locally addressable script resource, an implementation starts an
/// isolated execution context that evaluates the script once and then talks
/// only through the returned [`ContextChannel`].
#[async_trait]
pub trait ContextHost: Send + Sync + 'static {
	/// Starts a context running the script behind `resource`.
	///
	/// Resolves once the script has installed its message listener.
	async fn spawn(&self, resource: &ScriptResource) -> Result<ContextChannel, SpawnError>;
}

/// Locally addressable handle to an in-memory script body.
#[derive(Clone)]
pub struct ScriptResource {
	address: String,
	table: Arc<ResourceTable>,
}

impl ScriptResource {
	pub fn address(&self) -> &str {
		&self.address
	}

	/// Reads the body back from the table that registered it.
	pub fn load(&self) -> Result<Arc<str>, SpawnError> {
		self.table.resolve(&self.address).ok_or_else(|| SpawnError::Revoked(self.address.clone()))
	}
}

impl std::fmt::Debug for ScriptResource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ScriptResource").field("address", &self.address).finish()
	}
}

/// Process-local table of content-backed script addresses.
///
/// Addresses look like `blob:offpaint/<uuid>` and never refer to anything
/// outside this process.
#[derive(Debug)]
pub struct ResourceTable {
	scheme: String,
	entries: RwLock<HashMap<String, Arc<str>>>,
}

impl ResourceTable {
	pub fn new(scheme: impl Into<String>) -> Self {
		Self {
			scheme: scheme.into(),
			entries: RwLock::new(HashMap::new()),
		}
	}

	/// Stores `body` under a fresh address.
	pub fn register(self: &Arc<Self>, body: &str) -> ScriptResource {
		let address = format!("{}:offpaint/{}", self.scheme, Uuid::new_v4());
		self.entries.write().insert(address.clone(), Arc::from(body));
		ScriptResource {
			address,
			table: Arc::clone(self),
		}
	}

	pub fn resolve(&self, address: &str) -> Option<Arc<str>> {
		self.entries.read().get(address).cloned()
	}

	/// Removes an address. Returns `false` if it was already gone.
	pub fn revoke(&self, address: &str) -> bool {
		self.entries.write().remove(address).is_some()
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

impl Default for ResourceTable {
	fn default() -> Self {
		Self::new("blob")
	}
}
