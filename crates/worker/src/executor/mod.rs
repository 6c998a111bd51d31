//! Uniform call contract over inline and background execution.
//!
//! Callers hold a [`BackgroundExecutor`] and never learn which variant backs
//! it. [`InlineFallbackExecutor`] runs the handler on the calling thread;
//! [`WorkerBackedExecutor`] round-trips through an isolated context. Both set
//! themselves up lazily, exactly once, on the first call.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::factory::InlineWorkerFactory;
use crate::host::ContextHost;
use crate::protocol::Transferable;

mod inline;
mod worker;

pub use inline::{Handler, InlineFallbackExecutor};
pub use worker::WorkerBackedExecutor;

/// Per-call options.
#[derive(Debug, Default)]
pub struct CallOptions {
	/// Buffers moved, not copied, into the background context.
	///
	/// Ignored by synchronous executors, which share the caller's memory.
	pub transfer: Vec<Transferable>,
}

impl CallOptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds one buffer to move across the boundary.
	#[must_use]
	pub fn transfer(mut self, buffer: impl Into<Transferable>) -> Self {
		self.transfer.push(buffer.into());
		self
	}
}

/// Async call contract shared by every execution variant.
#[async_trait]
pub trait BackgroundExecutor<I, O>: Send + Sync
where
	I: Send + 'static,
	O: Send + 'static,
{
	/// Runs the handler once for `input`.
	///
	/// The first call performs setup; calls racing with it wait on the same
	/// setup rather than starting another.
	async fn call_with(&self, input: I, options: CallOptions) -> Result<O>;

	/// [`Self::call_with`] without options.
	async fn call(&self, input: I) -> Result<O> {
		self.call_with(input, CallOptions::default()).await
	}

	/// Releases the handler or background context.
	///
	/// Idempotent. Calls issued afterwards fail with
	/// [`crate::ExecutorError::ExecutorDestroyed`].
	fn destroy(&self);

	/// True when this executor always runs on the caller's thread.
	fn sync(&self) -> bool;
}

/// Picks the executor variant once, at construction.
///
/// With a host, calls go to a context running `script`; without one they run
/// the handler produced by `factory` inline.
pub fn select_executor<I, O, F, H>(host: Option<Arc<dyn ContextHost>>, script: impl Into<Arc<str>>, factory: F) -> Box<dyn BackgroundExecutor<I, O>>
where
	I: Serialize + Send + 'static,
	O: DeserializeOwned + Send + 'static,
	F: Fn() -> H + Send + Sync + 'static,
	H: Fn(I) -> O + Send + Sync + 'static,
{
	match host {
		Some(host) => {
			tracing::debug!(variant = "worker", "executor.select");
			Box::new(WorkerBackedExecutor::new(InlineWorkerFactory::new(host), script))
		}
		None => {
			tracing::debug!(variant = "inline", "executor.select");
			Box::new(InlineFallbackExecutor::new(factory))
		}
	}
}
