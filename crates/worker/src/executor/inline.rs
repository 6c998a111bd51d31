use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use super::{BackgroundExecutor, CallOptions};
use crate::error::{ExecutorError, Result};

/// Shared handler produced once by an executor's factory.
pub type Handler<I, O> = Arc<dyn Fn(I) -> O + Send + Sync>;

type HandlerFactory<I, O> = Arc<dyn Fn() -> Handler<I, O> + Send + Sync>;

/// Runs the handler on the caller's thread.
///
/// The future returned by `call` exists only to match the contract of
/// background variants; the handler itself runs synchronously when polled.
pub struct InlineFallbackExecutor<I, O> {
	factory: HandlerFactory<I, O>,
	/// `None` once destroyed. Racing first calls share the inner cell.
	setup: Mutex<Option<Arc<OnceCell<Handler<I, O>>>>>,
	_io: PhantomData<fn(I) -> O>,
}

impl<I, O> InlineFallbackExecutor<I, O>
where
	I: Send + 'static,
	O: Send + 'static,
{
	/// `factory` runs at most once, on the first call.
	pub fn new<F, H>(factory: F) -> Self
	where
		F: Fn() -> H + Send + Sync + 'static,
		H: Fn(I) -> O + Send + Sync + 'static,
	{
		Self {
			factory: Arc::new(move || Arc::new(factory()) as Handler<I, O>),
			setup: Mutex::new(Some(Arc::new(OnceCell::new()))),
			_io: PhantomData,
		}
	}

	async fn handler(&self) -> Result<Handler<I, O>> {
		let cell = self.setup.lock().clone().ok_or(ExecutorError::ExecutorDestroyed)?;
		let handler = cell
			.get_or_init(|| async {
				tracing::debug!("executor.inline.setup");
				(self.factory)()
			})
			.await;
		Ok(Arc::clone(handler))
	}
}

#[async_trait]
impl<I, O> BackgroundExecutor<I, O> for InlineFallbackExecutor<I, O>
where
	I: Send + 'static,
	O: Send + 'static,
{
	async fn call_with(&self, input: I, _options: CallOptions) -> Result<O> {
		let handler = self.handler().await?;
		tracing::trace!("executor.inline.call");
		Ok(handler(input))
	}

	fn destroy(&self) {
		if self.setup.lock().take().is_some() {
			tracing::debug!("executor.inline.destroy");
		}
	}

	fn sync(&self) -> bool {
		true
	}
}
