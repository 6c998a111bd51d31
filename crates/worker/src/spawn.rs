use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::TaskClass;

static FALLBACK_RT: OnceLock<Runtime> = OnceLock::new();

/// Runtime used when a pump or flush task is started from a plain thread.
fn fallback_runtime() -> &'static Runtime {
	FALLBACK_RT.get_or_init(|| {
		tracing::debug!("worker.fallback_runtime.start");
		Builder::new_multi_thread()
			.worker_threads(1)
			.thread_name("offpaint-pump")
			.enable_all()
			.build()
			.expect("failed to build offpaint fallback runtime")
	})
}

/// Spawns an async task tagged with its pipeline class.
///
/// Falls back to a small process-wide runtime when called outside of one, so
/// reply pumps keep running for hosts that drive calls from plain threads.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn");
	match Handle::try_current() {
		Ok(handle) => handle.spawn(fut),
		Err(_) => fallback_runtime().spawn(fut),
	}
}

/// Spawns a dedicated named OS thread tagged with its pipeline class.
pub fn spawn_named_thread<F, R>(class: TaskClass, name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let name = name.into();
	tracing::trace!(worker_class = class.as_str(), thread = %name, "worker.spawn_named_thread");
	std::thread::Builder::new().name(name).spawn(f)
}
