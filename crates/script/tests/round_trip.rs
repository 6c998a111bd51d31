use std::sync::Arc;

use offpaint_script::{BundledScript, RENDER_WORKER_SCRIPT, ScriptHost, bundle_transform};
use offpaint_worker::{
	BackgroundExecutor, CallOptions, ContextHost, ExecutorError, InlineFallbackExecutor, InlineWorkerFactory, SpawnError, WorkerBackedExecutor, WorkerConfig,
	select_executor,
};
use serde::{Deserialize, Serialize};

fn init_tracing() {
	let _ = tracing_subscriber::fmt::try_init();
}

fn worker<I, O>(script: impl Into<Arc<str>>) -> WorkerBackedExecutor<I, O>
where
	I: Serialize + Send + 'static,
	O: for<'de> Deserialize<'de> + Send + 'static,
{
	WorkerBackedExecutor::new(InlineWorkerFactory::new(Arc::new(ScriptHost::new())), script)
}

#[tokio::test]
async fn bundled_doubling_script_round_trips() {
	init_tracing();
	let executor: WorkerBackedExecutor<i64, i64> = worker(RENDER_WORKER_SCRIPT);
	assert!(!executor.sync());
	assert_eq!(executor.call(21).await.unwrap(), 42);
	executor.destroy();
}

#[tokio::test]
async fn inline_and_worker_variants_agree() {
	init_tracing();
	let background: WorkerBackedExecutor<i64, i64> = worker(BundledScript::render_worker());
	let inline = InlineFallbackExecutor::new(|| |x: i64| x * 2);

	for input in [0, 1, 21, -7, 1 << 20] {
		assert_eq!(background.call(input).await.unwrap(), inline.call(input).await.unwrap());
	}
}

#[tokio::test]
async fn selection_without_host_falls_back_inline() {
	init_tracing();
	let host: Arc<dyn ContextHost> = Arc::new(ScriptHost::new());
	let background = select_executor::<i64, i64, _, _>(Some(host), RENDER_WORKER_SCRIPT, || |x: i64| x * 2);
	let fallback = select_executor::<i64, i64, _, _>(None, RENDER_WORKER_SCRIPT, || |x: i64| x * 2);

	assert!(!background.sync());
	assert!(fallback.sync());
	assert_eq!(background.call(21).await.unwrap(), 42);
	assert_eq!(fallback.call(21).await.unwrap(), 42);
}

#[derive(Debug, Serialize)]
struct Outline {
	width: u32,
	height: u32,
	label: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Scaled {
	width: u32,
	height: u32,
	label: String,
}

#[tokio::test]
async fn structured_payloads_use_the_bundled_transform() {
	init_tracing();
	let script = bundle_transform("(o) => ({ width: o.width * 2, height: o.height * 2, label: o.label.toUpperCase() })").unwrap();
	let executor: WorkerBackedExecutor<Outline, Scaled> = worker(script);

	let scaled = executor
		.call(Outline {
			width: 10,
			height: 4,
			label: "card".into(),
		})
		.await
		.unwrap();
	assert_eq!(
		scaled,
		Scaled {
			width: 20,
			height: 8,
			label: "CARD".into(),
		}
	);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_share_one_context_and_correlate() {
	init_tracing();
	let host = Arc::new(ScriptHost::new());
	let executor: Arc<WorkerBackedExecutor<i64, i64>> = Arc::new(WorkerBackedExecutor::new(InlineWorkerFactory::new(host.clone()), RENDER_WORKER_SCRIPT));

	let calls: Vec<_> = (0..32)
		.map(|i| {
			let executor = Arc::clone(&executor);
			tokio::spawn(async move { (i, executor.call(i).await) })
		})
		.collect();
	for call in calls {
		let (input, output) = call.await.unwrap();
		assert_eq!(output.unwrap(), input * 2);
	}
	assert_eq!(host.spawned(), 1);
}

#[tokio::test]
async fn denied_host_fails_first_call() {
	init_tracing();
	let config = WorkerConfig {
		allow_spawn: false,
		..WorkerConfig::default()
	};
	let host = Arc::new(ScriptHost::from_config(&config));
	let executor: WorkerBackedExecutor<i64, i64> = WorkerBackedExecutor::new(InlineWorkerFactory::from_config(host.clone(), &config), RENDER_WORKER_SCRIPT);
	assert_eq!(host.spawned(), 0);

	match executor.call(21).await {
		Err(ExecutorError::ContextSpawnFailed(SpawnError::Denied)) => {}
		other => panic!("expected ContextSpawnFailed, got {other:?}"),
	}
}

#[tokio::test]
async fn throwing_script_fails_spawn() {
	init_tracing();
	let executor: WorkerBackedExecutor<i64, i64> = worker("throw new Error('bad bundle');");
	match executor.call(1).await {
		Err(ExecutorError::ContextSpawnFailed(SpawnError::Script(message))) => assert!(message.contains("bad bundle"), "{message}"),
		other => panic!("expected script failure, got {other:?}"),
	}
}

#[tokio::test]
async fn script_without_listener_fails_spawn() {
	init_tracing();
	let executor: WorkerBackedExecutor<i64, i64> = worker("const unused = 1;");
	assert!(matches!(
		executor.call(1).await,
		Err(ExecutorError::ContextSpawnFailed(SpawnError::NoListener))
	));
}

#[tokio::test]
async fn listener_errors_fail_only_their_call() {
	init_tracing();
	let script = r#"
		self.onmessage = (event) => {
			const n = event.data.payload;
			if (n < 0) throw new RangeError("negative input");
			if (n === 0) return;
			postMessage(n * 2);
		};
	"#;
	let executor: WorkerBackedExecutor<i64, i64> = worker(script);

	match executor.call(-1).await {
		Err(ExecutorError::Handler(message)) => assert!(message.contains("negative input"), "{message}"),
		other => panic!("expected handler error, got {other:?}"),
	}
	assert!(matches!(executor.call(0).await, Err(ExecutorError::Handler(_))));
	assert_eq!(executor.call(4).await.unwrap(), 8);
}

#[tokio::test]
async fn extra_posts_are_discarded() {
	init_tracing();
	let script = r#"
		postMessage("hello from load");
		self.onmessage = (event) => {
			postMessage(event.data.payload + 1);
			postMessage("noise");
		};
	"#;
	let executor: WorkerBackedExecutor<i64, i64> = worker(script);
	assert_eq!(executor.call(1).await.unwrap(), 2);
	assert_eq!(executor.call(2).await.unwrap(), 3);
}

#[tokio::test]
async fn transferred_buffers_reach_the_script() {
	init_tracing();
	let script = r#"
		self.onmessage = (event) => postMessage(
			event.transfer.map((buffer) => [buffer.byteLength, new Uint8Array(buffer).reduce((sum, byte) => sum + byte, 0)])
		);
	"#;
	let executor: WorkerBackedExecutor<(), Vec<(u32, u32)>> = worker(script);

	let options = CallOptions::new().transfer(vec![1u8; 16]).transfer(vec![3u8; 4]);
	assert_eq!(executor.call_with((), options).await.unwrap(), vec![(16, 16), (4, 12)]);
}

#[tokio::test]
async fn destroyed_executor_rejects_calls() {
	init_tracing();
	let executor: WorkerBackedExecutor<i64, i64> = worker(RENDER_WORKER_SCRIPT);
	assert_eq!(executor.call(1).await.unwrap(), 2);
	executor.destroy();
	executor.destroy();
	assert!(matches!(executor.call(1).await, Err(ExecutorError::ExecutorDestroyed)));
}
