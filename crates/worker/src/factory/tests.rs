use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::*;
use crate::host::ScriptResource;

fn manual_channel() -> (ContextChannel, mpsc::UnboundedReceiver<Inbound>, mpsc::UnboundedSender<Reply>) {
	let (inbox, requests) = mpsc::unbounded_channel();
	let (replies_tx, replies) = mpsc::unbounded_channel();
	(ContextChannel { inbox, replies }, requests, replies_tx)
}

async fn next_request(requests: &mut mpsc::UnboundedReceiver<Inbound>) -> Envelope {
	match requests.recv().await {
		Some(Inbound::Request(envelope)) => envelope,
		other => panic!("expected a request, got {other:?}"),
	}
}

#[tokio::test]
async fn replies_are_routed_by_id_not_arrival_order() {
	let (channel, mut requests, replies) = manual_channel();
	let handle = WorkerHandle::start("test:first", channel);

	let first = handle.post(WorkerMessage::ping(json!("a")), Vec::new()).unwrap();
	let second = handle.post(WorkerMessage::ping(json!("b")), Vec::new()).unwrap();
	let a = next_request(&mut requests).await;
	let b = next_request(&mut requests).await;
	assert_ne!(a.id, b.id);

	replies.send(Reply::ok(b.id, json!("reply-b"))).unwrap();
	replies.send(Reply::ok(a.id, json!("reply-a"))).unwrap();

	assert_eq!(first.await.unwrap(), Ok(json!("reply-a")));
	assert_eq!(second.await.unwrap(), Ok(json!("reply-b")));
	assert_eq!(handle.outstanding(), 0);
}

#[tokio::test]
async fn uncorrelated_and_unsolicited_replies_are_discarded() {
	let (channel, mut requests, replies) = manual_channel();
	let handle = WorkerHandle::start("test:stray", channel);

	let rx = handle.post(WorkerMessage::ping(json!(1)), Vec::new()).unwrap();
	let envelope = next_request(&mut requests).await;

	replies.send(Reply::ok(envelope.id + 1000, json!("stray"))).unwrap();
	replies.send(Reply::unsolicited(json!("hello"))).unwrap();
	replies.send(Reply::ok(envelope.id, json!(2))).unwrap();

	assert_eq!(rx.await.unwrap(), Ok(json!(2)));
	assert_eq!(handle.state(), HandleState::Active);
}

#[tokio::test]
async fn terminate_rejects_new_posts_but_answers_queued_ones() {
	let (channel, mut requests, replies) = manual_channel();
	let handle = WorkerHandle::start("test:terminate", channel);

	let queued = handle.post(WorkerMessage::ping(json!(5)), Vec::new()).unwrap();
	handle.terminate();
	handle.terminate();
	assert_eq!(handle.state(), HandleState::Destroyed);
	assert!(matches!(
		handle.post(WorkerMessage::ping(json!(6)), Vec::new()),
		Err(ExecutorError::ExecutorDestroyed)
	));

	let envelope = next_request(&mut requests).await;
	assert!(matches!(requests.recv().await, Some(Inbound::Terminate)));
	replies.send(Reply::ok(envelope.id, json!(10))).unwrap();
	assert_eq!(queued.await.unwrap(), Ok(json!(10)));
}

#[tokio::test]
async fn context_exit_fails_outstanding_requests() {
	let (channel, mut requests, replies) = manual_channel();
	let handle = WorkerHandle::start("test:lost", channel);

	let pending = tokio::spawn({
		let rx = handle.post(WorkerMessage::ping(json!(1)), Vec::new()).unwrap();
		async move { rx.await }
	});
	let _ = next_request(&mut requests).await;
	drop(replies);

	assert!(pending.await.unwrap().is_err());
	tokio::time::timeout(Duration::from_secs(1), async {
		while handle.state() != HandleState::Destroyed {
			tokio::task::yield_now().await;
		}
	})
	.await
	.unwrap();
	assert!(matches!(
		handle.request(WorkerMessage::ping(json!(2)), Vec::new()).await,
		Err(ExecutorError::ContextLost)
	));
}

#[tokio::test]
async fn context_exit_after_terminate_still_reads_as_destroyed() {
	let (channel, mut requests, replies) = manual_channel();
	let handle = WorkerHandle::start("test:terminated-then-exit", channel);

	handle.terminate();
	assert!(matches!(requests.recv().await, Some(Inbound::Terminate)));
	drop(replies);
	tokio::time::sleep(Duration::from_millis(10)).await;

	assert!(matches!(
		handle.post(WorkerMessage::ping(json!(1)), Vec::new()),
		Err(ExecutorError::ExecutorDestroyed)
	));
}

#[tokio::test]
async fn replies_wait_in_the_channel_until_activation() {
	let (channel, mut requests, replies) = manual_channel();
	let handle = WorkerHandle::new("test:created", channel);
	assert_eq!(handle.state(), HandleState::Created);

	let rx = handle.post(WorkerMessage::ping(json!(3)), Vec::new()).unwrap();
	let envelope = next_request(&mut requests).await;
	replies.send(Reply::ok(envelope.id, json!(6))).unwrap();
	tokio::time::sleep(Duration::from_millis(10)).await;
	assert_eq!(handle.outstanding(), 1);

	assert!(handle.activate());
	assert!(!handle.activate());
	assert_eq!(handle.state(), HandleState::Active);
	assert_eq!(rx.await.unwrap(), Ok(json!(6)));
}

#[tokio::test]
async fn terminated_handle_never_activates() {
	let (channel, _requests, _replies) = manual_channel();
	let handle = WorkerHandle::new("test:never", channel);
	handle.terminate();
	assert!(!handle.activate());
	assert_eq!(handle.state(), HandleState::Destroyed);
}

#[tokio::test]
async fn error_replies_surface_as_handler_failures() {
	let (channel, mut requests, replies) = manual_channel();
	let handle = WorkerHandle::start("test:error", channel);

	let call = tokio::spawn(async move { handle.request(WorkerMessage::ping(json!(null)), Vec::new()).await });
	let envelope = next_request(&mut requests).await;
	replies.send(Reply::err(envelope.id, "TypeError: boom")).unwrap();

	match call.await.unwrap() {
		Err(ExecutorError::Handler(message)) => assert_eq!(message, "TypeError: boom"),
		other => panic!("expected handler failure, got {other:?}"),
	}
}

#[tokio::test]
async fn transferred_buffers_arrive_without_copying() {
	let (channel, mut requests, _replies) = manual_channel();
	let handle = WorkerHandle::start("test:transfer", channel);

	let bytes = vec![7u8; 64];
	let ptr = bytes.as_ptr();
	let _rx = handle.post(WorkerMessage::ping(json!(0)), vec![Transferable::from(bytes)]).unwrap();

	let envelope = next_request(&mut requests).await;
	assert_eq!(envelope.transfer.len(), 1);
	assert_eq!(envelope.transfer[0].as_bytes().as_ptr(), ptr);
}

struct RecordingHost {
	seen: Mutex<Vec<(String, String)>>,
	fail: bool,
}

#[async_trait]
impl ContextHost for RecordingHost {
	async fn spawn(&self, resource: &ScriptResource) -> Result<ContextChannel, SpawnError> {
		let body = resource.load()?;
		self.seen.lock().push((resource.address().to_string(), body.to_string()));
		if self.fail {
			return Err(SpawnError::Denied);
		}
		let (channel, _requests, _replies) = manual_channel();
		Ok(channel)
	}
}

#[tokio::test]
async fn factory_hands_host_a_local_resource_and_revokes_it() {
	let host = Arc::new(RecordingHost {
		seen: Mutex::new(Vec::new()),
		fail: false,
	});
	let factory = InlineWorkerFactory::from_config(host.clone(), &WorkerConfig::default());

	let handle = factory.create("self.onmessage = () => {};").await.unwrap();

	let seen = host.seen.lock().clone();
	assert_eq!(seen.len(), 1);
	assert!(seen[0].0.starts_with("blob:offpaint/"));
	assert_eq!(seen[0].1, "self.onmessage = () => {};");
	assert_eq!(handle.address(), seen[0].0);
	assert!(factory.resources().is_empty());
}

#[tokio::test]
async fn factory_revokes_resource_when_spawn_fails() {
	let host = Arc::new(RecordingHost {
		seen: Mutex::new(Vec::new()),
		fail: true,
	});
	let factory = InlineWorkerFactory::new(host);

	assert_eq!(factory.create("x").await.unwrap_err(), SpawnError::Denied);
	assert!(factory.resources().is_empty());
}

/// Loads the resource, then never finishes spawning.
struct StalledHost;

#[async_trait]
impl ContextHost for StalledHost {
	async fn spawn(&self, resource: &ScriptResource) -> Result<ContextChannel, SpawnError> {
		resource.load()?;
		std::future::pending().await
	}
}

#[tokio::test]
async fn dropped_create_still_revokes_its_resource() {
	let factory = InlineWorkerFactory::new(Arc::new(StalledHost));

	let abandoned = tokio::time::timeout(Duration::from_millis(5), factory.create("self.onmessage = () => {};")).await;
	assert!(abandoned.is_err());
	assert!(factory.resources().is_empty());
}
