//! Message contract between callers and a background render context.
//!
//! A request is a [`WorkerMessage`] of kind `"ping"` carrying the caller's
//! payload. The context answers with a single posted value. Every request is
//! wrapped in an [`Envelope`] tagged with a [`RequestId`] so that several
//! outstanding calls on one context can be told apart when their replies come
//! back.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request kind understood by render worker scripts.
pub const PING: &str = "ping";

/// Correlation tag for one request/reply pair.
pub type RequestId = u64;

/// Counter-based request ID source, unique per context handle.
#[derive(Debug, Default)]
pub struct RequestIds(AtomicU64);

impl RequestIds {
	#[must_use]
	pub const fn new() -> Self {
		Self(AtomicU64::new(0))
	}

	/// Returns the next unique ID.
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub fn next(&self) -> RequestId {
		self.0.fetch_add(1, Ordering::Relaxed)
	}
}

/// Message posted into a background context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
	pub kind: String,
	pub payload: Value,
}

impl WorkerMessage {
	/// Builds a `"ping"` request.
	pub fn ping(payload: Value) -> Self {
		Self {
			kind: PING.to_string(),
			payload,
		}
	}

	pub fn is_ping(&self) -> bool {
		self.kind == PING
	}
}

/// Byte buffer whose ownership moves into the background context.
///
/// Not `Clone`: once handed to a call the sender no longer has it. The
/// envelope carries the allocation itself; an engine-backed host may still
/// copy the bytes into its own buffer representation on arrival.
#[derive(Debug, PartialEq, Eq)]
pub struct Transferable(Vec<u8>);

impl Transferable {
	pub fn new(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn into_bytes(self) -> Vec<u8> {
		self.0
	}
}

impl From<Vec<u8>> for Transferable {
	fn from(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}
}

/// Tagged request as it travels into the context.
#[derive(Debug)]
pub struct Envelope {
	pub id: RequestId,
	pub message: WorkerMessage,
	pub transfer: Vec<Transferable>,
}

/// Traffic flowing from the caller side into a context.
#[derive(Debug)]
pub enum Inbound {
	/// One request to hand to the context's message listener.
	Request(Envelope),
	/// Stop after everything queued before this signal has been handled.
	Terminate,
}

/// A value posted back by the context.
///
/// `id` is `None` for posts the context made outside of handling a request,
/// which the caller side discards.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
	pub id: Option<RequestId>,
	pub outcome: Result<Value, String>,
}

impl Reply {
	pub fn ok(id: RequestId, value: Value) -> Self {
		Self { id: Some(id), outcome: Ok(value) }
	}

	pub fn err(id: RequestId, message: impl Into<String>) -> Self {
		Self {
			id: Some(id),
			outcome: Err(message.into()),
		}
	}

	pub fn unsolicited(value: Value) -> Self {
		Self { id: None, outcome: Ok(value) }
	}
}
