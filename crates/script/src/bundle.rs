//! Self-contained worker script artifacts.

use std::sync::Arc;

use thiserror::Error;

/// Reasons a script body cannot be used as an inline worker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptError {
	#[error("script body is empty")]
	Empty,

	/// The body reaches for another module, which an in-memory context cannot load.
	#[error("script references an external module on line {line}: {snippet}")]
	ExternalImport { line: usize, snippet: String },
}

/// Default render worker: answers every ping with twice its payload.
pub const RENDER_WORKER_SCRIPT: &str = r#""use strict";
const transform = (payload) => payload * 2;
self.addEventListener("message", (event) => {
	const message = event.data;
	if (message && message.kind === "ping") {
		postMessage(transform(message.payload));
	}
});
"#;

/// A single immediately-executable script body with no module references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundledScript {
	body: Arc<str>,
}

impl BundledScript {
	/// Validates `body` and wraps it.
	pub fn new(body: impl Into<Arc<str>>) -> Result<Self, ScriptError> {
		let body = body.into();
		if body.trim().is_empty() {
			return Err(ScriptError::Empty);
		}
		if let Some((line, snippet)) = find_external_reference(&body) {
			return Err(ScriptError::ExternalImport {
				line,
				snippet: snippet.to_string(),
			});
		}
		Ok(Self { body })
	}

	/// The built-in render worker.
	pub fn render_worker() -> Self {
		Self {
			body: Arc::from(RENDER_WORKER_SCRIPT),
		}
	}

	pub fn body(&self) -> &str {
		&self.body
	}

	pub fn into_body(self) -> Arc<str> {
		self.body
	}
}

impl From<BundledScript> for Arc<str> {
	fn from(script: BundledScript) -> Self {
		script.body
	}
}

/// Bundles a transform function expression into a ping-answering worker.
///
/// `transform` is any JavaScript expression evaluating to a one-argument
/// function, for example `(n) => n * 2`. The result installs exactly one
/// `message` listener.
pub fn bundle_transform(transform: &str) -> Result<BundledScript, ScriptError> {
	if transform.trim().is_empty() {
		return Err(ScriptError::Empty);
	}
	BundledScript::new(format!(
		r#""use strict";
const transform = ({transform});
self.addEventListener("message", (event) => {{
	const message = event.data;
	if (message && message.kind === "ping") {{
		postMessage(transform(message.payload));
	}}
}});
"#
	))
}

fn find_external_reference(body: &str) -> Option<(usize, &str)> {
	body.lines().enumerate().find_map(|(index, line)| {
		let trimmed = line.trim_start();
		let is_import = trimmed.starts_with("import ") || trimmed.starts_with("import{") || trimmed.starts_with("import\"") || trimmed.starts_with("import'");
		let is_loader = trimmed.contains("importScripts(") || trimmed.contains("require(");
		(is_import || is_loader).then_some((index + 1, trimmed))
	})
}
