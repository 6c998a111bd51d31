//! Thread-side half of a script context.
//!
//! One engine [`Context`] lives on the thread that runs [`run`]. The body is
//! evaluated once with worker globals in place, then every inbound request is
//! delivered to the script's message listeners as a `MessageEvent`-like
//! object. Whatever the listener posts first while handling a request is that
//! request's reply.

use std::cell::RefCell;
use std::sync::Arc;

use boa_engine::object::ObjectInitializer;
use boa_engine::object::builtins::{AlignedVec, JsArray, JsArrayBuffer};
use boa_engine::property::Attribute;
use boa_engine::{Context, JsError, JsNativeError, JsResult, JsValue, NativeFunction, Source, js_string};
use offpaint_worker::protocol::{Envelope, Inbound, Reply, RequestId, Transferable, WorkerMessage};
use offpaint_worker::SpawnError;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

const WORKER_GLOBALS: &str = r#"
globalThis.self = globalThis;
(() => {
	const listeners = [];
	self.onmessage = null;
	self.addEventListener = (type, listener) => {
		if (type === "message" && typeof listener === "function" && !listeners.includes(listener)) {
			listeners.push(listener);
		}
	};
	self.removeEventListener = (type, listener) => {
		const index = listeners.indexOf(listener);
		if (type === "message" && index !== -1) {
			listeners.splice(index, 1);
		}
	};
	self.postMessage = (data) => __offpaint_post(data);
	self.importScripts = () => {
		throw new Error("importScripts is unavailable in inline workers");
	};
	Object.defineProperty(self, "__offpaint_listener_count", {
		value: () => listeners.length + (typeof self.onmessage === "function" ? 1 : 0),
	});
	Object.defineProperty(self, "__offpaint_dispatch", {
		value: (event) => {
			if (typeof self.onmessage === "function") {
				self.onmessage(event);
			}
			for (const listener of listeners.slice()) {
				listener(event);
			}
		},
	});
})();
"#;

struct Outbox {
	replies: mpsc::UnboundedSender<Reply>,
	current: Option<RequestId>,
	answered: bool,
}

thread_local! {
	static OUTBOX: RefCell<Option<Outbox>> = const { RefCell::new(None) };
}

/// Runs one context until it is terminated or its inbox closes.
pub(crate) fn run(
	address: String,
	body: Arc<str>,
	mut requests: mpsc::UnboundedReceiver<Inbound>,
	replies: mpsc::UnboundedSender<Reply>,
	ready: oneshot::Sender<Result<(), SpawnError>>,
) {
	OUTBOX.with_borrow_mut(|outbox| {
		*outbox = Some(Outbox {
			replies,
			current: None,
			answered: false,
		})
	});

	let mut context = Context::default();
	let loaded = load(&mut context, &body);
	let failed = loaded.is_err();
	if ready.send(loaded).is_err() || failed {
		OUTBOX.with_borrow_mut(|outbox| *outbox = None);
		return;
	}
	tracing::debug!(%address, "script.context.ready");

	let mut handled = 0u64;
	while let Some(inbound) = requests.blocking_recv() {
		match inbound {
			Inbound::Terminate => break,
			Inbound::Request(envelope) => {
				handled += 1;
				dispatch(&mut context, envelope);
			}
		}
	}

	OUTBOX.with_borrow_mut(|outbox| *outbox = None);
	tracing::debug!(%address, handled, "script.context.exit");
}

fn load(context: &mut Context, body: &str) -> Result<(), SpawnError> {
	context
		.register_global_callable(js_string!("__offpaint_post"), 1, NativeFunction::from_fn_ptr(post_message))
		.map_err(|err| script_error(err, context))?;
	context
		.eval(Source::from_bytes(WORKER_GLOBALS.as_bytes()))
		.map_err(|err| script_error(err, context))?;
	context.eval(Source::from_bytes(body.as_bytes())).map_err(|err| script_error(err, context))?;
	let _ = context.run_jobs();

	let listeners = context
		.eval(Source::from_bytes("self.__offpaint_listener_count()".as_bytes()))
		.and_then(|count| count.to_u32(context))
		.map_err(|err| script_error(err, context))?;
	if listeners == 0 {
		return Err(SpawnError::NoListener);
	}
	Ok(())
}

fn script_error(err: JsError, context: &mut Context) -> SpawnError {
	SpawnError::Script(describe(err, context))
}

/// Thrown `Error` objects read as `RangeError: message`; anything else as its display form.
fn describe(err: JsError, context: &mut Context) -> String {
	match err.try_native(context) {
		Ok(native) => native.to_string(),
		Err(_) => err.to_string(),
	}
}

fn dispatch(context: &mut Context, envelope: Envelope) {
	let Envelope { id, message, transfer } = envelope;
	OUTBOX.with_borrow_mut(|outbox| {
		if let Some(outbox) = outbox {
			outbox.current = Some(id);
			outbox.answered = false;
		}
	});

	let delivered = deliver(context, message, transfer).map_err(|err| describe(err, context));
	let _ = context.run_jobs();

	let (answered, replies) = OUTBOX.with_borrow_mut(|outbox| match outbox {
		Some(outbox) => {
			outbox.current = None;
			(outbox.answered, Some(outbox.replies.clone()))
		}
		None => (false, None),
	});
	let Some(replies) = replies else {
		return;
	};

	let reply = match delivered {
		Err(err) if !answered => Reply::err(id, err),
		Err(err) => {
			tracing::warn!(id, error = %err, "script.dispatch.error_after_reply");
			return;
		}
		Ok(()) if !answered => Reply::err(id, "message listener posted no reply"),
		Ok(()) => return,
	};
	tracing::trace!(id, "script.dispatch.failed");
	let _ = replies.send(reply);
}

fn deliver(context: &mut Context, message: WorkerMessage, transfer: Vec<Transferable>) -> JsResult<()> {
	let data = JsValue::from_json(&json!({ "kind": message.kind, "payload": message.payload }), context)?;
	let mut buffers = Vec::with_capacity(transfer.len());
	for buffer in transfer {
		// The engine wants 64-byte aligned storage, so the bytes land in a fresh block.
		let block = AlignedVec::from_iter(0, buffer.into_bytes());
		buffers.push(JsValue::from(JsArrayBuffer::from_byte_block(block, context)?));
	}
	let transfer = JsArray::from_iter(buffers, context);

	let event = ObjectInitializer::new(context)
		.property(js_string!("type"), js_string!("message"), Attribute::all())
		.property(js_string!("data"), data, Attribute::all())
		.property(js_string!("transfer"), transfer, Attribute::all())
		.build();

	let dispatch = context.global_object().get(js_string!("__offpaint_dispatch"), context)?;
	let Some(dispatch) = dispatch.as_callable() else {
		return Err(JsNativeError::typ().with_message("worker dispatch hook is missing").into());
	};
	dispatch.call(&JsValue::undefined(), &[event.into()], context)?;
	Ok(())
}

/// `postMessage` as seen by scripts.
fn post_message(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
	let data = args.first().cloned().unwrap_or_else(JsValue::undefined);
	let value = match data.to_json(context)? {
		Some(value) => integral_numbers(value),
		None => Value::Null,
	};

	OUTBOX.with_borrow_mut(|outbox| {
		let Some(outbox) = outbox else {
			return Err(JsNativeError::typ().with_message("postMessage called outside a worker context").into());
		};
		let reply = match outbox.current {
			Some(id) if !outbox.answered => {
				outbox.answered = true;
				Reply::ok(id, value)
			}
			_ => Reply::unsolicited(value),
		};
		let _ = outbox.replies.send(reply);
		Ok(JsValue::undefined())
	})
}

/// JavaScript has one number type; whole numbers cross back as integers so
/// they deserialize into Rust integer types.
fn integral_numbers(value: Value) -> Value {
	match value {
		Value::Number(number) => match number.as_f64() {
			Some(float) if number.is_f64() && float.fract() == 0.0 && float.abs() < 9_007_199_254_740_992.0 => Value::from(float as i64),
			_ => Value::Number(number),
		},
		Value::Array(items) => Value::Array(items.into_iter().map(integral_numbers).collect()),
		Value::Object(map) => Value::Object(map.into_iter().map(|(key, value)| (key, integral_numbers(value))).collect()),
		other => other,
	}
}
