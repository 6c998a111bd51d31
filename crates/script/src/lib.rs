//! Script-capable host for the offload pipeline.
//!
//! [`ScriptHost`] realizes background contexts as dedicated threads running an
//! embedded JavaScript engine, fed from in-memory script bodies such as
//! [`RENDER_WORKER_SCRIPT`] or the output of [`bundle_transform`].

mod bundle;
mod context;
mod host;

pub use bundle::{BundledScript, RENDER_WORKER_SCRIPT, ScriptError, bundle_transform};
pub use host::ScriptHost;
