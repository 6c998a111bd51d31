/// Kinds of work the offload pipeline schedules off the caller's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Spawns a worker-backed executor's context, detached from any one caller.
	ContextSetup,
	/// Routes replies from a background context back to waiting callers.
	ReplyPump,
	/// Delivers buffered long-task samples to monitor subscribers.
	MonitorFlush,
	/// Dedicated thread owning one isolated background context.
	RenderContext,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::ContextSetup => "context_setup",
			Self::ReplyPump => "reply_pump",
			Self::MonitorFlush => "monitor_flush",
			Self::RenderContext => "render_context",
		}
	}
}
