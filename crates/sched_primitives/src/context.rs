// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Captures ambient context (permissions, tracing scope, ...) at the point
/// where work is handed off for deferred execution.
///
/// The coordination layer calls [`ContextCapture::capture`] when a work item
/// is enqueued, carries the captured value with the item, and calls
/// [`CapturedContext::restore`] on the executing thread immediately before
/// running user code. Hosts without an ambient context use [`NoContext`].
pub trait ContextCapture: Send + Sync {
    /// Captures the current thread's ambient context.
    fn capture(&self) -> Box<dyn CapturedContext>;
}

/// A snapshot of ambient context, restorable on another thread.
pub trait CapturedContext: Send {
    /// Re-establishes the captured context on the current thread.
    fn restore(&self);
}

/// The no-op context capture, for hosts without an ambient context.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ContextCapture for NoContext {
    fn capture(&self) -> Box<dyn CapturedContext> {
        Box::new(Self)
    }
}

impl CapturedContext for NoContext {
    fn restore(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(NoContext: Send, Sync);
    }

    #[test]
    fn no_context_round_trip() {
        let captured = NoContext.capture();
        captured.restore();
    }
}
