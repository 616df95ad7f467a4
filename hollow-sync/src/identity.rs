//! Request identity scoping.
//!
//! The service runs as one identity but executes each request as the caller.
//! [`ImpersonationScope`] swaps the active identity in on entry and restores
//! the previous one when dropped, so an early return or panic inside a
//! request handler can never leak the caller's identity into the next
//! request.

use std::sync::Mutex;

use hollow_core::types::Identity;

/// The identity the current thread of work executes under.
#[derive(Debug)]
pub struct IdentityContext {
    current: Mutex<Identity>,
}

impl IdentityContext {
    /// `service_identity` is the identity of the host process itself.
    pub fn new(service_identity: Identity) -> Self {
        Self {
            current: Mutex::new(service_identity),
        }
    }

    pub fn current(&self) -> Identity {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Identity> {
        // Poisoning only marks a panicked writer; the identity value itself
        // is always valid.
        self.current.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn swap(&self, next: Identity) -> Identity {
        std::mem::replace(&mut *self.lock(), next)
    }
}

/// RAII impersonation guard. Restores the previous identity on drop.
#[must_use = "the identity reverts as soon as the scope is dropped"]
pub struct ImpersonationScope<'a> {
    context: &'a IdentityContext,
    previous: Identity,
}

impl<'a> ImpersonationScope<'a> {
    pub fn enter(context: &'a IdentityContext, identity: &Identity) -> Self {
        let previous = context.swap(identity.clone());
        tracing::debug!(identity = %identity, "impersonation scope entered");
        Self { context, previous }
    }
}

impl Drop for ImpersonationScope<'_> {
    fn drop(&mut self) {
        let restored = std::mem::take(&mut self.previous);
        tracing::debug!(identity = %restored, "impersonation scope restored");
        self.context.swap(restored);
    }
}
