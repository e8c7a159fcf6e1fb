//! Ambient per-invocation security context.
//!
//! Scoped to one tool invocation: the runtime enters the context before
//! dispatching a handler and the guard clears it on drop, so a handler can
//! never observe a stale actor. Event-log construction reads the ambient
//! values unless the caller overrides them explicitly (pre-dispatch
//! failures record the absence of an actor that way).

use std::cell::RefCell;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityContext {
    pub actor_id: String,
    pub authn_method: String,
    pub authorization_result: String,
}

thread_local! {
    static CURRENT: RefCell<Option<SecurityContext>> = const { RefCell::new(None) };
}

/// Clears the ambient context when dropped.
pub struct SecurityContextGuard {
    _private: (),
}

impl Drop for SecurityContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|cell| cell.borrow_mut().take());
    }
}

impl SecurityContext {
    /// Install `self` as the ambient context for the current invocation.
    #[must_use = "the context is cleared when the guard drops"]
    pub fn enter(self) -> SecurityContextGuard {
        CURRENT.with(|cell| *cell.borrow_mut() = Some(self));
        SecurityContextGuard { _private: () }
    }

    /// The ambient context, if one is installed.
    pub fn current() -> Option<SecurityContext> {
        CURRENT.with(|cell| cell.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_scopes_the_context() {
        assert!(SecurityContext::current().is_none());
        {
            let _guard = SecurityContext {
                actor_id: "actor-a".into(),
                authn_method: "header_token".into(),
                authorization_result: "allowed".into(),
            }
            .enter();
            assert_eq!(SecurityContext::current().unwrap().actor_id, "actor-a");
        }
        assert!(SecurityContext::current().is_none());
    }
}
