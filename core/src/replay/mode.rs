//! Replay mode: an ambient, dynamically-scoped "no live calls" flag.
//!
//! The flag is bound to the current thread, not the process. A scope is
//! acquired with [`replay_mode`] and released when the returned guard
//! drops, on every exit path, panics included. Nested scopes stack; the
//! innermost run id is current. Tool and model adapters call
//! [`guard_live_call`] before touching the outside world; inside a scope
//! the guard fails with a determinism violation instead of letting the
//! call proceed.

use std::cell::RefCell;
use std::marker::PhantomData;

use super::ReplayError;

thread_local! {
    static SCOPES: RefCell<Vec<Option<String>>> = const { RefCell::new(Vec::new()) };
}

/// Scope guard returned by [`replay_mode`]. Dropping it restores the
/// previous replay-mode state. Deliberately `!Send`: a scope belongs to the
/// thread that opened it.
#[derive(Debug)]
pub struct ReplayModeGuard {
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for ReplayModeGuard {
    fn drop(&mut self) {
        // try_with: the thread-local may already be gone during thread
        // teardown, which counts as released.
        let _ = SCOPES.try_with(|scopes| {
            scopes.borrow_mut().pop();
        });
    }
}

/// Enter replay mode for the dynamic extent of the returned guard.
#[must_use]
pub fn replay_mode(run_id: Option<&str>) -> ReplayModeGuard {
    SCOPES.with(|scopes| {
        scopes.borrow_mut().push(run_id.map(String::from));
    });
    ReplayModeGuard {
        _thread_bound: PhantomData,
    }
}

/// Whether the caller is inside any replay-mode scope.
#[must_use]
pub fn is_replay_mode_active() -> bool {
    SCOPES.with(|scopes| !scopes.borrow().is_empty())
}

/// The innermost scope's run id, if a scope is active and carries one.
#[must_use]
pub fn current_replay_run_id() -> Option<String> {
    SCOPES.with(|scopes| scopes.borrow().last().cloned().flatten())
}

/// Guard a live external call.
///
/// # Errors
///
/// Fails with [`ReplayError::DeterminismViolation`] iff called within the
/// dynamic extent of a [`replay_mode`] scope.
pub fn guard_live_call(op_name: &str) -> Result<(), ReplayError> {
    if is_replay_mode_active() {
        return Err(ReplayError::DeterminismViolation {
            run_id: current_replay_run_id().unwrap_or_else(|| "unknown".to_string()),
            op_name: op_name.to_string(),
            subtype: "live_call_during_replay",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // A stand-in tool adapter: succeeds outside replay mode, fails inside.
    fn tool() -> Result<&'static str, ReplayError> {
        guard_live_call("tool")?;
        Ok("live result")
    }

    #[test]
    fn guard_passes_outside_scope() {
        assert_eq!(tool().unwrap(), "live result");
    }

    #[test]
    fn guard_fails_inside_scope_and_recovers_after() {
        assert!(tool().is_ok());
        {
            let _scope = replay_mode(Some("run-X"));
            let err = tool().unwrap_err();
            match &err {
                ReplayError::DeterminismViolation {
                    run_id,
                    op_name,
                    subtype,
                } => {
                    assert_eq!(run_id, "run-X");
                    assert_eq!(op_name, "tool");
                    assert_eq!(*subtype, "live_call_during_replay");
                }
                other => panic!("expected DeterminismViolation, got {other:?}"),
            }
            let message = err.to_string();
            assert!(message.contains("run-X"));
            assert!(message.contains("tool"));
        }
        assert!(tool().is_ok());
    }

    #[test]
    fn scope_without_run_id_reports_unknown() {
        let _scope = replay_mode(None);
        let err = tool().unwrap_err();
        assert!(matches!(
            err,
            ReplayError::DeterminismViolation { ref run_id, .. } if run_id == "unknown"
        ));
    }

    #[test]
    fn nested_scopes_stack_innermost_wins() {
        let _outer = replay_mode(Some("outer"));
        assert_eq!(current_replay_run_id().as_deref(), Some("outer"));
        {
            let _inner = replay_mode(Some("inner"));
            assert_eq!(current_replay_run_id().as_deref(), Some("inner"));
        }
        assert_eq!(current_replay_run_id().as_deref(), Some("outer"));
        assert!(is_replay_mode_active());
    }

    #[test]
    fn scope_released_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _scope = replay_mode(Some("doomed"));
            panic!("executor exploded");
        });
        assert!(result.is_err());
        assert!(!is_replay_mode_active(), "scope must unwind with the panic");
        assert!(tool().is_ok());
    }

    #[test]
    fn scopes_are_thread_local() {
        let _scope = replay_mode(Some("main-thread"));
        let handle = std::thread::spawn(|| is_replay_mode_active());
        assert!(!handle.join().unwrap(), "other threads see their own state");
        assert!(is_replay_mode_active());
    }
}
