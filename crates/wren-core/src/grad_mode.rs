// Grad mode — Scoped switch for graph recording
//
// Operations consult `is_grad_enabled()` before wiring parents and a backward
// closure onto their result. Inside a `no_grad()` scope results come out as
// plain leaves regardless of whether their operands require gradients.
//
// The flag is thread-local and every guard remembers the value it replaced,
// so scopes nest correctly:
//
//   let _outer = no_grad();        // disabled
//   {
//       let _inner = enable_grad(); // enabled again
//   }                               // back to disabled
//   drop(_outer);                   // back to enabled
//
// Restoration happens in Drop, so early returns and `?` inside the scope
// cannot leave the flag flipped.

use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether operations on this thread currently record the autograd graph.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|g| g.get())
}

fn set_grad_enabled(enabled: bool) -> bool {
    GRAD_ENABLED.with(|g| g.replace(enabled))
}

/// Restores the previous grad mode when dropped.
#[must_use = "grad mode is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct GradModeGuard {
    prev: bool,
}

impl GradModeGuard {
    fn new(enabled: bool) -> Self {
        let prev = set_grad_enabled(enabled);
        log::trace!("grad mode: {} -> {}", prev, enabled);
        GradModeGuard { prev }
    }
}

impl Drop for GradModeGuard {
    fn drop(&mut self) {
        set_grad_enabled(self.prev);
    }
}

/// Disable graph recording until the returned guard is dropped.
pub fn no_grad() -> GradModeGuard {
    GradModeGuard::new(false)
}

/// Enable graph recording until the returned guard is dropped.
pub fn enable_grad() -> GradModeGuard {
    GradModeGuard::new(true)
}

/// Run `f` with graph recording disabled.
pub fn with_no_grad<F, T>(f: F) -> T
where
    F: FnOnce() -> T,
{
    let _guard = no_grad();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_enabled() {
        assert!(is_grad_enabled());
    }

    #[test]
    fn test_nested_scopes_restore() {
        {
            let _outer = no_grad();
            assert!(!is_grad_enabled());
            {
                let _inner = no_grad();
                assert!(!is_grad_enabled());
            }
            // Inner exit must not re-enable
            assert!(!is_grad_enabled());
            {
                let _on = enable_grad();
                assert!(is_grad_enabled());
            }
            assert!(!is_grad_enabled());
        }
        assert!(is_grad_enabled());
    }

    #[test]
    fn test_restored_on_early_return() {
        fn fails() -> Result<(), ()> {
            let _guard = no_grad();
            Err::<(), ()>(())?;
            Ok(())
        }
        assert!(fails().is_err());
        assert!(is_grad_enabled());
    }

    #[test]
    fn test_with_no_grad() {
        let seen = with_no_grad(is_grad_enabled);
        assert!(!seen);
        assert!(is_grad_enabled());
    }

    #[test]
    fn test_thread_local() {
        let _guard = no_grad();
        let other = std::thread::spawn(is_grad_enabled).join().unwrap();
        assert!(other);
    }
}
