//! Debug-only registry lock reentrancy detector.
//!
//! No extension code runs while a registry lock is held: factories run
//! before insertion and extension objects are dropped after the lock is
//! released. Taking a registry lock on a thread that already holds one
//! would deadlock; in debug builds entering twice panics instead. In
//! release builds this compiles to a zero-cost no-op.

#[cfg(debug_assertions)]
use core::cell::Cell;
use core::marker::PhantomData;

#[cfg(debug_assertions)]
thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Enter a locked registry section. Call before taking the lock so a
/// nested attempt panics rather than blocking forever.
#[inline]
pub(crate) fn enter() -> ReentrancyGuard {
    #[cfg(debug_assertions)]
    {
        // Lookups from TLS destructors may run after DEPTH is gone.
        let _ = DEPTH.try_with(|d| {
            assert!(
                d.get() == 0,
                "reentrancy detected: registry lock taken while already held"
            );
            d.set(d.get() + 1);
        });
    }
    ReentrancyGuard {
        _nosend: PhantomData,
    }
}

/// RAII guard returned by `enter`.
pub(crate) struct ReentrancyGuard {
    // Must be dropped on the thread that entered.
    _nosend: PhantomData<*mut ()>,
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let _ = DEPTH.try_with(|d| {
                debug_assert!(d.get() > 0);
                d.set(d.get().saturating_sub(1));
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::enter;

    #[test]
    fn enter_and_exit_is_ok() {
        let g = enter();
        drop(g);
        let _again = enter();
    }

    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_in_debug() {
        let res = std::panic::catch_unwind(|| {
            let _g1 = enter();
            // Re-entering should panic in debug builds
            let _g2 = enter();
        });
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
        // The outer guard unwound, so this thread can enter again.
        let _g = enter();
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn reentrancy_noop_in_release() {
        let _g1 = enter();
        let _g2 = enter();
    }
}
