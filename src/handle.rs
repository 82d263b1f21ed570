//! Opaque identifiers for externally-owned contexts.

use core::fmt;
use core::num::NonZeroUsize;

/// Address-sized identifier of a host context.
///
/// The registry only ever compares and hashes handles; it never
/// dereferences them. A handle is unique only while the context it was
/// taken from is alive; once that context is gone its address may be
/// handed out again to an unrelated context.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ContextHandle(NonZeroUsize);

impl ContextHandle {
    /// Handle for the context behind `ctx`.
    ///
    /// Zero-sized context types have no distinct addresses, so handles
    /// taken from different zero-sized values cannot be told apart.
    pub fn from_ref<T: ?Sized>(ctx: &T) -> Self {
        let addr = ctx as *const T as *const () as usize;
        // References are never null.
        Self(NonZeroUsize::new(addr).unwrap_or(NonZeroUsize::MIN))
    }

    /// Handle for a raw context pointer; `None` for null.
    pub fn from_ptr<T: ?Sized>(ptr: *const T) -> Option<Self> {
        Self::from_addr(ptr as *const () as usize)
    }

    /// Handle for a raw address; `None` for zero.
    pub const fn from_addr(addr: usize) -> Option<Self> {
        match NonZeroUsize::new(addr) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    #[inline]
    pub const fn addr(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextHandle({:#x})", self.0.get())
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}
