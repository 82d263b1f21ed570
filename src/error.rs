use crate::handle::ContextHandle;

/// Errors reported by the fallible registry entry points.
///
/// Both variants are caller contract violations; the panicking
/// counterparts (`create_state`, `get_state`) abort the calling thread
/// with the same message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("context {0} already has extension state registered")]
    DuplicateContext(ContextHandle),

    #[error("context {0} has no extension state registered")]
    UnregisteredContext(ContextHandle),
}
