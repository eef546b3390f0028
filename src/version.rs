use crate::error::{WcaError, WcaResult};

/// Revision of the callback table and control surface this backend implements.
/// Bump whenever [`UpdateCallbacks`](crate::callbacks::UpdateCallbacks) changes shape.
pub const API_VERSION: u32 = 1;

/// Compare the caller's compiled-in revision with ours
pub fn check(requested: u32) -> WcaResult<()> {
    if requested == API_VERSION {
        Ok(())
    } else {
        Err(WcaError::VersionMismatch {
            requested,
            implemented: API_VERSION,
        })
    }
}
