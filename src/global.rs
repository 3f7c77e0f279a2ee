//! The process-wide context slot.

use once_cell::sync::OnceCell;

use crate::{context::PlatformContext, error::BootstrapError};

static CONTEXT: OnceCell<PlatformContext> = OnceCell::new();

/// Publish `context` for the rest of the process. Only the first call wins.
pub fn install(context: PlatformContext) -> Result<&'static PlatformContext, BootstrapError> {
    CONTEXT
        .set(context)
        .map_err(|_| BootstrapError::AlreadyInstalled)?;
    CONTEXT.get().ok_or(BootstrapError::AlreadyInstalled)
}

pub fn current() -> Option<&'static PlatformContext> {
    CONTEXT.get()
}
