//! Write-once runtime configuration
//!
//! Two process-wide values exist: the tag sigil the lexer scans for, and the
//! default entity registry a render falls back to when the host passes none.
//! Both are sealed at the first render - concretely, when a [`VarStack`]
//! first borrows the default registry. Setters validate eagerly and return a
//! result; after sealing they warn and leave the configuration untouched.
//!
//! [`VarStack`]: crate::stack::VarStack

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::entities::Entities;
use crate::error::{EngineError, Result};

/// The default tag sigil
pub const DEFAULT_SIGIL: char = '#';

static SEALED: AtomicBool = AtomicBool::new(false);
static SIGIL: AtomicU32 = AtomicU32::new(DEFAULT_SIGIL as u32);
static ENTITIES: Lazy<RwLock<Arc<Entities>>> =
    Lazy::new(|| RwLock::new(Arc::new(Entities::new())));

/// The configured tag sigil
pub fn sigil() -> char {
    char::from_u32(SIGIL.load(Ordering::Acquire)).unwrap_or(DEFAULT_SIGIL)
}

/// Set the tag sigil. Validation failure at the initial bind is an error;
/// so is any attempt after sealing.
pub fn set_sigil(sigil: char) -> Result<()> {
    validate_sigil(sigil)?;
    if is_sealed() {
        warn!(%sigil, "ignored sigil change after seal");
        return Err(EngineError::Sealed { setting: "sigil" });
    }
    SIGIL.store(sigil as u32, Ordering::Release);
    Ok(())
}

fn validate_sigil(sigil: char) -> Result<()> {
    if !sigil.is_ascii_graphic() {
        return Err(EngineError::InvalidSigil {
            got: sigil,
            reason: "must be a printable ASCII character",
        });
    }
    if sigil.is_ascii_alphanumeric() || sigil == '_' {
        return Err(EngineError::InvalidSigil {
            got: sigil,
            reason: "would be ambiguous with identifiers",
        });
    }
    if matches!(sigil, '"' | '\'') {
        return Err(EngineError::InvalidSigil {
            got: sigil,
            reason: "would be ambiguous with string literals",
        });
    }
    Ok(())
}

/// The process-default entity registry
pub fn entities() -> Arc<Entities> {
    ENTITIES.read().clone()
}

/// Replace the process-default entity registry. Errors after sealing.
pub fn set_entities(entities: Entities) -> Result<()> {
    if is_sealed() {
        warn!("ignored registry change after seal");
        return Err(EngineError::Sealed { setting: "entities" });
    }
    *ENTITIES.write() = Arc::new(entities);
    Ok(())
}

/// Seal the configuration. Called by the renderer at first use; idempotent.
pub fn seal() {
    if !SEALED.swap(true, Ordering::AcqRel) {
        debug!(sigil = %sigil(), "runtime configuration sealed");
    }
}

pub fn is_sealed() -> bool {
    SEALED.load(Ordering::Acquire)
}

/// The first borrow of the default registry by a render seals the
/// configuration.
pub(crate) fn seal_and_borrow() -> Arc<Entities> {
    seal();
    entities()
}
