//! Foreign Handle Lifetime Management
//!
//! A [`ForeignHandle`] owns exactly one reference count on an interpreter
//! cell. Creating a handle either adopts a count the embedding API already
//! returned, or adds one; dropping it gives the count back.
//!
//! ## Design Notes
//!
//! - Cloning adds one reference, so every clone drops independently
//! - Handles keep their session's core alive; a handle that outlives
//!   `shutdown()` releases nothing when it drops
//! - Handles are `!Send`: the interpreter is driven from one thread

use std::fmt;
use std::rc::Rc;

use perlbridge_abi::{CellKind, RawSv, ScalarFlags};
use tracing::trace;

use crate::error::BridgeResult;
use crate::session::SessionCore;
use crate::translate::boundary;

// ============================================================================
// ForeignHandle
// ============================================================================

/// An owned reference to an interpreter cell.
pub struct ForeignHandle {
    core: Rc<SessionCore>,
    raw: RawSv,
}

impl ForeignHandle {
    /// Take ownership of a reference count the caller already holds
    pub(crate) fn adopt(core: &Rc<SessionCore>, raw: RawSv) -> Self {
        core.handle_acquired();
        trace!(sv = %raw, "adopted foreign reference");
        Self {
            core: Rc::clone(core),
            raw,
        }
    }

    /// The underlying cell
    pub fn raw(&self) -> RawSv {
        self.raw
    }

    pub(crate) fn core(&self) -> &Rc<SessionCore> {
        &self.core
    }

    /// Check whether this handle belongs to the given session core
    pub(crate) fn belongs_to(&self, core: &Rc<SessionCore>) -> bool {
        Rc::ptr_eq(&self.core, core)
    }

    /// Current reference count of the cell, this handle included
    pub fn refcount(&self) -> BridgeResult<usize> {
        boundary(&self.core, "refcount", |api| api.refcnt(self.raw))
    }

    /// Kind of the cell
    pub fn kind(&self) -> BridgeResult<CellKind> {
        boundary(&self.core, "kind", |api| api.kind(self.raw))
    }

    /// Scalar flags of the cell
    pub fn flags(&self) -> BridgeResult<ScalarFlags> {
        boundary(&self.core, "flags", |api| api.flags(self.raw))
    }

    /// Identity of the cell, or of the referent for references
    pub fn identity(&self) -> BridgeResult<u64> {
        boundary(&self.core, "identity", |api| api.identity(self.raw))
    }

    /// Give up ownership without releasing the reference count
    pub fn into_raw(self) -> RawSv {
        // The extra count stays with the caller once `self` drops.
        self.core.retain(self.raw);
        self.raw
    }
}

impl Clone for ForeignHandle {
    fn clone(&self) -> Self {
        self.core.retain(self.raw);
        Self::adopt(&self.core, self.raw)
    }
}

impl Drop for ForeignHandle {
    fn drop(&mut self) {
        self.core.handle_released();
        self.core.release(self.raw);
    }
}

impl fmt::Debug for ForeignHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignHandle({})", self.raw)
    }
}

// ============================================================================
// Adopt
// ============================================================================

/// Wrap raw embedding API results into owned handles.
///
/// Every `RawSv` an API call returns carries one reference count for the
/// caller; adoption hands it to a handle before anything else can fail.
pub(crate) trait Adopt {
    type Owned;

    fn adopt(self, core: &Rc<SessionCore>) -> Self::Owned;
}

impl Adopt for RawSv {
    type Owned = ForeignHandle;

    fn adopt(self, core: &Rc<SessionCore>) -> ForeignHandle {
        ForeignHandle::adopt(core, self)
    }
}

impl Adopt for Option<RawSv> {
    type Owned = Option<ForeignHandle>;

    fn adopt(self, core: &Rc<SessionCore>) -> Option<ForeignHandle> {
        self.map(|raw| ForeignHandle::adopt(core, raw))
    }
}

impl Adopt for Vec<RawSv> {
    type Owned = Vec<ForeignHandle>;

    fn adopt(self, core: &Rc<SessionCore>) -> Vec<ForeignHandle> {
        self.into_iter()
            .map(|raw| ForeignHandle::adopt(core, raw))
            .collect()
    }
}

impl Adopt for Option<(String, RawSv)> {
    type Owned = Option<(String, ForeignHandle)>;

    fn adopt(self, core: &Rc<SessionCore>) -> Option<(String, ForeignHandle)> {
        self.map(|(key, raw)| (key, ForeignHandle::adopt(core, raw)))
    }
}

macro_rules! adopt_plain {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Adopt for $ty {
                type Owned = $ty;

                fn adopt(self, _core: &Rc<SessionCore>) -> $ty {
                    self
                }
            }
        )*
    };
}

adopt_plain!(
    (),
    bool,
    usize,
    u64,
    i64,
    f64,
    Vec<u8>,
    CellKind,
    ScalarFlags,
    Option<String>,
);
