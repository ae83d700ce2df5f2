//! # Perlbridge ABI
//!
//! The embedding boundary between a host program and an embedded Perl
//! interpreter.
//!
//! ## Overview
//!
//! Everything the bridge needs from the interpreter is expressed by the
//! [`EmbeddingApi`] trait: construct and destruct the interpreter, evaluate
//! source, call subroutines, read and write scalars, arrays and hashes,
//! adjust reference counts and fetch the pending error. The trait speaks in
//! [`RawSv`] values, which are unowned cell addresses; higher layers are
//! responsible for pairing every increment with a decrement.
//!
//! ## Ownership Convention
//!
//! - Every `RawSv` *returned* by the API carries one reference count that
//!   now belongs to the caller.
//! - Every `RawSv` *passed* to the API is borrowed. Stores copy the value
//!   into a fresh cell, so the caller keeps its own stake.
//!
//! ## Module Structure
//!
//! - [`raw`]: raw cell addresses, kinds, flags and call descriptors
//! - [`api`]: the `EmbeddingApi` trait
//! - [`error`]: error type returned across the boundary
//! - [`reference`]: an in-process interpreter implementing the trait

pub mod api;
pub mod error;
pub mod raw;
pub mod reference;

// Re-export main types for convenience
pub use api::EmbeddingApi;
pub use error::{AbiError, AbiResult};
pub use raw::{CallContext, CallTarget, Capabilities, CellKind, RawSv, ScalarFlags};
pub use reference::{Died, Literal, NativeResult, PackageDef, ReferenceInterpreter, SubContext};
