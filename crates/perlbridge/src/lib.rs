//! # Perlbridge
//!
//! Embed a Perl interpreter in a Rust program: load packages, call
//! subroutines and methods, and move values in both directions while both
//! runtimes keep their own memory management intact.
//!
//! ## Overview
//!
//! - Value conversion between [`HostValue`] and interpreter scalars
//! - Lazy container bridges over Perl arrays and hashes
//! - Reference-count-correct handles for every cell the host holds
//! - Callables and object proxies with late-bound method dispatch
//! - Perl `die` values surfaced as [`BridgeError::ForeignRuntime`]
//!
//! ## Design Goals
//!
//! 1. **Exact reference counts**: every [`ForeignHandle`] is one increment,
//!    released exactly once when it drops
//! 2. **No eager copies**: arrays and hashes stay in the interpreter until
//!    the host asks for a copy
//! 3. **No swallowed errors**: every boundary call checks `$@`
//! 4. **Explicit lifecycle**: a [`Session`] moves from uninitialized to
//!    initialized to shut down, and never back
//!
//! ## Example
//!
//! ```
//! use perlbridge::{HostValue, Session};
//! use perlbridge_abi::{PackageDef, ReferenceInterpreter};
//!
//! let perl = ReferenceInterpreter::new().provide(
//!     PackageDef::new("Calc").sub("add", |cx| {
//!         let sum = cx.int_arg(0) + cx.int_arg(1);
//!         Ok(vec![cx.int(sum)])
//!     }),
//! );
//! let session = Session::new(perl);
//! let calc = session.load("Calc").unwrap();
//! let result = calc.call("add", &[2.into(), 3.into()]).unwrap();
//! assert_eq!(result, vec![HostValue::Int(5)]);
//! ```
//!
//! ## Module Structure
//!
//! - [`session`]: interpreter session and its lifecycle
//! - [`handle`]: reference-counted handles to interpreter cells
//! - [`value`]: the host-side value representation
//! - [`convert`]: conversion between host values and interpreter cells
//! - [`container`]: array and hash bridges
//! - [`callable`]: subroutine and method callables
//! - [`object`]: proxies for blessed references
//! - [`package`]: namespace accessor returned by `load`
//! - [`translate`]: error translation at the boundary
//! - [`config`]: session configuration
//! - [`error`]: error types

pub mod callable;
pub mod config;
pub mod container;
pub mod convert;
pub mod error;
pub mod handle;
pub mod object;
pub mod package;
pub mod session;
pub mod translate;
pub mod value;

// Re-export main types for convenience
pub use callable::CallableBridge;
pub use config::SessionConfig;
pub use container::{ArrayBridge, ContainerBridge, ContainerKey, HashBridge};
pub use convert::FromHost;
pub use error::{BridgeError, BridgeResult};
pub use handle::ForeignHandle;
pub use object::ObjectProxy;
pub use package::Package;
pub use session::{Session, SessionState};
pub use value::HostValue;
