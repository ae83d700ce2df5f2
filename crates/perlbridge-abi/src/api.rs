//! The Embedding API
//!
//! A fixed contract mirroring the interpreter's C embedding surface
//! (`perl_construct`, `call_sv`, `sv_setsv`, `av_fetch`, `hv_store`,
//! `SvREFCNT_inc`, `ERRSV`, ...). Implementations never change what the
//! bridge asked for; they only carry it out.
//!
//! See the crate documentation for the ownership convention every method
//! follows.

use crate::error::AbiResult;
use crate::raw::{CallContext, CallTarget, Capabilities, CellKind, RawSv, ScalarFlags};

/// Operations the bridge consumes from an embedded interpreter.
///
/// Every method other than [`construct`](EmbeddingApi::construct),
/// [`capabilities`](EmbeddingApi::capabilities) and
/// [`is_constructed`](EmbeddingApi::is_constructed) fails with
/// [`AbiError::NotConstructed`](crate::AbiError::NotConstructed) when no
/// interpreter is alive.
pub trait EmbeddingApi {
    // ------------------------------------------------------------------
    // Interpreter lifecycle
    // ------------------------------------------------------------------

    /// What this interpreter build supports
    fn capabilities(&self) -> Capabilities;

    /// Allocate, construct and parse the interpreter with a command line.
    ///
    /// `-I<dir>` arguments extend the module search path.
    fn construct(&mut self, args: &[String]) -> AbiResult<()>;

    /// Destruct and free the interpreter. Every outstanding cell dies.
    fn destruct(&mut self);

    /// Whether an interpreter is currently alive
    fn is_constructed(&self) -> bool;

    // ------------------------------------------------------------------
    // Code
    // ------------------------------------------------------------------

    /// Evaluate source text
    fn eval(&mut self, source: &str, context: CallContext) -> AbiResult<Vec<RawSv>>;

    /// Load a package by name (`require Foo::Bar`)
    fn require(&mut self, package: &str) -> AbiResult<()>;

    /// Invoke a subroutine or method
    fn call(
        &mut self,
        target: CallTarget<'_>,
        args: &[RawSv],
        context: CallContext,
    ) -> AbiResult<Vec<RawSv>>;

    /// Take the pending error (`$@`) if it is true, clearing it
    fn take_error(&mut self) -> AbiResult<Option<RawSv>>;

    // ------------------------------------------------------------------
    // Reference counts
    // ------------------------------------------------------------------

    /// Add one reference
    fn refcnt_inc(&mut self, sv: RawSv) -> AbiResult<()>;

    /// Drop one reference, freeing the cell when it reaches zero
    fn refcnt_dec(&mut self, sv: RawSv) -> AbiResult<()>;

    /// Current reference count
    fn refcnt(&self, sv: RawSv) -> AbiResult<usize>;

    // ------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------

    /// Runtime type tag of a cell
    fn kind(&self, sv: RawSv) -> AbiResult<CellKind>;

    /// Validity flags of a scalar
    fn flags(&self, sv: RawSv) -> AbiResult<ScalarFlags>;

    /// Integer value, with numeric coercion (`SvIV`)
    fn iv(&self, sv: RawSv) -> AbiResult<i64>;

    /// Floating-point value, with numeric coercion (`SvNV`)
    fn nv(&self, sv: RawSv) -> AbiResult<f64>;

    /// String bytes, with string coercion (`SvPV`)
    fn pv(&self, sv: RawSv) -> AbiResult<Vec<u8>>;

    /// New undefined scalar
    fn new_undef(&mut self) -> AbiResult<RawSv>;

    /// New boolean scalar
    fn new_bool(&mut self, value: bool) -> AbiResult<RawSv>;

    /// New integer scalar
    fn new_iv(&mut self, value: i64) -> AbiResult<RawSv>;

    /// New floating-point scalar
    fn new_nv(&mut self, value: f64) -> AbiResult<RawSv>;

    /// New string scalar; `utf8` marks the bytes as encoded text
    fn new_pv(&mut self, bytes: &[u8], utf8: bool) -> AbiResult<RawSv>;

    /// Copy the value of `src` into the scalar `dst` (`sv_setsv`)
    fn sv_set(&mut self, dst: RawSv, src: RawSv) -> AbiResult<()>;

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    /// New reference pointing at `target` (`newRV_inc`)
    fn new_rv(&mut self, target: RawSv) -> AbiResult<RawSv>;

    /// The cell a reference points at (`SvRV`)
    fn deref(&mut self, rv: RawSv) -> AbiResult<RawSv>;

    /// Class a reference's target is blessed into, if any
    fn blessed(&self, rv: RawSv) -> AbiResult<Option<String>>;

    /// Stable identity: the target's address for references, else the
    /// cell's own address
    fn identity(&self, sv: RawSv) -> AbiResult<u64>;

    // ------------------------------------------------------------------
    // Arrays
    // ------------------------------------------------------------------

    /// New empty array body
    fn new_av(&mut self) -> AbiResult<RawSv>;

    /// Number of elements
    fn av_len(&self, av: RawSv) -> AbiResult<usize>;

    /// Element at `index`, or `None` past the end
    fn av_fetch(&mut self, av: RawSv, index: usize) -> AbiResult<Option<RawSv>>;

    /// Store a copy of `value` at `index`, extending with undef as needed
    fn av_store(&mut self, av: RawSv, index: usize, value: RawSv) -> AbiResult<()>;

    /// Remove and return the last element
    fn av_pop(&mut self, av: RawSv) -> AbiResult<Option<RawSv>>;

    /// Remove every element
    fn av_clear(&mut self, av: RawSv) -> AbiResult<()>;

    // ------------------------------------------------------------------
    // Hashes
    // ------------------------------------------------------------------

    /// New empty hash body
    fn new_hv(&mut self) -> AbiResult<RawSv>;

    /// Number of keys
    fn hv_len(&self, hv: RawSv) -> AbiResult<usize>;

    /// Value stored under `key`
    fn hv_fetch(&mut self, hv: RawSv, key: &str) -> AbiResult<Option<RawSv>>;

    /// Store a copy of `value` under `key`
    fn hv_store(&mut self, hv: RawSv, key: &str, value: RawSv) -> AbiResult<()>;

    /// Remove `key`, returning its value
    fn hv_delete(&mut self, hv: RawSv, key: &str) -> AbiResult<Option<RawSv>>;

    /// Whether `key` is present
    fn hv_exists(&self, hv: RawSv, key: &str) -> AbiResult<bool>;

    /// Remove every key
    fn hv_clear(&mut self, hv: RawSv) -> AbiResult<()>;

    /// Reset the hash's iterator (`hv_iterinit`)
    fn hv_iter_init(&mut self, hv: RawSv) -> AbiResult<()>;

    /// Advance the hash's iterator (`hv_iternext`)
    fn hv_iter_next(&mut self, hv: RawSv) -> AbiResult<Option<(String, RawSv)>>;

    // ------------------------------------------------------------------
    // Symbol table
    // ------------------------------------------------------------------

    /// Package scalar `$name`, created on demand when `create` is set
    fn get_sv(&mut self, name: &str, create: bool) -> AbiResult<Option<RawSv>>;

    /// Package array `@name`
    fn get_av(&mut self, name: &str, create: bool) -> AbiResult<Option<RawSv>>;

    /// Package hash `%name`
    fn get_hv(&mut self, name: &str, create: bool) -> AbiResult<Option<RawSv>>;

    /// Subroutine `&name`
    fn get_cv(&mut self, name: &str) -> AbiResult<Option<RawSv>>;
}
