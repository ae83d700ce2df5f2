//! Native Subroutines
//!
//! Subroutines of the reference interpreter are Rust closures receiving a
//! [`SubContext`]. The context plays the role of Perl's argument stack and
//! mortal temporaries: every cell a closure creates or fetches through it is
//! released when the call frame ends, and returned values are copied out.

use smol_str::SmolStr;

use crate::error::AbiError;
use crate::raw::{CallContext, CallTarget, CellKind, RawSv};
use crate::reference::heap::{Body, Heap, Scalar};

/// A `die` raised by native code, carrying the error value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Died(pub(crate) RawSv);

impl Died {
    /// The value passed to `die`
    pub fn value(&self) -> RawSv {
        self.0
    }
}

/// Outcome of a native subroutine: its return list or a `die`
pub type NativeResult = Result<Vec<RawSv>, Died>;

/// Signature of a native subroutine body
pub type NativeFn = dyn Fn(&mut SubContext<'_>) -> NativeResult;

/// Signature of a source evaluator hook
pub type EvalFn = dyn Fn(&mut SubContext<'_>, &str) -> NativeResult;

/// Call frame handed to native subroutines.
pub struct SubContext<'h> {
    heap: &'h mut Heap,
    name: SmolStr,
    args: Vec<RawSv>,
    context: CallContext,
    mortals: Vec<u64>,
}

impl<'h> SubContext<'h> {
    pub(crate) fn new(heap: &'h mut Heap, name: SmolStr, args: Vec<RawSv>, context: CallContext) -> Self {
        Self {
            heap,
            name,
            args,
            context,
            mortals: Vec::new(),
        }
    }

    pub(crate) fn into_mortals(self) -> Vec<u64> {
        self.mortals
    }

    fn mortal(&mut self, id: u64) -> RawSv {
        self.mortals.push(id);
        RawSv::from_bits(id)
    }

    /// Turn a heap failure into a `die`
    fn fail(&mut self, err: AbiError) -> Died {
        let message = err.to_string();
        self.die(message)
    }

    // ------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------

    /// Fully-qualified name of the running subroutine
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments (`@_`), invocant first for method calls
    pub fn args(&self) -> &[RawSv] {
        &self.args
    }

    /// Argument at `index`
    pub fn arg(&self, index: usize) -> Option<RawSv> {
        self.args.get(index).copied()
    }

    /// Requested return context (`wantarray`)
    pub fn wantarray(&self) -> CallContext {
        self.context
    }

    /// Argument numified as an integer; missing arguments read as 0
    pub fn int_arg(&self, index: usize) -> i64 {
        self.arg(index)
            .and_then(|sv| self.heap.iv(sv.bits()).ok())
            .unwrap_or(0)
    }

    /// Argument numified as a float; missing arguments read as 0
    pub fn num_arg(&self, index: usize) -> f64 {
        self.arg(index)
            .and_then(|sv| self.heap.nv(sv.bits()).ok())
            .unwrap_or(0.0)
    }

    /// Argument stringified; missing arguments read as ""
    pub fn str_arg(&self, index: usize) -> String {
        self.arg(index)
            .map(|sv| self.str_of(sv))
            .unwrap_or_default()
    }

    /// Use a cell as a number, caching the numeric value on strings
    pub fn numify(&mut self, sv: RawSv) -> f64 {
        self.heap.numify(sv.bits()).unwrap_or(0.0)
    }

    /// Number of cells alive in the interpreter, temporaries included
    pub fn live_cells(&self) -> usize {
        self.heap.live_cells()
    }

    /// Stringify any cell
    pub fn str_of(&self, sv: RawSv) -> String {
        self.heap
            .pv(sv.bits())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }

    /// Runtime kind of a cell
    pub fn kind_of(&self, sv: RawSv) -> Option<CellKind> {
        self.heap.kind(sv.bits()).ok()
    }

    /// Class a reference is blessed into
    pub fn class_of(&self, sv: RawSv) -> Option<String> {
        self.heap
            .blessed(sv.bits())
            .ok()
            .flatten()
            .map(|class| class.to_string())
    }

    /// Whether `class` is `parent` or inherits from it through `@ISA`
    pub fn derives_from(&self, class: &str, parent: &str) -> bool {
        self.heap.derives_from(class, parent)
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// New undefined scalar
    pub fn undef(&mut self) -> RawSv {
        let id = self.heap.new_scalar(Scalar::default());
        self.mortal(id)
    }

    /// New integer scalar
    pub fn int(&mut self, value: i64) -> RawSv {
        let id = self.heap.new_scalar(Scalar::int(value));
        self.mortal(id)
    }

    /// New floating-point scalar
    pub fn num(&mut self, value: f64) -> RawSv {
        let id = self.heap.new_scalar(Scalar::num(value));
        self.mortal(id)
    }

    /// New text scalar
    pub fn string(&mut self, value: &str) -> RawSv {
        let id = self.heap.new_scalar(Scalar::string(value.as_bytes(), true));
        self.mortal(id)
    }

    /// New byte-string scalar
    pub fn bytes(&mut self, value: &[u8]) -> RawSv {
        let id = self.heap.new_scalar(Scalar::string(value, false));
        self.mortal(id)
    }

    /// New boolean scalar
    pub fn boolean(&mut self, value: bool) -> RawSv {
        let id = self.heap.new_scalar(Scalar::boolean(value));
        self.mortal(id)
    }

    /// New glob for `*name`
    pub fn glob(&mut self, name: &str) -> RawSv {
        let id = self.heap.new_glob(name);
        self.mortal(id)
    }

    /// New anonymous array reference holding copies of `items`
    pub fn array_ref(&mut self, items: &[RawSv]) -> Result<RawSv, Died> {
        let av = self.heap.alloc(Body::Array(Vec::new()));
        self.mortal(av);
        for (index, item) in items.iter().enumerate() {
            if let Err(err) = self.heap.av_store(av, index, item.bits()) {
                return Err(self.fail(err));
            }
        }
        self.new_ref(RawSv::from_bits(av))
    }

    /// New anonymous hash reference holding copies of the values
    pub fn hash_ref(&mut self, pairs: &[(&str, RawSv)]) -> Result<RawSv, Died> {
        let hv = self.heap.alloc(Body::Hash {
            entries: indexmap::IndexMap::new(),
            cursor: 0,
        });
        self.mortal(hv);
        for (key, value) in pairs {
            if let Err(err) = self.heap.hv_store(hv, key, value.bits()) {
                return Err(self.fail(err));
            }
        }
        self.new_ref(RawSv::from_bits(hv))
    }

    /// New reference to `target`
    pub fn new_ref(&mut self, target: RawSv) -> Result<RawSv, Died> {
        match self.heap.new_rv(target.bits()) {
            Ok(id) => Ok(self.mortal(id)),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Bless the target of `rv` into `class` and return `rv`
    pub fn bless(&mut self, rv: RawSv, class: &str) -> Result<RawSv, Died> {
        match self.heap.bless(rv.bits(), class) {
            Ok(()) => Ok(rv),
            Err(_) => Err(self.die("Can't bless non-reference value")),
        }
    }

    // ------------------------------------------------------------------
    // Containers (through references)
    // ------------------------------------------------------------------

    fn target_of(&mut self, rv: RawSv) -> Result<u64, Died> {
        match self.heap.kind(rv.bits()) {
            Ok(CellKind::Ref) => self.heap.target(rv.bits()).map_err(|err| self.fail(err)),
            Ok(_) => Ok(rv.bits()),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// `$ref->{key}`
    pub fn fetch(&mut self, rv: RawSv, key: &str) -> Result<Option<RawSv>, Died> {
        let hv = self.target_of(rv)?;
        match self.heap.hv_fetch(hv, key) {
            Ok(value) => Ok(value.map(|id| self.mortal(id))),
            Err(_) => Err(self.die("Not a HASH reference")),
        }
    }

    /// `$ref->{key} = value`
    pub fn store(&mut self, rv: RawSv, key: &str, value: RawSv) -> Result<(), Died> {
        let hv = self.target_of(rv)?;
        self.heap
            .hv_store(hv, key, value.bits())
            .map_err(|_| self.die("Not a HASH reference"))
    }

    /// `$target = value`; writes through aliases such as `$_[0]`
    pub fn assign(&mut self, target: RawSv, value: RawSv) -> Result<(), Died> {
        self.heap
            .set(target.bits(), value.bits())
            .map_err(|err| self.fail(err))
    }

    /// `$ref->[index]`
    pub fn elem(&mut self, rv: RawSv, index: usize) -> Result<Option<RawSv>, Died> {
        let av = self.target_of(rv)?;
        match self.heap.av_fetch(av, index) {
            Ok(value) => Ok(value.map(|id| self.mortal(id))),
            Err(_) => Err(self.die("Not an ARRAY reference")),
        }
    }

    /// `push @$ref, value`
    pub fn push(&mut self, rv: RawSv, value: RawSv) -> Result<(), Died> {
        let av = self.target_of(rv)?;
        let len = self.heap.av_len(av).map_err(|_| self.die("Not an ARRAY reference"))?;
        self.heap
            .av_store(av, len, value.bits())
            .map_err(|err| self.fail(err))
    }

    /// `scalar @$ref` or `scalar keys %$ref`
    pub fn len(&self, rv: RawSv) -> usize {
        let id = match self.heap.kind(rv.bits()) {
            Ok(CellKind::Ref) => self.heap.target(rv.bits()).unwrap_or(rv.bits()),
            _ => rv.bits(),
        };
        self.heap
            .av_len(id)
            .or_else(|_| self.heap.hv_len(id))
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Globals and calls
    // ------------------------------------------------------------------

    /// `$name`, created on demand
    pub fn global(&mut self, name: &str) -> Result<RawSv, Died> {
        match self.heap.get_sv(name, true) {
            Ok(Some(id)) => Ok(self.mortal(id)),
            Ok(None) => Err(self.die(format!("Global ${} is not available", name))),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// `$name = value`
    pub fn set_global(&mut self, name: &str, value: RawSv) -> Result<(), Died> {
        let sv = self.global(name)?;
        self.heap
            .set(sv.bits(), value.bits())
            .map_err(|err| self.fail(err))
    }

    /// `\&name`
    pub fn code_ref(&mut self, name: &str) -> Result<Option<RawSv>, Died> {
        match self.heap.get_cv(name) {
            Ok(Some(cv)) => {
                self.mortal(cv);
                self.new_ref(RawSv::from_bits(cv)).map(Some)
            }
            Ok(None) => Ok(None),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// `class->can(method)`: reference to the subroutine dispatch would pick
    pub fn can(&mut self, class: &str, method: &str) -> Result<Option<RawSv>, Died> {
        match self.heap.resolve_method(class, method) {
            Some(cv) => self.new_ref(RawSv::from_bits(cv)).map(Some),
            None => Ok(None),
        }
    }

    /// `$invocant->name(args)`; a `die` propagates with `?`
    pub fn call_method(&mut self, invocant: RawSv, name: &str, args: &[RawSv]) -> NativeResult {
        self.call(CallTarget::Method { invocant, name }, args)
    }

    /// `name(args)`
    pub fn call_sub(&mut self, name: &str, args: &[RawSv]) -> NativeResult {
        self.call(CallTarget::Named(name), args)
    }

    fn call(&mut self, target: CallTarget<'_>, args: &[RawSv]) -> NativeResult {
        match self.heap.call(target, args, CallContext::List) {
            Ok(values) => Ok(values.into_iter().map(|id| self.mortal(id)).collect()),
            Err(AbiError::Died(err)) => Err(Died(self.mortal(err.bits()))),
            Err(err) => Err(self.fail(err)),
        }
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    /// `die "message"`
    pub fn die(&mut self, message: impl Into<String>) -> Died {
        let message = message.into();
        let id = self
            .heap
            .new_scalar(Scalar::string(message.as_bytes(), true));
        Died(self.mortal(id))
    }

    /// `die $value` with an arbitrary value, such as an exception object
    pub fn die_with(&mut self, value: RawSv) -> Died {
        Died(value)
    }

    /// Set `$@` without dying, as a trapped inner `eval` would
    pub fn set_error(&mut self, value: RawSv) -> Result<(), Died> {
        self.heap
            .set_error(value.bits())
            .map_err(|err| self.fail(err))
    }
}
