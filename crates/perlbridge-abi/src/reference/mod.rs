//! Reference Interpreter
//!
//! An in-process implementation of [`EmbeddingApi`] with Perl's data model:
//! reference-counted scalars, arrays, hashes and code, blessed references,
//! `@ISA` method resolution, `require`, and `die` with arbitrary values.
//!
//! It does not parse Perl source. Packages are described with
//! [`PackageDef`] and their subroutines are Rust closures; source evaluation
//! is delegated to an optional evaluator hook.
//!
//! ## Example
//!
//! ```
//! use perlbridge_abi::{CallContext, CallTarget, EmbeddingApi, PackageDef, ReferenceInterpreter};
//!
//! let mut perl = ReferenceInterpreter::new().provide(
//!     PackageDef::new("Calc").sub("add", |cx| {
//!         let sum = cx.int_arg(0) + cx.int_arg(1);
//!         Ok(vec![cx.int(sum)])
//!     }),
//! );
//! perl.construct(&[]).unwrap();
//! perl.require("Calc").unwrap();
//!
//! let a = perl.new_iv(2).unwrap();
//! let b = perl.new_iv(3).unwrap();
//! let out = perl
//!     .call(CallTarget::Named("Calc::add"), &[a, b], CallContext::List)
//!     .unwrap();
//! assert_eq!(perl.iv(out[0]).unwrap(), 5);
//! ```

mod heap;
mod native;
mod package;

use std::rc::Rc;

use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tracing::debug;

use crate::api::EmbeddingApi;
use crate::error::{AbiError, AbiResult};
use crate::raw::{CallContext, CallTarget, Capabilities, CellKind, RawSv, ScalarFlags};

use heap::{Heap, Scalar};
pub use native::{Died, EvalFn, NativeFn, NativeResult, SubContext};
pub use package::{Literal, PackageDef};

fn raw(id: u64) -> RawSv {
    RawSv::from_bits(id)
}

fn raw_all(ids: Vec<u64>) -> Vec<RawSv> {
    ids.into_iter().map(raw).collect()
}

/// In-process interpreter implementing the embedding API.
pub struct ReferenceInterpreter {
    heap: Option<Heap>,
    capabilities: Capabilities,
    provided: FxHashMap<SmolStr, PackageDef>,
    preloaded: Vec<SmolStr>,
    evaluator: Option<Rc<EvalFn>>,
}

impl ReferenceInterpreter {
    /// Create an interpreter that has not been constructed yet
    pub fn new() -> Self {
        Self {
            heap: None,
            capabilities: Capabilities {
                multiplicity: true,
                thread_safe: false,
            },
            provided: FxHashMap::default(),
            preloaded: Vec::new(),
            evaluator: None,
        }
    }

    /// Report different capabilities
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make a package available to `require`
    pub fn provide(mut self, def: PackageDef) -> Self {
        self.provided.insert(def.name.clone(), def);
        self
    }

    /// Make a package available and load it during construction
    pub fn preload(mut self, def: PackageDef) -> Self {
        self.preloaded.push(def.name.clone());
        self.provide(def)
    }

    /// Install a hook that evaluates source text
    pub fn with_evaluator<F>(mut self, evaluator: F) -> Self
    where
        F: Fn(&mut SubContext<'_>, &str) -> NativeResult + 'static,
    {
        self.evaluator = Some(Rc::new(evaluator));
        self
    }

    /// Number of live cells, or 0 when not constructed
    pub fn live_cells(&self) -> usize {
        self.heap.as_ref().map_or(0, Heap::live_cells)
    }

    fn heap(&self) -> AbiResult<&Heap> {
        self.heap.as_ref().ok_or(AbiError::NotConstructed)
    }

    fn heap_mut(&mut self) -> AbiResult<&mut Heap> {
        self.heap.as_mut().ok_or(AbiError::NotConstructed)
    }

    fn install(heap: &mut Heap, def: &PackageDef) -> AbiResult<()> {
        for (name, body) in &def.subs {
            heap.define_sub(&def.qualified(name), Rc::clone(body))?;
        }

        for (name, literal) in &def.scalars {
            let sv = heap
                .get_sv(&def.qualified(name), true)?
                .ok_or(AbiError::NotConstructed)?;
            let value = heap.new_scalar(match literal {
                Literal::Undef => Scalar::default(),
                Literal::Int(n) => Scalar::int(*n),
                Literal::Num(n) => Scalar::num(*n),
                Literal::Str(s) => Scalar::string(s.as_bytes(), true),
            });
            heap.set(sv, value)?;
            heap.dec(value)?;
            heap.dec(sv)?;
        }

        if !def.isa.is_empty() {
            let isa = heap
                .get_av(&def.qualified("ISA"), true)?
                .ok_or(AbiError::NotConstructed)?;
            heap.av_clear(isa)?;
            for (index, parent) in def.isa.iter().enumerate() {
                let sv = heap.new_scalar(Scalar::string(parent.as_bytes(), true));
                heap.av_store(isa, index, sv)?;
                heap.dec(sv)?;
            }
            heap.dec(isa)?;
        }

        heap.mark_loaded(&def.name);
        debug!(package = %def.name, subs = def.subs.len(), "package installed");
        Ok(())
    }

    fn install_universal(heap: &mut Heap) -> AbiResult<()> {
        heap.define_sub(
            "UNIVERSAL::isa",
            Rc::new(|cx: &mut SubContext<'_>| -> NativeResult {
                let Some(invocant) = cx.arg(0) else {
                    return Ok(vec![cx.boolean(false)]);
                };
                let class = cx.class_of(invocant).unwrap_or_else(|| cx.str_of(invocant));
                let parent = cx.str_arg(1);
                let answer = cx.derives_from(&class, &parent);
                Ok(vec![cx.boolean(answer)])
            }),
        )?;
        heap.define_sub(
            "UNIVERSAL::can",
            Rc::new(|cx: &mut SubContext<'_>| -> NativeResult {
                let Some(invocant) = cx.arg(0) else {
                    return Ok(vec![cx.undef()]);
                };
                let class = cx.class_of(invocant).unwrap_or_else(|| cx.str_of(invocant));
                let method = cx.str_arg(1);
                match cx.can(&class, &method)? {
                    Some(code) => Ok(vec![code]),
                    None => Ok(vec![cx.undef()]),
                }
            }),
        )
    }
}

impl Default for ReferenceInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingApi for ReferenceInterpreter {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn construct(&mut self, args: &[String]) -> AbiResult<()> {
        if self.heap.is_some() {
            return Err(AbiError::Unsupported(
                "interpreter is already constructed".to_string(),
            ));
        }

        let mut include = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "-I" {
                include.extend(iter.next().cloned());
            } else if let Some(dir) = arg.strip_prefix("-I") {
                include.push(dir.to_string());
            }
        }

        let mut heap = Heap::new();
        let inc = heap.get_av("INC", true)?.ok_or(AbiError::NotConstructed)?;
        for (index, dir) in include.iter().enumerate() {
            let sv = heap.new_scalar(Scalar::string(dir.as_bytes(), true));
            heap.av_store(inc, index, sv)?;
            heap.dec(sv)?;
        }
        heap.dec(inc)?;

        Self::install_universal(&mut heap)?;
        for name in &self.preloaded {
            if let Some(def) = self.provided.get(name) {
                Self::install(&mut heap, def)?;
            }
        }

        debug!(include = include.len(), "reference interpreter constructed");
        self.heap = Some(heap);
        Ok(())
    }

    fn destruct(&mut self) {
        if let Some(heap) = self.heap.take() {
            debug!(live_cells = heap.live_cells(), "reference interpreter destructed");
        }
    }

    fn is_constructed(&self) -> bool {
        self.heap.is_some()
    }

    fn eval(&mut self, source: &str, context: CallContext) -> AbiResult<Vec<RawSv>> {
        let evaluator = self.evaluator.clone();
        let heap = self.heap_mut()?;
        match evaluator {
            Some(evaluator) => heap
                .invoke(
                    SmolStr::new("(eval)"),
                    |cx| evaluator(cx, source),
                    Vec::new(),
                    context,
                )
                .map(raw_all),
            None => Err(heap.die("Can't evaluate source: no source evaluator is installed")),
        }
    }

    fn require(&mut self, package: &str) -> AbiResult<()> {
        let heap = self.heap.as_mut().ok_or(AbiError::NotConstructed)?;
        if heap.is_loaded(package) {
            return Ok(());
        }
        match self.provided.get(package) {
            Some(def) => match &def.compile_error {
                Some(diagnostic) => Err(heap.die(&format!(
                    "{}\nCompilation failed in require",
                    diagnostic
                ))),
                None => Self::install(heap, def),
            },
            None => {
                let inc = heap.array_strings("INC");
                Err(heap.die(&format!(
                    "Can't locate {} in @INC (you may need to install the {} module) (@INC contains: {})",
                    PackageDef::module_path(package),
                    package,
                    inc.join(" ")
                )))
            }
        }
    }

    fn call(
        &mut self,
        target: CallTarget<'_>,
        args: &[RawSv],
        context: CallContext,
    ) -> AbiResult<Vec<RawSv>> {
        self.heap_mut()?.call(target, args, context).map(raw_all)
    }

    fn take_error(&mut self) -> AbiResult<Option<RawSv>> {
        Ok(self.heap_mut()?.take_error()?.map(raw))
    }

    fn refcnt_inc(&mut self, sv: RawSv) -> AbiResult<()> {
        self.heap_mut()?.inc(sv.bits())
    }

    fn refcnt_dec(&mut self, sv: RawSv) -> AbiResult<()> {
        self.heap_mut()?.dec(sv.bits())
    }

    fn refcnt(&self, sv: RawSv) -> AbiResult<usize> {
        self.heap()?.refcnt(sv.bits())
    }

    fn kind(&self, sv: RawSv) -> AbiResult<CellKind> {
        self.heap()?.kind(sv.bits())
    }

    fn flags(&self, sv: RawSv) -> AbiResult<ScalarFlags> {
        self.heap()?.flags(sv.bits())
    }

    fn iv(&self, sv: RawSv) -> AbiResult<i64> {
        self.heap()?.iv(sv.bits())
    }

    fn nv(&self, sv: RawSv) -> AbiResult<f64> {
        self.heap()?.nv(sv.bits())
    }

    fn pv(&self, sv: RawSv) -> AbiResult<Vec<u8>> {
        self.heap()?.pv(sv.bits())
    }

    fn new_undef(&mut self) -> AbiResult<RawSv> {
        Ok(raw(self.heap_mut()?.new_scalar(Scalar::default())))
    }

    fn new_bool(&mut self, value: bool) -> AbiResult<RawSv> {
        Ok(raw(self.heap_mut()?.new_scalar(Scalar::boolean(value))))
    }

    fn new_iv(&mut self, value: i64) -> AbiResult<RawSv> {
        Ok(raw(self.heap_mut()?.new_scalar(Scalar::int(value))))
    }

    fn new_nv(&mut self, value: f64) -> AbiResult<RawSv> {
        Ok(raw(self.heap_mut()?.new_scalar(Scalar::num(value))))
    }

    fn new_pv(&mut self, bytes: &[u8], utf8: bool) -> AbiResult<RawSv> {
        Ok(raw(self.heap_mut()?.new_scalar(Scalar::string(bytes, utf8))))
    }

    fn sv_set(&mut self, dst: RawSv, src: RawSv) -> AbiResult<()> {
        self.heap_mut()?.set(dst.bits(), src.bits())
    }

    fn new_rv(&mut self, target: RawSv) -> AbiResult<RawSv> {
        self.heap_mut()?.new_rv(target.bits()).map(raw)
    }

    fn deref(&mut self, rv: RawSv) -> AbiResult<RawSv> {
        let heap = self.heap_mut()?;
        let target = heap.target(rv.bits())?;
        heap.inc(target)?;
        Ok(raw(target))
    }

    fn blessed(&self, rv: RawSv) -> AbiResult<Option<String>> {
        Ok(self.heap()?.blessed(rv.bits())?.map(|class| class.to_string()))
    }

    fn identity(&self, sv: RawSv) -> AbiResult<u64> {
        self.heap()?.identity(sv.bits())
    }

    fn new_av(&mut self) -> AbiResult<RawSv> {
        Ok(raw(self.heap_mut()?.alloc(heap::Body::Array(Vec::new()))))
    }

    fn av_len(&self, av: RawSv) -> AbiResult<usize> {
        self.heap()?.av_len(av.bits())
    }

    fn av_fetch(&mut self, av: RawSv, index: usize) -> AbiResult<Option<RawSv>> {
        Ok(self.heap_mut()?.av_fetch(av.bits(), index)?.map(raw))
    }

    fn av_store(&mut self, av: RawSv, index: usize, value: RawSv) -> AbiResult<()> {
        self.heap_mut()?.av_store(av.bits(), index, value.bits())
    }

    fn av_pop(&mut self, av: RawSv) -> AbiResult<Option<RawSv>> {
        Ok(self.heap_mut()?.av_pop(av.bits())?.map(raw))
    }

    fn av_clear(&mut self, av: RawSv) -> AbiResult<()> {
        self.heap_mut()?.av_clear(av.bits())
    }

    fn new_hv(&mut self) -> AbiResult<RawSv> {
        Ok(raw(self.heap_mut()?.alloc(heap::Body::Hash {
            entries: indexmap::IndexMap::new(),
            cursor: 0,
        })))
    }

    fn hv_len(&self, hv: RawSv) -> AbiResult<usize> {
        self.heap()?.hv_len(hv.bits())
    }

    fn hv_fetch(&mut self, hv: RawSv, key: &str) -> AbiResult<Option<RawSv>> {
        Ok(self.heap_mut()?.hv_fetch(hv.bits(), key)?.map(raw))
    }

    fn hv_store(&mut self, hv: RawSv, key: &str, value: RawSv) -> AbiResult<()> {
        self.heap_mut()?.hv_store(hv.bits(), key, value.bits())
    }

    fn hv_delete(&mut self, hv: RawSv, key: &str) -> AbiResult<Option<RawSv>> {
        Ok(self.heap_mut()?.hv_delete(hv.bits(), key)?.map(raw))
    }

    fn hv_exists(&self, hv: RawSv, key: &str) -> AbiResult<bool> {
        self.heap()?.hv_exists(hv.bits(), key)
    }

    fn hv_clear(&mut self, hv: RawSv) -> AbiResult<()> {
        self.heap_mut()?.hv_clear(hv.bits())
    }

    fn hv_iter_init(&mut self, hv: RawSv) -> AbiResult<()> {
        self.heap_mut()?.hv_iter_init(hv.bits())
    }

    fn hv_iter_next(&mut self, hv: RawSv) -> AbiResult<Option<(String, RawSv)>> {
        Ok(self
            .heap_mut()?
            .hv_iter_next(hv.bits())?
            .map(|(key, value)| (key, raw(value))))
    }

    fn get_sv(&mut self, name: &str, create: bool) -> AbiResult<Option<RawSv>> {
        Ok(self.heap_mut()?.get_sv(name, create)?.map(raw))
    }

    fn get_av(&mut self, name: &str, create: bool) -> AbiResult<Option<RawSv>> {
        Ok(self.heap_mut()?.get_av(name, create)?.map(raw))
    }

    fn get_hv(&mut self, name: &str, create: bool) -> AbiResult<Option<RawSv>> {
        Ok(self.heap_mut()?.get_hv(name, create)?.map(raw))
    }

    fn get_cv(&mut self, name: &str) -> AbiResult<Option<RawSv>> {
        Ok(self.heap_mut()?.get_cv(name)?.map(raw))
    }
}
