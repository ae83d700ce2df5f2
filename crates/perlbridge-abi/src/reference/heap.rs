//! Reference-Counted Cell Heap
//!
//! Storage for the reference interpreter: scalars, arrays, hashes, code and
//! globs, each with a reference count, plus the package symbol tables and
//! the call machinery.
//!
//! ## Design Notes
//!
//! Cell ids are never reused, so touching a freed cell is always reported as
//! [`AbiError::FreedCell`] instead of silently reading a newer cell.

use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use tracing::trace;

use crate::error::{AbiError, AbiResult};
use crate::raw::{CallContext, CallTarget, CellKind, RawSv, ScalarFlags};
use crate::reference::native::{Died, NativeFn, NativeResult, SubContext};

/// Name of the pending-error variable (`$@`)
const ERRSV: &str = "main::@";

// ============================================================================
// Cells
// ============================================================================

/// Scalar slots. Which slots are meaningful is decided by `flags`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scalar {
    pub(crate) flags: ScalarFlags,
    pub(crate) iv: i64,
    pub(crate) nv: f64,
    pub(crate) pv: Vec<u8>,
    pub(crate) rv: Option<u64>,
}

impl Scalar {
    pub(crate) fn int(value: i64) -> Self {
        Self {
            flags: ScalarFlags::IOK,
            iv: value,
            ..Self::default()
        }
    }

    pub(crate) fn num(value: f64) -> Self {
        Self {
            flags: ScalarFlags::NOK,
            nv: value,
            ..Self::default()
        }
    }

    pub(crate) fn string(bytes: &[u8], utf8: bool) -> Self {
        let mut flags = ScalarFlags::POK;
        if utf8 {
            flags.insert(ScalarFlags::UTF8);
        }
        Self {
            flags,
            pv: bytes.to_vec(),
            ..Self::default()
        }
    }

    pub(crate) fn boolean(value: bool) -> Self {
        Self {
            flags: ScalarFlags::BOOL | ScalarFlags::IOK | ScalarFlags::POK,
            iv: i64::from(value),
            pv: if value { b"1".to_vec() } else { Vec::new() },
            ..Self::default()
        }
    }

    fn reference(target: u64) -> Self {
        Self {
            flags: ScalarFlags::ROK,
            rv: Some(target),
            ..Self::default()
        }
    }
}

pub(crate) enum Body {
    Scalar(Scalar),
    Array(Vec<u64>),
    Hash {
        entries: IndexMap<String, u64>,
        cursor: usize,
    },
    Code {
        name: SmolStr,
        body: Rc<NativeFn>,
    },
    Glob(SmolStr),
}

impl Body {
    fn children(self) -> Vec<u64> {
        match self {
            Body::Scalar(s) => s.rv.into_iter().collect(),
            Body::Array(items) => items,
            Body::Hash { entries, .. } => entries.into_values().collect(),
            Body::Code { .. } | Body::Glob(_) => Vec::new(),
        }
    }
}

pub(crate) struct Cell {
    refcnt: usize,
    blessed: Option<SmolStr>,
    body: Body,
}

// ============================================================================
// Heap
// ============================================================================

pub(crate) struct Heap {
    cells: FxHashMap<u64, Cell>,
    next_id: u64,
    scalars: FxHashMap<SmolStr, u64>,
    arrays: FxHashMap<SmolStr, u64>,
    hashes: FxHashMap<SmolStr, u64>,
    subs: FxHashMap<SmolStr, u64>,
    loaded: FxHashSet<SmolStr>,
}

/// Qualify a symbol name into `main::` unless it already names a package
pub(crate) fn qualify(name: &str) -> SmolStr {
    let name = name.strip_prefix("::").unwrap_or(name);
    if name.contains("::") {
        SmolStr::new(name)
    } else {
        SmolStr::new(format!("main::{}", name))
    }
}

impl Heap {
    pub(crate) fn new() -> Self {
        let mut heap = Self {
            cells: FxHashMap::default(),
            next_id: 1,
            scalars: FxHashMap::default(),
            arrays: FxHashMap::default(),
            hashes: FxHashMap::default(),
            subs: FxHashMap::default(),
            loaded: FxHashSet::default(),
        };
        let errsv = heap.alloc(Body::Scalar(Scalar::string(b"", false)));
        heap.scalars.insert(SmolStr::new(ERRSV), errsv);
        heap
    }

    /// Number of cells still alive
    pub(crate) fn live_cells(&self) -> usize {
        self.cells.len()
    }

    // ------------------------------------------------------------------
    // Allocation and reference counts
    // ------------------------------------------------------------------

    pub(crate) fn alloc(&mut self, body: Body) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.cells.insert(
            id,
            Cell {
                refcnt: 1,
                blessed: None,
                body,
            },
        );
        id
    }

    fn cell(&self, id: u64) -> AbiResult<&Cell> {
        self.cells
            .get(&id)
            .ok_or(AbiError::FreedCell(RawSv::from_bits(id)))
    }

    fn cell_mut(&mut self, id: u64) -> AbiResult<&mut Cell> {
        self.cells
            .get_mut(&id)
            .ok_or(AbiError::FreedCell(RawSv::from_bits(id)))
    }

    pub(crate) fn inc(&mut self, id: u64) -> AbiResult<()> {
        self.cell_mut(id)?.refcnt += 1;
        Ok(())
    }

    pub(crate) fn dec(&mut self, id: u64) -> AbiResult<()> {
        self.cell(id)?;
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(cell) = self.cells.get_mut(&id) else {
                continue;
            };
            cell.refcnt -= 1;
            if cell.refcnt == 0 {
                if let Some(cell) = self.cells.remove(&id) {
                    trace!(cell = id, "freeing cell");
                    pending.extend(cell.body.children());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn refcnt(&self, id: u64) -> AbiResult<usize> {
        Ok(self.cell(id)?.refcnt)
    }

    // ------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------

    pub(crate) fn kind(&self, id: u64) -> AbiResult<CellKind> {
        Ok(match &self.cell(id)?.body {
            Body::Scalar(s) if s.flags.contains(ScalarFlags::ROK) => CellKind::Ref,
            Body::Scalar(s) if s.flags.is_empty() => CellKind::Undef,
            Body::Scalar(_) => CellKind::Scalar,
            Body::Array(_) => CellKind::Array,
            Body::Hash { .. } => CellKind::Hash,
            Body::Code { .. } => CellKind::Code,
            Body::Glob(_) => CellKind::Glob,
        })
    }

    fn scalar(&self, id: u64) -> AbiResult<&Scalar> {
        match &self.cell(id)?.body {
            Body::Scalar(s) => Ok(s),
            _ => Err(AbiError::wrong_kind(CellKind::Scalar, self.kind(id)?)),
        }
    }

    pub(crate) fn flags(&self, id: u64) -> AbiResult<ScalarFlags> {
        Ok(self.scalar(id)?.flags)
    }

    pub(crate) fn new_scalar(&mut self, scalar: Scalar) -> u64 {
        self.alloc(Body::Scalar(scalar))
    }

    pub(crate) fn iv(&self, id: u64) -> AbiResult<i64> {
        let s = self.scalar(id)?;
        Ok(if s.flags.contains(ScalarFlags::IOK) {
            s.iv
        } else if s.flags.contains(ScalarFlags::NOK) {
            s.nv as i64
        } else if s.flags.contains(ScalarFlags::POK) {
            let text = String::from_utf8_lossy(&s.pv);
            let trimmed = text.trim();
            trimmed
                .parse::<i64>()
                .unwrap_or_else(|_| parse_number(trimmed) as i64)
        } else if let Some(target) = s.rv {
            target as i64
        } else {
            0
        })
    }

    pub(crate) fn nv(&self, id: u64) -> AbiResult<f64> {
        let s = self.scalar(id)?;
        Ok(if s.flags.contains(ScalarFlags::NOK) {
            s.nv
        } else if s.flags.contains(ScalarFlags::IOK) {
            s.iv as f64
        } else if s.flags.contains(ScalarFlags::POK) {
            parse_number(String::from_utf8_lossy(&s.pv).trim())
        } else if let Some(target) = s.rv {
            target as f64
        } else {
            0.0
        })
    }

    /// Numeric use of a string caches the number, as Perl does
    pub(crate) fn numify(&mut self, id: u64) -> AbiResult<f64> {
        let value = self.nv(id)?;
        if let Body::Scalar(s) = &mut self.cell_mut(id)?.body {
            if s.flags.contains(ScalarFlags::POK) && !s.flags.is_numeric() {
                if let Ok(n) = String::from_utf8_lossy(&s.pv).trim().parse::<i64>() {
                    s.iv = n;
                    s.flags.insert(ScalarFlags::IOK);
                } else {
                    s.nv = value;
                    s.flags.insert(ScalarFlags::NOK);
                }
            }
        }
        Ok(value)
    }

    pub(crate) fn pv(&self, id: u64) -> AbiResult<Vec<u8>> {
        let cell = self.cell(id)?;
        let s = match &cell.body {
            Body::Scalar(s) => s,
            Body::Glob(name) => return Ok(format!("*{}", name).into_bytes()),
            _ => return Ok(self.describe(id)?.into_bytes()),
        };
        Ok(if s.flags.contains(ScalarFlags::POK) {
            s.pv.clone()
        } else if s.flags.contains(ScalarFlags::IOK) {
            s.iv.to_string().into_bytes()
        } else if s.flags.contains(ScalarFlags::NOK) {
            format_nv(s.nv).into_bytes()
        } else if let Some(target) = s.rv {
            self.describe(target)?.into_bytes()
        } else {
            Vec::new()
        })
    }

    /// `Class=HASH(0x..)` style rendering of a reference target
    fn describe(&self, target: u64) -> AbiResult<String> {
        let cell = self.cell(target)?;
        let reftype = self.kind(target)?.reftype();
        Ok(match &cell.blessed {
            Some(class) => format!("{}={}(0x{:x})", class, reftype, target),
            None => format!("{}(0x{:x})", reftype, target),
        })
    }

    /// Perl truthiness: undef, `""` and `"0"` are false
    pub(crate) fn truthy(&self, id: u64) -> AbiResult<bool> {
        let s = self.scalar(id)?;
        if s.flags.contains(ScalarFlags::ROK) {
            return Ok(true);
        }
        if s.flags.contains(ScalarFlags::POK) {
            return Ok(!(s.pv.is_empty() || s.pv == b"0"));
        }
        if s.flags.contains(ScalarFlags::IOK) {
            return Ok(s.iv != 0);
        }
        if s.flags.contains(ScalarFlags::NOK) {
            return Ok(s.nv != 0.0);
        }
        Ok(false)
    }

    /// Value of `src` as a scalar; aggregates become references to themselves
    fn scalar_value(&mut self, src: u64) -> AbiResult<Scalar> {
        let value = match &self.cell(src)?.body {
            Body::Scalar(s) => s.clone(),
            _ => Scalar::reference(src),
        };
        if let Some(target) = value.rv {
            self.inc(target)?;
        }
        Ok(value)
    }

    /// New cell holding a copy of `src` (`newSVsv`)
    pub(crate) fn copy(&mut self, src: u64) -> AbiResult<u64> {
        let value = self.scalar_value(src)?;
        Ok(self.new_scalar(value))
    }

    pub(crate) fn set(&mut self, dst: u64, src: u64) -> AbiResult<()> {
        self.scalar(dst)?;
        let value = self.scalar_value(src)?;
        let old = match &mut self.cell_mut(dst)?.body {
            Body::Scalar(s) => std::mem::replace(s, value).rv,
            _ => None,
        };
        if let Some(target) = old {
            self.dec(target)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    pub(crate) fn new_rv(&mut self, target: u64) -> AbiResult<u64> {
        self.inc(target)?;
        Ok(self.new_scalar(Scalar::reference(target)))
    }

    /// Target of a reference, without touching its count
    pub(crate) fn target(&self, rv: u64) -> AbiResult<u64> {
        match self.scalar(rv).ok().and_then(|s| s.rv) {
            Some(target) => Ok(target),
            None => Err(AbiError::wrong_kind(CellKind::Ref, self.kind(rv)?)),
        }
    }

    pub(crate) fn blessed(&self, rv: u64) -> AbiResult<Option<SmolStr>> {
        if self.kind(rv)? != CellKind::Ref {
            return Ok(None);
        }
        Ok(self.cell(self.target(rv)?)?.blessed.clone())
    }

    pub(crate) fn bless(&mut self, rv: u64, class: &str) -> AbiResult<()> {
        let target = self.target(rv)?;
        self.cell_mut(target)?.blessed = Some(SmolStr::new(class));
        Ok(())
    }

    pub(crate) fn identity(&self, id: u64) -> AbiResult<u64> {
        match self.kind(id)? {
            CellKind::Ref => self.target(id),
            _ => Ok(id),
        }
    }

    // ------------------------------------------------------------------
    // Arrays
    // ------------------------------------------------------------------

    fn array(&self, id: u64) -> AbiResult<&Vec<u64>> {
        match &self.cell(id)?.body {
            Body::Array(items) => Ok(items),
            _ => Err(AbiError::wrong_kind(CellKind::Array, self.kind(id)?)),
        }
    }

    fn array_mut(&mut self, id: u64) -> AbiResult<&mut Vec<u64>> {
        let kind = self.kind(id)?;
        match &mut self.cell_mut(id)?.body {
            Body::Array(items) => Ok(items),
            _ => Err(AbiError::wrong_kind(CellKind::Array, kind)),
        }
    }

    pub(crate) fn av_len(&self, av: u64) -> AbiResult<usize> {
        Ok(self.array(av)?.len())
    }

    pub(crate) fn av_fetch(&mut self, av: u64, index: usize) -> AbiResult<Option<u64>> {
        let Some(&item) = self.array(av)?.get(index) else {
            return Ok(None);
        };
        self.inc(item)?;
        Ok(Some(item))
    }

    pub(crate) fn av_store(&mut self, av: u64, index: usize, value: u64) -> AbiResult<()> {
        let len = self.av_len(av)?;
        let copy = self.copy(value)?;
        let mut fill = Vec::new();
        for _ in len..index {
            fill.push(self.new_scalar(Scalar::default()));
        }
        let items = self.array_mut(av)?;
        items.extend(fill);
        let old = if index < items.len() {
            Some(std::mem::replace(&mut items[index], copy))
        } else {
            items.push(copy);
            None
        };
        if let Some(old) = old {
            self.dec(old)?;
        }
        Ok(())
    }

    pub(crate) fn av_pop(&mut self, av: u64) -> AbiResult<Option<u64>> {
        Ok(self.array_mut(av)?.pop())
    }

    pub(crate) fn av_clear(&mut self, av: u64) -> AbiResult<()> {
        let items = std::mem::take(self.array_mut(av)?);
        for item in items {
            self.dec(item)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Hashes
    // ------------------------------------------------------------------

    fn hash(&self, id: u64) -> AbiResult<&IndexMap<String, u64>> {
        match &self.cell(id)?.body {
            Body::Hash { entries, .. } => Ok(entries),
            _ => Err(AbiError::wrong_kind(CellKind::Hash, self.kind(id)?)),
        }
    }

    fn hash_mut(&mut self, id: u64) -> AbiResult<(&mut IndexMap<String, u64>, &mut usize)> {
        let kind = self.kind(id)?;
        match &mut self.cell_mut(id)?.body {
            Body::Hash { entries, cursor } => Ok((entries, cursor)),
            _ => Err(AbiError::wrong_kind(CellKind::Hash, kind)),
        }
    }

    pub(crate) fn hv_len(&self, hv: u64) -> AbiResult<usize> {
        Ok(self.hash(hv)?.len())
    }

    pub(crate) fn hv_fetch(&mut self, hv: u64, key: &str) -> AbiResult<Option<u64>> {
        let Some(&value) = self.hash(hv)?.get(key) else {
            return Ok(None);
        };
        self.inc(value)?;
        Ok(Some(value))
    }

    pub(crate) fn hv_store(&mut self, hv: u64, key: &str, value: u64) -> AbiResult<()> {
        self.hash(hv)?;
        let copy = self.copy(value)?;
        let (entries, _) = self.hash_mut(hv)?;
        if let Some(old) = entries.insert(key.to_string(), copy) {
            self.dec(old)?;
        }
        Ok(())
    }

    pub(crate) fn hv_delete(&mut self, hv: u64, key: &str) -> AbiResult<Option<u64>> {
        let (entries, _) = self.hash_mut(hv)?;
        Ok(entries.shift_remove(key))
    }

    pub(crate) fn hv_exists(&self, hv: u64, key: &str) -> AbiResult<bool> {
        Ok(self.hash(hv)?.contains_key(key))
    }

    pub(crate) fn hv_clear(&mut self, hv: u64) -> AbiResult<()> {
        let (entries, cursor) = self.hash_mut(hv)?;
        *cursor = 0;
        let values: Vec<u64> = std::mem::take(entries).into_values().collect();
        for value in values {
            self.dec(value)?;
        }
        Ok(())
    }

    pub(crate) fn hv_iter_init(&mut self, hv: u64) -> AbiResult<()> {
        *self.hash_mut(hv)?.1 = 0;
        Ok(())
    }

    pub(crate) fn hv_iter_next(&mut self, hv: u64) -> AbiResult<Option<(String, u64)>> {
        let (entries, cursor) = self.hash_mut(hv)?;
        let Some((key, &value)) = entries.get_index(*cursor) else {
            return Ok(None);
        };
        let key = key.clone();
        *cursor += 1;
        self.inc(value)?;
        Ok(Some((key, value)))
    }

    // ------------------------------------------------------------------
    // Symbol tables
    // ------------------------------------------------------------------

    fn symbol(
        &mut self,
        table: fn(&mut Heap) -> &mut FxHashMap<SmolStr, u64>,
        name: &str,
        create: bool,
        body: fn() -> Body,
    ) -> AbiResult<Option<u64>> {
        let name = qualify(name);
        let id = match table(self).get(&name) {
            Some(&id) => id,
            None if create => {
                let id = self.alloc(body());
                table(self).insert(name, id);
                id
            }
            None => return Ok(None),
        };
        self.inc(id)?;
        Ok(Some(id))
    }

    pub(crate) fn get_sv(&mut self, name: &str, create: bool) -> AbiResult<Option<u64>> {
        self.symbol(|h| &mut h.scalars, name, create, || {
            Body::Scalar(Scalar::default())
        })
    }

    pub(crate) fn get_av(&mut self, name: &str, create: bool) -> AbiResult<Option<u64>> {
        self.symbol(|h| &mut h.arrays, name, create, || Body::Array(Vec::new()))
    }

    pub(crate) fn get_hv(&mut self, name: &str, create: bool) -> AbiResult<Option<u64>> {
        self.symbol(|h| &mut h.hashes, name, create, || Body::Hash {
            entries: IndexMap::new(),
            cursor: 0,
        })
    }

    pub(crate) fn get_cv(&mut self, name: &str) -> AbiResult<Option<u64>> {
        let Some(&cv) = self.subs.get(&qualify(name)) else {
            return Ok(None);
        };
        self.inc(cv)?;
        Ok(Some(cv))
    }

    /// Install `body` as `&name`, replacing any previous definition
    pub(crate) fn define_sub(&mut self, name: &str, body: Rc<NativeFn>) -> AbiResult<()> {
        let name = qualify(name);
        let cv = self.alloc(Body::Code {
            name: name.clone(),
            body,
        });
        if let Some(old) = self.subs.insert(name, cv) {
            self.dec(old)?;
        }
        Ok(())
    }

    pub(crate) fn new_glob(&mut self, name: &str) -> u64 {
        self.alloc(Body::Glob(qualify(name)))
    }

    pub(crate) fn is_loaded(&self, package: &str) -> bool {
        self.loaded.contains(package)
    }

    pub(crate) fn mark_loaded(&mut self, package: &str) {
        self.loaded.insert(SmolStr::new(package));
    }

    fn package_exists(&self, package: &str) -> bool {
        let prefix = format!("{}::", package);
        self.loaded.contains(package) || self.subs.keys().any(|name| name.starts_with(&prefix))
    }

    // ------------------------------------------------------------------
    // Method resolution
    // ------------------------------------------------------------------

    /// Stringified elements of the package array `@name`
    pub(crate) fn array_strings(&self, name: &str) -> Vec<String> {
        let Some(&av) = self.arrays.get(&qualify(name)) else {
            return Vec::new();
        };
        let Ok(items) = self.array(av) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|&item| self.pv(item).ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .collect()
    }

    /// Parents listed in `@Class::ISA`
    fn parents(&self, class: &str) -> Vec<String> {
        self.array_strings(&format!("{}::ISA", class))
    }

    /// Depth-first search through `@ISA`, then `UNIVERSAL`
    pub(crate) fn resolve_method(&self, class: &str, method: &str) -> Option<u64> {
        let mut visited = FxHashSet::default();
        self.resolve_in(class, method, &mut visited)
            .or_else(|| self.subs.get(format!("UNIVERSAL::{}", method).as_str()).copied())
    }

    fn resolve_in(&self, class: &str, method: &str, visited: &mut FxHashSet<String>) -> Option<u64> {
        if !visited.insert(class.to_string()) {
            return None;
        }
        if let Some(&cv) = self.subs.get(format!("{}::{}", class, method).as_str()) {
            return Some(cv);
        }
        self.parents(class)
            .iter()
            .find_map(|parent| self.resolve_in(parent, method, visited))
    }

    /// Whether `class` is `target` or inherits from it
    pub(crate) fn derives_from(&self, class: &str, target: &str) -> bool {
        let mut visited = FxHashSet::default();
        let mut pending = vec![class.to_string()];
        while let Some(class) = pending.pop() {
            if class == target {
                return true;
            }
            if visited.insert(class.clone()) {
                pending.extend(self.parents(&class));
            }
        }
        false
    }

    /// Class used for dispatch on `invocant`
    pub(crate) fn invocant_class(&mut self, invocant: u64, method: &str) -> AbiResult<String> {
        match self.kind(invocant)? {
            CellKind::Ref => match self.blessed(invocant)? {
                Some(class) => Ok(class.to_string()),
                None => Err(self.die(&format!(
                    "Can't call method \"{}\" on unblessed reference",
                    method
                ))),
            },
            CellKind::Scalar => {
                let class = String::from_utf8_lossy(&self.pv(invocant)?).into_owned();
                if self.package_exists(&class) {
                    Ok(class)
                } else {
                    Err(self.die(&format!(
                        "Can't locate object method \"{}\" via package \"{}\" (perhaps you forgot to load \"{}\"?)",
                        method, class, class
                    )))
                }
            }
            _ => Err(self.die(&format!(
                "Can't call method \"{}\" on an undefined value",
                method
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    fn errsv(&self) -> AbiResult<u64> {
        self.scalars
            .get(ERRSV)
            .copied()
            .ok_or(AbiError::NotConstructed)
    }

    pub(crate) fn set_error(&mut self, value: u64) -> AbiResult<()> {
        let errsv = self.errsv()?;
        self.set(errsv, value)
    }

    fn clear_error(&mut self) -> AbiResult<()> {
        let empty = self.new_scalar(Scalar::string(b"", false));
        let result = self.set_error(empty);
        self.dec(empty)?;
        result
    }

    pub(crate) fn take_error(&mut self) -> AbiResult<Option<u64>> {
        let errsv = self.errsv()?;
        if !self.truthy(errsv)? {
            return Ok(None);
        }
        let value = self.copy(errsv)?;
        self.clear_error()?;
        Ok(Some(value))
    }

    /// Die with a message: `$@` gets the message, the caller gets a copy
    pub(crate) fn die(&mut self, message: &str) -> AbiError {
        let sv = self.new_scalar(Scalar::string(message.as_bytes(), true));
        match self.set_error(sv) {
            Ok(()) => AbiError::Died(RawSv::from_bits(sv)),
            Err(err) => err,
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    pub(crate) fn call(
        &mut self,
        target: CallTarget<'_>,
        args: &[RawSv],
        context: CallContext,
    ) -> AbiResult<Vec<u64>> {
        let mut call_args = Vec::with_capacity(args.len() + 1);
        let cv = match target {
            CallTarget::Code(sv) => {
                let id = sv.bits();
                match self.kind(id)? {
                    CellKind::Code => id,
                    CellKind::Ref if self.kind(self.target(id)?)? == CellKind::Code => {
                        self.target(id)?
                    }
                    _ => return Err(self.die("Not a CODE reference")),
                }
            }
            CallTarget::Named(name) => match self.subs.get(&qualify(name)) {
                Some(&cv) => cv,
                None => {
                    return Err(self.die(&format!(
                        "Undefined subroutine &{} called",
                        qualify(name)
                    )))
                }
            },
            CallTarget::Method { invocant, name } => {
                let class = self.invocant_class(invocant.bits(), name)?;
                let resolved = if name.contains("::") {
                    self.subs.get(name).copied()
                } else {
                    self.resolve_method(&class, name)
                };
                call_args.push(invocant);
                match resolved {
                    Some(cv) => cv,
                    None => {
                        return Err(self.die(&format!(
                            "Can't locate object method \"{}\" via package \"{}\"",
                            name, class
                        )))
                    }
                }
            }
        };
        call_args.extend_from_slice(args);

        let (name, body) = match &self.cell(cv)?.body {
            Body::Code { name, body } => (name.clone(), Rc::clone(body)),
            _ => return Err(self.die("Not a CODE reference")),
        };
        self.invoke(name, |cx| body(cx), call_args, context)
    }

    /// Run a native body in a fresh frame.
    ///
    /// Returned values are copied out before the frame's temporaries are
    /// released, mirroring how Perl copies a sub's return list.
    pub(crate) fn invoke(
        &mut self,
        name: SmolStr,
        body: impl FnOnce(&mut SubContext<'_>) -> NativeResult,
        args: Vec<RawSv>,
        context: CallContext,
    ) -> AbiResult<Vec<u64>> {
        self.clear_error()?;
        trace!(sub = %name, args = args.len(), "invoking native sub");

        let mut cx = SubContext::new(self, name, args, context);
        let outcome = body(&mut cx);
        let mortals = cx.into_mortals();

        let result = match outcome {
            Ok(values) => values
                .iter()
                .map(|value| self.copy(value.bits()))
                .collect::<AbiResult<Vec<u64>>>(),
            Err(Died(value)) => match self.copy(value.bits()) {
                Ok(err) => match self.set_error(err) {
                    Ok(()) => Err(AbiError::Died(RawSv::from_bits(err))),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            },
        };

        for mortal in mortals {
            self.dec(mortal)?;
        }

        let mut values = result?;
        match context {
            CallContext::List => Ok(values),
            CallContext::Scalar => {
                let last = values.pop();
                for value in values {
                    self.dec(value)?;
                }
                Ok(last.into_iter().collect())
            }
            CallContext::Void => {
                for value in values {
                    self.dec(value)?;
                }
                Ok(Vec::new())
            }
        }
    }
}

// ============================================================================
// Numeric helpers
// ============================================================================

/// Parse the longest numeric prefix, as Perl's numification does
pub(crate) fn parse_number(text: &str) -> f64 {
    let bytes = text.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start {
        return 0.0;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    text[..end].parse().unwrap_or(0.0)
}

/// Render a float the way Perl's `print` does
pub(crate) fn format_nv(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Inf" } else { "-Inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
