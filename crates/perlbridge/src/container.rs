//! Array and Hash Bridges
//!
//! Live views of interpreter arrays and hashes. Nothing is copied up front:
//! every read fetches the current element and converts it, and every write
//! stores a converted copy. Mutations made by interpreter code are visible
//! through the bridge immediately, and the other way round.
//!
//! Iteration is lazy as well, one element per step. An iterator sees
//! mutations made while it runs; it never fails because of them.

use std::fmt;

use indexmap::IndexMap;

use crate::convert;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::ForeignHandle;
use crate::translate::boundary;
use crate::value::HostValue;

// ============================================================================
// ArrayBridge
// ============================================================================

/// A live view of an interpreter array.
#[derive(Clone)]
pub struct ArrayBridge {
    handle: ForeignHandle,
}

impl ArrayBridge {
    pub(crate) fn new(handle: ForeignHandle) -> Self {
        Self { handle }
    }

    /// Handle to the array cell
    pub fn handle(&self) -> &ForeignHandle {
        &self.handle
    }

    /// Element at `index`, or `None` past the end
    pub fn get(&self, index: usize) -> BridgeResult<HostValue> {
        let raw = self.handle.raw();
        match boundary(self.handle.core(), "array get", |api| api.av_fetch(raw, index))? {
            Some(element) => convert::to_host(&element),
            None => Ok(HostValue::None),
        }
    }

    /// Store a copy of `value` at `index`, extending the array with
    /// `undef` as needed
    pub fn set(&self, index: usize, value: impl Into<HostValue>) -> BridgeResult<()> {
        let core = self.handle.core();
        let element = convert::to_foreign(core, &value.into())?;
        let raw = self.handle.raw();
        boundary(core, "array set", |api| api.av_store(raw, index, element.raw()))
    }

    /// Number of elements
    pub fn len(&self) -> BridgeResult<usize> {
        let raw = self.handle.raw();
        boundary(self.handle.core(), "array length", |api| api.av_len(raw))
    }

    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Append a copy of `value`
    pub fn push(&self, value: impl Into<HostValue>) -> BridgeResult<()> {
        let index = self.len()?;
        self.set(index, value)
    }

    /// Remove and return the last element
    pub fn pop(&self) -> BridgeResult<Option<HostValue>> {
        let raw = self.handle.raw();
        match boundary(self.handle.core(), "array pop", |api| api.av_pop(raw))? {
            Some(element) => convert::to_host(&element).map(Some),
            None => Ok(None),
        }
    }

    /// Remove every element
    pub fn clear(&self) -> BridgeResult<()> {
        let raw = self.handle.raw();
        boundary(self.handle.core(), "array clear", |api| api.av_clear(raw))
    }

    /// Iterate over the elements, fetching one per step
    pub fn iter(&self) -> ArrayIter {
        ArrayIter {
            array: self.clone(),
            index: 0,
        }
    }

    /// Copy every element out of the interpreter
    pub fn to_vec(&self) -> BridgeResult<Vec<HostValue>> {
        self.iter().collect()
    }
}

impl PartialEq for ArrayBridge {
    fn eq(&self, other: &Self) -> bool {
        same_cell(&self.handle, &other.handle)
    }
}

impl fmt::Debug for ArrayBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArrayBridge({})", self.handle.raw())
    }
}

/// Iterator over an [`ArrayBridge`]
pub struct ArrayIter {
    array: ArrayBridge,
    index: usize,
}

impl Iterator for ArrayIter {
    type Item = BridgeResult<HostValue>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.array.len() {
            Ok(len) if self.index >= len => None,
            Ok(_) => {
                let item = self.array.get(self.index);
                self.index += 1;
                Some(item)
            }
            Err(err) => {
                self.index = usize::MAX;
                Some(Err(err))
            }
        }
    }
}

// ============================================================================
// HashBridge
// ============================================================================

/// A live view of an interpreter hash.
#[derive(Clone)]
pub struct HashBridge {
    handle: ForeignHandle,
}

impl HashBridge {
    pub(crate) fn new(handle: ForeignHandle) -> Self {
        Self { handle }
    }

    /// Handle to the hash cell
    pub fn handle(&self) -> &ForeignHandle {
        &self.handle
    }

    /// Value stored under `key`, or `None` when absent
    pub fn get(&self, key: &str) -> BridgeResult<HostValue> {
        let raw = self.handle.raw();
        match boundary(self.handle.core(), "hash get", |api| api.hv_fetch(raw, key))? {
            Some(value) => convert::to_host(&value),
            None => Ok(HostValue::None),
        }
    }

    /// Store a copy of `value` under `key`
    pub fn set(&self, key: &str, value: impl Into<HostValue>) -> BridgeResult<()> {
        let core = self.handle.core();
        let value = convert::to_foreign(core, &value.into())?;
        let raw = self.handle.raw();
        boundary(core, "hash set", |api| api.hv_store(raw, key, value.raw()))
    }

    /// Number of entries
    pub fn len(&self) -> BridgeResult<usize> {
        let raw = self.handle.raw();
        boundary(self.handle.core(), "hash length", |api| api.hv_len(raw))
    }

    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Check whether `key` is present
    pub fn contains_key(&self, key: &str) -> BridgeResult<bool> {
        let raw = self.handle.raw();
        boundary(self.handle.core(), "hash exists", |api| api.hv_exists(raw, key))
    }

    /// Remove `key`, returning its value if it was present
    pub fn delete(&self, key: &str) -> BridgeResult<Option<HostValue>> {
        let raw = self.handle.raw();
        match boundary(self.handle.core(), "hash delete", |api| api.hv_delete(raw, key))? {
            Some(value) => convert::to_host(&value).map(Some),
            None => Ok(None),
        }
    }

    /// Remove every entry
    pub fn clear(&self) -> BridgeResult<()> {
        let raw = self.handle.raw();
        boundary(self.handle.core(), "hash clear", |api| api.hv_clear(raw))
    }

    /// Iterate over `(key, value)` pairs, fetching one per step.
    ///
    /// The hash has a single iteration cursor, as in Perl: starting a
    /// second iteration over the same hash resets the first.
    pub fn iter(&self) -> HashIter {
        HashIter {
            hash: self.clone(),
            started: false,
            done: false,
        }
    }

    /// All keys, in iteration order
    pub fn keys(&self) -> BridgeResult<Vec<String>> {
        self.iter().map(|entry| entry.map(|(key, _)| key)).collect()
    }

    /// Copy every entry out of the interpreter
    pub fn to_map(&self) -> BridgeResult<IndexMap<String, HostValue>> {
        self.iter().collect()
    }
}

impl PartialEq for HashBridge {
    fn eq(&self, other: &Self) -> bool {
        same_cell(&self.handle, &other.handle)
    }
}

impl fmt::Debug for HashBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashBridge({})", self.handle.raw())
    }
}

/// Iterator over a [`HashBridge`]
pub struct HashIter {
    hash: HashBridge,
    started: bool,
    done: bool,
}

impl HashIter {
    fn step(&mut self) -> BridgeResult<Option<(String, HostValue)>> {
        let core = self.hash.handle.core();
        let raw = self.hash.handle.raw();
        if !self.started {
            boundary(core, "hash iterate", |api| api.hv_iter_init(raw))?;
            self.started = true;
        }
        match boundary(core, "hash iterate", |api| api.hv_iter_next(raw))? {
            Some((key, value)) => Ok(Some((key, convert::to_host(&value)?))),
            None => Ok(None),
        }
    }
}

impl Iterator for HashIter {
    type Item = BridgeResult<(String, HostValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = self.step();
        if !matches!(step, Ok(Some(_))) {
            self.done = true;
        }
        step.transpose()
    }
}

// ============================================================================
// ContainerBridge
// ============================================================================

/// Key for [`ContainerBridge`] access
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerKey {
    /// Array index
    Index(usize),
    /// Hash key
    Name(String),
}

impl From<usize> for ContainerKey {
    fn from(index: usize) -> Self {
        ContainerKey::Index(index)
    }
}

impl From<&str> for ContainerKey {
    fn from(name: &str) -> Self {
        ContainerKey::Name(name.to_string())
    }
}

impl From<String> for ContainerKey {
    fn from(name: String) -> Self {
        ContainerKey::Name(name)
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKey::Index(index) => write!(f, "{}", index),
            ContainerKey::Name(name) => write!(f, "{:?}", name),
        }
    }
}

/// Either kind of container, for code that handles both.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerBridge {
    Array(ArrayBridge),
    Hash(HashBridge),
}

impl ContainerBridge {
    /// Element under `key`.
    ///
    /// Arrays take indices; a name is parsed as an index. Hashes take
    /// names; an index is used as its decimal string, as Perl would.
    pub fn get(&self, key: impl Into<ContainerKey>) -> BridgeResult<HostValue> {
        match (self, key.into()) {
            (ContainerBridge::Array(array), key) => array.get(array_index(&key)?),
            (ContainerBridge::Hash(hash), key) => hash.get(&hash_key(key)),
        }
    }

    /// Store a copy of `value` under `key`
    pub fn set(&self, key: impl Into<ContainerKey>, value: impl Into<HostValue>) -> BridgeResult<()> {
        match (self, key.into()) {
            (ContainerBridge::Array(array), key) => array.set(array_index(&key)?, value),
            (ContainerBridge::Hash(hash), key) => hash.set(&hash_key(key), value),
        }
    }

    /// Number of elements or entries
    pub fn len(&self) -> BridgeResult<usize> {
        match self {
            ContainerBridge::Array(array) => array.len(),
            ContainerBridge::Hash(hash) => hash.len(),
        }
    }

    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Iterate over `(key, value)` pairs
    pub fn iter(&self) -> Box<dyn Iterator<Item = BridgeResult<(ContainerKey, HostValue)>>> {
        match self {
            ContainerBridge::Array(array) => Box::new(
                array
                    .iter()
                    .enumerate()
                    .map(|(index, item)| item.map(|value| (ContainerKey::Index(index), value))),
            ),
            ContainerBridge::Hash(hash) => Box::new(
                hash.iter()
                    .map(|entry| entry.map(|(key, value)| (ContainerKey::Name(key), value))),
            ),
        }
    }

    /// Handle to the container cell
    pub fn handle(&self) -> &ForeignHandle {
        match self {
            ContainerBridge::Array(array) => array.handle(),
            ContainerBridge::Hash(hash) => hash.handle(),
        }
    }
}

impl From<ArrayBridge> for ContainerBridge {
    fn from(array: ArrayBridge) -> Self {
        ContainerBridge::Array(array)
    }
}

impl From<HashBridge> for ContainerBridge {
    fn from(hash: HashBridge) -> Self {
        ContainerBridge::Hash(hash)
    }
}

fn array_index(key: &ContainerKey) -> BridgeResult<usize> {
    match key {
        ContainerKey::Index(index) => Ok(*index),
        ContainerKey::Name(name) => name.parse().map_err(|_| {
            BridgeError::type_conversion(
                "str",
                "array index",
                format!("{:?} is not an index", name),
            )
        }),
    }
}

fn hash_key(key: ContainerKey) -> String {
    match key {
        ContainerKey::Index(index) => index.to_string(),
        ContainerKey::Name(name) => name,
    }
}

fn same_cell(a: &ForeignHandle, b: &ForeignHandle) -> bool {
    if a.raw() == b.raw() {
        return true;
    }
    matches!((a.identity(), b.identity()), (Ok(x), Ok(y)) if x == y)
}
