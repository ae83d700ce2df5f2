//! Interpreter Session
//!
//! A [`Session`] owns one embedded interpreter and moves through three
//! states:
//!
//! ```text
//! Uninitialized --initialize()--> Initialized --shutdown()--> ShutDown
//!       |                                                        ^
//!       +----------------------shutdown()------------------------+
//! ```
//!
//! With `lazy_init` (the default) the first operation that needs the
//! interpreter initializes it. A failed preload tears the interpreter down
//! again and leaves the session `Uninitialized`, so every later attempt
//! reports the load error anew. `ShutDown` is terminal: a session is never
//! re-initialized, so handles from a destroyed interpreter can never be
//! confused with cells of a new one.
//!
//! ## Design Notes
//!
//! - Builds without multiplicity allow one live interpreter per process,
//!   enforced by a process-wide claim
//! - The interpreter is destructed on `shutdown()` or when the last owner
//!   of the session core (session or handle) drops

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use perlbridge_abi::{CallContext, Capabilities, EmbeddingApi, RawSv};
use tracing::{debug, info, trace, warn};

use crate::callable::CallableBridge;
use crate::config::SessionConfig;
use crate::container::{ArrayBridge, HashBridge};
use crate::convert;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::ForeignHandle;
use crate::package::Package;
use crate::translate::boundary;
use crate::value::HostValue;

// ============================================================================
// State
// ============================================================================

/// Set while a session without multiplicity holds the interpreter
static SINGLE_INSTANCE_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No interpreter has been constructed yet
    Uninitialized,
    /// The interpreter is running
    Initialized,
    /// The interpreter has been destroyed
    ShutDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Initialized => write!(f, "initialized"),
            SessionState::ShutDown => write!(f, "shut down"),
        }
    }
}

// ============================================================================
// SessionCore
// ============================================================================

/// Shared state behind a session and every handle it produced.
pub(crate) struct SessionCore {
    api: RefCell<Box<dyn EmbeddingApi>>,
    state: Cell<SessionState>,
    config: SessionConfig,
    capabilities: Capabilities,
    live_handles: Cell<usize>,
    holds_claim: Cell<bool>,
}

impl SessionCore {
    fn new(api: Box<dyn EmbeddingApi>, config: SessionConfig) -> Self {
        let capabilities = api.capabilities();
        Self {
            api: RefCell::new(api),
            state: Cell::new(SessionState::Uninitialized),
            config,
            capabilities,
            live_handles: Cell::new(0),
            holds_claim: Cell::new(false),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Run `f` against the embedding API.
    ///
    /// Handles must not be dropped inside `f`: their release re-enters
    /// the API.
    pub(crate) fn with_api<T>(&self, f: impl FnOnce(&mut dyn EmbeddingApi) -> T) -> T {
        let mut api = self.api.borrow_mut();
        f(api.as_mut())
    }

    /// Fail unless the interpreter is running
    pub(crate) fn ensure_live(&self, operation: &str) -> BridgeResult<()> {
        match self.state() {
            SessionState::Initialized => Ok(()),
            SessionState::Uninitialized => Err(BridgeError::lifecycle(
                operation,
                "the interpreter session is not initialized",
            )),
            SessionState::ShutDown => Err(BridgeError::lifecycle(
                operation,
                "the interpreter session has been shut down",
            )),
        }
    }

    /// Like [`ensure_live`](Self::ensure_live), initializing first when
    /// the configuration allows it
    pub(crate) fn ensure_ready(self: &Rc<Self>, operation: &str) -> BridgeResult<()> {
        if self.state() == SessionState::Uninitialized && self.config.lazy_init {
            self.initialize()?;
        }
        self.ensure_live(operation)
    }

    fn initialize(self: &Rc<Self>) -> BridgeResult<()> {
        match self.state() {
            SessionState::Initialized => return Ok(()),
            SessionState::ShutDown => {
                return Err(BridgeError::lifecycle(
                    "initialize",
                    "the interpreter session has been shut down",
                ))
            }
            SessionState::Uninitialized => {}
        }

        if !self.capabilities.multiplicity {
            if SINGLE_INSTANCE_CLAIMED
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(BridgeError::lifecycle(
                    "initialize",
                    "another interpreter is already running and this build has no multiplicity",
                ));
            }
            self.holds_claim.set(true);
        }

        let args = self.config.interpreter_args();
        if let Err(err) = self.with_api(|api| api.construct(&args)) {
            self.release_claim();
            return Err(BridgeError::lifecycle(
                "initialize",
                format!("interpreter construction failed: {}", err),
            ));
        }
        self.state.set(SessionState::Initialized);
        info!(
            args = ?args,
            multiplicity = self.capabilities.multiplicity,
            thread_safe = self.capabilities.thread_safe,
            "interpreter session initialized"
        );

        for package in &self.config.preload {
            if let Err(err) = self.require(package) {
                self.abandon_initialize();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Undo a partial initialization so the next attempt starts over
    fn abandon_initialize(&self) {
        self.with_api(|api| api.destruct());
        self.release_claim();
        // Handles created against the abandoned interpreter must never
        // reach a fresh one.
        let next = if self.live_handles.get() == 0 {
            SessionState::Uninitialized
        } else {
            SessionState::ShutDown
        };
        self.state.set(next);
        warn!(state = %next, "preload failed, interpreter torn down");
    }

    fn shutdown(&self) {
        if self.state() == SessionState::Initialized {
            self.with_api(|api| api.destruct());
            self.release_claim();
            info!(
                live_handles = self.live_handles.get(),
                "interpreter session shut down"
            );
        }
        self.state.set(SessionState::ShutDown);
    }

    fn release_claim(&self) {
        if self.holds_claim.replace(false) {
            SINGLE_INSTANCE_CLAIMED.store(false, Ordering::SeqCst);
        }
    }

    pub(crate) fn require(self: &Rc<Self>, package: &str) -> BridgeResult<()> {
        debug!(package, "loading package");
        boundary(self, "load", |api| api.require(package)).map_err(|err| match err {
            BridgeError::ForeignRuntime { message, .. } => {
                BridgeError::load_failed(package, message)
            }
            other => other,
        })
    }

    // ------------------------------------------------------------------
    // Reference counts
    // ------------------------------------------------------------------

    pub(crate) fn retain(&self, raw: RawSv) {
        if self.state() != SessionState::Initialized {
            return;
        }
        if let Err(err) = self.with_api(|api| api.refcnt_inc(raw)) {
            warn!(sv = %raw, error = %err, "failed to add foreign reference");
        }
    }

    pub(crate) fn release(&self, raw: RawSv) {
        if self.state() != SessionState::Initialized {
            trace!(sv = %raw, "session not running, nothing to release");
            return;
        }
        match self.with_api(|api| api.refcnt_dec(raw)) {
            Ok(()) => trace!(sv = %raw, "released foreign reference"),
            Err(err) => warn!(sv = %raw, error = %err, "failed to release foreign reference"),
        }
    }

    pub(crate) fn handle_acquired(&self) {
        self.live_handles.set(self.live_handles.get() + 1);
    }

    pub(crate) fn handle_released(&self) {
        self.live_handles.set(self.live_handles.get().saturating_sub(1));
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Session
// ============================================================================

/// An embedded interpreter session.
pub struct Session {
    core: Rc<SessionCore>,
}

impl Session {
    /// Create a session with the default configuration
    pub fn new(api: impl EmbeddingApi + 'static) -> Self {
        Self::with_config(api, SessionConfig::default())
    }

    /// Create a session with an explicit configuration
    pub fn with_config(api: impl EmbeddingApi + 'static, config: SessionConfig) -> Self {
        Self {
            core: Rc::new(SessionCore::new(Box::new(api), config)),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    /// What the embedded interpreter build supports
    pub fn capabilities(&self) -> Capabilities {
        self.core.capabilities
    }

    /// The configuration this session was created with
    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    /// Number of handles currently alive for this session
    pub fn live_handles(&self) -> usize {
        self.core.live_handles.get()
    }

    /// Construct the interpreter. Calling it again is a no-op.
    pub fn initialize(&self) -> BridgeResult<()> {
        self.core.initialize()
    }

    /// Destroy the interpreter.
    ///
    /// Handles still alive become inert: operations on them fail with a
    /// lifecycle error and dropping them releases nothing.
    pub fn shutdown(&self) -> BridgeResult<()> {
        self.core.shutdown();
        Ok(())
    }

    /// Load a package and return an accessor for its namespace
    pub fn load(&self, package: &str) -> BridgeResult<Package> {
        self.core.ensure_ready("load")?;
        self.core.require(package)?;
        Ok(Package::bind(&self.core, package))
    }

    /// Read a global variable.
    ///
    /// The sigil selects the slot: `$name` (or a bare name) reads the
    /// scalar, `@name` the array, `%name` the hash and `&name` the
    /// subroutine. Unqualified names live in `main::`. A missing variable
    /// reads as [`HostValue::None`].
    pub fn get_global(&self, name: &str) -> BridgeResult<HostValue> {
        self.core.ensure_ready("get_global")?;
        read_global(&self.core, name)
    }

    /// Assign a global variable, creating it if needed.
    ///
    /// Arrays and hashes take a list or mapping (or a bridge, whose
    /// contents are copied).
    pub fn set_global(&self, name: &str, value: impl Into<HostValue>) -> BridgeResult<()> {
        self.core.ensure_ready("set_global")?;
        write_global(&self.core, name, &value.into())
    }

    /// Evaluate source text in list context
    pub fn eval(&self, source: &str) -> BridgeResult<Vec<HostValue>> {
        self.core.ensure_ready("eval")?;
        debug!(bytes = source.len(), "evaluating source");
        let results = boundary(&self.core, "eval", |api| api.eval(source, CallContext::List))?;
        results.iter().map(convert::to_host).collect()
    }

    /// Look up a subroutine by (possibly qualified) name
    pub fn function(&self, name: &str) -> BridgeResult<CallableBridge> {
        self.core.ensure_ready("function")?;
        lookup_sub(&self.core, name)
    }

    /// Call a subroutine by (possibly qualified) name
    pub fn call(&self, name: &str, args: &[HostValue]) -> BridgeResult<Vec<HostValue>> {
        self.function(name)?.call(args)
    }

    /// Convert a host value into a new interpreter cell
    pub fn to_foreign(&self, value: &HostValue) -> BridgeResult<ForeignHandle> {
        self.core.ensure_ready("to_foreign")?;
        convert::to_foreign(&self.core, value)
    }

    /// Convert a handle of this session into a host value
    pub fn to_host(&self, handle: &ForeignHandle) -> BridgeResult<HostValue> {
        if !handle.belongs_to(&self.core) {
            return Err(BridgeError::type_conversion(
                "foreign handle",
                "host value",
                "the handle belongs to a different interpreter session",
            ));
        }
        convert::to_host(handle)
    }

    /// Create an interpreter array holding copies of `items`
    pub fn new_array<I>(&self, items: I) -> BridgeResult<ArrayBridge>
    where
        I: IntoIterator,
        I::Item: Into<HostValue>,
    {
        self.core.ensure_ready("new_array")?;
        let array = ArrayBridge::new(boundary(&self.core, "new_array", |api| api.new_av())?);
        for item in items {
            array.push(item)?;
        }
        Ok(array)
    }

    /// Create an interpreter hash holding copies of `pairs`
    pub fn new_hash<I, K, V>(&self, pairs: I) -> BridgeResult<HashBridge>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<HostValue>,
    {
        self.core.ensure_ready("new_hash")?;
        let hash = HashBridge::new(boundary(&self.core, "new_hash", |api| api.new_hv())?);
        for (key, value) in pairs {
            hash.set(key.as_ref(), value)?;
        }
        Ok(hash)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("capabilities", &self.core.capabilities)
            .field("live_handles", &self.live_handles())
            .finish()
    }
}

// ============================================================================
// Globals
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Scalar,
    Array,
    Hash,
    Code,
}

/// Split a sigil off a variable name and qualify it into `main::`
pub(crate) fn parse_global(name: &str) -> (Slot, String) {
    let (slot, bare) = match name.chars().next() {
        Some('$') => (Slot::Scalar, &name[1..]),
        Some('@') => (Slot::Array, &name[1..]),
        Some('%') => (Slot::Hash, &name[1..]),
        Some('&') => (Slot::Code, &name[1..]),
        _ => (Slot::Scalar, name),
    };
    let bare = bare.strip_prefix("::").unwrap_or(bare);
    let qualified = if bare.contains("::") {
        bare.to_string()
    } else {
        format!("main::{}", bare)
    };
    (slot, qualified)
}

/// Split a sigil off a variable name and qualify it into `package`
pub(crate) fn qualify_in(package: &str, name: &str) -> String {
    let (sigil, bare) = match name.chars().next() {
        Some(c @ ('$' | '@' | '%' | '&')) => (Some(c), &name[1..]),
        _ => (None, name),
    };
    let qualified = if bare.contains("::") {
        bare.to_string()
    } else {
        format!("{}::{}", package, bare)
    };
    match sigil {
        Some(c) => format!("{}{}", c, qualified),
        None => qualified,
    }
}

pub(crate) fn read_global(core: &Rc<SessionCore>, name: &str) -> BridgeResult<HostValue> {
    let (slot, qualified) = parse_global(name);
    debug!(name = %qualified, ?slot, "reading global");
    let value = match slot {
        Slot::Scalar => {
            match boundary(core, "get_global", |api| api.get_sv(&qualified, false))? {
                Some(sv) => convert::to_host(&sv)?,
                None => HostValue::None,
            }
        }
        Slot::Array => boundary(core, "get_global", |api| api.get_av(&qualified, false))?
            .map(|av| HostValue::Array(ArrayBridge::new(av)))
            .unwrap_or_default(),
        Slot::Hash => boundary(core, "get_global", |api| api.get_hv(&qualified, false))?
            .map(|hv| HostValue::Hash(HashBridge::new(hv)))
            .unwrap_or_default(),
        Slot::Code => boundary(core, "get_global", |api| api.get_cv(&qualified))?
            .map(|cv| HostValue::Callable(CallableBridge::code(cv)))
            .unwrap_or_default(),
    };
    Ok(value)
}

pub(crate) fn write_global(core: &Rc<SessionCore>, name: &str, value: &HostValue) -> BridgeResult<()> {
    let (slot, qualified) = parse_global(name);
    debug!(name = %qualified, ?slot, kind = value.type_name(), "assigning global");
    match slot {
        Slot::Scalar => {
            let source = convert::to_foreign(core, value)?;
            let target = required(
                boundary(core, "set_global", |api| api.get_sv(&qualified, true))?,
                &qualified,
            )?;
            boundary(core, "set_global", |api| api.sv_set(target.raw(), source.raw()))
        }
        Slot::Array => {
            let items = list_items(value, "array")?;
            let target = required(
                boundary(core, "set_global", |api| api.get_av(&qualified, true))?,
                &qualified,
            )?;
            let array = ArrayBridge::new(target);
            array.clear()?;
            for item in items {
                array.push(item)?;
            }
            Ok(())
        }
        Slot::Hash => {
            let entries = mapping_entries(value)?;
            let target = required(
                boundary(core, "set_global", |api| api.get_hv(&qualified, true))?,
                &qualified,
            )?;
            let hash = HashBridge::new(target);
            hash.clear()?;
            for (key, item) in entries {
                hash.set(&key, item)?;
            }
            Ok(())
        }
        Slot::Code => Err(BridgeError::type_conversion(
            value.type_name(),
            "subroutine",
            "subroutines cannot be assigned from the host",
        )),
    }
}

pub(crate) fn lookup_sub(core: &Rc<SessionCore>, name: &str) -> BridgeResult<CallableBridge> {
    let (_, qualified) = parse_global(name.strip_prefix('&').unwrap_or(name));
    match boundary(core, "function", |api| api.get_cv(&qualified))? {
        Some(cv) => Ok(CallableBridge::code(cv)),
        None => Err(BridgeError::runtime(format!(
            "Undefined subroutine &{} called",
            qualified
        ))),
    }
}

fn required(handle: Option<ForeignHandle>, name: &str) -> BridgeResult<ForeignHandle> {
    handle.ok_or_else(|| BridgeError::runtime(format!("cannot create global {}", name)))
}

fn list_items(value: &HostValue, target: &str) -> BridgeResult<Vec<HostValue>> {
    match value {
        HostValue::List(items) => Ok(items.clone()),
        HostValue::Array(array) => array.to_vec(),
        HostValue::None => Ok(Vec::new()),
        other => Err(BridgeError::type_conversion(
            other.type_name(),
            target,
            "only lists and arrays can be assigned to an array",
        )),
    }
}

fn mapping_entries(value: &HostValue) -> BridgeResult<IndexMap<String, HostValue>> {
    match value {
        HostValue::Mapping(map) => Ok(map.clone()),
        HostValue::Hash(hash) => hash.to_map(),
        HostValue::None => Ok(IndexMap::new()),
        other => Err(BridgeError::type_conversion(
            other.type_name(),
            "hash",
            "only mappings and hashes can be assigned to a hash",
        )),
    }
}
