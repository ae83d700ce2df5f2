//! Package Accessor
//!
//! A [`Package`] is what [`Session::load`](crate::Session::load) returns:
//! a view of one namespace through which its subroutines, class methods and
//! package variables are reached.

use std::fmt;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::callable::CallableBridge;
use crate::error::BridgeResult;
use crate::session::{self, SessionCore};
use crate::translate::boundary;
use crate::value::HostValue;

/// A loaded package namespace.
#[derive(Clone)]
pub struct Package {
    core: Rc<SessionCore>,
    name: SmolStr,
}

impl Package {
    pub(crate) fn bind(core: &Rc<SessionCore>, name: &str) -> Self {
        Self {
            core: Rc::clone(core),
            name: SmolStr::new(name),
        }
    }

    /// Package name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subroutine `name` of this package, looked up now
    pub fn function(&self, name: &str) -> BridgeResult<CallableBridge> {
        session::lookup_sub(&self.core, &session::qualify_in(&self.name, name))
    }

    /// Call subroutine `name` as a plain function
    pub fn call(&self, name: &str, args: &[HostValue]) -> BridgeResult<Vec<HostValue>> {
        self.function(name)?.call(args)
    }

    /// Class method `name`, resolved through `@ISA` when called
    pub fn method(&self, name: &str) -> BridgeResult<CallableBridge> {
        let class = self.name.as_bytes();
        let receiver = boundary(&self.core, "class method", |api| api.new_pv(class, true))?;
        Ok(CallableBridge::method(receiver, name))
    }

    /// Call class method `name`
    pub fn call_method(&self, name: &str, args: &[HostValue]) -> BridgeResult<Vec<HostValue>> {
        self.method(name)?.call(args)
    }

    /// Call the constructor, `Class->new(args)`, returning its first result
    pub fn new(&self, args: &[HostValue]) -> BridgeResult<HostValue> {
        self.method("new")?.call_one(args)
    }

    /// Read a package variable; the sigil rules of
    /// [`Session::get_global`](crate::Session::get_global) apply
    pub fn get_var(&self, name: &str) -> BridgeResult<HostValue> {
        session::read_global(&self.core, &session::qualify_in(&self.name, name))
    }

    /// Assign a package variable
    pub fn set_var(&self, name: &str, value: impl Into<HostValue>) -> BridgeResult<()> {
        session::write_global(&self.core, &session::qualify_in(&self.name, name), &value.into())
    }
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Package").field(&self.name).finish()
    }
}
