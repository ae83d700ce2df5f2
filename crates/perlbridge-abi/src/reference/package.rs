//! Package Definitions
//!
//! A [`PackageDef`] describes what `require Package` installs in the
//! reference interpreter: native subroutines, package scalars and `@ISA`.
//! A definition may also be marked as failing to compile, which makes
//! `require` die with the given diagnostic.

use std::fmt;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::reference::native::{NativeFn, NativeResult, SubContext};

/// Initial value of a package scalar
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `undef`
    Undef,
    /// Integer literal
    Int(i64),
    /// Floating-point literal
    Num(f64),
    /// String literal
    Str(String),
}

/// Definition of a package the reference interpreter can load.
#[derive(Clone)]
pub struct PackageDef {
    pub(crate) name: SmolStr,
    pub(crate) isa: Vec<SmolStr>,
    pub(crate) subs: Vec<(SmolStr, Rc<NativeFn>)>,
    pub(crate) scalars: Vec<(SmolStr, Literal)>,
    pub(crate) compile_error: Option<String>,
}

impl PackageDef {
    /// Start a definition for `name`
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            isa: Vec::new(),
            subs: Vec::new(),
            scalars: Vec::new(),
            compile_error: None,
        }
    }

    /// Package name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set `@ISA`
    pub fn isa<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.isa = parents.into_iter().map(Into::into).collect();
        self
    }

    /// Define `sub name { ... }`
    pub fn sub<F>(mut self, name: impl Into<SmolStr>, body: F) -> Self
    where
        F: Fn(&mut SubContext<'_>) -> NativeResult + 'static,
    {
        self.subs.push((name.into(), Rc::new(body)));
        self
    }

    /// Define `our $name = value`
    pub fn scalar(mut self, name: impl Into<SmolStr>, value: Literal) -> Self {
        self.scalars.push((name.into(), value));
        self
    }

    /// Make `require` fail with a compile diagnostic
    pub fn compile_error(mut self, diagnostic: impl Into<String>) -> Self {
        self.compile_error = Some(diagnostic.into());
        self
    }

    /// Fully-qualified name of a symbol in this package
    pub(crate) fn qualified(&self, symbol: &str) -> String {
        format!("{}::{}", self.name, symbol)
    }

    /// File path `require` reports for this package
    pub(crate) fn module_path(name: &str) -> String {
        format!("{}.pm", name.replace("::", "/"))
    }
}

impl fmt::Debug for PackageDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageDef")
            .field("name", &self.name)
            .field("isa", &self.isa)
            .field("subs", &self.subs.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .field("scalars", &self.scalars)
            .field("compile_error", &self.compile_error)
            .finish()
    }
}
