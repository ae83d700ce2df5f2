//! Session Configuration
//!
//! Settings applied when the interpreter is constructed, loadable from TOML:
//!
//! ```toml
//! args = ["", "-w", "-e", "0"]
//! include_paths = ["lib", "/opt/app/perl5"]
//! preload = ["Data::Dumper"]
//! lazy_init = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Configuration for an interpreter session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interpreter command line; the first entry is the program name
    pub args: Vec<String>,
    /// Directories prepended to the module search path
    pub include_paths: Vec<PathBuf>,
    /// Packages required during initialization
    pub preload: Vec<String>,
    /// Initialize on first use instead of requiring `initialize()`
    pub lazy_init: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            args: vec![String::new(), "-e".to_string(), "0".to_string()],
            include_paths: Vec::new(),
            preload: Vec::new(),
            lazy_init: true,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> BridgeResult<Self> {
        toml::from_str(text).map_err(|e| BridgeError::config(e.to_string()))
    }

    /// Read a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| BridgeError::config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Add a directory to the module search path
    pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    /// Require a package during initialization
    pub fn with_preload(mut self, package: impl Into<String>) -> Self {
        self.preload.push(package.into());
        self
    }

    /// Require an explicit `initialize()` before any other operation
    pub fn explicit_init(mut self) -> Self {
        self.lazy_init = false;
        self
    }

    /// Command line handed to interpreter construction.
    ///
    /// Include paths become `-I` switches placed right after the program
    /// name, ahead of any script arguments.
    pub fn interpreter_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len() + self.include_paths.len() + 1);
        let mut rest = self.args.iter();
        args.push(rest.next().cloned().unwrap_or_default());
        args.extend(
            self.include_paths
                .iter()
                .map(|path| format!("-I{}", path.display())),
        );
        args.extend(rest.cloned());
        args
    }
}
