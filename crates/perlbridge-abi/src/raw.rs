//! Raw Boundary Vocabulary
//!
//! Plain-data types shared by every implementation of the embedding API.
//! None of these types own anything: a [`RawSv`] is an address, not a
//! reference-count stake.

use std::fmt;

// ============================================================================
// RawSv - Unowned cell address
// ============================================================================

/// Address of a reference-counted interpreter cell.
///
/// For a linked interpreter this is the bit pattern of an `SV*`; the
/// reference interpreter uses heap slot numbers. Copying a `RawSv` does not
/// touch the reference count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawSv(u64);

impl RawSv {
    /// Build an address from its raw bits
    pub const fn from_bits(bits: u64) -> Self {
        RawSv(bits)
    }

    /// Get the raw bits
    pub const fn bits(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RawSv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SV(0x{:x})", self.0)
    }
}

// ============================================================================
// CellKind - Runtime type tag
// ============================================================================

/// Runtime type tag of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// Scalar holding no value
    Undef,
    /// Scalar holding a number, string or boolean
    Scalar,
    /// Scalar holding a reference to another cell
    Ref,
    /// Array body (`AV`)
    Array,
    /// Hash body (`HV`)
    Hash,
    /// Subroutine body (`CV`)
    Code,
    /// Symbol table entry (`GV`)
    Glob,
}

impl CellKind {
    /// The name Perl's `ref()` would report for a reference to this kind
    pub fn reftype(self) -> &'static str {
        match self {
            CellKind::Undef | CellKind::Scalar => "SCALAR",
            CellKind::Ref => "REF",
            CellKind::Array => "ARRAY",
            CellKind::Hash => "HASH",
            CellKind::Code => "CODE",
            CellKind::Glob => "GLOB",
        }
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellKind::Undef => write!(f, "UNDEF"),
            other => write!(f, "{}", other.reftype()),
        }
    }
}

// ============================================================================
// ScalarFlags - Value validity flags
// ============================================================================

/// Which representations of a scalar are currently valid.
///
/// A scalar may be valid as several things at once (a "dualvar"); readers
/// decide which representation wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScalarFlags(u8);

impl ScalarFlags {
    /// Integer slot is valid
    pub const IOK: ScalarFlags = ScalarFlags(0b0000_0001);
    /// Floating-point slot is valid
    pub const NOK: ScalarFlags = ScalarFlags(0b0000_0010);
    /// String slot is valid
    pub const POK: ScalarFlags = ScalarFlags(0b0000_0100);
    /// String slot holds UTF-8 encoded text
    pub const UTF8: ScalarFlags = ScalarFlags(0b0000_1000);
    /// Scalar is one of the immortal booleans
    pub const BOOL: ScalarFlags = ScalarFlags(0b0001_0000);
    /// Scalar holds a reference
    pub const ROK: ScalarFlags = ScalarFlags(0b0010_0000);

    /// No flags set
    pub const fn empty() -> Self {
        ScalarFlags(0)
    }

    /// Check whether all flags in `other` are set
    pub const fn contains(self, other: ScalarFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the flags in `other`
    pub fn insert(&mut self, other: ScalarFlags) {
        self.0 |= other.0;
    }

    /// Clear the flags in `other`
    pub fn remove(&mut self, other: ScalarFlags) {
        self.0 &= !other.0;
    }

    /// Check whether no flag is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check whether the scalar carries a numeric representation
    pub const fn is_numeric(self) -> bool {
        self.0 & (Self::IOK.0 | Self::NOK.0) != 0
    }
}

impl std::ops::BitOr for ScalarFlags {
    type Output = ScalarFlags;

    fn bitor(self, rhs: ScalarFlags) -> ScalarFlags {
        ScalarFlags(self.0 | rhs.0)
    }
}

// ============================================================================
// Call descriptors
// ============================================================================

/// How many values the caller wants back from a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallContext {
    /// Discard all return values
    Void,
    /// Keep only the last return value
    Scalar,
    /// Keep every return value
    #[default]
    List,
}

/// What to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget<'a> {
    /// A code cell
    Code(RawSv),
    /// A subroutine looked up by (possibly qualified) name
    Named(&'a str),
    /// A method resolved on the invocant's class at call time.
    ///
    /// The invocant is either a blessed reference or a string naming a
    /// package; it is passed as the first argument.
    Method {
        /// Object or class name
        invocant: RawSv,
        /// Method name, optionally qualified to skip resolution
        name: &'a str,
    },
}

/// What the linked interpreter build supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// More than one interpreter may exist in the process
    pub multiplicity: bool,
    /// Interpreter calls may be issued from several threads
    pub thread_safe: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            multiplicity: false,
            thread_safe: false,
        }
    }
}
