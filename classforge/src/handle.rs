//! Symbolic values produced by builder operations.

use crate::scope::ScopeId;

/// A literal embedded in the instruction stream via the constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    /// A class-literal reference, produced by [`Scope::load_class`].
    ///
    /// [`Scope::load_class`]: crate::Scope::load_class
    Class(String),
}

impl Const {
    pub(crate) fn type_sig(&self) -> &'static str {
        match self {
            Self::Null => "Lsys/Object;",
            Self::Bool(_) => "Z",
            Self::I32(_) => "I",
            Self::I64(_) => "J",
            Self::F32(_) => "F",
            Self::F64(_) => "D",
            Self::Str(_) => "Lsys/String;",
            Self::Class(_) => "Lsys/Class;",
        }
    }
}

impl From<bool> for Const {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Const {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<i64> for Const {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f32> for Const {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<f64> for Const {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<&str> for Const {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Const {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// A symbolic reference to a value produced by some builder operation.
///
/// Handles are created only by [`Scope`](crate::Scope) operations and may
/// be read from the owning scope or any of its descendants. Physical
/// storage is decided later by the slot allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultHandle(pub(crate) u32);

/// Storage classification of a handle.
///
/// Fixed at construction except for the transitions the allocator performs:
/// `Unused -> SingleUse` when a produced value is consumed by the very next
/// operation, and `Unused`/`SingleUse` -> `LocalVariable` when a stored
/// slot turns out to be needed after all.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HandleKind {
    /// An embedded literal; never occupies a slot.
    Constant(Const),
    /// Bound to a local slot.
    LocalVariable(u16),
    /// Produced and consumed back-to-back on the operand stack.
    SingleUse,
    /// Not yet classified; a value nobody reads stays here and is popped.
    Unused,
}

#[derive(Debug)]
pub(crate) struct HandleData {
    pub ty: String,
    pub kind: HandleKind,
    pub owner: ScopeId,
    /// Explicitly declared or assigned variables are never collapsed to
    /// `SingleUse`: they may be re-read after later assignments.
    pub declared: bool,
}
