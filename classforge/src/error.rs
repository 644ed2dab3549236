use std::fmt;
use std::io;
use std::panic::Location;

/// Errors raised while building or assembling a class.
///
/// Build-time validation errors are returned synchronously by the builder
/// call that caused them. [`Assembly`](BuildError::Assembly) errors surface
/// at close time; when origin capture is enabled on the class they carry the
/// builder call site that created the failing operation.
#[derive(Debug)]
pub enum BuildError {
    /// A type signature or member name failed validation.
    MalformedDescriptor { detail: String },
    /// An invocation was given the wrong number of arguments.
    ArityMismatch {
        method: String,
        expected: usize,
        found: usize,
    },
    /// The two sides of a branch merge have different type signatures.
    BranchTypeMismatch { true_ty: String, false_ty: String },
    /// `continue_to`/`break_to` targeted a scope that does not enclose the
    /// jump site.
    InvalidJumpTarget,
    /// A result handle was read from a scope that is neither its owner nor
    /// a descendant of its owner.
    HandleOutOfScope,
    /// A closure body referenced a handle owned by a scope that is not an
    /// ancestor of the closure, or tried to write through a captured handle.
    AmbiguousCapture,
    /// The closure target does not have exactly one abstract, non-default,
    /// non-static method.
    NotAFunctionalType { name: String, detail: &'static str },
    /// `assign` targeted a constant handle.
    InvalidAssignTarget,
    /// `this_value` was requested inside a static method.
    ThisInStaticMethod,
    /// A parameter index past the end of the method signature.
    NoSuchParameter { index: usize, count: usize },
    /// A try/catch region was mutated after `complete_try`, or a catch
    /// clause was declared twice for the same exception type.
    InvalidTryBlock { detail: &'static str },
    /// A deferred operation failed while being written out.
    Assembly {
        detail: String,
        origin: Option<&'static Location<'static>>,
    },
    /// The output sink rejected the finished class. Propagated unchanged;
    /// generation is deterministic, so the caller may retry the whole build.
    Output(io::Error),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedDescriptor { detail } => {
                write!(f, "malformed descriptor: {detail}")
            }
            Self::ArityMismatch {
                method,
                expected,
                found,
            } => {
                write!(
                    f,
                    "wrong number of arguments for {method}: expected {expected}, got {found}"
                )
            }
            Self::BranchTypeMismatch { true_ty, false_ty } => {
                write!(
                    f,
                    "branch merge type mismatch: true branch produced {true_ty}, false branch {false_ty}"
                )
            }
            Self::InvalidJumpTarget => {
                write!(f, "jump target is not an enclosing scope")
            }
            Self::HandleOutOfScope => {
                write!(f, "result handle read outside its owning scope")
            }
            Self::AmbiguousCapture => {
                write!(
                    f,
                    "closure capture must resolve through the enclosing scope chain"
                )
            }
            Self::NotAFunctionalType { name, detail } => {
                write!(f, "{name} is not a functional type: {detail}")
            }
            Self::InvalidAssignTarget => {
                write!(f, "cannot assign to a constant handle")
            }
            Self::ThisInStaticMethod => {
                write!(f, "static methods have no `this` value")
            }
            Self::NoSuchParameter { index, count } => {
                write!(f, "no parameter {index}; method declares {count}")
            }
            Self::InvalidTryBlock { detail } => {
                write!(f, "invalid try/catch region: {detail}")
            }
            Self::Assembly { detail, origin } => {
                write!(f, "assembly failed: {detail}")?;
                if let Some(origin) = origin {
                    write!(f, " (operation created at {origin})")?;
                }
                Ok(())
            }
            Self::Output(err) => write!(f, "output sink error: {err}"),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Output(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for BuildError {
    fn from(err: io::Error) -> Self {
        Self::Output(err)
    }
}
