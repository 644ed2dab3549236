//! Programmatic class generation.
//!
//! Declare a class with [`ClassSpec`], fill method bodies through
//! [`Scope`] operations, and [`ClassBuilder::close`] assembles everything
//! into the serialized container format and hands it to a [`ClassOutput`].
//!
//! Builder operations return [`ResultHandle`]s instead of touching an
//! operand stack directly: operations are recorded, and only at close
//! time does the slot allocator decide which values live in local slots
//! and which flow directly on the stack. Closures created with
//! [`Scope::create_closure`] become synthesized companion classes with
//! their captured values carried in fields.
//!
//! ```no_run
//! use classforge::{flags, ClassBuilder, ClassSpec, MemoryOutput, MethodDesc};
//!
//! # fn main() -> Result<(), classforge::BuildError> {
//! let output = MemoryOutput::new();
//! let mut class = ClassBuilder::new(ClassSpec::new("app/Adder")?, output);
//! let method = class.method("add3", &["I"], "I", flags::PUBLIC | flags::STATIC)?;
//! let mut scope = class.scope(method);
//! let add = MethodDesc::new("sys/Ops", "add", "I", &["I", "I"])?;
//! let p = scope.method_param(0)?;
//! let three = scope.load(3);
//! let sum = scope.invoke_static(&add, &[p, three])?.unwrap();
//! scope.return_value(Some(sum))?;
//! class.close()?;
//! # Ok(())
//! # }
//! ```

pub mod flags;

mod alloc;
mod assemble;
mod class;
mod closure;
mod decoder;
mod descriptor;
mod emit;
mod error;
mod handle;
mod instruction;
mod op;
mod pool;
mod scope;

#[cfg(test)]
mod interp;

pub use class::{ClassBuilder, ClassOutput, ClassSpec, MemoryOutput, MethodId};
pub use decoder::{
    ClassFile, DecodeError, ExceptionInfo, FieldInfo, InstructionDecoder, MethodInfo,
    PoolConst,
};
pub use descriptor::{ClassDesc, FieldDesc, MethodDesc, TypeInfo, OBJECT, OBJECT_SIG};
pub use error::BuildError;
pub use handle::{Const, ResultHandle};
pub use instruction::Instruction;
pub use op::Op;
pub use scope::{Branch, CatchBlock, ClosureRef, Scope, ScopeId, TryBlock};
