//! Modifier bits of the class-file format.
//!
//! Class, method, and field entries each carry a `u16` of these bits.

pub const PUBLIC: u16 = 0x0001;
pub const PRIVATE: u16 = 0x0002;
pub const PROTECTED: u16 = 0x0004;
pub const STATIC: u16 = 0x0008;
pub const FINAL: u16 = 0x0010;
pub const INTERFACE: u16 = 0x0200;
pub const ABSTRACT: u16 = 0x0400;
/// Marks generated members that have no counterpart in caller-visible code
/// (closure classes, superclass accessors).
pub const SYNTHETIC: u16 = 0x1000;
/// Interface method that carries a body and does not count as the
/// functional method of a closure target.
pub const DEFAULT_METHOD: u16 = 0x2000;
