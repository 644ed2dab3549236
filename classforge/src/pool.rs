//! Per-class constant pool.

use crate::error::BuildError;
use crate::handle::Const;

/// A pool entry: a literal or a symbolic member reference.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PoolEntry {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    /// A type reference: a class name, or a whole array signature.
    Class(String),
    MethodRef {
        class: String,
        name: String,
        sig: String,
    },
    FieldRef {
        class: String,
        name: String,
        ty: String,
    },
}

impl PoolEntry {
    pub fn tag(&self) -> u8 {
        match self {
            Self::I32(_) => 1,
            Self::I64(_) => 2,
            Self::F32(_) => 3,
            Self::F64(_) => 4,
            Self::Str(_) => 5,
            Self::Class(_) => 6,
            Self::MethodRef { .. } => 7,
            Self::FieldRef { .. } => 8,
        }
    }
}

/// Deduplicating constant pool with 16-bit indices.
#[derive(Debug, Default)]
pub(crate) struct ConstPool {
    entries: Vec<PoolEntry>,
}

impl ConstPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `entry`, returning the index of an existing equal entry if
    /// one is present. Linear scan; pools stay small.
    pub fn intern(&mut self, entry: PoolEntry) -> Result<u16, BuildError> {
        if let Some(idx) = self.entries.iter().position(|e| *e == entry) {
            return Ok(idx as u16);
        }
        let idx = self.entries.len();
        if idx > u16::MAX as usize {
            return Err(BuildError::Assembly {
                detail: "constant pool overflow: more than 65536 entries".to_string(),
                origin: None,
            });
        }
        self.entries.push(entry);
        Ok(idx as u16)
    }

    /// Interns a literal constant, widening sub-int primitives to I32.
    pub fn intern_const(&mut self, c: &Const) -> Result<u16, BuildError> {
        let entry = match c {
            Const::Bool(b) => PoolEntry::I32(*b as i32),
            Const::I32(v) => PoolEntry::I32(*v),
            Const::I64(v) => PoolEntry::I64(*v),
            Const::F32(v) => PoolEntry::F32(*v),
            Const::F64(v) => PoolEntry::F64(*v),
            Const::Str(s) => PoolEntry::Str(s.clone()),
            Const::Class(n) => PoolEntry::Class(n.clone()),
            Const::Null => {
                return Err(BuildError::Assembly {
                    detail: "null is not a pool constant".to_string(),
                    origin: None,
                });
            }
        };
        self.intern(entry)
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut pool = ConstPool::new();
        let a = pool.intern(PoolEntry::I32(42)).unwrap();
        let b = pool.intern(PoolEntry::Str("hi".to_string())).unwrap();
        let c = pool.intern(PoolEntry::I32(42)).unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.entries().len(), 2);
    }

    #[test]
    fn member_refs_compare_structurally() {
        let mut pool = ConstPool::new();
        let m = PoolEntry::MethodRef {
            class: "sys/Ops".to_string(),
            name: "add".to_string(),
            sig: "(II)I".to_string(),
        };
        let a = pool.intern(m.clone()).unwrap();
        let b = pool.intern(m).unwrap();
        assert_eq!(a, b);
    }
}
