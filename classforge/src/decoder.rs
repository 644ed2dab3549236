//! Reads serialized classes back into structured form.
//!
//! Unlike the emitter this side trusts nothing: every read is bounds
//! checked and malformed input surfaces as a [`DecodeError`].

use core::fmt;

use crate::assemble::{MAGIC, VERSION};
use crate::instruction::Instruction;
use crate::op::Op;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    BadMagic,
    UnsupportedVersion(u16),
    Truncated,
    BadTag(u8),
    BadOpcode(u8),
    BadUtf8,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "bad magic bytes"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version {v}"),
            Self::Truncated => write!(f, "input ends in the middle of a structure"),
            Self::BadTag(t) => write!(f, "unknown pool entry tag {t}"),
            Self::BadOpcode(b) => write!(f, "unknown opcode 0x{b:02X}"),
            Self::BadUtf8 => write!(f, "string is not valid UTF-8"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// A decoded constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolConst {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
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

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub flags: u16,
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionInfo {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    pub class_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub flags: u16,
    pub name: String,
    pub sig: String,
    pub max_stack: u16,
    pub max_slots: u16,
    pub code: Vec<u8>,
    pub exceptions: Vec<ExceptionInfo>,
}

/// A parsed class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub flags: u16,
    pub name: String,
    pub superclass: String,
    pub interfaces: Vec<String>,
    pub pool: Vec<PoolConst>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader { bytes, pos: 0 };
        if r.take(4)? != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let version = r.read_u16()?;
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let flags = r.read_u16()?;
        let name = r.read_str()?;
        let superclass = r.read_str()?;

        let iface_count = r.read_u16()?;
        let mut interfaces = Vec::with_capacity(iface_count as usize);
        for _ in 0..iface_count {
            interfaces.push(r.read_str()?);
        }

        let pool_count = r.read_u16()?;
        let mut pool = Vec::with_capacity(pool_count as usize);
        for _ in 0..pool_count {
            pool.push(r.read_pool_entry()?);
        }

        let field_count = r.read_u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(FieldInfo {
                flags: r.read_u16()?,
                name: r.read_str()?,
                ty: r.read_str()?,
            });
        }

        let method_count = r.read_u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            let flags = r.read_u16()?;
            let name = r.read_str()?;
            let sig = r.read_str()?;
            let max_stack = r.read_u16()?;
            let max_slots = r.read_u16()?;
            let code_len = r.read_u32()? as usize;
            let code = r.take(code_len)?.to_vec();
            let exc_count = r.read_u16()?;
            let mut exceptions = Vec::with_capacity(exc_count as usize);
            for _ in 0..exc_count {
                exceptions.push(ExceptionInfo {
                    start: r.read_u32()?,
                    end: r.read_u32()?,
                    handler: r.read_u32()?,
                    class_name: r.read_str()?,
                });
            }
            methods.push(MethodInfo {
                flags,
                name,
                sig,
                max_stack,
                max_slots,
                code,
                exceptions,
            });
        }

        Ok(Self {
            flags,
            name,
            superclass,
            interfaces,
            pool,
            fields,
            methods,
        })
    }

    pub fn method(&self, name: &str, sig: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.sig == sig)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| DecodeError::BadUtf8)
    }

    fn read_pool_entry(&mut self) -> Result<PoolConst, DecodeError> {
        let tag = self.read_u8()?;
        Ok(match tag {
            1 => PoolConst::I32(self.read_u32()? as i32),
            2 => PoolConst::I64(self.read_u64()? as i64),
            3 => PoolConst::F32(f32::from_bits(self.read_u32()?)),
            4 => PoolConst::F64(f64::from_bits(self.read_u64()?)),
            5 => PoolConst::Str(self.read_str()?),
            6 => PoolConst::Class(self.read_str()?),
            7 => PoolConst::MethodRef {
                class: self.read_str()?,
                name: self.read_str()?,
                sig: self.read_str()?,
            },
            8 => PoolConst::FieldRef {
                class: self.read_str()?,
                name: self.read_str()?,
                ty: self.read_str()?,
            },
            t => return Err(DecodeError::BadTag(t)),
        })
    }
}

/// Decodes a method's code bytes into `(offset, instruction)` pairs.
pub struct InstructionDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> InstructionDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current byte offset in the stream.
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self
            .bytes
            .get(self.pos..self.pos + 2)
            .ok_or(DecodeError::Truncated)?;
        self.pos += 2;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(self.read_u16()? as i16)
    }

    /// Decode the next instruction, or `None` at end-of-stream.
    pub fn decode_next(&mut self) -> Option<Result<(u32, Instruction), DecodeError>> {
        if self.is_at_end() {
            return None;
        }
        let offset = self.pos as u32;
        Some(self.decode().map(|instr| (offset, instr)))
    }

    fn decode(&mut self) -> Result<Instruction, DecodeError> {
        let byte = self.bytes[self.pos];
        self.pos += 1;
        let op = Op::try_from(byte).map_err(DecodeError::BadOpcode)?;
        Ok(match op {
            Op::LoadConst => Instruction::LoadConst {
                idx: self.read_u16()?,
            },
            Op::LoadNull => Instruction::LoadNull,
            Op::LoadSlot => Instruction::LoadSlot {
                slot: self.read_u16()?,
            },
            Op::StoreSlot => Instruction::StoreSlot {
                slot: self.read_u16()?,
            },
            Op::Pop => Instruction::Pop,
            Op::InvokeVirtual => Instruction::InvokeVirtual {
                method_idx: self.read_u16()?,
            },
            Op::InvokeInterface => Instruction::InvokeInterface {
                method_idx: self.read_u16()?,
            },
            Op::InvokeStatic => Instruction::InvokeStatic {
                method_idx: self.read_u16()?,
            },
            Op::InvokeSpecial => Instruction::InvokeSpecial {
                method_idx: self.read_u16()?,
            },
            Op::NewInstance => Instruction::NewInstance {
                ctor_idx: self.read_u16()?,
            },
            Op::NewArray => Instruction::NewArray {
                type_idx: self.read_u16()?,
            },
            Op::GetField => Instruction::GetField {
                field_idx: self.read_u16()?,
            },
            Op::PutField => Instruction::PutField {
                field_idx: self.read_u16()?,
            },
            Op::GetStatic => Instruction::GetStatic {
                field_idx: self.read_u16()?,
            },
            Op::PutStatic => Instruction::PutStatic {
                field_idx: self.read_u16()?,
            },
            Op::ArrayLoad => Instruction::ArrayLoad,
            Op::ArrayStore => Instruction::ArrayStore,
            Op::CheckCast => Instruction::CheckCast {
                type_idx: self.read_u16()?,
            },
            Op::Jump => Instruction::Jump {
                offset: self.read_i16()?,
            },
            Op::JumpIfZero => Instruction::JumpIfZero {
                offset: self.read_i16()?,
            },
            Op::JumpIfNonNull => Instruction::JumpIfNonNull {
                offset: self.read_i16()?,
            },
            Op::Return => Instruction::Return,
            Op::ReturnValue => Instruction::ReturnValue,
            Op::Throw => Instruction::Throw,
        })
    }
}

impl<'a> Iterator for InstructionDecoder<'a> {
    type Item = Result<(u32, Instruction), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic_and_version() {
        assert_eq!(ClassFile::parse(b"NOPE"), Err(DecodeError::BadMagic));
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&99u16.to_le_bytes());
        assert_eq!(
            ClassFile::parse(&bytes),
            Err(DecodeError::UnsupportedVersion(99))
        );
    }

    #[test]
    fn truncated_input_is_an_error_not_a_panic() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.push(0);
        assert_eq!(ClassFile::parse(&bytes), Err(DecodeError::Truncated));
    }

    #[test]
    fn instruction_stream_reports_offsets() {
        // LoadSlot s1, Pop, Return
        let code = [
            Op::LoadSlot as u8,
            1,
            0,
            Op::Pop as u8,
            Op::Return as u8,
        ];
        let decoded: Vec<_> = InstructionDecoder::new(&code)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            decoded,
            vec![
                (0, Instruction::LoadSlot { slot: 1 }),
                (3, Instruction::Pop),
                (4, Instruction::Return),
            ]
        );
    }

    #[test]
    fn unknown_opcodes_are_reported() {
        let code = [0xEE];
        let err = InstructionDecoder::new(&code).next().unwrap().unwrap_err();
        assert_eq!(err, DecodeError::BadOpcode(0xEE));
    }
}
