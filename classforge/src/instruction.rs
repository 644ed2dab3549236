use core::fmt;

/// A decoded instruction with operands resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    LoadConst { idx: u16 },
    LoadNull,
    LoadSlot { slot: u16 },
    StoreSlot { slot: u16 },
    Pop,
    InvokeVirtual { method_idx: u16 },
    InvokeInterface { method_idx: u16 },
    InvokeStatic { method_idx: u16 },
    InvokeSpecial { method_idx: u16 },
    NewInstance { ctor_idx: u16 },
    NewArray { type_idx: u16 },
    GetField { field_idx: u16 },
    PutField { field_idx: u16 },
    GetStatic { field_idx: u16 },
    PutStatic { field_idx: u16 },
    ArrayLoad,
    ArrayStore,
    CheckCast { type_idx: u16 },
    Jump { offset: i16 },
    JumpIfZero { offset: i16 },
    JumpIfNonNull { offset: i16 },
    Return,
    ReturnValue,
    Throw,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadConst { idx } => write!(f, "LoadConst #{idx}"),
            Self::LoadNull => write!(f, "LoadNull"),
            Self::LoadSlot { slot } => write!(f, "LoadSlot s{slot}"),
            Self::StoreSlot { slot } => write!(f, "StoreSlot s{slot}"),
            Self::Pop => write!(f, "Pop"),
            Self::InvokeVirtual { method_idx } => {
                write!(f, "InvokeVirtual #{method_idx}")
            }
            Self::InvokeInterface { method_idx } => {
                write!(f, "InvokeInterface #{method_idx}")
            }
            Self::InvokeStatic { method_idx } => {
                write!(f, "InvokeStatic #{method_idx}")
            }
            Self::InvokeSpecial { method_idx } => {
                write!(f, "InvokeSpecial #{method_idx}")
            }
            Self::NewInstance { ctor_idx } => write!(f, "NewInstance #{ctor_idx}"),
            Self::NewArray { type_idx } => write!(f, "NewArray #{type_idx}"),
            Self::GetField { field_idx } => write!(f, "GetField #{field_idx}"),
            Self::PutField { field_idx } => write!(f, "PutField #{field_idx}"),
            Self::GetStatic { field_idx } => write!(f, "GetStatic #{field_idx}"),
            Self::PutStatic { field_idx } => write!(f, "PutStatic #{field_idx}"),
            Self::ArrayLoad => write!(f, "ArrayLoad"),
            Self::ArrayStore => write!(f, "ArrayStore"),
            Self::CheckCast { type_idx } => write!(f, "CheckCast #{type_idx}"),
            Self::Jump { offset } => write!(f, "Jump ~{offset}"),
            Self::JumpIfZero { offset } => write!(f, "JumpIfZero ~{offset}"),
            Self::JumpIfNonNull { offset } => write!(f, "JumpIfNonNull ~{offset}"),
            Self::Return => write!(f, "Return"),
            Self::ReturnValue => write!(f, "ReturnValue"),
            Self::Throw => write!(f, "Throw"),
        }
    }
}
