/// Method-body opcodes.
///
/// Pool indices and slot numbers are 16-bit little-endian operands. Jump
/// offsets are signed 16-bit, relative to the position right after the
/// jump instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Push a constant pool entry.
    /// Operands: `idx:u16`
    LoadConst = 0x01,

    /// Push the null reference.
    LoadNull,

    /// Push the value of a local slot.
    /// Operands: `slot:u16`
    LoadSlot,

    /// Pop into a local slot.
    /// Operands: `slot:u16`
    StoreSlot,

    /// Discard the top of the operand stack.
    Pop,

    /// Pop receiver + arguments, dispatch on the receiver's class.
    /// Operands: `method_idx:u16`
    InvokeVirtual,

    /// Pop receiver + arguments, dispatch through an interface.
    /// Operands: `method_idx:u16`
    InvokeInterface,

    /// Pop arguments, call the exact named method.
    /// Operands: `method_idx:u16`
    InvokeStatic,

    /// Pop receiver + arguments, call the exact named method without
    /// dynamic dispatch (constructors, superclass calls).
    /// Operands: `method_idx:u16`
    InvokeSpecial,

    /// Pop constructor arguments, allocate, run the constructor, push the
    /// new instance.
    /// Operands: `ctor_idx:u16`
    NewInstance,

    /// Pop a length, push a new array of the referenced element type.
    /// Operands: `type_idx:u16`
    NewArray,

    /// Pop an instance, push a field value.
    /// Operands: `field_idx:u16`
    GetField,

    /// Pop an instance and a value, store the field.
    /// Operands: `field_idx:u16`
    PutField,

    /// Push a static field value.
    /// Operands: `field_idx:u16`
    GetStatic,

    /// Pop a value into a static field.
    /// Operands: `field_idx:u16`
    PutStatic,

    /// Pop array + index, push the element.
    ArrayLoad,

    /// Pop array + index + value, store the element.
    ArrayStore,

    /// Assert that the top of stack is assignable to the referenced type.
    /// Operands: `type_idx:u16`
    CheckCast,

    /// Unconditional relative jump.
    /// Operands: `offset:i16`
    Jump,

    /// Pop an int; jump when it is zero.
    /// Operands: `offset:i16`
    JumpIfZero,

    /// Pop a reference; jump when it is not null.
    /// Operands: `offset:i16`
    JumpIfNonNull,

    /// Return from a void method.
    Return,

    /// Pop the return value and return it.
    ReturnValue,

    /// Pop a value and raise it as the in-flight exception.
    Throw,
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte >= Op::LoadConst as u8 && byte <= Op::Throw as u8 {
            // SAFETY: contiguous discriminants, range checked above.
            Ok(unsafe { std::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trip() {
        for op in [Op::LoadConst, Op::Pop, Op::InvokeSpecial, Op::Throw] {
            assert_eq!(Op::try_from(op as u8), Ok(op));
        }
        assert_eq!(Op::try_from(0x00), Err(0x00));
        assert_eq!(Op::try_from(0xFF), Err(0xFF));
    }
}
