//! Byte-level emission of method bodies.

use crate::op::Op;

/// A forward jump whose offset has not yet been resolved.
///
/// Created by [`CodeBuffer::jump_placeholder`]; resolve it with
/// [`CodeBuffer::bind`].
#[derive(Debug)]
pub(crate) struct Label {
    /// Position of the i16 offset bytes in the buffer.
    offset_pos: usize,
    /// Position right after the jump instruction (base for relative offset).
    base: usize,
}

/// Builds one method's code bytes, tracking the worst-case operand stack
/// depth as it goes.
pub(crate) struct CodeBuffer {
    buf: Vec<u8>,
    cur_depth: u16,
    max_depth: u16,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            cur_depth: 0,
            max_depth: 0,
        }
    }

    /// Current byte offset in the code stream.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn max_depth(&self) -> u16 {
        self.max_depth
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_op(&mut self, op: Op) {
        self.buf.push(op as u8);
    }

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push(&mut self, n: u16) {
        self.cur_depth += n;
        self.max_depth = self.max_depth.max(self.cur_depth);
    }

    fn pop(&mut self, n: u16) {
        self.cur_depth = self.cur_depth.saturating_sub(n);
    }

    /// `LoadConst <idx:u16>`.
    pub fn load_const(&mut self, idx: u16) {
        self.emit_op(Op::LoadConst);
        self.emit_u16(idx);
        self.push(1);
    }

    /// `LoadNull`.
    pub fn load_null(&mut self) {
        self.emit_op(Op::LoadNull);
        self.push(1);
    }

    /// `LoadSlot <slot:u16>`.
    pub fn load_slot(&mut self, slot: u16) {
        self.emit_op(Op::LoadSlot);
        self.emit_u16(slot);
        self.push(1);
    }

    /// `StoreSlot <slot:u16>`.
    pub fn store_slot(&mut self, slot: u16) {
        self.emit_op(Op::StoreSlot);
        self.emit_u16(slot);
        self.pop(1);
    }

    /// `Pop`.
    pub fn pop_value(&mut self) {
        self.emit_op(Op::Pop);
        self.pop(1);
    }

    /// One of the four invoke opcodes. `pops` covers the receiver and the
    /// arguments; `pushes` is 1 for a non-void return, 0 otherwise.
    pub fn invoke(&mut self, op: Op, method_idx: u16, pops: u16, pushes: u16) {
        debug_assert!(matches!(
            op,
            Op::InvokeVirtual | Op::InvokeInterface | Op::InvokeStatic | Op::InvokeSpecial
        ));
        self.emit_op(op);
        self.emit_u16(method_idx);
        self.pop(pops);
        self.push(pushes);
    }

    /// `NewInstance <ctor_idx:u16>`, popping `argc` constructor arguments
    /// and pushing the new instance.
    pub fn new_instance(&mut self, ctor_idx: u16, argc: u16) {
        self.emit_op(Op::NewInstance);
        self.emit_u16(ctor_idx);
        self.pop(argc);
        self.push(1);
    }

    /// `NewArray <type_idx:u16>`.
    pub fn new_array(&mut self, type_idx: u16) {
        self.emit_op(Op::NewArray);
        self.emit_u16(type_idx);
        self.pop(1);
        self.push(1);
    }

    /// `GetField <field_idx:u16>`.
    pub fn get_field(&mut self, field_idx: u16) {
        self.emit_op(Op::GetField);
        self.emit_u16(field_idx);
        self.pop(1);
        self.push(1);
    }

    /// `PutField <field_idx:u16>`.
    pub fn put_field(&mut self, field_idx: u16) {
        self.emit_op(Op::PutField);
        self.emit_u16(field_idx);
        self.pop(2);
    }

    /// `GetStatic <field_idx:u16>`.
    pub fn get_static(&mut self, field_idx: u16) {
        self.emit_op(Op::GetStatic);
        self.emit_u16(field_idx);
        self.push(1);
    }

    /// `PutStatic <field_idx:u16>`.
    pub fn put_static(&mut self, field_idx: u16) {
        self.emit_op(Op::PutStatic);
        self.emit_u16(field_idx);
        self.pop(1);
    }

    /// `ArrayLoad`.
    pub fn array_load(&mut self) {
        self.emit_op(Op::ArrayLoad);
        self.pop(2);
        self.push(1);
    }

    /// `ArrayStore`.
    pub fn array_store(&mut self) {
        self.emit_op(Op::ArrayStore);
        self.pop(3);
    }

    /// `CheckCast <type_idx:u16>`.
    pub fn check_cast(&mut self, type_idx: u16) {
        self.emit_op(Op::CheckCast);
        self.emit_u16(type_idx);
    }

    /// `Return`.
    pub fn return_(&mut self) {
        self.emit_op(Op::Return);
    }

    /// `ReturnValue`.
    pub fn return_value(&mut self) {
        self.emit_op(Op::ReturnValue);
        self.pop(1);
    }

    /// `Throw`.
    pub fn throw(&mut self) {
        self.emit_op(Op::Throw);
        self.pop(1);
    }

    /// Emit a forward jump with a placeholder offset. Conditional jumps pop
    /// their operand.
    pub fn jump_placeholder(&mut self, op: Op) -> Label {
        debug_assert!(matches!(op, Op::Jump | Op::JumpIfZero | Op::JumpIfNonNull));
        if op != Op::Jump {
            self.pop(1);
        }
        self.emit_op(op);
        let offset_pos = self.buf.len();
        self.emit_i16(0); // placeholder
        let base = self.buf.len();
        Label { offset_pos, base }
    }

    /// Bind a forward jump label to the current position.
    pub fn bind(&mut self, label: Label) {
        let target = self.buf.len();
        let offset = (target as isize - label.base as isize) as i16;
        self.buf[label.offset_pos..label.offset_pos + 2]
            .copy_from_slice(&offset.to_le_bytes());
    }

    /// Emit an unconditional backward jump to `target` (a byte offset
    /// obtained from [`current_offset`](Self::current_offset)).
    pub fn jump_back(&mut self, target: usize) {
        self.emit_op(Op::Jump);
        let base = self.buf.len() + 2;
        let offset = (target as isize - base as isize) as i16;
        self.emit_i16(offset);
    }

    /// Exception handlers start with the thrown value already on the stack.
    pub fn handler_entry(&mut self) {
        self.cur_depth = self.cur_depth.max(1);
        self.max_depth = self.max_depth.max(self.cur_depth);
    }
}
