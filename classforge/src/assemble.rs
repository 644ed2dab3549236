//! Turns finished scope trees into code bytes and whole classes into the
//! serialized container format.
//!
//! Container layout, version 1, all integers little-endian:
//!
//! ```text
//! magic "CFRG"  version:u16  class_flags:u16
//! name:str  superclass:str
//! iface_count:u16  { name:str }
//! pool_count:u16   { tag:u8 payload }
//! field_count:u16  { flags:u16 name:str type:str }
//! method_count:u16 { flags:u16 name:str sig:str
//!                    max_stack:u16 max_slots:u16
//!                    code_len:u32 code
//!                    exc_count:u16 { start:u32 end:u32 handler:u32 class:str } }
//! ```
//!
//! Strings are a u16 length followed by UTF-8 bytes.

use std::collections::HashMap;

use crate::descriptor::{self, FieldDesc, OBJECT_SIG};
use crate::emit::{CodeBuffer, Label};
use crate::error::BuildError;
use crate::handle::{Const, HandleKind, ResultHandle};
use crate::op::Op;
use crate::pool::{ConstPool, PoolEntry};
use crate::scope::{Body, InvokeKind, Operation, ScopeId};

pub(crate) const MAGIC: &[u8; 4] = b"CFRG";
pub(crate) const VERSION: u16 = 1;

/// One guarded code range and its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExceptionEntry {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    pub class_name: String,
}

/// A fully assembled method body.
#[derive(Debug)]
pub(crate) struct AssembledCode {
    pub max_stack: u16,
    pub max_slots: u16,
    pub code: Vec<u8>,
    pub exceptions: Vec<ExceptionEntry>,
}

/// A method ready for serialization. `code` is `None` for abstract
/// methods.
#[derive(Debug)]
pub(crate) struct MethodArtifact {
    pub name: String,
    pub sig: String,
    pub flags: u16,
    pub code: Option<AssembledCode>,
}

/// Writes the operations of one frame into code bytes.
///
/// `captures` is set when writing a closure body: handles found there are
/// loaded from the synthesized class's fields through slot 0 instead of
/// their outer storage.
pub(crate) fn assemble_code(
    body: &Body,
    root: ScopeId,
    frame_ret: &str,
    captures: Option<&[(ResultHandle, FieldDesc)]>,
    max_slots: u16,
    pool: &mut ConstPool,
) -> Result<AssembledCode, BuildError> {
    let mut w = Writer {
        body,
        pool,
        captures,
        frame_ret,
        buf: CodeBuffer::new(),
        tops: HashMap::new(),
        pending: HashMap::new(),
        exceptions: Vec::new(),
    };
    w.write_scope(root)?;
    if frame_ret == "V" {
        w.buf.return_();
    }
    Ok(AssembledCode {
        max_stack: w.buf.max_depth(),
        max_slots,
        code: w.buf.into_bytes(),
        exceptions: w.exceptions,
    })
}

struct Writer<'a> {
    body: &'a Body,
    pool: &'a mut ConstPool,
    captures: Option<&'a [(ResultHandle, FieldDesc)]>,
    frame_ret: &'a str,
    buf: CodeBuffer,
    /// Code offset of each scope's first instruction.
    tops: HashMap<ScopeId, usize>,
    /// Forward jumps waiting for a scope's bottom.
    pending: HashMap<ScopeId, Vec<Label>>,
    exceptions: Vec<ExceptionEntry>,
}

fn assembly(detail: impl Into<String>) -> BuildError {
    BuildError::Assembly {
        detail: detail.into(),
        origin: None,
    }
}

impl<'a> Writer<'a> {
    fn write_scope(&mut self, id: ScopeId) -> Result<(), BuildError> {
        self.tops.insert(id, self.buf.current_offset());
        let body = self.body;
        for node in &body.scope(id).ops {
            self.write_op(&node.op).map_err(|e| match e {
                BuildError::Assembly {
                    detail,
                    origin: None,
                } => BuildError::Assembly {
                    detail,
                    origin: node.origin,
                },
                e => e,
            })?;
        }
        if let Some(labels) = self.pending.remove(&id) {
            for l in labels {
                self.buf.bind(l);
            }
        }
        Ok(())
    }

    fn write_op(&mut self, op: &Operation) -> Result<(), BuildError> {
        let body = self.body;
        match op {
            Operation::Invoke {
                kind,
                method,
                receiver,
                args,
                out,
            } => {
                if let Some(r) = receiver {
                    // special invokes keep the receiver's static type;
                    // casting `this` for a superclass call would be wrong
                    let expected = if *kind == InvokeKind::Special {
                        body.handle(*r).ty.clone()
                    } else {
                        format!("L{};", method.class())
                    };
                    self.load_handle(*r, &expected)?;
                }
                for (a, p) in args.iter().zip(method.params()) {
                    self.load_handle(*a, p)?;
                }
                let idx = self.pool.intern(PoolEntry::MethodRef {
                    class: method.class().to_string(),
                    name: method.name().to_string(),
                    sig: method.descriptor(),
                })?;
                let opcode = match kind {
                    InvokeKind::Virtual => Op::InvokeVirtual,
                    InvokeKind::Interface => Op::InvokeInterface,
                    InvokeKind::Static => Op::InvokeStatic,
                    InvokeKind::Special => Op::InvokeSpecial,
                };
                let pops = args.len() as u16 + u16::from(receiver.is_some());
                let pushes = u16::from(method.ret() != "V");
                self.buf.invoke(opcode, idx, pops, pushes);
                if let Some(out) = out {
                    self.store_handle(*out)?;
                }
            }
            Operation::NewInstance { ctor, args, out } => {
                for (a, p) in args.iter().zip(ctor.params()) {
                    self.load_handle(*a, p)?;
                }
                let idx = self.pool.intern(PoolEntry::MethodRef {
                    class: ctor.class().to_string(),
                    name: ctor.name().to_string(),
                    sig: ctor.descriptor(),
                })?;
                self.buf.new_instance(idx, args.len() as u16);
                self.store_handle(*out)?;
            }
            Operation::NewArray {
                array_sig,
                len,
                out,
            } => {
                self.load_handle(*len, "I")?;
                let idx = self.pool.intern(PoolEntry::Class(array_sig.clone()))?;
                self.buf.new_array(idx);
                self.store_handle(*out)?;
            }
            Operation::ReadField {
                field,
                instance,
                out,
            } => {
                self.load_handle(*instance, &format!("L{};", field.class()))?;
                let idx = self.field_ref(field)?;
                self.buf.get_field(idx);
                self.store_handle(*out)?;
            }
            Operation::WriteField {
                field,
                instance,
                value,
            } => {
                self.load_handle(*instance, &format!("L{};", field.class()))?;
                self.load_handle(*value, field.ty())?;
                let idx = self.field_ref(field)?;
                self.buf.put_field(idx);
            }
            Operation::ReadStatic { field, out } => {
                let idx = self.field_ref(field)?;
                self.buf.get_static(idx);
                self.store_handle(*out)?;
            }
            Operation::WriteStatic { field, value } => {
                self.load_handle(*value, field.ty())?;
                let idx = self.field_ref(field)?;
                self.buf.put_static(idx);
            }
            Operation::ReadArray { array, index, out } => {
                let array_ty = body.handle(*array).ty.clone();
                self.load_handle(*array, &array_ty)?;
                self.load_handle(*index, "I")?;
                self.buf.array_load();
                self.store_handle(*out)?;
            }
            Operation::WriteArray {
                array,
                index,
                value,
            } => {
                let array_ty = body.handle(*array).ty.clone();
                let elem = array_ty
                    .strip_prefix('[')
                    .map(str::to_string)
                    .unwrap_or_else(|| body.handle(*value).ty.clone());
                self.load_handle(*array, &array_ty)?;
                self.load_handle(*index, "I")?;
                self.load_handle(*value, &elem)?;
                self.buf.array_store();
            }
            Operation::CheckCast {
                value,
                target_sig,
                out,
            } => {
                let value_ty = body.handle(*value).ty.clone();
                self.load_handle(*value, &value_ty)?;
                let idx = self.pool.intern(PoolEntry::Class(
                    descriptor::type_ref_name(target_sig).to_string(),
                ))?;
                self.buf.check_cast(idx);
                self.store_handle(*out)?;
            }
            Operation::Assign { target, value } => {
                let target_ty = body.handle(*target).ty.clone();
                self.load_handle(*value, &target_ty)?;
                self.store_handle(*target)?;
            }
            Operation::Return { value } => match value {
                None => self.buf.return_(),
                Some(v) => {
                    if self.frame_ret == "V" {
                        let ty = body.handle(*v).ty.clone();
                        self.load_handle(*v, &ty)?;
                        self.buf.pop_value();
                        self.buf.return_();
                    } else {
                        let ret = self.frame_ret.to_string();
                        self.load_handle(*v, &ret)?;
                        self.buf.return_value();
                    }
                }
            },
            Operation::Throw { value } => {
                let ty = body.handle(*value).ty.clone();
                self.load_handle(*value, &ty)?;
                self.buf.throw();
            }
            Operation::Branch {
                cond,
                null_test,
                true_scope,
                false_scope,
            } => {
                let (expected, jump_op) = if *null_test {
                    (body.handle(*cond).ty.clone(), Op::JumpIfNonNull)
                } else {
                    ("I".to_string(), Op::JumpIfZero)
                };
                self.load_handle(*cond, &expected)?;
                let else_label = self.buf.jump_placeholder(jump_op);
                self.write_scope(*true_scope)?;
                let end_label = self.buf.jump_placeholder(Op::Jump);
                self.buf.bind(else_label);
                self.write_scope(*false_scope)?;
                self.buf.bind(end_label);
            }
            Operation::Block { scope } => self.write_scope(*scope)?,
            Operation::TryCatch {
                body: try_body,
                catches,
                completed,
            } => {
                if !completed {
                    return Err(assembly("try/catch region never completed"));
                }
                let start = self.buf.current_offset() as u32;
                self.write_scope(*try_body)?;
                let end = self.buf.current_offset() as u32;
                let mut done = vec![self.buf.jump_placeholder(Op::Jump)];
                for (i, clause) in catches.iter().enumerate() {
                    self.exceptions.push(ExceptionEntry {
                        start,
                        end,
                        handler: self.buf.current_offset() as u32,
                        class_name: clause.exception.clone(),
                    });
                    self.buf.handler_entry();
                    self.store_handle(clause.caught)?;
                    self.write_scope(clause.scope)?;
                    if i + 1 < catches.len() {
                        done.push(self.buf.jump_placeholder(Op::Jump));
                    }
                }
                for l in done {
                    self.buf.bind(l);
                }
            }
            Operation::Jump { target, to_bottom } => {
                if *to_bottom {
                    let l = self.buf.jump_placeholder(Op::Jump);
                    self.pending.entry(*target).or_default().push(l);
                } else {
                    let top = self
                        .tops
                        .get(target)
                        .copied()
                        .ok_or_else(|| assembly("jump target scope has not been entered"))?;
                    self.buf.jump_back(top);
                }
            }
            Operation::Closure { index } => {
                let closure = &body.closures[*index];
                let mut sig = String::from("(");
                for (h, f) in &closure.captures {
                    self.load_handle(*h, f.ty())?;
                    sig.push_str(f.ty());
                }
                sig.push_str(")V");
                let idx = self.pool.intern(PoolEntry::MethodRef {
                    class: closure.class_name.clone(),
                    name: "<init>".to_string(),
                    sig,
                })?;
                self.buf.new_instance(idx, closure.captures.len() as u16);
                self.store_handle(closure.instance)?;
            }
        }
        Ok(())
    }

    fn field_ref(&mut self, field: &FieldDesc) -> Result<u16, BuildError> {
        self.pool.intern(PoolEntry::FieldRef {
            class: field.class().to_string(),
            name: field.name().to_string(),
            ty: field.ty().to_string(),
        })
    }

    fn load_handle(&mut self, h: ResultHandle, expected: &str) -> Result<(), BuildError> {
        if let Some(caps) = self.captures {
            if let Some((_, f)) = caps.iter().find(|(ch, _)| *ch == h) {
                self.buf.load_slot(0);
                let idx = self.pool.intern(PoolEntry::FieldRef {
                    class: f.class().to_string(),
                    name: f.name().to_string(),
                    ty: f.ty().to_string(),
                })?;
                self.buf.get_field(idx);
                let ty = f.ty().to_string();
                return self.maybe_cast(&ty, expected);
            }
        }
        let data = self.body.handle(h);
        match &data.kind {
            HandleKind::Constant(Const::Null) => {
                self.buf.load_null();
                return Ok(());
            }
            HandleKind::Constant(c) => {
                let idx = self.pool.intern_const(c)?;
                self.buf.load_const(idx);
            }
            HandleKind::LocalVariable(slot) => self.buf.load_slot(*slot),
            HandleKind::SingleUse => {
                // already sitting on top of the stack
            }
            HandleKind::Unused => {
                return Err(assembly("value was never materialized"));
            }
        }
        let ty = data.ty.clone();
        self.maybe_cast(&ty, expected)
    }

    fn store_handle(&mut self, h: ResultHandle) -> Result<(), BuildError> {
        match &self.body.handle(h).kind {
            HandleKind::Unused => self.buf.pop_value(),
            HandleKind::LocalVariable(slot) => self.buf.store_slot(*slot),
            HandleKind::SingleUse => {}
            HandleKind::Constant(_) => {
                return Err(assembly("cannot store into a constant"));
            }
        }
        Ok(())
    }

    /// Inserts a cast when the value's static type does not match what the
    /// consumer declares. Primitives never cast; neither does widening to
    /// the root object type.
    fn maybe_cast(&mut self, actual: &str, expected: &str) -> Result<(), BuildError> {
        fn objectish(s: &str) -> bool {
            s.starts_with('L') || s.starts_with('[')
        }
        if actual != expected
            && objectish(actual)
            && objectish(expected)
            && expected != OBJECT_SIG
        {
            let idx = self.pool.intern(PoolEntry::Class(
                descriptor::type_ref_name(expected).to_string(),
            ))?;
            self.buf.check_cast(idx);
        }
        Ok(())
    }
}

// ── container serialization ────────────────────────────────────────

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Serializes one class. The pool must already contain every entry the
/// method bodies reference.
pub(crate) fn serialize_class(
    class_flags: u16,
    name: &str,
    superclass: &str,
    interfaces: &[String],
    pool: &ConstPool,
    fields: &[(FieldDesc, u16)],
    methods: &[MethodArtifact],
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    put_u16(&mut buf, VERSION);
    put_u16(&mut buf, class_flags);
    put_str(&mut buf, name);
    put_str(&mut buf, superclass);

    put_u16(&mut buf, interfaces.len() as u16);
    for i in interfaces {
        put_str(&mut buf, i);
    }

    let entries = pool.entries();
    put_u16(&mut buf, entries.len() as u16);
    for entry in entries {
        buf.push(entry.tag());
        match entry {
            PoolEntry::I32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            PoolEntry::I64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            PoolEntry::F32(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
            PoolEntry::F64(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
            PoolEntry::Str(s) | PoolEntry::Class(s) => put_str(&mut buf, s),
            PoolEntry::MethodRef { class, name, sig } => {
                put_str(&mut buf, class);
                put_str(&mut buf, name);
                put_str(&mut buf, sig);
            }
            PoolEntry::FieldRef { class, name, ty } => {
                put_str(&mut buf, class);
                put_str(&mut buf, name);
                put_str(&mut buf, ty);
            }
        }
    }

    put_u16(&mut buf, fields.len() as u16);
    for (field, fflags) in fields {
        put_u16(&mut buf, *fflags);
        put_str(&mut buf, field.name());
        put_str(&mut buf, field.ty());
    }

    put_u16(&mut buf, methods.len() as u16);
    for m in methods {
        put_u16(&mut buf, m.flags);
        put_str(&mut buf, &m.name);
        put_str(&mut buf, &m.sig);
        match &m.code {
            Some(code) => {
                put_u16(&mut buf, code.max_stack);
                put_u16(&mut buf, code.max_slots);
                put_u32(&mut buf, code.code.len() as u32);
                buf.extend_from_slice(&code.code);
                put_u16(&mut buf, code.exceptions.len() as u16);
                for e in &code.exceptions {
                    put_u32(&mut buf, e.start);
                    put_u32(&mut buf, e.end);
                    put_u32(&mut buf, e.handler);
                    put_str(&mut buf, &e.class_name);
                }
            }
            None => {
                put_u16(&mut buf, 0);
                put_u16(&mut buf, 0);
                put_u32(&mut buf, 0);
                put_u16(&mut buf, 0);
            }
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc;
    use crate::decoder::InstructionDecoder;
    use crate::descriptor::MethodDesc;
    use crate::instruction::Instruction;
    use crate::scope::Scope;

    fn decode_ops(code: &[u8]) -> Vec<Instruction> {
        InstructionDecoder::new(code)
            .map(|r| r.unwrap().1)
            .collect()
    }

    fn body_for(params: &[&str], ret: &str) -> Body {
        let method = MethodDesc::new("app/Main", "run", ret, params).unwrap();
        Body::new(method, true, "app/Main".to_string(), false)
    }

    fn assemble(body: &mut Body) -> AssembledCode {
        alloc::allocate(body);
        let mut pool = ConstPool::new();
        let ret = body.method.ret().to_string();
        assemble_code(body, ScopeId::ROOT, &ret, None, body.max_slots, &mut pool)
            .unwrap()
    }

    #[test]
    fn collapsed_results_skip_the_store_load_pair() {
        let mut body = body_for(&["I"], "I");
        let mut s = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let m = MethodDesc::new("sys/Ops", "add", "I", &["I", "I"]).unwrap();
        let p = s.method_param(0).unwrap();
        let five = s.load(5);
        let sum = s.invoke_static(&m, &[p, five]).unwrap().unwrap();
        s.return_value(Some(sum)).unwrap();

        let code = assemble(&mut body);
        let ops = decode_ops(&code.code);
        assert_eq!(
            ops,
            vec![
                Instruction::LoadSlot { slot: 0 },
                Instruction::LoadConst { idx: 0 },
                Instruction::InvokeStatic { method_idx: 1 },
                Instruction::ReturnValue,
            ]
        );
        assert_eq!(code.max_stack, 2);
    }

    #[test]
    fn unread_results_are_popped() {
        let mut body = body_for(&[], "V");
        let mut s = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let m = MethodDesc::new("sys/Ops", "make", "I", &[]).unwrap();
        s.invoke_static(&m, &[]).unwrap();
        s.return_value(None).unwrap();

        let ops = decode_ops(&assemble(&mut body).code);
        assert_eq!(
            ops,
            vec![
                Instruction::InvokeStatic { method_idx: 0 },
                Instruction::Pop,
                Instruction::Return,
                // implicit void return appended after the last scope
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn branches_lay_out_true_then_false() {
        let mut body = body_for(&["I"], "I");
        let mut s = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let p = s.method_param(0).unwrap();
        let branch = s.if_non_zero(p).unwrap();
        let mut t = s.enter(branch.true_scope());
        let one = t.load(1);
        t.return_value(Some(one)).unwrap();
        let mut f = s.enter(branch.false_scope());
        let two = f.load(2);
        f.return_value(Some(two)).unwrap();

        let ops = decode_ops(&assemble(&mut body).code);
        assert_eq!(
            ops,
            vec![
                Instruction::LoadSlot { slot: 0 },
                // past the true side: LoadConst(3) + ReturnValue(1) + Jump(3)
                Instruction::JumpIfZero { offset: 7 },
                Instruction::LoadConst { idx: 0 },
                Instruction::ReturnValue,
                Instruction::Jump { offset: 4 },
                Instruction::LoadConst { idx: 1 },
                Instruction::ReturnValue,
            ]
        );
    }

    #[test]
    fn incomplete_try_regions_fail_at_assembly() {
        let mut body = body_for(&[], "V");
        let mut s = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let tb = s.try_block();
        s.add_catch(&tb, "sys/Error").unwrap();
        s.return_value(None).unwrap();

        alloc::allocate(&mut body);
        let mut pool = ConstPool::new();
        let err = assemble_code(&body, ScopeId::ROOT, "V", None, 0, &mut pool)
            .unwrap_err();
        assert!(matches!(err, BuildError::Assembly { .. }));
    }

    #[test]
    fn exception_table_covers_the_guarded_range() {
        let mut body = body_for(&[], "V");
        let mut s = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let tb = s.try_block();
        let m = MethodDesc::new("sys/Ops", "poke", "V", &[]).unwrap();
        s.enter(tb.body()).invoke_static(&m, &[]).unwrap();
        let catch = s.add_catch(&tb, "sys/Error").unwrap();
        s.enter(catch.scope()).return_value(None).unwrap();
        s.complete_try(&tb).unwrap();
        s.return_value(None).unwrap();

        let code = assemble(&mut body);
        assert_eq!(code.exceptions.len(), 1);
        let entry = &code.exceptions[0];
        assert_eq!(entry.start, 0);
        // guarded range is the InvokeStatic, 3 bytes
        assert_eq!(entry.end, 3);
        // handler follows the jump past the catch clauses
        assert_eq!(entry.handler, 6);
        assert_eq!(entry.class_name, "sys/Error");
    }

    #[test]
    fn loops_jump_back_to_the_scope_top() {
        let mut body = body_for(&[], "V");
        let mut s = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let m = MethodDesc::new("sys/Ops", "poke", "V", &[]).unwrap();
        let loop_scope = s.new_scope();
        let mut inner = s.enter(loop_scope);
        inner.invoke_static(&m, &[]).unwrap();
        inner.continue_to(loop_scope).unwrap();

        let ops = decode_ops(&assemble(&mut body).code);
        assert_eq!(
            ops,
            vec![
                Instruction::InvokeStatic { method_idx: 0 },
                // back past the invoke: base 6, target 0
                Instruction::Jump { offset: -6 },
                Instruction::Return,
            ]
        );
    }
}
