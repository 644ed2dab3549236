//! A small reference interpreter used by the integration tests to run
//! generated classes. Runtime intrinsics cover the handful of `sys/*`
//! methods the tests call; everything else must be a loaded class.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::decoder::{ClassFile, InstructionDecoder, MethodInfo, PoolConst};
use crate::descriptor;
use crate::instruction::Instruction;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Rc<str>),
    ClassRef(Rc<str>),
    Obj(Rc<Object>),
    Arr(Rc<RefCell<Vec<Value>>>),
}

impl Value {
    pub fn as_int(&self) -> i32 {
        match self {
            Value::Int(v) => *v,
            other => panic!("expected int, got {other:?}"),
        }
    }

    pub fn as_long(&self) -> i64 {
        match self {
            Value::Long(v) => *v,
            other => panic!("expected long, got {other:?}"),
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

#[derive(Debug)]
pub struct Object {
    pub class: String,
    pub fields: RefCell<HashMap<String, Value>>,
}

/// Loads classes and runs their methods. `Err` carries a thrown value that
/// escaped the called method.
#[derive(Default)]
pub struct Machine {
    classes: HashMap<String, ClassFile>,
    statics: RefCell<HashMap<(String, String), Value>>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, bytes: &[u8]) -> String {
        let cf = ClassFile::parse(bytes).unwrap();
        let name = cf.name.clone();
        self.classes.insert(name.clone(), cf);
        name
    }

    pub fn call_static(
        &self,
        class: &str,
        name: &str,
        sig: &str,
        args: Vec<Value>,
    ) -> Result<Value, Value> {
        let cf = self
            .classes
            .get(class)
            .unwrap_or_else(|| panic!("class {class} not loaded"));
        let m = cf
            .method(name, sig)
            .unwrap_or_else(|| panic!("{class}.{name}{sig} not found"));
        let locals = place_args(None, &args, sig, m.max_slots);
        self.exec(cf, m, locals)
    }

    pub fn instantiate(
        &self,
        class: &str,
        ctor_sig: &str,
        args: Vec<Value>,
    ) -> Result<Value, Value> {
        let obj = Value::Obj(Rc::new(Object {
            class: class.to_string(),
            fields: RefCell::new(HashMap::new()),
        }));
        if let Some(cf) = self.classes.get(class) {
            let m = cf
                .method("<init>", ctor_sig)
                .unwrap_or_else(|| panic!("{class}.<init>{ctor_sig} not found"));
            let locals = place_args(Some(obj.clone()), &args, ctor_sig, m.max_slots);
            self.exec(cf, m, locals)?;
        }
        // constructors of classes the machine has not loaded are no-ops
        Ok(obj)
    }

    pub fn call_virtual(
        &self,
        receiver: Value,
        name: &str,
        sig: &str,
        args: Vec<Value>,
    ) -> Result<Value, Value> {
        let class = match &receiver {
            Value::Obj(o) => o.class.clone(),
            other => panic!("virtual call on non-object {other:?}"),
        };
        let (cf, m) = self
            .resolve_virtual(&class, name, sig)
            .unwrap_or_else(|| panic!("no {name}{sig} reachable from {class}"));
        let locals = place_args(Some(receiver), &args, sig, m.max_slots);
        self.exec(cf, m, locals)
    }

    fn resolve_virtual<'m>(
        &'m self,
        mut class: &'m str,
        name: &str,
        sig: &str,
    ) -> Option<(&'m ClassFile, &'m MethodInfo)> {
        loop {
            let cf = self.classes.get(class)?;
            if let Some(m) = cf.method(name, sig) {
                return Some((cf, m));
            }
            class = &cf.superclass;
        }
    }

    fn is_subclass<'m>(&'m self, mut class: &'m str, target: &str) -> bool {
        loop {
            if class == target {
                return true;
            }
            match self.classes.get(class) {
                Some(cf) => class = &cf.superclass,
                None => return false,
            }
        }
    }

    fn handler_for(&self, m: &MethodInfo, off: u32, thrown: &Value) -> Option<u32> {
        let thrown_class = match thrown {
            Value::Obj(o) => o.class.as_str(),
            _ => return None,
        };
        m.exceptions
            .iter()
            .find(|e| {
                off >= e.start && off < e.end && self.is_subclass(thrown_class, &e.class_name)
            })
            .map(|e| e.handler)
    }

    fn exec(
        &self,
        cf: &ClassFile,
        m: &MethodInfo,
        mut locals: Vec<Value>,
    ) -> Result<Value, Value> {
        let decoded: Vec<(u32, Instruction)> = InstructionDecoder::new(&m.code)
            .map(|r| r.unwrap())
            .collect();
        let index_of: HashMap<u32, usize> =
            decoded.iter().enumerate().map(|(i, (o, _))| (*o, i)).collect();
        let end = m.code.len() as u32;

        if locals.len() < m.max_slots as usize {
            locals.resize(m.max_slots as usize, Value::Null);
        }
        let mut stack: Vec<Value> = Vec::new();
        let mut i = 0usize;

        macro_rules! pop {
            () => {
                stack.pop().expect("operand stack underflow")
            };
        }

        loop {
            let Some((off, instr)) = decoded.get(i) else {
                // fell off the end of a body with no explicit return
                return Ok(Value::Null);
            };
            let next_off = decoded.get(i + 1).map(|(o, _)| *o).unwrap_or(end);
            let jump_to = |rel: i16| (next_off as i64 + rel as i64) as u32;

            // outcome of a call or throw at this instruction
            let mut pending: Option<Result<Option<Value>, Value>> = None;

            match instr {
                Instruction::LoadConst { idx } => {
                    stack.push(const_value(&cf.pool[*idx as usize]));
                }
                Instruction::LoadNull => stack.push(Value::Null),
                Instruction::LoadSlot { slot } => {
                    stack.push(locals[*slot as usize].clone());
                }
                Instruction::StoreSlot { slot } => {
                    let v = pop!();
                    let slot = *slot as usize;
                    if locals.len() <= slot {
                        locals.resize(slot + 1, Value::Null);
                    }
                    locals[slot] = v;
                }
                Instruction::Pop => {
                    pop!();
                }
                Instruction::InvokeStatic { method_idx } => {
                    let (class, name, sig) = pool_method(cf, *method_idx);
                    let args = pop_args(&mut stack, sig);
                    let r = if self.classes.contains_key(class) {
                        self.call_static(class, name, sig, args)
                    } else {
                        intrinsic_static(class, name, &args)
                    };
                    pending = Some(wrap_call(r, sig));
                }
                Instruction::InvokeVirtual { method_idx }
                | Instruction::InvokeInterface { method_idx } => {
                    let (_, name, sig) = pool_method(cf, *method_idx);
                    let args = pop_args(&mut stack, sig);
                    let receiver = pop!();
                    let r = self.call_virtual(receiver, name, sig, args);
                    pending = Some(wrap_call(r, sig));
                }
                Instruction::InvokeSpecial { method_idx } => {
                    let (class, name, sig) = pool_method(cf, *method_idx);
                    let args = pop_args(&mut stack, sig);
                    let receiver = pop!();
                    let r = if let Some(target) =
                        self.classes.get(class).and_then(|c| c.method(name, sig))
                    {
                        let target_cf = &self.classes[class];
                        let locals =
                            place_args(Some(receiver), &args, sig, target.max_slots);
                        self.exec(target_cf, target, locals)
                    } else if name == "<init>" {
                        Ok(Value::Null)
                    } else {
                        panic!("unresolved special invoke {class}.{name}{sig}")
                    };
                    pending = Some(wrap_call(r, sig));
                }
                Instruction::NewInstance { ctor_idx } => {
                    let (class, _, sig) = pool_method(cf, *ctor_idx);
                    let args = pop_args(&mut stack, sig);
                    pending = Some(self.instantiate(class, sig, args).map(Some));
                }
                Instruction::NewArray { type_idx } => {
                    let sig = pool_class(cf, *type_idx);
                    let elem = sig.strip_prefix('[').unwrap_or("I");
                    let len = pop!().as_int() as usize;
                    let values = vec![default_for(elem); len];
                    stack.push(Value::Arr(Rc::new(RefCell::new(values))));
                }
                Instruction::GetField { field_idx } => {
                    let (_, name, ty) = pool_field(cf, *field_idx);
                    let obj = expect_obj(pop!());
                    let v = obj
                        .fields
                        .borrow()
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| default_for(ty));
                    stack.push(v);
                }
                Instruction::PutField { field_idx } => {
                    let (_, name, _) = pool_field(cf, *field_idx);
                    let v = pop!();
                    let obj = expect_obj(pop!());
                    obj.fields.borrow_mut().insert(name.to_string(), v);
                }
                Instruction::GetStatic { field_idx } => {
                    let (class, name, ty) = pool_field(cf, *field_idx);
                    let v = self
                        .statics
                        .borrow()
                        .get(&(class.to_string(), name.to_string()))
                        .cloned()
                        .unwrap_or_else(|| default_for(ty));
                    stack.push(v);
                }
                Instruction::PutStatic { field_idx } => {
                    let (class, name, _) = pool_field(cf, *field_idx);
                    let v = pop!();
                    self.statics
                        .borrow_mut()
                        .insert((class.to_string(), name.to_string()), v);
                }
                Instruction::ArrayLoad => {
                    let idx = pop!().as_int() as usize;
                    let arr = expect_arr(pop!());
                    let v = arr.borrow()[idx].clone();
                    stack.push(v);
                }
                Instruction::ArrayStore => {
                    let v = pop!();
                    let idx = pop!().as_int() as usize;
                    let arr = expect_arr(pop!());
                    arr.borrow_mut()[idx] = v;
                }
                Instruction::CheckCast { .. } => {
                    // the machine is dynamically typed; casts are free
                }
                Instruction::Jump { offset } => {
                    i = index_of[&jump_to(*offset)];
                    continue;
                }
                Instruction::JumpIfZero { offset } => {
                    if pop!().as_int() == 0 {
                        i = index_of[&jump_to(*offset)];
                        continue;
                    }
                }
                Instruction::JumpIfNonNull { offset } => {
                    if !pop!().is_null() {
                        i = index_of[&jump_to(*offset)];
                        continue;
                    }
                }
                Instruction::Return => return Ok(Value::Null),
                Instruction::ReturnValue => return Ok(pop!()),
                Instruction::Throw => {
                    pending = Some(Err(pop!()));
                }
            }

            if let Some(outcome) = pending {
                match outcome {
                    Ok(Some(v)) => stack.push(v),
                    Ok(None) => {}
                    Err(thrown) => match self.handler_for(m, *off, &thrown) {
                        Some(h) => {
                            stack.clear();
                            stack.push(thrown);
                            i = index_of[&h];
                            continue;
                        }
                        None => return Err(thrown),
                    },
                }
            }
            i += 1;
        }
    }
}

fn wrap_call(r: Result<Value, Value>, sig: &str) -> Result<Option<Value>, Value> {
    let (_, ret) = descriptor::parse_method_sig(sig).unwrap();
    match r {
        Ok(v) if ret != "V" => Ok(Some(v)),
        Ok(_) => Ok(None),
        Err(e) => Err(e),
    }
}

fn intrinsic_static(class: &str, name: &str, args: &[Value]) -> Result<Value, Value> {
    match (class, name) {
        ("sys/Ops", "add") => Ok(Value::Int(args[0].as_int() + args[1].as_int())),
        ("sys/Ops", "sub") => Ok(Value::Int(args[0].as_int() - args[1].as_int())),
        ("sys/Ops", "mul") => Ok(Value::Int(args[0].as_int() * args[1].as_int())),
        ("sys/Ops", "lt") => Ok(Value::Int(i32::from(
            args[0].as_int() < args[1].as_int(),
        ))),
        ("sys/Ops", "ladd") => Ok(Value::Long(args[0].as_long() + args[1].as_long())),
        _ => panic!("no intrinsic for {class}.{name}"),
    }
}

fn const_value(entry: &PoolConst) -> Value {
    match entry {
        PoolConst::I32(v) => Value::Int(*v),
        PoolConst::I64(v) => Value::Long(*v),
        PoolConst::F32(v) => Value::Float(*v),
        PoolConst::F64(v) => Value::Double(*v),
        PoolConst::Str(s) => Value::Str(Rc::from(s.as_str())),
        PoolConst::Class(s) => Value::ClassRef(Rc::from(s.as_str())),
        other => panic!("not a loadable constant: {other:?}"),
    }
}

fn pool_method(cf: &ClassFile, idx: u16) -> (&str, &str, &str) {
    match &cf.pool[idx as usize] {
        PoolConst::MethodRef { class, name, sig } => (class, name, sig),
        other => panic!("pool entry {idx} is not a method ref: {other:?}"),
    }
}

fn pool_field(cf: &ClassFile, idx: u16) -> (&str, &str, &str) {
    match &cf.pool[idx as usize] {
        PoolConst::FieldRef { class, name, ty } => (class, name, ty),
        other => panic!("pool entry {idx} is not a field ref: {other:?}"),
    }
}

fn pool_class(cf: &ClassFile, idx: u16) -> &str {
    match &cf.pool[idx as usize] {
        PoolConst::Class(s) => s,
        other => panic!("pool entry {idx} is not a class ref: {other:?}"),
    }
}

fn expect_obj(v: Value) -> Rc<Object> {
    match v {
        Value::Obj(o) => o,
        other => panic!("expected object, got {other:?}"),
    }
}

fn expect_arr(v: Value) -> Rc<RefCell<Vec<Value>>> {
    match v {
        Value::Arr(a) => a,
        other => panic!("expected array, got {other:?}"),
    }
}

fn default_for(ty: &str) -> Value {
    match ty {
        "I" | "Z" | "B" | "C" | "S" => Value::Int(0),
        "J" => Value::Long(0),
        "F" => Value::Float(0.0),
        "D" => Value::Double(0.0),
        _ => Value::Null,
    }
}

/// Lays out a call frame: receiver in slot 0, then arguments by signature
/// width.
fn place_args(
    receiver: Option<Value>,
    args: &[Value],
    sig: &str,
    max_slots: u16,
) -> Vec<Value> {
    let (params, _) = descriptor::parse_method_sig(sig).unwrap();
    let mut locals = vec![Value::Null; max_slots as usize];
    let mut slot = 0usize;
    if let Some(r) = receiver {
        if locals.is_empty() {
            locals.push(Value::Null);
        }
        locals[0] = r;
        slot = 1;
    }
    for (arg, p) in args.iter().zip(&params) {
        if locals.len() <= slot {
            locals.resize(slot + 1, Value::Null);
        }
        locals[slot] = arg.clone();
        slot += descriptor::slot_width(p) as usize;
    }
    locals
}

fn pop_args(stack: &mut Vec<Value>, sig: &str) -> Vec<Value> {
    let (params, _) = descriptor::parse_method_sig(sig).unwrap();
    let split = stack.len() - params.len();
    stack.split_off(split)
}
