//! Method bodies as trees of scopes holding deferred operations.
//!
//! Builder calls validate eagerly and append [`Operation`]s; nothing is
//! encoded until the class is closed. Values flow between operations as
//! [`ResultHandle`]s whose physical storage (constant, local slot, or the
//! operand stack) is decided by the slot allocator afterwards.

use std::panic::Location;

use crate::descriptor::{self, FieldDesc, MethodDesc, TypeInfo};
use crate::error::BuildError;
use crate::handle::{Const, HandleData, HandleKind, ResultHandle};

/// Index of a scope within its method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) u32);

impl ScopeId {
    pub(crate) const ROOT: ScopeId = ScopeId(0);
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ScopeKind {
    Root,
    Block,
    TrueBranch,
    FalseBranch,
    TryBody,
    Catch,
    /// Body of the closure at this index in [`Body::closures`].
    ClosureBody(usize),
}

#[derive(Debug)]
pub(crate) struct ScopeData {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub ops: Vec<OpNode>,
}

/// A deferred operation plus the builder call site that created it, when
/// origin capture is enabled.
#[derive(Debug)]
pub(crate) struct OpNode {
    pub op: Operation,
    pub origin: Option<&'static Location<'static>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InvokeKind {
    Virtual,
    Interface,
    Static,
    Special,
}

#[derive(Debug)]
pub(crate) struct CatchClause {
    /// Caught exception class name, slash form.
    pub exception: String,
    pub caught: ResultHandle,
    pub scope: ScopeId,
}

#[derive(Debug)]
pub(crate) enum Operation {
    Invoke {
        kind: InvokeKind,
        method: MethodDesc,
        receiver: Option<ResultHandle>,
        args: Vec<ResultHandle>,
        out: Option<ResultHandle>,
    },
    NewInstance {
        ctor: MethodDesc,
        args: Vec<ResultHandle>,
        out: ResultHandle,
    },
    NewArray {
        /// Full array signature, e.g. `[I`.
        array_sig: String,
        len: ResultHandle,
        out: ResultHandle,
    },
    ReadField {
        field: FieldDesc,
        instance: ResultHandle,
        out: ResultHandle,
    },
    WriteField {
        field: FieldDesc,
        instance: ResultHandle,
        value: ResultHandle,
    },
    ReadStatic {
        field: FieldDesc,
        out: ResultHandle,
    },
    WriteStatic {
        field: FieldDesc,
        value: ResultHandle,
    },
    ReadArray {
        array: ResultHandle,
        index: ResultHandle,
        out: ResultHandle,
    },
    WriteArray {
        array: ResultHandle,
        index: ResultHandle,
        value: ResultHandle,
    },
    CheckCast {
        value: ResultHandle,
        target_sig: String,
        out: ResultHandle,
    },
    /// Load `value`, store it into `target`'s storage.
    Assign {
        target: ResultHandle,
        value: ResultHandle,
    },
    Return {
        value: Option<ResultHandle>,
    },
    Throw {
        value: ResultHandle,
    },
    /// Two-way conditional. When `null_test` is set the condition is a
    /// reference and the true branch runs when it is null; otherwise the
    /// condition is an int and the true branch runs when it is non-zero.
    Branch {
        cond: ResultHandle,
        null_test: bool,
        true_scope: ScopeId,
        false_scope: ScopeId,
    },
    Block {
        scope: ScopeId,
    },
    TryCatch {
        body: ScopeId,
        catches: Vec<CatchClause>,
        completed: bool,
    },
    /// Re-enter an enclosing scope at its top (`to_bottom` false) or exit
    /// past its bottom (`to_bottom` true).
    Jump {
        target: ScopeId,
        to_bottom: bool,
    },
    /// Instantiate the synthesized class of the closure at this index,
    /// loading its captures as constructor arguments.
    Closure {
        index: usize,
    },
}

impl Operation {
    /// Handles this operation reads or stores, in load order.
    pub fn inputs(&self, closures: &[ClosureData], out: &mut Vec<ResultHandle>) {
        match self {
            Self::Invoke { receiver, args, .. } => {
                out.extend(receiver.iter().copied());
                out.extend_from_slice(args);
            }
            Self::NewInstance { args, .. } => out.extend_from_slice(args),
            Self::NewArray { len, .. } => out.push(*len),
            Self::ReadField { instance, .. } => out.push(*instance),
            Self::WriteField {
                instance, value, ..
            } => {
                out.push(*instance);
                out.push(*value);
            }
            Self::ReadStatic { .. } => {}
            Self::WriteStatic { value, .. } => out.push(*value),
            Self::ReadArray { array, index, .. } => {
                out.push(*array);
                out.push(*index);
            }
            Self::WriteArray {
                array,
                index,
                value,
            } => {
                out.push(*array);
                out.push(*index);
                out.push(*value);
            }
            Self::CheckCast { value, .. } => out.push(*value),
            Self::Assign { target, value } => {
                out.push(*value);
                out.push(*target);
            }
            Self::Return { value } => out.extend(value.iter().copied()),
            Self::Throw { value } => out.push(*value),
            Self::Branch { cond, .. } => out.push(*cond),
            Self::Block { .. } | Self::TryCatch { .. } | Self::Jump { .. } => {}
            Self::Closure { index } => {
                out.extend(closures[*index].captures.iter().map(|(h, _)| *h));
            }
        }
    }

    /// The first handle this operation loads. The allocator lets the
    /// previous operation's result flow to it directly on the stack.
    pub fn top(&self, closures: &[ClosureData]) -> Option<ResultHandle> {
        match self {
            Self::Invoke { receiver, args, .. } => {
                receiver.or_else(|| args.first().copied())
            }
            Self::NewInstance { args, .. } => args.first().copied(),
            Self::NewArray { len, .. } => Some(*len),
            Self::ReadField { instance, .. } | Self::WriteField { instance, .. } => {
                Some(*instance)
            }
            Self::ReadStatic { .. } => None,
            Self::WriteStatic { value, .. } => Some(*value),
            Self::ReadArray { array, .. } | Self::WriteArray { array, .. } => {
                Some(*array)
            }
            Self::CheckCast { value, .. }
            | Self::Assign { value, .. }
            | Self::Throw { value } => Some(*value),
            Self::Return { value } => *value,
            Self::Branch { cond, .. } => Some(*cond),
            Self::Block { .. } | Self::TryCatch { .. } | Self::Jump { .. } => None,
            Self::Closure { index } => {
                closures[*index].captures.first().map(|(h, _)| *h)
            }
        }
    }

    /// The handle this operation leaves behind, if any.
    pub fn outgoing(&self, closures: &[ClosureData]) -> Option<ResultHandle> {
        match self {
            Self::Invoke { out, .. } => *out,
            Self::NewInstance { out, .. }
            | Self::NewArray { out, .. }
            | Self::ReadField { out, .. }
            | Self::ReadStatic { out, .. }
            | Self::ReadArray { out, .. }
            | Self::CheckCast { out, .. } => Some(*out),
            Self::Assign { target, .. } => Some(*target),
            Self::Closure { index } => Some(closures[*index].instance),
            _ => None,
        }
    }

    /// Scopes nested under this operation within the same frame. The body
    /// of a closure belongs to the synthesized class's frame and is not
    /// included.
    pub fn child_scopes(&self, out: &mut Vec<ScopeId>) {
        match self {
            Self::Branch {
                true_scope,
                false_scope,
                ..
            } => {
                out.push(*true_scope);
                out.push(*false_scope);
            }
            Self::Block { scope } => out.push(*scope),
            Self::TryCatch { body, catches, .. } => {
                out.push(*body);
                out.extend(catches.iter().map(|c| c.scope));
            }
            _ => {}
        }
    }
}

/// Everything recorded for one closure created in this body.
#[derive(Debug)]
pub(crate) struct ClosureData {
    pub scope: ScopeId,
    pub interface: String,
    /// The single abstract method being implemented.
    pub sam: MethodDesc,
    pub params: Vec<ResultHandle>,
    pub instance: ResultHandle,
    /// Name of the synthesized class; filled in when the class is closed.
    pub class_name: String,
    /// Captured outer handles and the fields that carry them, in first-use
    /// order. Filled in when the class is closed.
    pub captures: Vec<(ResultHandle, FieldDesc)>,
    pub max_slots: u16,
}

/// One method body: its scope tree, handles, and closures.
#[derive(Debug)]
pub(crate) struct Body {
    pub scopes: Vec<ScopeData>,
    pub handles: Vec<HandleData>,
    pub closures: Vec<ClosureData>,
    pub method: MethodDesc,
    pub is_static: bool,
    pub owner_class: String,
    pub capture_origins: bool,
    pub max_slots: u16,
}

impl Body {
    pub fn new(
        method: MethodDesc,
        is_static: bool,
        owner_class: String,
        capture_origins: bool,
    ) -> Self {
        Self {
            scopes: vec![ScopeData {
                kind: ScopeKind::Root,
                parent: None,
                ops: Vec::new(),
            }],
            handles: Vec::new(),
            closures: Vec::new(),
            method,
            is_static,
            owner_class,
            capture_origins,
            max_slots: 0,
        }
    }

    pub fn scope(&self, id: ScopeId) -> &ScopeData {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut ScopeData {
        &mut self.scopes[id.0 as usize]
    }

    pub fn handle(&self, h: ResultHandle) -> &HandleData {
        &self.handles[h.0 as usize]
    }

    pub fn handle_mut(&mut self, h: ResultHandle) -> &mut HandleData {
        &mut self.handles[h.0 as usize]
    }

    pub fn new_scope(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeData {
            kind,
            parent: Some(parent),
            ops: Vec::new(),
        });
        id
    }

    pub fn new_handle(&mut self, ty: String, kind: HandleKind, owner: ScopeId) -> ResultHandle {
        let h = ResultHandle(self.handles.len() as u32);
        self.handles.push(HandleData {
            ty,
            kind,
            owner,
            declared: false,
        });
        h
    }

    pub fn is_ancestor_or_self(&self, ancestor: ScopeId, mut id: ScopeId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.scope(id).parent {
                Some(p) => id = p,
                None => return false,
            }
        }
    }

    /// The nearest enclosing closure body of `id`, if any.
    pub fn enclosing_closure(&self, mut id: ScopeId) -> Option<usize> {
        loop {
            if let ScopeKind::ClosureBody(i) = self.scope(id).kind {
                return Some(i);
            }
            match self.scope(id).parent {
                Some(p) => id = p,
                None => return None,
            }
        }
    }

    /// A handle may be read from its owning scope or any descendant of it.
    /// Constants may be read anywhere.
    fn check_readable(&self, scope: ScopeId, h: ResultHandle) -> Result<(), BuildError> {
        let data = self.handle(h);
        if matches!(data.kind, HandleKind::Constant(_)) {
            return Ok(());
        }
        if self.is_ancestor_or_self(data.owner, scope) {
            return Ok(());
        }
        if self.enclosing_closure(scope).is_some() {
            Err(BuildError::AmbiguousCapture)
        } else {
            Err(BuildError::HandleOutOfScope)
        }
    }

    /// Local slot of parameter `index` of a frame whose parameters are
    /// `params`, with slot 0 reserved for the receiver unless static.
    fn param_slot(params: &[String], index: usize, is_static: bool) -> u16 {
        let mut slot = if is_static { 0 } else { 1 };
        for p in &params[..index] {
            slot += descriptor::slot_width(p);
        }
        slot
    }
}

/// A two-way conditional created by [`Scope::if_non_zero`] or
/// [`Scope::if_null`]. Enter either side with [`Scope::enter`], then
/// optionally [`Scope::merge`] a value out of both.
#[derive(Debug)]
pub struct Branch {
    true_scope: ScopeId,
    false_scope: ScopeId,
    parent: ScopeId,
}

impl Branch {
    pub fn true_scope(&self) -> ScopeId {
        self.true_scope
    }

    pub fn false_scope(&self) -> ScopeId {
        self.false_scope
    }
}

/// A guarded region created by [`Scope::try_block`]. Catch clauses are
/// added with [`Scope::add_catch`]; the region must be sealed with
/// [`Scope::complete_try`] before the class is closed.
#[derive(Debug)]
pub struct TryBlock {
    declaring: ScopeId,
    op: usize,
    body: ScopeId,
}

impl TryBlock {
    /// The guarded scope.
    pub fn body(&self) -> ScopeId {
        self.body
    }
}

/// One catch clause of a [`TryBlock`].
#[derive(Debug)]
pub struct CatchBlock {
    scope: ScopeId,
    caught: ResultHandle,
}

impl CatchBlock {
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// The caught exception value, readable inside the handler scope.
    pub fn caught(&self) -> ResultHandle {
        self.caught
    }
}

/// A closure created by [`Scope::create_closure`].
#[derive(Debug)]
pub struct ClosureRef {
    scope: ScopeId,
    instance: ResultHandle,
    params: Vec<ResultHandle>,
}

impl ClosureRef {
    /// The closure body; enter it with [`Scope::enter`].
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// The instance of the synthesized class, usable in the creating scope.
    pub fn instance(&self) -> ResultHandle {
        self.instance
    }

    /// Parameter `index` of the implemented method, readable inside the
    /// closure body.
    pub fn parameter(&self, index: usize) -> Result<ResultHandle, BuildError> {
        self.params
            .get(index)
            .copied()
            .ok_or(BuildError::NoSuchParameter {
                index,
                count: self.params.len(),
            })
    }
}

/// A cursor into one scope of a method body. All code-building operations
/// live here.
pub struct Scope<'a> {
    pub(crate) body: &'a mut Body,
    pub(crate) id: ScopeId,
}

impl<'a> Scope<'a> {
    /// Reborrows this cursor at another scope, typically one obtained from
    /// a [`Branch`], [`TryBlock`], [`CatchBlock`], or [`ClosureRef`].
    pub fn enter(&mut self, id: ScopeId) -> Scope<'_> {
        Scope {
            body: self.body,
            id,
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    #[track_caller]
    fn push_op(&mut self, op: Operation) {
        let origin = if self.body.capture_origins {
            Some(Location::caller())
        } else {
            None
        };
        self.body
            .scope_mut(self.id)
            .ops
            .push(OpNode { op, origin });
    }

    fn read(&self, h: ResultHandle) -> Result<(), BuildError> {
        self.body.check_readable(self.id, h)
    }

    // ── values ─────────────────────────────────────────────────────

    /// The receiver of the enclosing instance method.
    pub fn this_value(&mut self) -> Result<ResultHandle, BuildError> {
        if self.body.is_static {
            return Err(BuildError::ThisInStaticMethod);
        }
        let ty = format!("L{};", self.body.owner_class);
        Ok(self
            .body
            .new_handle(ty, HandleKind::LocalVariable(0), ScopeId::ROOT))
    }

    /// Parameter `index` of the enclosing method. Inside a closure body
    /// this still refers to the outer method; use
    /// [`ClosureRef::parameter`] for the closure's own parameters.
    pub fn method_param(&mut self, index: usize) -> Result<ResultHandle, BuildError> {
        let params = self.body.method.params();
        if index >= params.len() {
            return Err(BuildError::NoSuchParameter {
                index,
                count: params.len(),
            });
        }
        let slot = Body::param_slot(params, index, self.body.is_static);
        let ty = params[index].clone();
        Ok(self
            .body
            .new_handle(ty, HandleKind::LocalVariable(slot), ScopeId::ROOT))
    }

    /// A literal constant.
    pub fn load(&mut self, value: impl Into<Const>) -> ResultHandle {
        let c = value.into();
        let ty = c.type_sig().to_string();
        self.body.new_handle(ty, HandleKind::Constant(c), self.id)
    }

    /// The null reference.
    pub fn load_null(&mut self) -> ResultHandle {
        let c = Const::Null;
        let ty = c.type_sig().to_string();
        self.body.new_handle(ty, HandleKind::Constant(c), self.id)
    }

    /// A class-literal reference to the named class.
    pub fn load_class(&mut self, name: &str) -> Result<ResultHandle, BuildError> {
        let c = Const::Class(descriptor::normalize_class(name)?);
        let ty = c.type_sig().to_string();
        Ok(self.body.new_handle(ty, HandleKind::Constant(c), self.id))
    }

    /// A variable with no initial value, assignable with [`assign`] and
    /// readable from this scope and its descendants.
    ///
    /// [`assign`]: Scope::assign
    pub fn declare_variable(&mut self, ty: &str) -> Result<ResultHandle, BuildError> {
        let sig = descriptor::to_sig(ty)?;
        let h = self.body.new_handle(sig, HandleKind::Unused, self.id);
        self.body.handle_mut(h).declared = true;
        Ok(h)
    }

    /// Stores `value` into `target`'s storage.
    #[track_caller]
    pub fn assign(
        &mut self,
        target: ResultHandle,
        value: ResultHandle,
    ) -> Result<(), BuildError> {
        if matches!(self.body.handle(target).kind, HandleKind::Constant(_)) {
            return Err(BuildError::InvalidAssignTarget);
        }
        // Captured variables are read-only inside a closure body.
        if let Some(i) = self.body.enclosing_closure(self.id) {
            let closure_scope = self.body.closures[i].scope;
            let owner = self.body.handle(target).owner;
            if !self.body.is_ancestor_or_self(closure_scope, owner) {
                return Err(BuildError::AmbiguousCapture);
            }
        }
        self.read(value)?;
        self.body.check_readable(self.id, target)?;
        self.body.handle_mut(target).declared = true;
        self.push_op(Operation::Assign { target, value });
        Ok(())
    }

    // ── invocations ────────────────────────────────────────────────

    fn check_arity(method: &MethodDesc, found: usize) -> Result<(), BuildError> {
        let expected = method.params().len();
        if found != expected {
            return Err(BuildError::ArityMismatch {
                method: format!("{}.{}", method.class(), method.name()),
                expected,
                found,
            });
        }
        Ok(())
    }

    #[track_caller]
    fn invoke(
        &mut self,
        kind: InvokeKind,
        method: &MethodDesc,
        receiver: Option<ResultHandle>,
        args: &[ResultHandle],
    ) -> Result<Option<ResultHandle>, BuildError> {
        Self::check_arity(method, args.len())?;
        if let Some(r) = receiver {
            self.read(r)?;
        }
        for &a in args {
            self.read(a)?;
        }
        let out = if method.ret() == "V" {
            None
        } else {
            Some(
                self.body
                    .new_handle(method.ret().to_string(), HandleKind::Unused, self.id),
            )
        };
        self.push_op(Operation::Invoke {
            kind,
            method: method.clone(),
            receiver,
            args: args.to_vec(),
            out,
        });
        Ok(out)
    }

    /// Invokes with dynamic dispatch on the receiver's class.
    #[track_caller]
    pub fn invoke_virtual(
        &mut self,
        method: &MethodDesc,
        receiver: ResultHandle,
        args: &[ResultHandle],
    ) -> Result<Option<ResultHandle>, BuildError> {
        self.invoke(InvokeKind::Virtual, method, Some(receiver), args)
    }

    /// Invokes through an interface method.
    #[track_caller]
    pub fn invoke_interface(
        &mut self,
        method: &MethodDesc,
        receiver: ResultHandle,
        args: &[ResultHandle],
    ) -> Result<Option<ResultHandle>, BuildError> {
        self.invoke(InvokeKind::Interface, method, Some(receiver), args)
    }

    /// Invokes a static method.
    #[track_caller]
    pub fn invoke_static(
        &mut self,
        method: &MethodDesc,
        args: &[ResultHandle],
    ) -> Result<Option<ResultHandle>, BuildError> {
        self.invoke(InvokeKind::Static, method, None, args)
    }

    /// Invokes the exact named method without dynamic dispatch, for
    /// constructor and superclass calls.
    #[track_caller]
    pub fn invoke_special(
        &mut self,
        method: &MethodDesc,
        receiver: ResultHandle,
        args: &[ResultHandle],
    ) -> Result<Option<ResultHandle>, BuildError> {
        self.invoke(InvokeKind::Special, method, Some(receiver), args)
    }

    // ── allocation ─────────────────────────────────────────────────

    /// Allocates an instance and runs the given constructor on it.
    #[track_caller]
    pub fn new_instance(
        &mut self,
        ctor: &MethodDesc,
        args: &[ResultHandle],
    ) -> Result<ResultHandle, BuildError> {
        Self::check_arity(ctor, args.len())?;
        for &a in args {
            self.read(a)?;
        }
        let ty = format!("L{};", ctor.class());
        let out = self.body.new_handle(ty, HandleKind::Unused, self.id);
        self.push_op(Operation::NewInstance {
            ctor: ctor.clone(),
            args: args.to_vec(),
            out,
        });
        Ok(out)
    }

    /// Allocates a single-dimension array of `element_type`.
    #[track_caller]
    pub fn new_array(
        &mut self,
        element_type: &str,
        length: ResultHandle,
    ) -> Result<ResultHandle, BuildError> {
        let elem = descriptor::to_sig(element_type)?;
        if elem.starts_with('[') {
            return Err(BuildError::MalformedDescriptor {
                detail: "multi-dimensional arrays are not supported".to_string(),
            });
        }
        self.read(length)?;
        let array_sig = format!("[{elem}");
        let out = self
            .body
            .new_handle(array_sig.clone(), HandleKind::Unused, self.id);
        self.push_op(Operation::NewArray {
            array_sig,
            len: length,
            out,
        });
        Ok(out)
    }

    // ── fields and arrays ──────────────────────────────────────────

    /// Reads an instance field.
    #[track_caller]
    pub fn read_field(
        &mut self,
        field: &FieldDesc,
        instance: ResultHandle,
    ) -> Result<ResultHandle, BuildError> {
        self.read(instance)?;
        let out = self
            .body
            .new_handle(field.ty().to_string(), HandleKind::Unused, self.id);
        self.push_op(Operation::ReadField {
            field: field.clone(),
            instance,
            out,
        });
        Ok(out)
    }

    /// Writes an instance field.
    #[track_caller]
    pub fn write_field(
        &mut self,
        field: &FieldDesc,
        instance: ResultHandle,
        value: ResultHandle,
    ) -> Result<(), BuildError> {
        self.read(instance)?;
        self.read(value)?;
        self.push_op(Operation::WriteField {
            field: field.clone(),
            instance,
            value,
        });
        Ok(())
    }

    /// Reads a static field.
    #[track_caller]
    pub fn read_static_field(
        &mut self,
        field: &FieldDesc,
    ) -> Result<ResultHandle, BuildError> {
        let out = self
            .body
            .new_handle(field.ty().to_string(), HandleKind::Unused, self.id);
        self.push_op(Operation::ReadStatic {
            field: field.clone(),
            out,
        });
        Ok(out)
    }

    /// Writes a static field.
    #[track_caller]
    pub fn write_static_field(
        &mut self,
        field: &FieldDesc,
        value: ResultHandle,
    ) -> Result<(), BuildError> {
        self.read(value)?;
        self.push_op(Operation::WriteStatic {
            field: field.clone(),
            value,
        });
        Ok(())
    }

    /// Reads an array element.
    #[track_caller]
    pub fn read_array_element(
        &mut self,
        array: ResultHandle,
        index: ResultHandle,
    ) -> Result<ResultHandle, BuildError> {
        self.read(array)?;
        self.read(index)?;
        let elem = self
            .body
            .handle(array)
            .ty
            .strip_prefix('[')
            .map(str::to_string)
            .ok_or_else(|| BuildError::MalformedDescriptor {
                detail: format!(
                    "cannot index into non-array type {:?}",
                    self.body.handle(array).ty
                ),
            })?;
        let out = self.body.new_handle(elem, HandleKind::Unused, self.id);
        self.push_op(Operation::ReadArray { array, index, out });
        Ok(out)
    }

    /// Writes an array element.
    #[track_caller]
    pub fn write_array_element(
        &mut self,
        array: ResultHandle,
        index: ResultHandle,
        value: ResultHandle,
    ) -> Result<(), BuildError> {
        self.read(array)?;
        self.read(index)?;
        self.read(value)?;
        self.push_op(Operation::WriteArray {
            array,
            index,
            value,
        });
        Ok(())
    }

    /// Asserts at runtime that `value` is assignable to `target_type`.
    #[track_caller]
    pub fn check_cast(
        &mut self,
        value: ResultHandle,
        target_type: &str,
    ) -> Result<ResultHandle, BuildError> {
        self.read(value)?;
        let target_sig = descriptor::to_sig(target_type)?;
        let out = self
            .body
            .new_handle(target_sig.clone(), HandleKind::Unused, self.id);
        self.push_op(Operation::CheckCast {
            value,
            target_sig,
            out,
        });
        Ok(out)
    }

    // ── control flow ───────────────────────────────────────────────

    /// Returns from the enclosing frame, with `value` unless it is void.
    #[track_caller]
    pub fn return_value(&mut self, value: Option<ResultHandle>) -> Result<(), BuildError> {
        if let Some(v) = value {
            self.read(v)?;
        }
        self.push_op(Operation::Return { value });
        Ok(())
    }

    /// Raises `value` as an exception.
    #[track_caller]
    pub fn throw_value(&mut self, value: ResultHandle) -> Result<(), BuildError> {
        self.read(value)?;
        self.push_op(Operation::Throw { value });
        Ok(())
    }

    #[track_caller]
    fn branch(
        &mut self,
        cond: ResultHandle,
        null_test: bool,
    ) -> Result<Branch, BuildError> {
        self.read(cond)?;
        let true_scope = self.body.new_scope(self.id, ScopeKind::TrueBranch);
        let false_scope = self.body.new_scope(self.id, ScopeKind::FalseBranch);
        self.push_op(Operation::Branch {
            cond,
            null_test,
            true_scope,
            false_scope,
        });
        Ok(Branch {
            true_scope,
            false_scope,
            parent: self.id,
        })
    }

    /// Branches on an int condition; the true side runs when it is
    /// non-zero.
    #[track_caller]
    pub fn if_non_zero(&mut self, cond: ResultHandle) -> Result<Branch, BuildError> {
        self.branch(cond, false)
    }

    /// Branches on a reference; the true side runs when it is null.
    #[track_caller]
    pub fn if_null(&mut self, value: ResultHandle) -> Result<Branch, BuildError> {
        self.branch(value, true)
    }

    /// Merges one value out of the two sides of a branch. Both inputs must
    /// have the same type signature; the result is readable in the scope
    /// that created the branch.
    #[track_caller]
    pub fn merge(
        &mut self,
        branch: &Branch,
        true_value: ResultHandle,
        false_value: ResultHandle,
    ) -> Result<ResultHandle, BuildError> {
        self.body.check_readable(branch.true_scope, true_value)?;
        self.body.check_readable(branch.false_scope, false_value)?;
        let true_ty = self.body.handle(true_value).ty.clone();
        let false_ty = self.body.handle(false_value).ty.clone();
        if true_ty != false_ty {
            return Err(BuildError::BranchTypeMismatch { true_ty, false_ty });
        }
        let target = self
            .body
            .new_handle(true_ty, HandleKind::Unused, branch.parent);
        self.body.handle_mut(target).declared = true;
        let origin = if self.body.capture_origins {
            Some(Location::caller())
        } else {
            None
        };
        self.body.scope_mut(branch.true_scope).ops.push(OpNode {
            op: Operation::Assign {
                target,
                value: true_value,
            },
            origin,
        });
        self.body.scope_mut(branch.false_scope).ops.push(OpNode {
            op: Operation::Assign {
                target,
                value: false_value,
            },
            origin,
        });
        Ok(target)
    }

    /// Opens a nested scope at the current position, usable as a loop body
    /// via [`continue_to`] and [`break_to`].
    ///
    /// [`continue_to`]: Scope::continue_to
    /// [`break_to`]: Scope::break_to
    #[track_caller]
    pub fn new_scope(&mut self) -> ScopeId {
        let scope = self.body.new_scope(self.id, ScopeKind::Block);
        self.push_op(Operation::Block { scope });
        scope
    }

    /// Checks that `target` encloses the current scope without a closure
    /// boundary in between.
    fn check_jump_target(&self, target: ScopeId) -> Result<(), BuildError> {
        let mut id = self.id;
        loop {
            if id == target {
                return Ok(());
            }
            if matches!(self.body.scope(id).kind, ScopeKind::ClosureBody(_)) {
                return Err(BuildError::InvalidJumpTarget);
            }
            match self.body.scope(id).parent {
                Some(p) => id = p,
                None => return Err(BuildError::InvalidJumpTarget),
            }
        }
    }

    /// Jumps back to the top of an enclosing scope.
    #[track_caller]
    pub fn continue_to(&mut self, target: ScopeId) -> Result<(), BuildError> {
        self.check_jump_target(target)?;
        self.push_op(Operation::Jump {
            target,
            to_bottom: false,
        });
        Ok(())
    }

    /// Jumps past the bottom of an enclosing scope.
    #[track_caller]
    pub fn break_to(&mut self, target: ScopeId) -> Result<(), BuildError> {
        self.check_jump_target(target)?;
        self.push_op(Operation::Jump {
            target,
            to_bottom: true,
        });
        Ok(())
    }

    // ── exception regions ──────────────────────────────────────────

    /// Opens a guarded region at the current position.
    #[track_caller]
    pub fn try_block(&mut self) -> TryBlock {
        let body = self.body.new_scope(self.id, ScopeKind::TryBody);
        let op = self.body.scope(self.id).ops.len();
        self.push_op(Operation::TryCatch {
            body,
            catches: Vec::new(),
            completed: false,
        });
        TryBlock {
            declaring: self.id,
            op,
            body,
        }
    }

    /// Adds a catch clause for `exception` to a try region. Each exception
    /// type may be caught once, and only before [`complete_try`].
    ///
    /// [`complete_try`]: Scope::complete_try
    pub fn add_catch(
        &mut self,
        tb: &TryBlock,
        exception: &str,
    ) -> Result<CatchBlock, BuildError> {
        let exception = descriptor::normalize_class(exception)?;
        let scope = self.body.new_scope(tb.declaring, ScopeKind::Catch);
        let caught = self
            .body
            .new_handle(format!("L{exception};"), HandleKind::Unused, scope);
        let Operation::TryCatch {
            catches, completed, ..
        } = &mut self.body.scope_mut(tb.declaring).ops[tb.op].op
        else {
            unreachable!("try block op index always points at a TryCatch");
        };
        if *completed {
            return Err(BuildError::InvalidTryBlock {
                detail: "catch clause added after completion",
            });
        }
        if catches.iter().any(|c| c.exception == exception) {
            return Err(BuildError::InvalidTryBlock {
                detail: "duplicate catch clause for exception type",
            });
        }
        catches.push(CatchClause {
            exception,
            caught,
            scope,
        });
        Ok(CatchBlock { scope, caught })
    }

    /// Seals a try region. Regions left incomplete fail at close time.
    pub fn complete_try(&mut self, tb: &TryBlock) -> Result<(), BuildError> {
        let Operation::TryCatch { completed, .. } =
            &mut self.body.scope_mut(tb.declaring).ops[tb.op].op
        else {
            unreachable!("try block op index always points at a TryCatch");
        };
        if *completed {
            return Err(BuildError::InvalidTryBlock {
                detail: "try region completed twice",
            });
        }
        *completed = true;
        Ok(())
    }

    // ── closures ───────────────────────────────────────────────────

    /// Creates a closure implementing the single abstract method of
    /// `target`. A class is synthesized for it when this class is closed;
    /// outer handles read inside the body are captured into fields of that
    /// class automatically.
    #[track_caller]
    pub fn create_closure(&mut self, target: &TypeInfo) -> Result<ClosureRef, BuildError> {
        let sam = target.functional_method()?.clone();
        let index = self.body.closures.len();
        let scope = self.body.new_scope(self.id, ScopeKind::ClosureBody(index));
        let params = sam
            .params()
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let slot = Body::param_slot(sam.params(), i, false);
                self.body
                    .new_handle(p.clone(), HandleKind::LocalVariable(slot), scope)
            })
            .collect::<Vec<_>>();
        let instance = self.body.new_handle(
            format!("L{};", target.name()),
            HandleKind::Unused,
            self.id,
        );
        self.body.closures.push(ClosureData {
            scope,
            interface: target.name().to_string(),
            sam,
            params: params.clone(),
            instance,
            class_name: String::new(),
            captures: Vec::new(),
            max_slots: 0,
        });
        self.push_op(Operation::Closure { index });
        Ok(ClosureRef {
            scope,
            instance,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags;

    fn test_body() -> Body {
        let method = MethodDesc::new("app/Main", "run", "I", &["I"]).unwrap();
        Body::new(method, false, "app/Main".to_string(), false)
    }

    #[test]
    fn handles_are_visible_in_descendant_scopes_only() {
        let mut body = test_body();
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let p = root.method_param(0).unwrap();
        let branch = root.if_non_zero(p).unwrap();

        let mut t = root.enter(branch.true_scope());
        let inner = t.load(1);
        t.return_value(Some(inner)).unwrap();

        // a handle owned by the true branch is not readable from the
        // false branch
        let mut f = root.enter(branch.false_scope());
        assert!(matches!(
            f.return_value(Some(inner)),
            Err(BuildError::HandleOutOfScope)
        ));
    }

    #[test]
    fn arity_is_checked_at_append_time() {
        let mut body = test_body();
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let m = MethodDesc::new("sys/Ops", "add", "I", &["I", "I"]).unwrap();
        let a = root.load(1);
        assert!(matches!(
            root.invoke_static(&m, &[a]),
            Err(BuildError::ArityMismatch {
                expected: 2,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn void_invocations_produce_no_handle() {
        let mut body = test_body();
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let m = MethodDesc::new("sys/Log", "print", "V", &[]).unwrap();
        assert_eq!(root.invoke_static(&m, &[]).unwrap(), None);
    }

    #[test]
    fn this_is_rejected_in_static_methods() {
        let method = MethodDesc::new("app/Main", "run", "V", &[]).unwrap();
        let mut body = Body::new(method, true, "app/Main".to_string(), false);
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        assert!(matches!(
            root.this_value(),
            Err(BuildError::ThisInStaticMethod)
        ));
    }

    #[test]
    fn wide_params_shift_later_slots() {
        let method = MethodDesc::new("app/Main", "run", "V", &["J", "I"]).unwrap();
        let mut body = Body::new(method, true, "app/Main".to_string(), false);
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let long_param = root.method_param(0).unwrap();
        let int_param = root.method_param(1).unwrap();
        assert_eq!(
            root.body.handle(long_param).kind,
            HandleKind::LocalVariable(0)
        );
        assert_eq!(
            root.body.handle(int_param).kind,
            HandleKind::LocalVariable(2)
        );
    }

    #[test]
    fn merge_rejects_mismatched_types() {
        let mut body = test_body();
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let p = root.method_param(0).unwrap();
        let branch = root.if_non_zero(p).unwrap();
        let t = root.enter(branch.true_scope()).load(1);
        let f = root.enter(branch.false_scope()).load(1i64);
        assert!(matches!(
            root.merge(&branch, t, f),
            Err(BuildError::BranchTypeMismatch { .. })
        ));
    }

    #[test]
    fn merge_appends_assigns_into_both_sides() {
        let mut body = test_body();
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let p = root.method_param(0).unwrap();
        let branch = root.if_non_zero(p).unwrap();
        let t = root.enter(branch.true_scope()).load(1);
        let f = root.enter(branch.false_scope()).load(2);
        let merged = root.merge(&branch, t, f).unwrap();

        assert!(root.body.handle(merged).declared);
        for scope in [branch.true_scope(), branch.false_scope()] {
            let ops = &root.body.scope(scope).ops;
            assert!(matches!(
                ops.last().unwrap().op,
                Operation::Assign { target, .. } if target == merged
            ));
        }
    }

    #[test]
    fn jumps_must_target_enclosing_scopes() {
        let mut body = test_body();
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let loop_scope = root.new_scope();
        let sibling = root.new_scope();

        let mut inner = root.enter(loop_scope);
        assert!(inner.continue_to(loop_scope).is_ok());
        assert!(matches!(
            inner.break_to(sibling),
            Err(BuildError::InvalidJumpTarget)
        ));
    }

    #[test]
    fn jumps_cannot_cross_closure_boundaries() {
        let mut body = test_body();
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let loop_scope = root.new_scope();

        let sam = MethodDesc::new("sys/Runnable", "run", "V", &[]).unwrap();
        let iface = TypeInfo::interface("sys/Runnable")
            .unwrap()
            .method(sam, flags::PUBLIC | flags::ABSTRACT);
        let mut outer = root.enter(loop_scope);
        let closure = outer.create_closure(&iface).unwrap();
        let mut inner = outer.enter(closure.scope());
        assert!(matches!(
            inner.continue_to(loop_scope),
            Err(BuildError::InvalidJumpTarget)
        ));
    }

    #[test]
    fn try_regions_reject_duplicate_and_late_catches() {
        let mut body = test_body();
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let tb = root.try_block();
        root.add_catch(&tb, "sys/Error").unwrap();
        assert!(matches!(
            root.add_catch(&tb, "sys.Error"),
            Err(BuildError::InvalidTryBlock { .. })
        ));
        root.complete_try(&tb).unwrap();
        assert!(matches!(
            root.add_catch(&tb, "sys/Other"),
            Err(BuildError::InvalidTryBlock { .. })
        ));
        assert!(matches!(
            root.complete_try(&tb),
            Err(BuildError::InvalidTryBlock { .. })
        ));
    }

    #[test]
    fn captured_variables_are_read_only_inside_closures() {
        let mut body = test_body();
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let outer_var = root.declare_variable("I").unwrap();
        let one = root.load(1);
        root.assign(outer_var, one).unwrap();

        let sam = MethodDesc::new("sys/Runnable", "run", "V", &[]).unwrap();
        let iface = TypeInfo::interface("sys/Runnable")
            .unwrap()
            .method(sam, flags::PUBLIC | flags::ABSTRACT);
        let closure = root.create_closure(&iface).unwrap();
        let mut inner = root.enter(closure.scope());
        let two = inner.load(2);
        assert!(matches!(
            inner.assign(outer_var, two),
            Err(BuildError::AmbiguousCapture)
        ));
    }

    #[test]
    fn arrays_check_element_types_at_append_time() {
        let mut body = test_body();
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let len = root.load(3);
        assert!(matches!(
            root.new_array("[I", len),
            Err(BuildError::MalformedDescriptor { .. })
        ));

        let arr = root.new_array("I", len).unwrap();
        assert_eq!(root.body.handle(arr).ty, "[I");
        let idx = root.load(0);
        let elem = root.read_array_element(arr, idx).unwrap();
        assert_eq!(root.body.handle(elem).ty, "I");

        // indexing a non-array value is rejected
        let p = root.method_param(0).unwrap();
        assert!(matches!(
            root.read_array_element(p, idx),
            Err(BuildError::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn assign_rejects_constant_targets() {
        let mut body = test_body();
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let c = root.load(1);
        let v = root.load(2);
        assert!(matches!(
            root.assign(c, v),
            Err(BuildError::InvalidAssignTarget)
        ));
    }

    #[test]
    fn closure_params_are_pinned_to_their_slots() {
        let mut body = test_body();
        let mut root = Scope {
            body: &mut body,
            id: ScopeId::ROOT,
        };
        let sam = MethodDesc::new("sys/Combine", "apply", "J", &["J", "I"]).unwrap();
        let iface = TypeInfo::interface("sys/Combine")
            .unwrap()
            .method(sam, flags::PUBLIC | flags::ABSTRACT);
        let closure = root.create_closure(&iface).unwrap();
        let p0 = closure.parameter(0).unwrap();
        let p1 = closure.parameter(1).unwrap();
        assert_eq!(root.body.handle(p0).kind, HandleKind::LocalVariable(1));
        assert_eq!(root.body.handle(p1).kind, HandleKind::LocalVariable(3));
        assert!(matches!(
            closure.parameter(2),
            Err(BuildError::NoSuchParameter { count: 2, .. })
        ));
    }
}
