//! Closure synthesis.
//!
//! Each closure body becomes a separate class implementing the target
//! interface. Outer handles read inside the body are carried in fields of
//! that class, filled by its constructor from the creating frame.
//! Superclass invocations inside a body cannot be encoded from the
//! synthesized class, so they are routed through generated accessor
//! methods on the enclosing class.

use std::collections::HashSet;

use log::debug;

use crate::class::{ClassBuilder, ClassOutput};
use crate::descriptor::{FieldDesc, MethodDesc};
use crate::error::BuildError;
use crate::flags;
use crate::handle::{HandleKind, ResultHandle};
use crate::scope::{Body, InvokeKind, Operation, ScopeId};

/// Resolves every closure of every method: picks class names, computes
/// capture lists, and rewrites superclass invocations. Runs before slot
/// allocation so that captures count as uses in the creating frame.
pub(crate) fn synthesize<O: ClassOutput>(
    class: &mut ClassBuilder<O>,
) -> Result<(), BuildError> {
    let method_count = class.methods.len();
    for m in 0..method_count {
        let closure_count = class.methods[m].body.closures.len();
        for c in 0..closure_count {
            let name = format!("{}$function${}", class.name, class.closure_count);
            class.closure_count += 1;

            let captured = collect_captures(&class.methods[m].body, c)?;
            let mut captures = Vec::with_capacity(captured.len());
            for (i, &h) in captured.iter().enumerate() {
                let ty = class.methods[m].body.handle(h).ty.clone();
                captures.push((h, FieldDesc::new(&name, &format!("cap${i}"), &ty)?));
            }

            debug!("{}: {} captured values", name, captures.len());
            let data = &mut class.methods[m].body.closures[c];
            data.class_name = name;
            data.captures = captures;
        }
        rewrite_super_invokes(class, m)?;
    }
    Ok(())
}

/// Handles read inside the closure subtree but owned outside it, in
/// first-use order. Nested closure bodies count: a value they capture from
/// outside this closure must be carried through it.
fn collect_captures(body: &Body, closure: usize) -> Result<Vec<ResultHandle>, BuildError> {
    let root = body.closures[closure].scope;
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    walk(body, root, root, &mut out, &mut seen)?;
    Ok(out)
}

fn walk(
    body: &Body,
    scope: ScopeId,
    root: ScopeId,
    out: &mut Vec<ResultHandle>,
    seen: &mut HashSet<ResultHandle>,
) -> Result<(), BuildError> {
    let mut inputs = Vec::new();
    let mut children = Vec::new();
    for node in &body.scope(scope).ops {
        // inner closures have no capture list yet; read their bodies
        // directly
        if let Operation::Closure { index } = &node.op {
            walk(body, body.closures[*index].scope, root, out, seen)?;
            continue;
        }
        if let Operation::Assign { target, .. } = &node.op {
            let data = body.handle(*target);
            if !matches!(data.kind, HandleKind::Constant(_))
                && !body.is_ancestor_or_self(root, data.owner)
            {
                return Err(BuildError::AmbiguousCapture);
            }
        }
        inputs.clear();
        node.op.inputs(&body.closures, &mut inputs);
        for &h in &inputs {
            let data = body.handle(h);
            if matches!(data.kind, HandleKind::Constant(_)) {
                continue;
            }
            if !body.is_ancestor_or_self(root, data.owner) && seen.insert(h) {
                out.push(h);
            }
        }
        children.clear();
        node.op.child_scopes(&mut children);
        for &ch in &children {
            walk(body, ch, root, out, seen)?;
        }
    }
    Ok(())
}

fn in_closure(body: &Body, scope: ScopeId) -> bool {
    body.enclosing_closure(scope).is_some()
}

/// Replaces `InvokeSpecial` on the enclosing class's superclass, found
/// inside closure bodies, with virtual calls to generated accessors.
fn rewrite_super_invokes<O: ClassOutput>(
    class: &mut ClassBuilder<O>,
    m: usize,
) -> Result<(), BuildError> {
    let mut sites = Vec::new();
    {
        let body = &class.methods[m].body;
        for (si, scope) in body.scopes.iter().enumerate() {
            if !in_closure(body, ScopeId(si as u32)) {
                continue;
            }
            for (oi, node) in scope.ops.iter().enumerate() {
                if let Operation::Invoke {
                    kind: InvokeKind::Special,
                    method,
                    ..
                } = &node.op
                {
                    if method.class() == class.superclass && method.name() != "<init>" {
                        sites.push((si, oi, method.clone()));
                    }
                }
            }
        }
    }
    for (si, oi, target) in sites {
        let accessor = super_accessor(class, &target)?;
        if let Operation::Invoke { kind, method, .. } =
            &mut class.methods[m].body.scopes[si].ops[oi].op
        {
            *kind = InvokeKind::Virtual;
            *method = accessor;
        }
    }
    Ok(())
}

/// Finds or generates the accessor for one superclass method. Accessors
/// are deduplicated per class, not per closure.
fn super_accessor<O: ClassOutput>(
    class: &mut ClassBuilder<O>,
    target: &MethodDesc,
) -> Result<MethodDesc, BuildError> {
    if let Some((_, acc)) = class.super_accessors.iter().find(|(t, _)| t == target) {
        return Ok(acc.clone());
    }
    let name = format!("{}$superaccessor${}", target.name(), class.accessor_count);
    class.accessor_count += 1;

    let params: Vec<&str> = target.params().iter().map(String::as_str).collect();
    let id = class.method(
        &name,
        &params,
        target.ret(),
        flags::PUBLIC | flags::FINAL | flags::SYNTHETIC,
    )?;
    let mut scope = class.scope(id);
    let this = scope.this_value()?;
    let args = (0..params.len())
        .map(|i| scope.method_param(i))
        .collect::<Result<Vec<_>, _>>()?;
    let out = scope.invoke_special(target, this, &args)?;
    scope.return_value(out)?;

    let accessor = class.methods[id.index()].desc.clone();
    class.super_accessors.push((target.clone(), accessor.clone()));
    Ok(accessor)
}
