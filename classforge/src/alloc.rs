//! Local slot assignment.
//!
//! Runs once per frame after the body is complete. Handles that are only
//! consumed by the operation immediately following their producer collapse
//! onto the operand stack; everything else that is read anywhere gets a
//! local slot. Produced values nobody reads stay [`HandleKind::Unused`] and
//! are popped at emission time.

use std::collections::HashSet;

use log::trace;

use crate::descriptor;
use crate::handle::{HandleKind, ResultHandle};
use crate::scope::{Body, ClosureData, ScopeData, ScopeId};

/// First free slot of a frame: the receiver (unless static) plus one or
/// two slots per parameter.
pub(crate) fn frame_base(params: &[String], is_static: bool) -> u16 {
    let mut base = if is_static { 0 } else { 1 };
    for p in params {
        base += descriptor::slot_width(p);
    }
    base
}

/// Assigns slots for the main frame and every closure frame of `body`,
/// recording each frame's slot count.
pub(crate) fn allocate(body: &mut Body) {
    let first = frame_base(body.method.params(), body.is_static);
    body.max_slots = allocate_frame(body, ScopeId::ROOT, first);
    trace!(
        "{}.{}: {} slots",
        body.owner_class,
        body.method.name(),
        body.max_slots
    );
    for i in 0..body.closures.len() {
        let base = frame_base(body.closures[i].sam.params(), false);
        let scope = body.closures[i].scope;
        let max = allocate_frame(body, scope, base);
        body.closures[i].max_slots = max;
        trace!("closure frame {}: {} slots", body.closures[i].class_name, max);
    }
}

fn allocate_frame(body: &mut Body, root: ScopeId, first_slot: u16) -> u16 {
    let mut needs = Vec::new();
    let mut seen = HashSet::new();
    {
        let Body {
            scopes,
            handles,
            closures,
            ..
        } = body;
        collect(scopes, handles, closures, root, &mut needs, &mut seen);
    }
    let mut next = first_slot;
    for h in needs {
        // handles owned outside this frame keep the storage their own
        // frame chose; closure bodies reach them through capture fields
        if !body.is_ancestor_or_self(root, body.handle(h).owner) {
            continue;
        }
        let data = body.handle_mut(h);
        match &data.kind {
            HandleKind::Constant(_) | HandleKind::LocalVariable(_) => {}
            HandleKind::SingleUse | HandleKind::Unused => {
                data.kind = HandleKind::LocalVariable(next);
                next += descriptor::slot_width(&data.ty);
            }
        }
    }
    next
}

/// Gathers, in first-use order, the handles of one frame that need a slot.
/// Closure bodies are separate frames and are not descended into.
fn collect(
    scopes: &[ScopeData],
    handles: &mut [crate::handle::HandleData],
    closures: &[ClosureData],
    scope: ScopeId,
    needs: &mut Vec<ResultHandle>,
    seen: &mut HashSet<ResultHandle>,
) {
    let mut prev_out: Option<ResultHandle> = None;
    let mut inputs = Vec::new();
    let mut children = Vec::new();
    for node in &scopes[scope.0 as usize].ops {
        inputs.clear();
        node.op.inputs(closures, &mut inputs);
        if let (Some(p), Some(t)) = (prev_out, node.op.top(closures)) {
            if p == t {
                // the previous result reaches this operation on the stack;
                // this use alone does not force a slot
                if let Some(pos) = inputs.iter().position(|h| *h == t) {
                    inputs.remove(pos);
                }
                let data = &mut handles[t.0 as usize];
                if data.kind == HandleKind::Unused && !data.declared {
                    data.kind = HandleKind::SingleUse;
                }
            }
        }
        for &h in &inputs {
            if seen.insert(h) {
                needs.push(h);
            }
        }
        children.clear();
        node.op.child_scopes(&mut children);
        for &c in &children {
            collect(scopes, handles, closures, c, needs, seen);
        }
        prev_out = node.op.outgoing(closures);
    }
}
