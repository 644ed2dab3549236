//! Class construction and output.

use std::io;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::alloc;
use crate::assemble::{self, AssembledCode, MethodArtifact};
use crate::closure;
use crate::descriptor::{self, FieldDesc, MethodDesc, OBJECT};
use crate::emit::CodeBuffer;
use crate::error::BuildError;
use crate::flags;
use crate::op::Op;
use crate::pool::{ConstPool, PoolEntry};
use crate::scope::{Body, ClosureData, Scope, ScopeId};

/// Receives finished classes. A class and every class synthesized for its
/// closures are written through the same sink.
pub trait ClassOutput {
    fn write(&mut self, class_name: &str, bytes: &[u8]) -> io::Result<()>;
}

impl<F> ClassOutput for F
where
    F: FnMut(&str, &[u8]) -> io::Result<()>,
{
    fn write(&mut self, class_name: &str, bytes: &[u8]) -> io::Result<()> {
        self(class_name, bytes)
    }
}

/// An in-memory sink, shareable across threads. Cloning yields a handle to
/// the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutput {
    classes: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, class_name: &str) -> Option<Vec<u8>> {
        self.classes
            .lock()
            .iter()
            .find(|(n, _)| n == class_name)
            .map(|(_, b)| b.clone())
    }

    /// Names of the written classes, in write order.
    pub fn class_names(&self) -> Vec<String> {
        self.classes.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn classes(&self) -> Vec<(String, Vec<u8>)> {
        self.classes.lock().clone()
    }
}

impl ClassOutput for MemoryOutput {
    fn write(&mut self, class_name: &str, bytes: &[u8]) -> io::Result<()> {
        self.classes
            .lock()
            .push((class_name.to_string(), bytes.to_vec()));
        Ok(())
    }
}

/// Declaration of a class to build: name, superclass, interfaces, flags.
#[derive(Debug, Clone)]
pub struct ClassSpec {
    name: String,
    superclass: String,
    interfaces: Vec<String>,
    flags: u16,
    capture_origins: bool,
}

impl ClassSpec {
    pub fn new(name: &str) -> Result<Self, BuildError> {
        Ok(Self {
            name: descriptor::normalize_class(name)?,
            superclass: OBJECT.to_string(),
            interfaces: Vec::new(),
            flags: flags::PUBLIC,
            capture_origins: false,
        })
    }

    pub fn superclass(mut self, name: &str) -> Result<Self, BuildError> {
        self.superclass = descriptor::normalize_class(name)?;
        Ok(self)
    }

    pub fn implements(mut self, name: &str) -> Result<Self, BuildError> {
        self.interfaces.push(descriptor::normalize_class(name)?);
        Ok(self)
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Records the builder call site on every operation, reported by
    /// assembly errors. Costs a little memory per operation.
    pub fn capture_origins(mut self, on: bool) -> Self {
        self.capture_origins = on;
        self
    }
}

/// Identifies a method of the class being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodId(pub(crate) u32);

impl MethodId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub(crate) struct MethodData {
    pub desc: MethodDesc,
    pub flags: u16,
    pub body: Body,
}

/// Builds one class. Declare methods and fields, fill method bodies
/// through [`scope`](Self::scope), then [`close`](Self::close) to assemble
/// and write the class and its synthesized closure classes.
pub struct ClassBuilder<O: ClassOutput> {
    pub(crate) name: String,
    pub(crate) superclass: String,
    interfaces: Vec<String>,
    flags: u16,
    capture_origins: bool,
    fields: Vec<(FieldDesc, u16)>,
    pub(crate) methods: Vec<MethodData>,
    output: O,
    pub(crate) closure_count: usize,
    pub(crate) accessor_count: usize,
    pub(crate) super_accessors: Vec<(MethodDesc, MethodDesc)>,
}

impl<O: ClassOutput> ClassBuilder<O> {
    pub fn new(spec: ClassSpec, output: O) -> Self {
        Self {
            name: spec.name,
            superclass: spec.superclass,
            interfaces: spec.interfaces,
            flags: spec.flags,
            capture_origins: spec.capture_origins,
            fields: Vec::new(),
            methods: Vec::new(),
            output,
            closure_count: 0,
            accessor_count: 0,
            super_accessors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares a method and returns its id for [`scope`](Self::scope).
    pub fn method(
        &mut self,
        name: &str,
        params: &[&str],
        ret: &str,
        mflags: u16,
    ) -> Result<MethodId, BuildError> {
        let desc = MethodDesc::new(&self.name, name, ret, params)?;
        let is_static = mflags & flags::STATIC != 0;
        let body = Body::new(
            desc.clone(),
            is_static,
            self.name.clone(),
            self.capture_origins,
        );
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(MethodData {
            desc,
            flags: mflags,
            body,
        });
        Ok(id)
    }

    /// The root scope of a declared method's body.
    pub fn scope(&mut self, id: MethodId) -> Scope<'_> {
        Scope {
            body: &mut self.methods[id.index()].body,
            id: ScopeId::ROOT,
        }
    }

    /// Declares a field and returns its descriptor.
    pub fn field(
        &mut self,
        name: &str,
        ty: &str,
        fflags: u16,
    ) -> Result<FieldDesc, BuildError> {
        let desc = FieldDesc::new(&self.name, name, ty)?;
        self.fields.push((desc.clone(), fflags));
        Ok(desc)
    }

    fn ensure_constructor(&mut self) -> Result<(), BuildError> {
        if self.methods.iter().any(|m| m.desc.name() == "<init>") {
            return Ok(());
        }
        let superclass = self.superclass.clone();
        let id = self.method("<init>", &[], "V", flags::PUBLIC)?;
        let mut scope = self.scope(id);
        let this = scope.this_value()?;
        let super_ctor = MethodDesc::constructor(&superclass, &[])?;
        scope.invoke_special(&super_ctor, this, &[])?;
        scope.return_value(None)?;
        Ok(())
    }

    /// Assembles and writes the class, plus one synthesized class per
    /// closure. Generation is deterministic: closing the same declarations
    /// twice yields byte-identical output.
    pub fn close(mut self) -> Result<(), BuildError> {
        closure::synthesize(&mut self)?;
        self.ensure_constructor()?;
        for m in &mut self.methods {
            if m.flags & flags::ABSTRACT == 0 {
                alloc::allocate(&mut m.body);
            }
        }

        let mut pool = ConstPool::new();
        let mut artifacts = Vec::new();
        for m in &self.methods {
            let code = if m.flags & flags::ABSTRACT != 0 {
                None
            } else {
                Some(assemble::assemble_code(
                    &m.body,
                    ScopeId::ROOT,
                    m.desc.ret(),
                    None,
                    m.body.max_slots,
                    &mut pool,
                )?)
            };
            artifacts.push(MethodArtifact {
                name: m.desc.name().to_string(),
                sig: m.desc.descriptor(),
                flags: m.flags,
                code,
            });
        }
        let bytes = assemble::serialize_class(
            self.flags,
            &self.name,
            &self.superclass,
            &self.interfaces,
            &pool,
            &self.fields,
            &artifacts,
        );
        debug!(
            "class {}: {} methods, {} bytes",
            self.name,
            artifacts.len(),
            bytes.len()
        );
        self.output.write(&self.name, &bytes)?;

        for m in &self.methods {
            for c in &m.body.closures {
                let bytes = assemble_closure_class(&m.body, c)?;
                debug!("closure class {}: {} bytes", c.class_name, bytes.len());
                self.output.write(&c.class_name, &bytes)?;
            }
        }
        Ok(())
    }
}

fn assemble_closure_class(body: &Body, c: &ClosureData) -> Result<Vec<u8>, BuildError> {
    let mut pool = ConstPool::new();

    let (ctor_code, ctor_sig) = closure_ctor(c, &mut pool)?;
    let sam_code = assemble::assemble_code(
        body,
        c.scope,
        c.sam.ret(),
        Some(&c.captures),
        c.max_slots,
        &mut pool,
    )?;
    let artifacts = vec![
        MethodArtifact {
            name: "<init>".to_string(),
            sig: ctor_sig,
            flags: flags::PUBLIC,
            code: Some(ctor_code),
        },
        MethodArtifact {
            name: c.sam.name().to_string(),
            sig: c.sam.descriptor(),
            flags: flags::PUBLIC,
            code: Some(sam_code),
        },
    ];

    let fields = c
        .captures
        .iter()
        .map(|(_, f)| (f.clone(), flags::PRIVATE | flags::FINAL))
        .collect::<Vec<_>>();
    let interfaces = vec![c.interface.clone()];

    Ok(assemble::serialize_class(
        flags::PUBLIC | flags::FINAL | flags::SYNTHETIC,
        &c.class_name,
        OBJECT,
        &interfaces,
        &pool,
        &fields,
        &artifacts,
    ))
}

/// The synthesized constructor: chains to the root class, then copies each
/// argument into its capture field.
fn closure_ctor(
    c: &ClosureData,
    pool: &mut ConstPool,
) -> Result<(AssembledCode, String), BuildError> {
    let mut buf = CodeBuffer::new();
    let super_init = pool.intern(PoolEntry::MethodRef {
        class: OBJECT.to_string(),
        name: "<init>".to_string(),
        sig: "()V".to_string(),
    })?;
    buf.load_slot(0);
    buf.invoke(Op::InvokeSpecial, super_init, 1, 0);

    let mut sig = String::from("(");
    let mut slot = 1u16;
    for (_, field) in &c.captures {
        sig.push_str(field.ty());
        let idx = pool.intern(PoolEntry::FieldRef {
            class: field.class().to_string(),
            name: field.name().to_string(),
            ty: field.ty().to_string(),
        })?;
        buf.load_slot(0);
        buf.load_slot(slot);
        buf.put_field(idx);
        slot += descriptor::slot_width(field.ty());
    }
    sig.push_str(")V");
    buf.return_();

    Ok((
        AssembledCode {
            max_stack: buf.max_depth(),
            max_slots: slot,
            code: buf.into_bytes(),
            exceptions: Vec::new(),
        },
        sig,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_output_handles_share_storage() {
        let out = MemoryOutput::new();
        let mut handle = out.clone();
        handle.write("app/Foo", &[1, 2, 3]).unwrap();
        assert_eq!(out.get("app/Foo"), Some(vec![1, 2, 3]));
        assert_eq!(out.class_names(), vec!["app/Foo"]);
        assert_eq!(out.get("app/Bar"), None);
    }

    #[test]
    fn spec_defaults_to_a_public_root_subclass() {
        let spec = ClassSpec::new("app.Foo").unwrap();
        assert_eq!(spec.name, "app/Foo");
        assert_eq!(spec.superclass, OBJECT);
        assert_eq!(spec.flags, flags::PUBLIC);
        assert!(spec.interfaces.is_empty());
    }
}
