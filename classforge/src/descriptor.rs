//! Descriptors name classes, methods, and fields by name and type
//! signature.
//!
//! Signatures use single-letter primitive codes (`Z B C S I J F D`, plus
//! `V` for a void return), `L<name>;` for object types, and a `[` prefix
//! per array dimension. Class names are stored slash-separated; dotted
//! names and `L...;` signatures are accepted and normalized.

use crate::error::BuildError;

/// Root of the class hierarchy in the target runtime.
pub const OBJECT: &str = "sys/Object";
/// Signature of the root object type.
pub const OBJECT_SIG: &str = "Lsys/Object;";

/// Normalizes a class name: accepts `app.Foo`, `app/Foo`, or `Lapp/Foo;`.
pub(crate) fn normalize_class(name: &str) -> Result<String, BuildError> {
    let name = if let Some(body) = name.strip_prefix('L') {
        body.strip_suffix(';').unwrap_or(body)
    } else {
        name
    };
    if name.is_empty() {
        return Err(BuildError::MalformedDescriptor {
            detail: "empty class name".to_string(),
        });
    }
    Ok(name.replace('.', "/"))
}

/// Converts a type given as either a signature or a class name into
/// signature form. `"I"` is the primitive int; anything that is not a
/// well-formed signature is treated as an object type name.
pub(crate) fn to_sig(ty: &str) -> Result<String, BuildError> {
    if validate_sig(ty, false).is_ok() {
        return Ok(ty.to_string());
    }
    Ok(format!("L{};", normalize_class(ty)?))
}

fn is_primitive(c: u8) -> bool {
    matches!(c, b'Z' | b'B' | b'C' | b'S' | b'I' | b'J' | b'F' | b'D')
}

/// Checks that `sig` is exactly one well-formed type signature.
pub(crate) fn validate_sig(sig: &str, allow_void: bool) -> Result<(), BuildError> {
    let bytes = sig.as_bytes();
    let malformed = || BuildError::MalformedDescriptor {
        detail: format!("invalid type signature {sig:?}"),
    };
    match bytes {
        [] => Err(malformed()),
        [c] if is_primitive(*c) => Ok(()),
        [b'V'] if allow_void => Ok(()),
        [b'[', rest @ ..] => {
            let elem = std::str::from_utf8(rest).map_err(|_| malformed())?;
            validate_sig(elem, false).map_err(|_| malformed())
        }
        [b'L', .., b';'] if bytes.len() > 2 => Ok(()),
        _ => Err(malformed()),
    }
}

/// Whether a signature names a 64-bit value occupying two local slots.
pub(crate) fn is_wide(sig: &str) -> bool {
    sig == "J" || sig == "D"
}

pub(crate) fn slot_width(sig: &str) -> u16 {
    if is_wide(sig) { 2 } else { 1 }
}

/// The class-name payload of a type reference: `Lapp/Foo;` becomes
/// `app/Foo`; array signatures are kept whole.
pub(crate) fn type_ref_name(sig: &str) -> &str {
    sig.strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
        .unwrap_or(sig)
}

/// Splits a method signature string like `(IJLapp/Foo;)V` into parameter
/// signatures and the return signature.
pub(crate) fn parse_method_sig(sig: &str) -> Result<(Vec<String>, String), BuildError> {
    let malformed = || BuildError::MalformedDescriptor {
        detail: format!("invalid method signature {sig:?}"),
    };
    let rest = sig.strip_prefix('(').ok_or_else(malformed)?;
    let close = rest.find(')').ok_or_else(malformed)?;
    let (param_str, ret) = (&rest[..close], &rest[close + 1..]);
    validate_sig(ret, true)?;

    let mut params = Vec::new();
    let bytes = param_str.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i] == b'[' {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(malformed());
        }
        if is_primitive(bytes[i]) {
            i += 1;
        } else if bytes[i] == b'L' {
            let end = param_str[i..].find(';').ok_or_else(malformed)?;
            i += end + 1;
        } else {
            return Err(malformed());
        }
        params.push(param_str[start..i].to_string());
    }
    Ok((params, ret.to_string()))
}

/// An immutable reference to a class by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassDesc {
    name: String,
}

impl ClassDesc {
    pub fn of(name: &str) -> Result<Self, BuildError> {
        Ok(Self {
            name: normalize_class(name)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The object signature `L<name>;`.
    pub fn signature(&self) -> String {
        format!("L{};", self.name)
    }
}

/// An immutable reference to a method by declaring class, name, and
/// signature.
///
/// Equality and hashing cover name and signature only; the declaring class
/// is deliberately excluded so that a superclass method and its override
/// compare equal.
#[derive(Debug, Clone)]
pub struct MethodDesc {
    class: String,
    name: String,
    params: Vec<String>,
    ret: String,
}

impl MethodDesc {
    pub fn new(
        class: &str,
        name: &str,
        ret: &str,
        params: &[&str],
    ) -> Result<Self, BuildError> {
        if name.is_empty() {
            return Err(BuildError::MalformedDescriptor {
                detail: "empty method name".to_string(),
            });
        }
        let params = params
            .iter()
            .map(|p| to_sig(p))
            .collect::<Result<Vec<_>, _>>()?;
        let ret = if ret == "V" {
            ret.to_string()
        } else {
            to_sig(ret)?
        };
        Ok(Self {
            class: normalize_class(class)?,
            name: name.to_string(),
            params,
            ret,
        })
    }

    /// Convenience for a constructor descriptor (`<init>`, void return).
    pub fn constructor(class: &str, params: &[&str]) -> Result<Self, BuildError> {
        Self::new(class, "<init>", "V", params)
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn ret(&self) -> &str {
        &self.ret
    }

    /// The method signature string, e.g. `(IJ)Lapp/Foo;`.
    pub fn descriptor(&self) -> String {
        let mut out = String::from("(");
        for p in &self.params {
            out.push_str(p);
        }
        out.push(')');
        out.push_str(&self.ret);
        out
    }

    pub(crate) fn with_class(&self, class: &str) -> Self {
        Self {
            class: class.to_string(),
            ..self.clone()
        }
    }
}

impl PartialEq for MethodDesc {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.params == other.params && self.ret == other.ret
    }
}

impl Eq for MethodDesc {}

impl std::hash::Hash for MethodDesc {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.params.hash(state);
        self.ret.hash(state);
    }
}

/// An immutable reference to a field by declaring class, name, and type.
///
/// Like [`MethodDesc`], equality excludes the declaring class.
#[derive(Debug, Clone)]
pub struct FieldDesc {
    class: String,
    name: String,
    ty: String,
}

impl FieldDesc {
    pub fn new(class: &str, name: &str, ty: &str) -> Result<Self, BuildError> {
        if name.is_empty() {
            return Err(BuildError::MalformedDescriptor {
                detail: "empty field name".to_string(),
            });
        }
        Ok(Self {
            class: normalize_class(class)?,
            name: name.to_string(),
            ty: to_sig(ty)?,
        })
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &str {
        &self.ty
    }
}

impl PartialEq for FieldDesc {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.ty == other.ty
    }
}

impl Eq for FieldDesc {}

/// A type descriptor supplied by the caller's reflective index: a class
/// name plus its declared methods and their modifier flags.
///
/// Closure targets are validated against this ([`Scope::create_closure`]):
/// the target must declare exactly one abstract, non-default, non-static
/// method.
///
/// [`Scope::create_closure`]: crate::Scope::create_closure
#[derive(Debug, Clone)]
pub struct TypeInfo {
    name: String,
    methods: Vec<(MethodDesc, u16)>,
}

impl TypeInfo {
    pub fn interface(name: &str) -> Result<Self, BuildError> {
        Ok(Self {
            name: normalize_class(name)?,
            methods: Vec::new(),
        })
    }

    pub fn method(mut self, desc: MethodDesc, flags: u16) -> Self {
        self.methods.push((desc, flags));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The single abstract, non-default, non-static method, if the type is
    /// functional.
    pub(crate) fn functional_method(&self) -> Result<&MethodDesc, BuildError> {
        use crate::flags;
        let mut found = None;
        for (desc, mflags) in &self.methods {
            if mflags & (flags::STATIC | flags::DEFAULT_METHOD) != 0 {
                continue;
            }
            if mflags & flags::ABSTRACT == 0 {
                continue;
            }
            if found.is_some() {
                return Err(BuildError::NotAFunctionalType {
                    name: self.name.clone(),
                    detail: "more than one abstract method",
                });
            }
            found = Some(desc);
        }
        found.ok_or_else(|| BuildError::NotAFunctionalType {
            name: self.name.clone(),
            detail: "no abstract method",
        })
    }
}
