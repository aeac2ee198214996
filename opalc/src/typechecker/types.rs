//!
//! Internal Type Representation
//!
//! This module defines the type algebra used during semantic analysis. A
//! Type is an immutable value: a tagged variant with per-kind payload.
//! Container kinds (list, set, map, tuple, struct) carry a mutability
//! qualifier that participates in structural equality.
//!
//! Two special kinds support analysis itself:
//! - Undecided: the type cannot be determined until runtime
//! - Unknowable: error-continuation type emitted after a diagnostic so that
//!   checking can proceed with minimal cascading errors
//!
//! Nominal user-defined types never embed their wrapped body directly
//! (self-referential types would otherwise be unrepresentable); the body and
//! the declared type-param names live in a TypeRegistry keyed by nominal
//! name, and every traversal that needs the body consults the registry.
//!

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Errors raised by type constructors whose invariants can be violated by
/// user-written type annotations. The checker maps these onto diagnostics
/// carrying the annotation's span.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeConstructionError {
    #[error("oneof declares duplicated variant '{variant}'")]
    DuplicatedOneofVariant { variant: String },

    #[error("future-typed values cannot be hashed; '{ty}' is not usable as {position}")]
    FutureNotHashable { ty: String, position: &'static str },
}

/// Blocking annotation carried by procedure types.
///
/// `Maybe` is the `blocking?` form, only meaningful inside generic procedure
/// signatures. `GenericOverArgs` makes blocking-ness a function of the
/// procedure values passed at the listed argument indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Blocking {
    No,
    Yes,
    Maybe,
    GenericOverArgs(Vec<usize>),
}

/// A required contract obligation on a generic procedure: an implementation
/// of `contract` must exist for the concrete types the listed type args
/// resolve to at each specialization site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContractRequirement {
    pub contract: String,
    pub type_args: Vec<Type>,
}

/// The shared shape of function / provider / consumer types.
///
/// Equality and hashing are structural over the argument types, the return
/// type and the blocking annotation only. Generic-argument names and the
/// required-contract table are metadata the compiler tracks but that never
/// distinguishes two procedure types.
#[derive(Debug, Clone)]
pub struct ProcedureSignature {
    pub args: Vec<Type>,
    pub ret: Option<Box<Type>>,
    pub blocking: Blocking,
    pub generic_params: Vec<String>,
    pub required_contracts: Vec<ContractRequirement>,
}

impl PartialEq for ProcedureSignature {
    fn eq(&self, other: &Self) -> bool {
        self.args == other.args && self.ret == other.ret && self.blocking == other.blocking
    }
}

impl Eq for ProcedureSignature {}

impl std::hash::Hash for ProcedureSignature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.args.hash(state);
        self.ret.hash(state);
        self.blocking.hash(state);
    }
}

impl ProcedureSignature {
    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Float,
    String,
    Bool,
    Module,
    Nothing,

    Undecided,
    Unknowable,

    List { elem: Box<Type>, mutable: bool },
    Set { elem: Box<Type>, mutable: bool },
    Map { key: Box<Type>, value: Box<Type>, mutable: bool },
    Tuple { elems: Vec<Type>, mutable: bool },
    Struct { fields: Vec<(String, Type)>, mutable: bool },

    /// Discriminated union. Variants are kept sorted by canonical string so
    /// that equality is order-insensitive and formatting is deterministic.
    Oneof { variants: Vec<Type> },

    Future { value: Box<Type> },

    UserDefined { name: String, params: Vec<Type> },

    Function(ProcedureSignature),
    Provider(ProcedureSignature),
    Consumer(ProcedureSignature),

    /// Placeholder for a named generic type param during polymorphic
    /// checking. Never observable from Opal programs.
    GenericParam { name: String },

    /// Checker-internal meta-types for contracts and their implementations.
    Contract { name: String, type_params: Vec<String> },
    ContractImpl { name: String, params: Vec<Type> },
}

impl Type {
    pub fn list(elem: Type, mutable: bool) -> Type {
        Type::List { elem: Box::new(elem), mutable }
    }

    pub fn set(elem: Type, mutable: bool) -> Result<Type, TypeConstructionError> {
        if matches!(elem, Type::Future { .. }) {
            return Err(TypeConstructionError::FutureNotHashable {
                ty: elem.to_string(),
                position: "a set element",
            });
        }
        Ok(Type::Set { elem: Box::new(elem), mutable })
    }

    pub fn map(key: Type, value: Type, mutable: bool) -> Result<Type, TypeConstructionError> {
        if matches!(key, Type::Future { .. }) {
            return Err(TypeConstructionError::FutureNotHashable {
                ty: key.to_string(),
                position: "a map key",
            });
        }
        Ok(Type::Map {
            key: Box::new(key),
            value: Box::new(value),
            mutable,
        })
    }

    pub fn tuple(elems: Vec<Type>, mutable: bool) -> Type {
        Type::Tuple { elems, mutable }
    }

    pub fn structure(fields: Vec<(String, Type)>, mutable: bool) -> Type {
        Type::Struct { fields, mutable }
    }

    /// Variants are deduplicated structurally and stored in canonical-string
    /// order; a repeated variant is a construction error.
    pub fn oneof(variants: Vec<Type>) -> Result<Type, TypeConstructionError> {
        let mut sorted = variants;
        sorted.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        for pair in sorted.windows(2) {
            if pair[0] == pair[1] {
                return Err(TypeConstructionError::DuplicatedOneofVariant {
                    variant: pair[0].to_string(),
                });
            }
        }
        Ok(Type::Oneof { variants: sorted })
    }

    pub fn future(value: Type) -> Type {
        Type::Future { value: Box::new(value) }
    }

    pub fn user_defined(name: impl Into<String>) -> Type {
        Type::UserDefined { name: name.into(), params: Vec::new() }
    }

    pub fn user_defined_parameterized(name: impl Into<String>, params: Vec<Type>) -> Type {
        Type::UserDefined { name: name.into(), params }
    }

    pub fn function(args: Vec<Type>, ret: Type, blocking: Blocking) -> Type {
        Type::Function(ProcedureSignature {
            args,
            ret: Some(Box::new(ret)),
            blocking,
            generic_params: Vec::new(),
            required_contracts: Vec::new(),
        })
    }

    pub fn provider(ret: Type, blocking: Blocking) -> Type {
        Type::Provider(ProcedureSignature {
            args: Vec::new(),
            ret: Some(Box::new(ret)),
            blocking,
            generic_params: Vec::new(),
            required_contracts: Vec::new(),
        })
    }

    pub fn consumer(args: Vec<Type>, blocking: Blocking) -> Type {
        Type::Consumer(ProcedureSignature {
            args,
            ret: None,
            blocking,
            generic_params: Vec::new(),
            required_contracts: Vec::new(),
        })
    }

    pub fn generic(name: impl Into<String>) -> Type {
        Type::GenericParam { name: name.into() }
    }

    pub fn is_procedure(&self) -> bool {
        matches!(
            self,
            Type::Function(_) | Type::Provider(_) | Type::Consumer(_)
        )
    }

    pub fn signature(&self) -> Option<&ProcedureSignature> {
        match self {
            Type::Function(sig) | Type::Provider(sig) | Type::Consumer(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    /// The inherent mutability flag; false for every non-container kind.
    pub fn is_mutable(&self) -> bool {
        match self {
            Type::List { mutable, .. }
            | Type::Set { mutable, .. }
            | Type::Map { mutable, .. }
            | Type::Tuple { mutable, .. }
            | Type::Struct { mutable, .. } => *mutable,
            _ => false,
        }
    }

    /// Rebuilds the same type with the outermost mutability flag set.
    /// Defined only for container kinds.
    pub fn to_shallowly_mutable(&self) -> Option<Type> {
        match self {
            Type::List { elem, .. } => Some(Type::List { elem: elem.clone(), mutable: true }),
            Type::Set { elem, .. } => Some(Type::Set { elem: elem.clone(), mutable: true }),
            Type::Map { key, value, .. } => Some(Type::Map {
                key: key.clone(),
                value: value.clone(),
                mutable: true,
            }),
            Type::Tuple { elems, .. } => Some(Type::Tuple { elems: elems.clone(), mutable: true }),
            Type::Struct { fields, .. } => Some(Type::Struct {
                fields: fields.clone(),
                mutable: true,
            }),
            _ => None,
        }
    }

    /// A type is deeply immutable iff no `mutable` flag is set anywhere in
    /// its transitive structure and every user-defined wrapper's registered
    /// body is itself deeply immutable. Primitive kinds are trivially
    /// deeply immutable.
    pub fn is_deeply_immutable(&self, registry: &TypeRegistry) -> bool {
        match self {
            Type::List { elem, mutable } | Type::Set { elem, mutable } => {
                !mutable && elem.is_deeply_immutable(registry)
            }
            Type::Map { key, value, mutable } => {
                !mutable
                    && key.is_deeply_immutable(registry)
                    && value.is_deeply_immutable(registry)
            }
            Type::Tuple { elems, mutable } => {
                !mutable && elems.iter().all(|t| t.is_deeply_immutable(registry))
            }
            Type::Struct { fields, mutable } => {
                !mutable && fields.iter().all(|(_, t)| t.is_deeply_immutable(registry))
            }
            Type::Oneof { variants } => variants.iter().all(|t| t.is_deeply_immutable(registry)),
            Type::Future { value } => value.is_deeply_immutable(registry),
            Type::UserDefined { name, params } => {
                let wrapped = registry.wrapped_type(name).unwrap_or_else(|| {
                    panic!("Internal Compiler Error: unregistered user-defined type '{}'", name)
                });
                wrapped.is_deeply_immutable(registry)
                    && params.iter().all(|t| t.is_deeply_immutable(registry))
            }
            _ => true,
        }
    }

    /// Returns the deeply-immutable variant of this type, or None when no
    /// such variant exists. Conversion fails for a future whose payload is
    /// not already deeply immutable (there is no automatic transform for
    /// it) and for a user-defined type whose wrapped body is not deeply
    /// immutable.
    pub fn to_deeply_immutable(&self, registry: &TypeRegistry) -> Option<Type> {
        match self {
            Type::List { elem, .. } => Some(Type::List {
                elem: Box::new(Self::element_to_deeply_immutable(elem, registry)?),
                mutable: false,
            }),
            Type::Set { elem, .. } => Some(Type::Set {
                elem: Box::new(Self::element_to_deeply_immutable(elem, registry)?),
                mutable: false,
            }),
            Type::Map { key, value, .. } => Some(Type::Map {
                key: Box::new(Self::element_to_deeply_immutable(key, registry)?),
                value: Box::new(Self::element_to_deeply_immutable(value, registry)?),
                mutable: false,
            }),
            Type::Tuple { elems, .. } => Some(Type::Tuple {
                elems: elems
                    .iter()
                    .map(|t| Self::element_to_deeply_immutable(t, registry))
                    .collect::<Option<Vec<_>>>()?,
                mutable: false,
            }),
            Type::Struct { fields, .. } => Some(Type::Struct {
                fields: fields
                    .iter()
                    .map(|(n, t)| {
                        Self::element_to_deeply_immutable(t, registry).map(|t| (n.clone(), t))
                    })
                    .collect::<Option<Vec<_>>>()?,
                mutable: false,
            }),
            Type::UserDefined { name, params } => {
                let wrapped = registry.wrapped_type(name)?;
                if !wrapped.is_deeply_immutable(registry) {
                    return None;
                }
                Some(Type::UserDefined {
                    name: name.clone(),
                    params: params
                        .iter()
                        .map(|t| Self::element_to_deeply_immutable(t, registry))
                        .collect::<Option<Vec<_>>>()?,
                })
            }
            _ => None,
        }
    }

    fn element_to_deeply_immutable(elem: &Type, registry: &TypeRegistry) -> Option<Type> {
        match elem {
            Type::List { .. }
            | Type::Set { .. }
            | Type::Map { .. }
            | Type::Tuple { .. }
            | Type::Struct { .. }
            | Type::UserDefined { .. } => elem.to_deeply_immutable(registry),
            Type::Future { value } => {
                if value.is_deeply_immutable(registry) {
                    Some(elem.clone())
                } else {
                    None
                }
            }
            _ => Some(elem.clone()),
        }
    }

    /// The deeply-immutable variant to suggest alongside an immutability
    /// diagnostic. Unlike `to_deeply_immutable`, a future is rewritten here
    /// (wrapping its payload's recommendation) since the result is only ever
    /// shown to the user, never used as a real type.
    pub fn deeply_immutable_recommendation(&self, registry: &TypeRegistry) -> Option<Type> {
        match self {
            Type::List { .. }
            | Type::Set { .. }
            | Type::Map { .. }
            | Type::Tuple { .. }
            | Type::Struct { .. }
            | Type::UserDefined { .. } => self.to_deeply_immutable(registry),
            Type::Future { value } => value
                .deeply_immutable_recommendation(registry)
                .map(Type::future),
            _ => Some(self.clone()),
        }
    }

    /// Canonical rendering with generic params substituted through the given
    /// mapping; used to produce concrete error text at generic call sites.
    pub fn render(&self, subst: &HashMap<String, Type>) -> String {
        let mut out = String::new();
        self.fmt_with(&mut out, Some(subst));
        out
    }

    fn fmt_with(&self, out: &mut String, subst: Option<&HashMap<String, Type>>) {
        use std::fmt::Write;

        match self {
            Type::Int => out.push_str("int"),
            Type::Float => out.push_str("float"),
            Type::String => out.push_str("string"),
            Type::Bool => out.push_str("bool"),
            Type::Module => out.push_str("module"),
            Type::Nothing => out.push_str("nothing"),
            Type::Undecided => out.push_str("undecided"),
            Type::Unknowable => out.push_str("unknowable"),
            Type::List { elem, mutable } => {
                if *mutable {
                    out.push_str("mut ");
                }
                out.push_str("list<");
                elem.fmt_with(out, subst);
                out.push('>');
            }
            Type::Set { elem, mutable } => {
                if *mutable {
                    out.push_str("mut ");
                }
                out.push_str("set<");
                elem.fmt_with(out, subst);
                out.push('>');
            }
            Type::Map { key, value, mutable } => {
                if *mutable {
                    out.push_str("mut ");
                }
                out.push_str("map<");
                key.fmt_with(out, subst);
                out.push_str(", ");
                value.fmt_with(out, subst);
                out.push('>');
            }
            Type::Tuple { elems, mutable } => {
                if *mutable {
                    out.push_str("mut ");
                }
                out.push_str("tuple<");
                Self::fmt_list(out, elems, subst);
                out.push('>');
            }
            Type::Struct { fields, mutable } => {
                if *mutable {
                    out.push_str("mut ");
                }
                out.push_str("struct{");
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{}: ", name);
                    ty.fmt_with(out, subst);
                }
                out.push('}');
            }
            Type::Oneof { variants } => {
                out.push_str("oneof<");
                Self::fmt_list(out, variants, subst);
                out.push('>');
            }
            Type::Future { value } => {
                out.push_str("future<");
                value.fmt_with(out, subst);
                out.push('>');
            }
            Type::UserDefined { name, params } => {
                out.push_str(name);
                if !params.is_empty() {
                    out.push('<');
                    Self::fmt_list(out, params, subst);
                    out.push('>');
                }
            }
            Type::Function(sig) => {
                Self::fmt_blocking(out, &sig.blocking);
                out.push_str("function<");
                Self::fmt_args(out, &sig.args, subst);
                out.push_str(" -> ");
                sig.ret
                    .as_deref()
                    .expect("Internal Compiler Error: function type without return type")
                    .fmt_with(out, subst);
                out.push('>');
                Self::fmt_signature_metadata(out, sig, subst);
            }
            Type::Provider(sig) => {
                Self::fmt_blocking(out, &sig.blocking);
                out.push_str("provider<");
                sig.ret
                    .as_deref()
                    .expect("Internal Compiler Error: provider type without return type")
                    .fmt_with(out, subst);
                out.push('>');
                Self::fmt_signature_metadata(out, sig, subst);
            }
            Type::Consumer(sig) => {
                Self::fmt_blocking(out, &sig.blocking);
                out.push_str("consumer<");
                Self::fmt_args(out, &sig.args, subst);
                out.push('>');
                Self::fmt_signature_metadata(out, sig, subst);
            }
            Type::GenericParam { name } => {
                match subst.and_then(|m| m.get(name)) {
                    Some(mapped) => mapped.fmt_with(out, subst),
                    None => out.push_str(name),
                }
            }
            Type::Contract { name, type_params } => {
                let _ = write!(out, "contract {}<{}>", name, type_params.join(", "));
            }
            Type::ContractImpl { name, params } => {
                let _ = write!(out, "impl {}<", name);
                Self::fmt_list(out, params, subst);
                out.push('>');
            }
        }
    }

    fn fmt_list(out: &mut String, types: &[Type], subst: Option<&HashMap<String, Type>>) {
        for (i, ty) in types.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            ty.fmt_with(out, subst);
        }
    }

    // Multiple procedure args are wrapped in |...| so that the arg list is
    // visually distinct from the surrounding type parameter list.
    fn fmt_args(out: &mut String, args: &[Type], subst: Option<&HashMap<String, Type>>) {
        if args.len() > 1 {
            out.push('|');
            Self::fmt_list(out, args, subst);
            out.push('|');
        } else {
            Self::fmt_list(out, args, subst);
        }
    }

    fn fmt_blocking(out: &mut String, blocking: &Blocking) {
        use std::fmt::Write;

        match blocking {
            Blocking::No => {}
            Blocking::Yes => out.push_str("blocking "),
            Blocking::Maybe => out.push_str("blocking? "),
            Blocking::GenericOverArgs(indices) => {
                out.push_str("blocking:");
                for (i, idx) in indices.iter().enumerate() {
                    if i > 0 {
                        out.push('|');
                    }
                    let _ = write!(out, "{}", idx);
                }
                out.push(' ');
            }
        }
    }

    fn fmt_signature_metadata(
        out: &mut String,
        sig: &ProcedureSignature,
        subst: Option<&HashMap<String, Type>>,
    ) {
        use std::fmt::Write;

        if !sig.generic_params.is_empty() {
            let _ = write!(out, " generic over {{{}}}", sig.generic_params.join(", "));
        }
        if !sig.required_contracts.is_empty() {
            out.push_str(" requiring {");
            for (i, req) in sig.required_contracts.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}<", req.contract);
                Self::fmt_list(out, &req.type_args, subst);
                out.push('>');
            }
            out.push('}');
        }
    }

    /// The type as it appears in emitted Rust source. Parameterized
    /// user-defined types render through the registry with their declared
    /// type params mapped to the concrete parameterizations in scope.
    ///
    /// Checker-internal kinds have no target form; reaching one here is an
    /// internal error.
    pub fn target_form(&self, registry: &TypeRegistry, subst: Option<&HashMap<String, Type>>) -> String {
        match self {
            Type::Int => "i64".to_string(),
            Type::Float => "f64".to_string(),
            Type::String => "String".to_string(),
            Type::Bool => "bool".to_string(),
            Type::Nothing => "()".to_string(),
            Type::List { elem, .. } => format!("Vec<{}>", elem.target_form(registry, subst)),
            Type::Set { elem, .. } => format!(
                "std::collections::HashSet<{}>",
                elem.target_form(registry, subst)
            ),
            Type::Map { key, value, .. } => format!(
                "std::collections::HashMap<{}, {}>",
                key.target_form(registry, subst),
                value.target_form(registry, subst)
            ),
            Type::Tuple { elems, .. } => {
                let inner: Vec<String> = elems
                    .iter()
                    .map(|t| t.target_form(registry, subst))
                    .collect();
                format!("({})", inner.join(", "))
            }
            Type::Struct { fields, .. } => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|(_, t)| t.target_form(registry, subst))
                    .collect();
                format!("opal_rt::Struct<({})>", inner.join(", "))
            }
            // Oneof values are runtime-discriminated; the emitted type is
            // the erased runtime wrapper.
            Type::Oneof { .. } => "opal_rt::Oneof".to_string(),
            Type::Future { value } => {
                format!("opal_rt::Future<{}>", value.target_form(registry, subst))
            }
            Type::UserDefined { name, params } => {
                let wrapped = registry.wrapped_type(name).unwrap_or_else(|| {
                    panic!("Internal Compiler Error: unregistered user-defined type '{}'", name)
                });
                if params.is_empty() {
                    return format!("opal_rt::UserDefined<{}>", wrapped.target_form(registry, subst));
                }
                let param_names = registry.param_names(name).unwrap_or_else(|| {
                    panic!(
                        "Internal Compiler Error: no type params registered for '{}'",
                        name
                    )
                });
                let mapping: HashMap<String, Type> = param_names
                    .iter()
                    .cloned()
                    .zip(params.iter().map(|p| match p {
                        // Re-entrant parameterization: resolve through the
                        // outer mapping before building the inner one.
                        Type::GenericParam { name } => subst
                            .and_then(|m| m.get(name))
                            .cloned()
                            .unwrap_or_else(|| p.clone()),
                        _ => p.clone(),
                    }))
                    .collect();
                format!(
                    "opal_rt::UserDefined<{}>",
                    wrapped.target_form(registry, Some(&mapping))
                )
            }
            Type::Function(sig) => format!(
                "opal_rt::Function<{}>",
                sig.ret
                    .as_deref()
                    .expect("Internal Compiler Error: function type without return type")
                    .target_form(registry, subst)
            ),
            Type::Provider(sig) => format!(
                "opal_rt::Provider<{}>",
                sig.ret
                    .as_deref()
                    .expect("Internal Compiler Error: provider type without return type")
                    .target_form(registry, subst)
            ),
            Type::Consumer(_) => "opal_rt::Consumer".to_string(),
            Type::GenericParam { name } => subst
                .and_then(|m| m.get(name))
                .map(|t| t.target_form(registry, subst))
                .unwrap_or_else(|| {
                    panic!(
                        "Internal Compiler Error: no concrete mapping for generic param '{}'",
                        name
                    )
                }),
            Type::Module | Type::Undecided | Type::Unknowable => panic!(
                "Internal Compiler Error: type '{}' has no target form",
                self
            ),
            Type::Contract { .. } | Type::ContractImpl { .. } => panic!(
                "Internal Compiler Error: meta-type '{}' should be unreachable in Opal programs",
                self
            ),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.fmt_with(&mut out, None);
        f.write_str(&out)
    }
}

/// Registries for nominal user-defined types: the wrapped body type and the
/// declared type-param names, both keyed by the unique (possibly
/// module-qualified) nominal name. These are the only mutable state of the
/// type algebra and must be cleared between compilation runs.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    wrapped_types: HashMap<String, Type>,
    type_param_names: HashMap<String, Vec<String>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, wrapped: Type, param_names: Vec<String>) {
        let name = name.into();
        self.wrapped_types.insert(name.clone(), wrapped);
        self.type_param_names.insert(name, param_names);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.wrapped_types.contains_key(name)
    }

    pub fn wrapped_type(&self, name: &str) -> Option<&Type> {
        self.wrapped_types.get(name)
    }

    pub fn param_names(&self, name: &str) -> Option<&[String]> {
        self.type_param_names.get(name).map(|v| v.as_slice())
    }

    pub fn clear(&mut self) {
        self.wrapped_types.clear();
        self.type_param_names.clear();
    }
}
