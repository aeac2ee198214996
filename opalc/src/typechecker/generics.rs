//!
//! Generic Type Inference
//!
//! This module handles generic procedure specialization:
//!
//! - Binding generic type params to concrete types by structurally unifying
//!   each call argument against the declared (parameterized) argument type
//! - Substituting a generic→concrete mapping through a type
//! - Substituting contract requirements for obligation tracking
//!
//! Binding walks both types in lockstep. A generic param binds to whatever
//! stands opposite it; a param bound twice to different types is a
//! conflict. Mutability qualifiers must match exactly, like everywhere else
//! in the type system.
//!

use std::collections::HashMap;

use super::types::{ContractRequirement, ProcedureSignature, Type};

/// Why a generic binding attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingFailure {
    /// The same param unified against two different concrete types.
    Conflict {
        param: String,
        first: Type,
        second: Type,
    },
    /// The argument's shape did not match the declared parameter type.
    Mismatch { expected: Type, found: Type },
}

/// Unifies `arg` against the (possibly parameterized) `param`, accumulating
/// generic bindings. Unknowable arguments unify with anything so that one
/// upstream error does not fan out.
pub fn bind_generic_args(
    param: &Type,
    arg: &Type,
    bindings: &mut HashMap<String, Type>,
) -> Result<(), BindingFailure> {
    if matches!(arg, Type::Unknowable) {
        return Ok(());
    }

    match (param, arg) {
        (Type::GenericParam { name }, _) => match bindings.get(name) {
            Some(bound) if bound != arg => Err(BindingFailure::Conflict {
                param: name.clone(),
                first: bound.clone(),
                second: arg.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                bindings.insert(name.clone(), arg.clone());
                Ok(())
            }
        },

        (
            Type::List { elem: pe, mutable: pm },
            Type::List { elem: ae, mutable: am },
        )
        | (
            Type::Set { elem: pe, mutable: pm },
            Type::Set { elem: ae, mutable: am },
        ) if pm == am => bind_generic_args(pe, ae, bindings),

        (
            Type::Map { key: pk, value: pv, mutable: pm },
            Type::Map { key: ak, value: av, mutable: am },
        ) if pm == am => {
            bind_generic_args(pk, ak, bindings)?;
            bind_generic_args(pv, av, bindings)
        }

        (
            Type::Tuple { elems: pe, mutable: pm },
            Type::Tuple { elems: ae, mutable: am },
        ) if pm == am && pe.len() == ae.len() => {
            for (p, a) in pe.iter().zip(ae.iter()) {
                bind_generic_args(p, a, bindings)?;
            }
            Ok(())
        }

        (
            Type::Struct { fields: pf, mutable: pm },
            Type::Struct { fields: af, mutable: am },
        ) if pm == am
            && pf.len() == af.len()
            && pf.iter().zip(af.iter()).all(|((pn, _), (an, _))| pn == an) =>
        {
            for ((_, p), (_, a)) in pf.iter().zip(af.iter()) {
                bind_generic_args(p, a, bindings)?;
            }
            Ok(())
        }

        (Type::Future { value: pv }, Type::Future { value: av }) => {
            bind_generic_args(pv, av, bindings)
        }

        (
            Type::UserDefined { name: pn, params: pp },
            Type::UserDefined { name: an, params: ap },
        ) if pn == an && pp.len() == ap.len() => {
            for (p, a) in pp.iter().zip(ap.iter()) {
                bind_generic_args(p, a, bindings)?;
            }
            Ok(())
        }

        (Type::Function(ps), Type::Function(asig))
        | (Type::Provider(ps), Type::Provider(asig))
        | (Type::Consumer(ps), Type::Consumer(asig))
            if ps.args.len() == asig.args.len() =>
        {
            for (p, a) in ps.args.iter().zip(asig.args.iter()) {
                bind_generic_args(p, a, bindings)?;
            }
            match (&ps.ret, &asig.ret) {
                (Some(pr), Some(ar)) => bind_generic_args(pr, ar, bindings),
                (None, None) => Ok(()),
                _ => Err(BindingFailure::Mismatch {
                    expected: param.clone(),
                    found: arg.clone(),
                }),
            }
        }

        _ if param == arg => Ok(()),

        _ => Err(BindingFailure::Mismatch {
            expected: param.clone(),
            found: arg.clone(),
        }),
    }
}

/// Replaces every generic param in `ty` with its concrete binding; params
/// without a binding survive unchanged (relevant when a generic procedure
/// calls another generic procedure).
pub fn substitute(ty: &Type, bindings: &HashMap<String, Type>) -> Type {
    match ty {
        Type::GenericParam { name } => bindings.get(name).cloned().unwrap_or_else(|| ty.clone()),
        Type::List { elem, mutable } => Type::List {
            elem: Box::new(substitute(elem, bindings)),
            mutable: *mutable,
        },
        Type::Set { elem, mutable } => Type::Set {
            elem: Box::new(substitute(elem, bindings)),
            mutable: *mutable,
        },
        Type::Map { key, value, mutable } => Type::Map {
            key: Box::new(substitute(key, bindings)),
            value: Box::new(substitute(value, bindings)),
            mutable: *mutable,
        },
        Type::Tuple { elems, mutable } => Type::Tuple {
            elems: elems.iter().map(|t| substitute(t, bindings)).collect(),
            mutable: *mutable,
        },
        Type::Struct { fields, mutable } => Type::Struct {
            fields: fields
                .iter()
                .map(|(n, t)| (n.clone(), substitute(t, bindings)))
                .collect(),
            mutable: *mutable,
        },
        Type::Oneof { variants } => Type::Oneof {
            variants: variants.iter().map(|t| substitute(t, bindings)).collect(),
        },
        Type::Future { value } => Type::Future {
            value: Box::new(substitute(value, bindings)),
        },
        Type::UserDefined { name, params } => Type::UserDefined {
            name: name.clone(),
            params: params.iter().map(|t| substitute(t, bindings)).collect(),
        },
        Type::Function(sig) => Type::Function(substitute_signature(sig, bindings)),
        Type::Provider(sig) => Type::Provider(substitute_signature(sig, bindings)),
        Type::Consumer(sig) => Type::Consumer(substitute_signature(sig, bindings)),
        _ => ty.clone(),
    }
}

fn substitute_signature(
    sig: &ProcedureSignature,
    bindings: &HashMap<String, Type>,
) -> ProcedureSignature {
    ProcedureSignature {
        args: sig.args.iter().map(|t| substitute(t, bindings)).collect(),
        ret: sig
            .ret
            .as_ref()
            .map(|t| Box::new(substitute(t, bindings))),
        blocking: sig.blocking.clone(),
        generic_params: sig
            .generic_params
            .iter()
            .filter(|p| !bindings.contains_key(*p))
            .cloned()
            .collect(),
        required_contracts: substitute_requirements(&sig.required_contracts, bindings),
    }
}

pub fn substitute_requirements(
    requirements: &[ContractRequirement],
    bindings: &HashMap<String, Type>,
) -> Vec<ContractRequirement> {
    requirements
        .iter()
        .map(|req| ContractRequirement {
            contract: req.contract.clone(),
            type_args: req
                .type_args
                .iter()
                .map(|t| substitute(t, bindings))
                .collect(),
        })
        .collect()
}

/// True if the type still mentions any generic param.
pub fn contains_generic(ty: &Type) -> bool {
    match ty {
        Type::GenericParam { .. } => true,
        Type::List { elem, .. } | Type::Set { elem, .. } => contains_generic(elem),
        Type::Map { key, value, .. } => contains_generic(key) || contains_generic(value),
        Type::Tuple { elems, .. } => elems.iter().any(contains_generic),
        Type::Struct { fields, .. } => fields.iter().any(|(_, t)| contains_generic(t)),
        Type::Oneof { variants } => variants.iter().any(contains_generic),
        Type::Future { value } => contains_generic(value),
        Type::UserDefined { params, .. } => params.iter().any(contains_generic),
        Type::Function(sig) | Type::Provider(sig) | Type::Consumer(sig) => {
            sig.args.iter().any(contains_generic)
                || sig.ret.as_deref().map(contains_generic).unwrap_or(false)
        }
        _ => false,
    }
}
