//!
//! Check Context — Process-Wide Mutable State
//!
//! Everything the semantic analysis mutates outside the scope stack lives
//! here, threaded explicitly through the checker instead of sitting in
//! module-scope statics:
//!
//! - the two user-defined-type registries (wrapped body, type-param names)
//! - the dependency-module table and exported initializers/unwrappers
//! - registered contract implementations
//! - the per-procedure side-table of check-time attributes (effective
//!   blocking, transitively required contracts, recorded call edges)
//!
//! Types stay pure values with structural equality; anything mutable the
//! checker learns about a procedure is keyed here by the procedure's stable
//! name. `reset` restores a pristine context so repeated compilation runs
//! within one process are deterministic.
//!

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::source::Span;
use super::modules::ModuleDescriptor;
use super::types::{Blocking, ContractRequirement, Type, TypeRegistry};

#[derive(Debug, Clone)]
pub struct DepModule {
    pub descriptor: ModuleDescriptor,
    pub used: bool,
}

/// Check-time attributes of one procedure. These are deliberately *not*
/// part of the procedure's type: two procedures with identical signatures
/// stay equal no matter what the checker has learned about their bodies.
#[derive(Debug, Clone)]
pub struct ProcedureAttrs {
    pub declared_blocking: Blocking,
    pub effective_blocking: bool,
    /// Names of the blocking procedures this one (transitively) depends on,
    /// recorded for the mismatch diagnostic.
    pub blocking_deps: Vec<String>,
    /// Contract obligations accumulated beyond the declared ones when this
    /// procedure specializes other generic procedures.
    pub required_contracts: Vec<ContractRequirement>,
    /// Callees recorded while checking the body; drives the transitive
    /// blocking fixpoint.
    pub calls: Vec<String>,
    pub def_span: Span,
}

impl ProcedureAttrs {
    pub fn new(declared_blocking: Blocking, def_span: Span) -> Self {
        let effective_blocking = declared_blocking == Blocking::Yes;
        Self {
            declared_blocking,
            effective_blocking,
            blocking_deps: Vec::new(),
            required_contracts: Vec::new(),
            calls: Vec::new(),
            def_span,
        }
    }
}

/// A declared-non-blocking procedure that turned out to be effectively
/// blocking, with the dependency that makes it so.
#[derive(Debug, Clone)]
pub struct BlockingViolation {
    pub name: String,
    pub via: String,
    pub def_span: Span,
}

#[derive(Debug, Default)]
pub struct CheckContext {
    pub registry: TypeRegistry,
    pub dep_modules: IndexMap<String, DepModule>,
    /// Exported initializer procedures, keyed by the user-defined type they
    /// act on.
    pub initializers: HashMap<String, Vec<String>>,
    /// Exported unwrapper procedures, keyed the same way.
    pub unwrappers: HashMap<String, Vec<String>>,
    contract_impls: HashSet<(String, Vec<Type>)>,
    proc_attrs: HashMap<String, ProcedureAttrs>,
}

impl CheckContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all state accumulated by a compilation run.
    pub fn reset(&mut self) {
        self.registry.clear();
        self.dep_modules.clear();
        self.initializers.clear();
        self.unwrappers.clear();
        self.contract_impls.clear();
        self.proc_attrs.clear();
    }

    pub fn register_contract_impl(&mut self, contract: impl Into<String>, type_args: Vec<Type>) {
        self.contract_impls.insert((contract.into(), type_args));
    }

    pub fn has_contract_impl(&self, contract: &str, type_args: &[Type]) -> bool {
        self.contract_impls
            .contains(&(contract.to_string(), type_args.to_vec()))
    }

    pub fn declare_procedure(&mut self, name: impl Into<String>, attrs: ProcedureAttrs) {
        self.proc_attrs.insert(name.into(), attrs);
    }

    pub fn procedure_attrs(&self, name: &str) -> Option<&ProcedureAttrs> {
        self.proc_attrs.get(name)
    }

    pub fn procedure_attrs_mut(&mut self, name: &str) -> Option<&mut ProcedureAttrs> {
        self.proc_attrs.get_mut(name)
    }

    pub fn record_call(&mut self, caller: &str, callee: &str) {
        if let Some(attrs) = self.proc_attrs.get_mut(caller) {
            attrs.calls.push(callee.to_string());
        }
    }

    pub fn mark_effectively_blocking(&mut self, name: &str, via: &str) {
        if let Some(attrs) = self.proc_attrs.get_mut(name) {
            if !attrs.effective_blocking || !attrs.blocking_deps.iter().any(|d| d == via) {
                attrs.effective_blocking = true;
                attrs.blocking_deps.push(via.to_string());
            }
        }
    }

    pub fn mark_module_used(&mut self, alias: &str) {
        if let Some(dep) = self.dep_modules.get_mut(alias) {
            dep.used = true;
        }
    }

    /// Runs the transitive blocking fixpoint over the recorded call graph,
    /// then reports every procedure whose declared annotation contradicts
    /// its effective flag. Lambdas and `blocking?` procedures carry no
    /// definite annotation and are exempt.
    pub fn propagate_blocking(&mut self) -> Vec<BlockingViolation> {
        loop {
            let mut newly_blocking: Vec<(String, String)> = Vec::new();
            for (name, attrs) in &self.proc_attrs {
                if attrs.effective_blocking {
                    continue;
                }
                for callee in &attrs.calls {
                    let callee_blocking = self
                        .proc_attrs
                        .get(callee)
                        .map(|a| a.effective_blocking)
                        .unwrap_or(false);
                    if callee_blocking {
                        newly_blocking.push((name.clone(), callee.clone()));
                        break;
                    }
                }
            }
            if newly_blocking.is_empty() {
                break;
            }
            for (name, via) in newly_blocking {
                self.mark_effectively_blocking(&name, &via);
            }
        }

        let mut violations: Vec<BlockingViolation> = self
            .proc_attrs
            .iter()
            .filter(|(_, attrs)| {
                attrs.effective_blocking && attrs.declared_blocking == Blocking::No
            })
            .map(|(name, attrs)| BlockingViolation {
                name: name.clone(),
                via: attrs
                    .blocking_deps
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "a blocking operation".to_string()),
                def_span: attrs.def_span,
            })
            .collect();
        violations.sort_by(|a, b| a.name.cmp(&b.name));
        violations
    }
}
