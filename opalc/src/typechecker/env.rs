///
/// Scoped Symbol Table
///
/// This module manages the binding environment during semantic analysis and
/// interpretation. It tracks:
///
/// - Name bindings (type, optional runtime value, flags) in nested scopes
/// - Which names are initialized along the current control-flow path
/// - Branch inspection for definite-assignment merging across sibling
///   branches
/// - Capability-gated visibility across procedure and lambda boundaries
///
/// Scopes are a stack, pushed when entering blocks / procedure bodies /
/// lambda bodies and popped when leaving them. A binding lives at the scope
/// level where it was first introduced; initialization tracking is
/// per-scope so that branches can be merged.
///
/// Visibility rules, applied while walking from the innermost scope
/// outward:
/// - Crossing a PROCEDURE boundary: only procedure-kinded bindings,
///   module-kinded bindings, and type definitions remain visible outside.
/// - Crossing a LAMBDA boundary: everything remains visible, but resolving
///   a non-procedure binding outside the lambda snapshots it into the first
///   lambda scope crossed (capture), marks the original used, and resolves
///   to the copy from then on.
///

use std::collections::{HashMap, HashSet};

use lasso::Spur;

use crate::runtime::Value;
use super::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Block,
    Procedure,
    Lambda,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub ty: Type,
    /// Only meaningful in interpreted mode where values are tracked.
    pub value: Option<Value>,
    pub declared: bool,
    pub used: bool,
    pub is_type_definition: bool,
}

impl Binding {
    fn new(ty: Type, value: Option<Value>) -> Self {
        Self {
            ty,
            value,
            declared: true,
            used: false,
            is_type_definition: false,
        }
    }
}

#[derive(Debug)]
pub struct Scope {
    bindings: HashMap<Spur, Binding>,
    /// Names initialized at this scope level along the current code branch.
    /// Kept separate from `bindings` so a declaration without an
    /// initializer can be referenced only once some branch actually
    /// assigns it.
    initialized: HashSet<Spur>,
    kind: ScopeKind,
    branch_inspection: bool,
    /// While inspecting: intersection of the initialization sets of the
    /// branches merged so far. None until the first branch exits.
    branch_initialized: Option<HashSet<Spur>>,
    /// Names snapshot-copied into this scope by lambda capture.
    captured: HashSet<Spur>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Self {
            bindings: HashMap::new(),
            initialized: HashSet::new(),
            kind,
            branch_inspection: false,
            branch_initialized: None,
            captured: HashSet::new(),
        }
    }
}

/// An unused binding reported on scope exit. The checker decides whether it
/// warrants a warning (struct-kinded type definitions) or an error.
#[derive(Debug, Clone)]
pub struct UnusedSymbol {
    pub name: Spur,
    pub ty: Type,
}

#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(ScopeKind::Block)],
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn enter_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope::new(kind));
    }

    /// Pops the current scope. In check-unused mode, returns every binding
    /// that was never marked used. If the parent scope has branch
    /// inspection enabled, the exited scope's initialization set (minus
    /// names declared inside it) is intersected into the parent's running
    /// per-branch set.
    pub fn exit_scope(&mut self, check_unused: bool) -> Vec<UnusedSymbol> {
        let exited = self
            .scopes
            .pop()
            .expect("Internal Compiler Error: exit_scope on an empty scope stack");

        let mut unused = Vec::new();
        if check_unused {
            for (name, binding) in &exited.bindings {
                if !binding.used {
                    unused.push(UnusedSymbol {
                        name: *name,
                        ty: binding.ty.clone(),
                    });
                }
            }
        }

        if let Some(parent) = self.scopes.last_mut() {
            if parent.branch_inspection {
                let branch_initialized: HashSet<Spur> = exited
                    .initialized
                    .iter()
                    .filter(|name| !exited.bindings.contains_key(name))
                    .copied()
                    .collect();
                match &mut parent.branch_initialized {
                    None => parent.branch_initialized = Some(branch_initialized),
                    Some(acc) => acc.retain(|name| branch_initialized.contains(name)),
                }
            }
        }

        unused
    }

    /// Turns on branch inspection on the current scope. Callers must only
    /// do this when the upcoming branch group is known to cover all
    /// control-flow paths.
    pub fn begin_branch_inspection(&mut self) {
        self.current_scope_mut().branch_inspection = true;
    }

    /// Commits the intersected per-branch initialization set into the
    /// current scope's own initialized set and leaves inspection mode.
    pub fn finalize_branches(&mut self) {
        let scope = self.current_scope_mut();
        if let Some(set) = scope.branch_initialized.take() {
            scope.initialized.extend(set);
        }
        scope.branch_inspection = false;
    }

    /// Records a binding at the nearest enclosing scope where the name is
    /// declarable: the scope that already holds it, or the current scope.
    /// Used during type discovery; does not mark the name initialized.
    pub fn observe(&mut self, name: Spur, ty: Type) {
        self.put_value(name, ty, None);
    }

    /// Sets the `declared` flag. Used by the codegen phase to guard the
    /// first textual binding emission; panics on an unknown name.
    pub fn declare(&mut self, name: Spur) {
        let level = self
            .find_binding_level(name)
            .expect("Internal Compiler Error: declare() on an unknown identifier");
        self.scopes[level]
            .bindings
            .get_mut(&name)
            .expect("Internal Compiler Error: binding vanished between lookup and declare")
            .declared = true;
    }

    /// Marks the name initialized along the current code branch only. The
    /// binding itself stays at its declaring scope.
    pub fn initialize(&mut self, name: Spur) {
        self.current_scope_mut().initialized.insert(name);
    }

    /// Writes a binding through to its declaring scope (creating it at the
    /// current scope if new). A non-empty value also records initialization
    /// at the current scope.
    pub fn put_value(&mut self, name: Spur, ty: Type, value: Option<Value>) {
        let has_value = value.is_some();
        let level = self
            .find_binding_level(name)
            .unwrap_or(self.scopes.len() - 1);
        self.scopes[level].bindings.insert(name, Binding::new(ty, value));
        if has_value {
            self.current_scope_mut().initialized.insert(name);
        }
    }

    /// Always creates a new binding at the current scope, hiding any outer
    /// binding of the same name. This is the entry point used for lambda
    /// parameters and capture shadowing.
    pub fn put_with_hiding(&mut self, name: Spur, ty: Type, value: Option<Value>) {
        let has_value = value.is_some();
        self.current_scope_mut()
            .bindings
            .insert(name, Binding::new(ty, value));
        if has_value {
            self.current_scope_mut().initialized.insert(name);
        }
    }

    /// Updates only the runtime value of an existing binding.
    pub fn update_value(&mut self, name: Spur, value: Value) {
        let level = self
            .find_binding_level(name)
            .expect("Internal Compiler Error: update_value() on an unknown identifier");
        self.scopes[level]
            .bindings
            .get_mut(&name)
            .expect("Internal Compiler Error: binding vanished between lookup and update")
            .value = Some(value);
    }

    pub fn get_type(&mut self, name: Spur) -> Option<Type> {
        let level = self.find_binding_level(name)?;
        Some(self.scopes[level].bindings[&name].ty.clone())
    }

    pub fn get_value(&mut self, name: Spur) -> Option<Value> {
        let level = self.find_binding_level(name)?;
        self.scopes[level].bindings[&name].value.clone()
    }

    pub fn is_declared(&mut self, name: Spur) -> bool {
        match self.find_binding_level(name) {
            Some(level) => self.scopes[level].bindings[&name].declared,
            None => false,
        }
    }

    pub fn is_initialized(&mut self, name: Spur) -> bool {
        self.find_level(name, |scope, name| scope.initialized.contains(&name))
            .is_some()
    }

    pub fn mark_used(&mut self, name: Spur) {
        let level = self.find_binding_level(name).unwrap_or_else(|| {
            panic!(
                "Internal Compiler Error: attempting to mark usage of an undeclared identifier {:?}",
                name
            )
        });
        self.scopes[level]
            .bindings
            .get_mut(&name)
            .expect("Internal Compiler Error: binding vanished between lookup and mark_used")
            .used = true;
    }

    pub fn mark_type_def(&mut self, name: Spur) {
        if let Some(level) = self.find_binding_level(name) {
            if let Some(binding) = self.scopes[level].bindings.get_mut(&name) {
                binding.is_type_definition = true;
            }
        }
    }

    pub fn is_type_definition(&mut self, name: Spur) -> bool {
        match self.find_binding_level(name) {
            Some(level) => self.scopes[level].bindings[&name].is_type_definition,
            None => false,
        }
    }

    /// Names snapshot-captured into the current scope so far. Only
    /// meaningful right before exiting a lambda scope.
    pub fn captured_in_current_scope(&self) -> Vec<Spur> {
        self.scopes
            .last()
            .map(|s| s.captured.iter().copied().collect())
            .unwrap_or_default()
    }

    fn current_scope_mut(&mut self) -> &mut Scope {
        self.scopes
            .last_mut()
            .expect("Internal Compiler Error: no current scope")
    }

    fn find_binding_level(&mut self, name: Spur) -> Option<usize> {
        self.find_level(name, |scope, name| scope.bindings.contains_key(&name))
    }

    /// Walks from the innermost scope outward looking for a scope matching
    /// the predicate, honoring the visibility rules of procedure and lambda
    /// boundaries. Resolving a capturable binding past a lambda boundary
    /// copies it into the first lambda scope crossed and resolves there.
    fn find_level(
        &mut self,
        name: Spur,
        matches_scope: impl Fn(&Scope, Spur) -> bool,
    ) -> Option<usize> {
        let mut past_procedure = false;
        let mut first_lambda: Option<usize> = None;

        for level in (0..self.scopes.len()).rev() {
            let scope = &self.scopes[level];
            let matched = matches_scope(scope, name);

            if !matched {
                match scope.kind {
                    ScopeKind::Procedure => past_procedure = true,
                    ScopeKind::Lambda => {
                        if first_lambda.is_none() {
                            first_lambda = Some(level);
                        }
                    }
                    ScopeKind::Block => {}
                }
                continue;
            }

            let crossed_boundary = past_procedure || first_lambda.is_some();
            if !crossed_boundary {
                return Some(level);
            }

            // The predicate can match a scope that only holds initialization
            // state for the name; visibility is decided by the binding, so
            // keep walking toward where it actually lives.
            let Some(binding) = self.scopes[level].bindings.get(&name) else {
                match self.scopes[level].kind {
                    ScopeKind::Procedure => past_procedure = true,
                    ScopeKind::Lambda => {
                        if first_lambda.is_none() {
                            first_lambda = Some(level);
                        }
                    }
                    ScopeKind::Block => {}
                }
                continue;
            };

            // Procedure references and type definitions are never shadowed
            // or captured.
            if binding.ty.is_procedure() || binding.is_type_definition {
                return Some(level);
            }

            if past_procedure {
                // Procedure bodies may also reference modules bound outside.
                if matches!(binding.ty, Type::Module) {
                    return Some(level);
                }
                return None;
            }

            let lambda_level =
                first_lambda.expect("Internal Compiler Error: crossed boundary without a scope");
            self.capture(name, level, lambda_level);
            return Some(lambda_level);
        }

        None
    }

    /// Snapshot-copies the binding found at `found_level` into the lambda
    /// scope at `lambda_level`, recording the capture and marking both the
    /// original and the copy used.
    fn capture(&mut self, name: Spur, found_level: usize, lambda_level: usize) {
        let copy = {
            let original = self.scopes[found_level]
                .bindings
                .get_mut(&name)
                .expect("Internal Compiler Error: capture of a missing binding");
            original.used = true;
            Binding {
                ty: original.ty.clone(),
                value: original.value.clone(),
                declared: original.declared,
                used: true,
                is_type_definition: original.is_type_definition,
            }
        };
        let lambda_scope = &mut self.scopes[lambda_level];
        lambda_scope.bindings.insert(name, copy);
        lambda_scope.captured.insert(name);
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typechecker::types::Blocking;
    use lasso::Rodeo;

    #[test]
    fn test_observe_and_lookup() {
        let mut rodeo = Rodeo::default();
        let x = rodeo.get_or_intern("x");

        let mut table = SymbolTable::new();
        table.observe(x, Type::Int);

        assert!(table.is_declared(x));
        assert!(!table.is_initialized(x));
        assert_eq!(table.get_type(x), Some(Type::Int));

        table.initialize(x);
        assert!(table.is_initialized(x));
    }

    #[test]
    fn test_nested_scopes() {
        let mut rodeo = Rodeo::default();
        let x = rodeo.get_or_intern("x");
        let y = rodeo.get_or_intern("y");

        let mut table = SymbolTable::new();
        table.observe(x, Type::Int);

        table.enter_scope(ScopeKind::Block);
        table.observe(y, Type::String);
        assert!(table.is_declared(x));
        assert!(table.is_declared(y));

        table.exit_scope(false);
        assert!(table.is_declared(x));
        assert!(!table.is_declared(y));
    }

    #[test]
    fn test_binding_lives_at_declaring_scope() {
        let mut rodeo = Rodeo::default();
        let x = rodeo.get_or_intern("x");

        let mut table = SymbolTable::new();
        table.observe(x, Type::Int);

        table.enter_scope(ScopeKind::Block);
        // Re-observing from an inner scope writes through to the
        // declaring scope, not the inner one.
        table.put_value(x, Type::Int, Some(Value::Int(4)));
        table.exit_scope(false);

        assert_eq!(table.get_value(x), Some(Value::Int(4)));
    }

    #[test]
    fn test_hiding_creates_inner_binding() {
        let mut rodeo = Rodeo::default();
        let x = rodeo.get_or_intern("x");

        let mut table = SymbolTable::new();
        table.observe(x, Type::Int);

        table.enter_scope(ScopeKind::Block);
        table.put_with_hiding(x, Type::String, None);
        assert_eq!(table.get_type(x), Some(Type::String));
        table.exit_scope(false);

        assert_eq!(table.get_type(x), Some(Type::Int));
    }

    #[test]
    fn test_procedure_boundary_hides_plain_bindings() {
        let mut rodeo = Rodeo::default();
        let x = rodeo.get_or_intern("x");
        let f = rodeo.get_or_intern("f");
        let m = rodeo.get_or_intern("m");
        let t = rodeo.get_or_intern("t");

        let mut table = SymbolTable::new();
        table.observe(x, Type::Int);
        table.observe(f, Type::function(vec![], Type::Int, Blocking::No));
        table.observe(m, Type::Module);
        table.observe(t, Type::structure(vec![], false));
        table.mark_type_def(t);

        table.enter_scope(ScopeKind::Procedure);
        assert!(!table.is_declared(x));
        assert!(table.is_declared(f));
        assert!(table.is_declared(m));
        assert!(table.is_declared(t));
        table.exit_scope(false);

        assert!(table.is_declared(x));
    }

    #[test]
    fn test_lambda_capture_snapshots_binding() {
        let mut rodeo = Rodeo::default();
        let x = rodeo.get_or_intern("x");

        let mut table = SymbolTable::new();
        table.put_value(x, Type::Int, Some(Value::Int(1)));

        table.enter_scope(ScopeKind::Lambda);
        assert_eq!(table.get_value(x), Some(Value::Int(1)));
        assert!(table.captured_in_current_scope().contains(&x));

        // The capture is a snapshot: writes inside the lambda hit the copy,
        // not the outer binding.
        table.update_value(x, Value::Int(50));
        table.exit_scope(false);
        assert_eq!(table.get_value(x), Some(Value::Int(1)));
    }

    #[test]
    fn test_lambda_capture_marks_outer_used() {
        let mut rodeo = Rodeo::default();
        let x = rodeo.get_or_intern("x");

        let mut table = SymbolTable::new();
        table.observe(x, Type::Int);

        table.enter_scope(ScopeKind::Lambda);
        table.get_type(x);
        table.exit_scope(false);

        let unused = table.exit_scope(true);
        assert!(unused.iter().all(|u| u.name != x));
    }

    #[test]
    fn test_procedures_are_not_captured() {
        let mut rodeo = Rodeo::default();
        let f = rodeo.get_or_intern("f");

        let mut table = SymbolTable::new();
        table.observe(f, Type::provider(Type::Int, Blocking::No));

        table.enter_scope(ScopeKind::Lambda);
        assert!(table.is_declared(f));
        assert!(table.captured_in_current_scope().is_empty());
        table.exit_scope(false);
    }

    #[test]
    fn test_lambda_then_procedure_boundary_not_found() {
        let mut rodeo = Rodeo::default();
        let x = rodeo.get_or_intern("x");

        let mut table = SymbolTable::new();
        table.observe(x, Type::Int);

        table.enter_scope(ScopeKind::Procedure);
        table.enter_scope(ScopeKind::Lambda);
        assert!(!table.is_declared(x));
        table.exit_scope(false);
        table.exit_scope(false);
    }

    #[test]
    fn test_branch_inspection_intersects() {
        let mut rodeo = Rodeo::default();
        let x = rodeo.get_or_intern("x");
        let y = rodeo.get_or_intern("y");

        let mut table = SymbolTable::new();
        table.observe(x, Type::Int);
        table.observe(y, Type::Int);
        table.begin_branch_inspection();

        table.enter_scope(ScopeKind::Block);
        table.initialize(x);
        table.initialize(y);
        table.exit_scope(false);

        table.enter_scope(ScopeKind::Block);
        table.initialize(x);
        table.exit_scope(false);

        table.finalize_branches();
        assert!(table.is_initialized(x));
        assert!(!table.is_initialized(y));
    }

    #[test]
    fn test_branch_inspection_skips_locally_declared() {
        let mut rodeo = Rodeo::default();
        let x = rodeo.get_or_intern("x");

        let mut table = SymbolTable::new();
        table.begin_branch_inspection();

        table.enter_scope(ScopeKind::Block);
        table.put_value(x, Type::Int, Some(Value::Int(1)));
        table.exit_scope(false);

        table.finalize_branches();
        assert!(!table.is_initialized(x));
    }

    #[test]
    fn test_unused_symbols_reported_on_exit() {
        let mut rodeo = Rodeo::default();
        let x = rodeo.get_or_intern("x");
        let y = rodeo.get_or_intern("y");

        let mut table = SymbolTable::new();
        table.enter_scope(ScopeKind::Block);
        table.observe(x, Type::Int);
        table.observe(y, Type::Int);
        table.mark_used(y);

        let unused = table.exit_scope(true);
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].name, x);
    }
}
