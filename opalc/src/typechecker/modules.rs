//!
//! Dependency Module Binding
//!
//! Seeds the symbol table and the check context with the exported surface
//! of every dependency module before checking starts. The module archive
//! envelope itself is decoded by the driver; this module consumes the
//! already-parsed API surface (`ModuleApi`).
//!
//! Binding runs in two strict phases: every exported user-defined type of
//! every dependency is registered first (their procedure signatures may
//! reference each other's types), and only then are the exported procedure
//! signatures bound. Exported procedures are namespaced under
//! `$DEP_MODULE$<alias>$<name>` so equally named exports of different
//! modules never collide.
//!

use lasso::Rodeo;

use super::context::{CheckContext, DepModule};
use super::env::SymbolTable;
use super::types::Type;

/// The sentinel alias under which the current compilation unit's own
/// descriptor is recorded, so types defined locally can be told apart from
/// identically named types of a dependency.
pub const SELF_MODULE_KEY: &str = "$THIS_MODULE$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub project_package: String,
    pub unique_module_name: String,
}

/// An exported user-defined (newtype) definition from a dependency's API.
#[derive(Debug, Clone)]
pub struct ExportedTypeDef {
    pub name: String,
    pub param_names: Vec<String>,
    pub wrapped: Type,
}

#[derive(Debug, Clone)]
pub struct ExportedProcedure {
    pub name: String,
    /// Must be a procedure-kinded type.
    pub signature: Type,
}

/// The parsed API surface of one dependency module. Only the descriptor
/// and the API header ever reach the core; implementation sources and the
/// codegen blob stay with the driver.
#[derive(Debug, Clone)]
pub struct ModuleApi {
    pub descriptor: ModuleDescriptor,
    pub exported_types: Vec<ExportedTypeDef>,
    pub exported_procedures: Vec<ExportedProcedure>,
    /// (user-defined type name, initializer procedure names)
    pub initializers: Vec<(String, Vec<String>)>,
    /// (user-defined type name, unwrapper procedure names)
    pub unwrappers: Vec<(String, Vec<String>)>,
}

/// The namespaced symbol-table name of a procedure exported by a dep.
pub fn dep_procedure_name(alias: &str, name: &str) -> String {
    format!("$DEP_MODULE${}${}", alias, name)
}

/// The unique registry key of a type exported by a module.
pub fn qualified_type_name(unique_module_name: &str, type_name: &str) -> String {
    format!("{}${}", unique_module_name, type_name)
}

/// Registers every dependency's exports into the symbol table and context.
pub fn bind_dep_modules(
    deps: &[(String, ModuleApi)],
    table: &mut SymbolTable,
    ctx: &mut CheckContext,
    interner: &mut Rodeo,
) {
    // Make each module alias itself resolvable (module-kinded bindings stay
    // visible across procedure boundaries).
    for (alias, api) in deps {
        ctx.dep_modules.insert(
            alias.clone(),
            DepModule {
                descriptor: api.descriptor.clone(),
                used: false,
            },
        );
        let alias_sym = interner.get_or_intern(alias);
        table.observe(alias_sym, Type::Module);
        table.initialize(alias_sym);
        table.mark_used(alias_sym);
    }

    // Phase 1: all type defs of all deps, so that procedure signatures can
    // reference types across module boundaries regardless of dep order.
    for (_, api) in deps {
        for type_def in &api.exported_types {
            let qualified =
                qualified_type_name(&api.descriptor.unique_module_name, &type_def.name);
            ctx.registry.register(
                qualified,
                type_def.wrapped.clone(),
                type_def.param_names.clone(),
            );
        }
    }

    // Phase 2: exported procedure signatures under disambiguated names.
    for (alias, api) in deps {
        for proc in &api.exported_procedures {
            debug_assert!(
                proc.signature.is_procedure(),
                "module '{}' exports non-procedure signature '{}'",
                alias,
                proc.name
            );
            let bound_name = interner.get_or_intern(dep_procedure_name(alias, &proc.name));
            table.observe(bound_name, proc.signature.clone());
            table.initialize(bound_name);
            // Exported surface; never subject to the unused check.
            table.mark_used(bound_name);
        }

        for (type_name, procs) in &api.initializers {
            let entry = ctx.initializers.entry(type_name.clone()).or_default();
            for proc in procs {
                entry.push(format!("{}::{}", alias, proc));
            }
        }
        for (type_name, procs) in &api.unwrappers {
            let entry = ctx.unwrappers.entry(type_name.clone()).or_default();
            for proc in procs {
                entry.push(format!("{}::{}", alias, proc));
            }
        }
    }
}

/// Records the compilation unit's own module identity under the sentinel
/// key. Only meaningful when compiling a module (as opposed to an
/// executable program).
pub fn register_self_module(descriptor: ModuleDescriptor, ctx: &mut CheckContext) {
    ctx.dep_modules.insert(
        SELF_MODULE_KEY.to_string(),
        DepModule {
            descriptor,
            used: true,
        },
    );
}
