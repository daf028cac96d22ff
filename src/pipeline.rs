//! Module-level lowering driver.
//!
//! Resolves bindings across the whole module once, then lowers each component
//! independently. A failure aborts only the component it belongs to.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::binding::{FieldTable, ModuleResolver};
use crate::decorators::{lower_fields, render_method_name};
use crate::passthrough::Preserver;
use crate::validate::{
    ClassMember, ComponentDecl, CompilerError, MethodDecl, RawStatement, RenderMethod, SourceModule,
    UiStatement, INV_DUPLICATE_COMPONENT, INV_UNBALANCED_TREE, INV_UNSUPPORTED_NESTING,
};
use crate::view_lowerer::{BranchRegistry, ViewContext, ViewLowerer};
use crate::visitor::BalanceChecker;

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct LoweringOptions {
    /// Overrides the module's own path in diagnostics when non-empty.
    #[serde(default)]
    pub file_path: String,
    #[serde(default = "default_true")]
    pub partial_update_mode: bool,
    #[serde(default = "default_true")]
    pub parallel: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LoweringOptions {
    fn default() -> Self {
        LoweringOptions {
            file_path: String::new(),
            partial_update_mode: true,
            parallel: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoweredComponent {
    pub decl: ComponentDecl,
    pub branch_registry: BranchRegistry,
    pub provided: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeResult {
    Lowered(LoweredComponent),
    Error(CompilerError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentOutcome {
    pub name: String,
    #[serde(flatten)]
    pub result: OutcomeResult,
}

impl ComponentOutcome {
    fn from_result(name: &str, result: Result<LoweredComponent, CompilerError>) -> Self {
        ComponentOutcome {
            name: name.to_string(),
            result: match result {
                Ok(lowered) => OutcomeResult::Lowered(lowered),
                Err(error) => OutcomeResult::Error(error),
            },
        }
    }

    pub fn lowered(&self) -> Option<&LoweredComponent> {
        match &self.result {
            OutcomeResult::Lowered(lowered) => Some(lowered),
            OutcomeResult::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CompilerError> {
        match &self.result {
            OutcomeResult::Lowered(_) => None,
            OutcomeResult::Error(error) => Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleOutput {
    pub file_path: String,
    pub components: Vec<ComponentOutcome>,
}

impl ModuleOutput {
    pub fn get(&self, name: &str) -> Option<&ComponentOutcome> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn lowered(&self) -> impl Iterator<Item = &LoweredComponent> {
        self.components.iter().filter_map(ComponentOutcome::lowered)
    }

    pub fn errors(&self) -> impl Iterator<Item = &CompilerError> {
        self.components.iter().filter_map(ComponentOutcome::error)
    }

    pub fn is_success(&self) -> bool {
        self.components.iter().all(|c| c.error().is_none())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DRIVER
// ═══════════════════════════════════════════════════════════════════════════════

/// Read-only state shared by every component lowering of one module.
pub struct ModuleContext<'m> {
    pub file: &'m str,
    pub options: &'m LoweringOptions,
    pub components: HashMap<&'m str, &'m ComponentDecl>,
    pub names: HashSet<String>,
    consumer_failures: HashMap<String, CompilerError>,
}

impl<'m> ModuleContext<'m> {
    pub fn new(module: &'m SourceModule, options: &'m LoweringOptions) -> Self {
        let file = if options.file_path.is_empty() {
            module.file_path.as_str()
        } else {
            options.file_path.as_str()
        };
        let mut components: HashMap<&str, &ComponentDecl> = HashMap::new();
        for decl in &module.components {
            components.entry(decl.name.as_str()).or_insert(decl);
        }
        let names = components.keys().map(|k| k.to_string()).collect();
        let consumer_failures =
            ModuleResolver::new(file, &module.components).resolve(&module.components);
        ModuleContext {
            file,
            options,
            components,
            names,
            consumer_failures,
        }
    }
}

pub fn lower_module(module: &SourceModule, options: &LoweringOptions) -> ModuleOutput {
    let ctx = ModuleContext::new(module, options);
    debug!(
        file = %ctx.file,
        components = module.components.len(),
        parallel = options.parallel,
        "lowering module"
    );

    let mut seen: HashSet<&str> = HashSet::new();
    let jobs: Vec<(&ComponentDecl, bool)> = module
        .components
        .iter()
        .map(|decl| (decl, !seen.insert(decl.name.as_str())))
        .collect();

    let run = |(decl, duplicate): &(&ComponentDecl, bool)| {
        let result = if *duplicate {
            Err(CompilerError::at(
                INV_DUPLICATE_COMPONENT,
                &format!("Component '{}' is declared more than once.", decl.name),
                ctx.file,
                &decl.name,
                &decl.location,
            ))
        } else {
            lower_component(decl, &ctx)
        };
        if let Err(err) = &result {
            warn!(component = %decl.name, code = %err.code, "component lowering failed");
        }
        ComponentOutcome::from_result(&decl.name, result)
    };

    let components: Vec<ComponentOutcome> = if options.parallel {
        jobs.par_iter().map(run).collect()
    } else {
        jobs.iter().map(run).collect()
    };

    ModuleOutput {
        file_path: ctx.file.to_string(),
        components,
    }
}

pub fn lower_component(
    decl: &ComponentDecl,
    ctx: &ModuleContext<'_>,
) -> Result<LoweredComponent, CompilerError> {
    debug!(component = %decl.name, "lowering component");
    let fields = lower_fields(decl, ctx.file)?;
    if let Some(err) = ctx.consumer_failures.get(&decl.name) {
        return Err(err.clone());
    }
    let table = FieldTable::of(decl);
    let preserver = Preserver::new(ctx.file, &decl.name, fields.wrapped.clone(), &ctx.names);
    let view_ctx = ViewContext {
        file: ctx.file,
        component: &decl.name,
        fields: &table,
        components: &ctx.components,
        preserver: &preserver,
    };
    let mut lowerer = ViewLowerer::new(&view_ctx);

    let render_name = render_method_name(&decl.render.name, ctx.options.partial_update_mode);
    let render_body = lowerer.lower_method(&render_name, &decl.render.body)?;
    check_balance(&render_body, ctx.file, decl)?;

    let mut members = Vec::with_capacity(fields.members.len());
    for member in fields.members {
        match member {
            ClassMember::Method(method) if method.is_builder => {
                let body = lowerer.lower_method(&method.name, &method.body)?;
                check_balance(&body, ctx.file, decl)?;
                members.push(ClassMember::Method(MethodDecl { body, ..method }));
            }
            ClassMember::Method(method) => {
                let body = preserve_ordinary(&method, &preserver, ctx.file, &decl.name)?;
                members.push(ClassMember::Method(MethodDecl { body, ..method }));
            }
            other => members.push(other),
        }
    }

    let branch_registry = lowerer.finish();
    debug!(
        component = %decl.name,
        sites = branch_registry.len(),
        "component lowered"
    );
    Ok(LoweredComponent {
        decl: ComponentDecl {
            name: decl.name.clone(),
            is_entry: decl.is_entry,
            members,
            render: RenderMethod {
                name: render_name,
                body: render_body,
            },
            location: decl.location.clone(),
        },
        branch_registry,
        provided: fields.provided,
    })
}

fn preserve_ordinary(
    method: &MethodDecl,
    preserver: &Preserver<'_>,
    file: &str,
    component: &str,
) -> Result<Vec<UiStatement>, CompilerError> {
    let mut body = Vec::with_capacity(method.body.len());
    for stmt in &method.body {
        let UiStatement::Statement(raw) = stmt else {
            return Err(CompilerError::at(
                INV_UNSUPPORTED_NESTING,
                &format!(
                    "Method '{}' is not a builder but contains UI construction.",
                    method.name
                ),
                file,
                component,
                &method.location,
            )
            .with_hint("Mark the method @Builder or move the UI into the render body."));
        };
        body.push(UiStatement::Statement(RawStatement {
            code: preserver.statement(&raw.code, &raw.location)?,
            location: raw.location.clone(),
        }));
    }
    Ok(body)
}

fn check_balance(
    body: &[UiStatement],
    file: &str,
    decl: &ComponentDecl,
) -> Result<(), CompilerError> {
    BalanceChecker::check(body).map(|_| ()).map_err(|reason| {
        CompilerError::at(
            INV_UNBALANCED_TREE,
            &format!("Lowered body of '{}' is unbalanced: {}", decl.name, reason),
            file,
            &decl.name,
            &decl.location,
        )
    })
}

/// Lower a lone component as a single-component module.
pub fn lower_standalone(
    decl: &ComponentDecl,
    options: &LoweringOptions,
) -> Result<LoweredComponent, CompilerError> {
    let module = SourceModule {
        file_path: options.file_path.clone(),
        components: vec![decl.clone()],
    };
    let ctx = ModuleContext::new(&module, options);
    lower_component(decl, &ctx)
}
