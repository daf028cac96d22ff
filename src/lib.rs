//! # ETS Component Lowering Engine
//!
//! Source-to-source lowering for declarative reactive UI components. The host
//! parses `.ets` sources into the normalized IR in [`validate`]; this crate
//! rewrites each component into the imperative form a reactive runtime drives.
//!
//! ## Passes
//!
//! 1. **Binding resolution** ([`binding`]): classifies every field, binds
//!    call-site arguments against the child's declaration and resolves each
//!    consumer against the providers of its instantiating ancestors.
//! 2. **Decorator lowering** ([`decorators`]): each decorated field `f` becomes
//!    a wrapper-backed `f__` plus a public accessor pair `f`.
//! 3. **View-tree lowering** ([`view_lowerer`]): nested element calls become a
//!    linear open/close marker stream; conditionals get stable branchIds.
//! 4. **Pass-through** ([`passthrough`]): ordinary code survives verbatim apart
//!    from `this.$f` wrapper references.
//!
//! ## Invariants
//!
//! - Every open marker in a lowered body has exactly one matching close in the
//!   same block.
//! - A conditional site keeps the same branchIds across runs and re-lowering.
//! - Lowering an already-lowered declaration is a no-op.
//! - Errors are component-scoped: one bad component never hides the others.

#[cfg(feature = "napi")]
use napi_derive::napi;

pub mod binding;
pub mod cache;
pub mod codegen;
pub mod components;
pub mod decorators;
pub mod observable;
pub mod passthrough;
pub mod pipeline;
mod renamer;
pub mod runtime;
pub mod static_eval;
pub mod validate;
pub mod view_lowerer;
pub mod visitor;

#[cfg(test)]
mod binding_tests;
#[cfg(test)]
mod runtime_tests;

pub use binding::{ArgumentValue, BindingKind, BoundArgument, SharedRole};
pub use cache::LoweringCache;
pub use codegen::print_component;
pub use observable::{ObservableWrapper, Subscription, WrapperKind};
pub use pipeline::{
    lower_component, lower_module, lower_standalone, ComponentOutcome, LoweredComponent,
    LoweringOptions, ModuleOutput,
};
pub use runtime::{Activation, ViewInstance, ViewRuntime};
pub use validate::*;
pub use view_lowerer::{BranchRegistry, BranchSite};

// ═══════════════════════════════════════════════════════════════════════════════
// JSON BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Compile(#[from] CompilerError),
}

/// Lower a module given as JSON. An empty options string means defaults.
pub fn lower_module_json(module_json: &str, options_json: &str) -> Result<String, BridgeError> {
    let module: SourceModule = serde_json::from_str(module_json)?;
    let options: LoweringOptions = if options_json.trim().is_empty() {
        LoweringOptions::default()
    } else {
        serde_json::from_str(options_json)?
    };
    let output = cache::GLOBAL_CACHE.get_or_lower(&module, &options);
    Ok(serde_json::to_string(&output)?)
}

/// Print one lowered component (as emitted by [`lower_module_json`]) to JS.
pub fn print_component_json(component_json: &str) -> Result<String, BridgeError> {
    let lowered: LoweredComponent = serde_json::from_str(component_json)?;
    Ok(print_component(&lowered)?)
}

#[cfg(feature = "napi")]
#[napi]
pub fn lower_module_native(module_json: String, options_json: Option<String>) -> napi::Result<String> {
    lower_module_json(&module_json, options_json.as_deref().unwrap_or(""))
        .map_err(|e| napi::Error::from_reason(e.to_string()))
}

#[cfg(feature = "napi")]
#[napi]
pub fn print_component_native(component_json: String) -> napi::Result<String> {
    print_component_json(&component_json).map_err(|e| napi::Error::from_reason(e.to_string()))
}

#[cfg(feature = "napi")]
#[napi]
pub fn compile_bridge() -> String {
    "ETS Lowering Bridge Connected".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_bridge_round_trip() {
        let module = json!({
            "filePath": "bridge.ets",
            "components": [{
                "name": "Hello",
                "isEntry": true,
                "members": [{
                    "member": "field",
                    "name": "message",
                    "decorator": { "kind": "state" },
                    "initializer": "'Hello'"
                }],
                "render": { "body": [{
                    "type": "element",
                    "name": "Text",
                    "args": [{ "value": "this.message" }]
                }]}
            }]
        });
        let out = lower_module_json(&module.to_string(), "").unwrap();
        let out: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(out["filePath"], "bridge.ets");
        let lowered = &out["components"][0]["lowered"];
        assert_eq!(lowered["decl"]["render"]["name"], "initialRender");

        let js = print_component_json(&lowered.to_string()).unwrap();
        assert!(js.contains("Text.create(this.message);"));
    }

    #[test]
    fn test_json_bridge_rejects_bad_input() {
        let err = lower_module_json("{ not json", "").unwrap_err();
        assert!(matches!(err, BridgeError::Json(_)));
        let err = lower_module_json(r#"{"components": []}"#, r#"{"parallel": "yes"}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Json(_)));
    }
}
