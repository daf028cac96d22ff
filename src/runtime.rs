//! Retained-mode executor for lowered components.
//!
//! A [`ViewRuntime`] instantiates lowered declarations into [`ViewInstance`]s,
//! wiring each wrapper-backed field to an [`ObservableWrapper`] according to its
//! binding kind, and runs lowered render bodies linearly with an explicit open
//! stack. Consumers resolve through a [`RuntimeScope`] chain handed down from
//! parent to child during construction; nothing is looked up globally.
//!
//! Pass-through statements are host code and are not executed here.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::binding::{ArgumentValue, BindingKind, BoundArgument, SharedRole};
use crate::observable::{ObservableWrapper, Subscription, WrapperKind};
use crate::pipeline::{LoweredComponent, ModuleOutput};
use crate::static_eval::{is_truthy, static_eval, EvalScope};
use crate::validate::{
    ClassMember, ComponentDecl, CompilerError, MarkerRole, SourceLocation, UiStatement,
    INV_UNBALANCED_TREE, INV_UNRESOLVED_BINDING, INV_UNSUPPORTED_NESTING,
};

pub type FieldWrapper = ObservableWrapper<Value>;

const RUNTIME_FILE: &str = "<runtime>";

// ═══════════════════════════════════════════════════════════════════════════════
// BRANCH TRACKING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Activation {
    /// First evaluation of the site.
    Initial,
    /// Same branchId as last time: update in place.
    Reuse,
    /// Different branchId: tear down and rebuild.
    Rebuild,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchActivation {
    pub site: u32,
    pub branch_id: Option<u32>,
    pub activation: Activation,
}

#[derive(Debug, Clone, Default)]
pub struct BranchTracker {
    active: HashMap<u32, Option<u32>>,
}

impl BranchTracker {
    pub fn activate(&mut self, site: u32, branch_id: Option<u32>) -> Activation {
        match self.active.insert(site, branch_id) {
            None => Activation::Initial,
            Some(previous) if previous == branch_id => Activation::Reuse,
            Some(_) => Activation::Rebuild,
        }
    }

    pub fn active(&self, site: u32) -> Option<u32> {
        self.active.get(&site).copied().flatten()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERED TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedNode {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<(String, Vec<Value>)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<u32>,
    pub children: Vec<RenderedNode>,
}

impl RenderedNode {
    fn new(name: &str) -> Self {
        RenderedNode {
            name: name.to_string(),
            args: Vec::new(),
            attributes: Vec::new(),
            branch_id: None,
            children: Vec::new(),
        }
    }

    /// First node named `name` in depth-first order, self included.
    pub fn find(&self, name: &str) -> Option<&RenderedNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    pub fn count(&self, name: &str) -> usize {
        let own = usize::from(self.name == name);
        own + self.children.iter().map(|c| c.count(name)).sum::<usize>()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Provider wrappers visible to a component under construction.
pub struct RuntimeScope<'p> {
    parent: Option<&'p RuntimeScope<'p>>,
    entries: Vec<(String, FieldWrapper)>,
}

impl<'p> RuntimeScope<'p> {
    pub fn root() -> Self {
        RuntimeScope {
            parent: None,
            entries: Vec::new(),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&FieldWrapper> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, w)| w)
            .or_else(|| self.parent.and_then(|p| p.lookup(key)))
    }
}

struct FieldScope<'v> {
    fields: &'v [(String, FieldWrapper)],
    locals: &'v [(String, Value)],
}

impl FieldScope<'_> {
    fn wrapper(&self, name: &str) -> Option<&FieldWrapper> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, w)| w)
    }
}

impl EvalScope for FieldScope<'_> {
    fn field(&self, name: &str) -> Option<Value> {
        self.wrapper(name).map(FieldWrapper::get)
    }

    fn local(&self, name: &str) -> Option<Value> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VIEW INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ViewInstance {
    name: String,
    fields: Vec<(String, FieldWrapper)>,
    provided: Vec<(String, FieldWrapper)>,
    rerender_requests: Rc<Cell<u32>>,
    renders: u32,
    children: BTreeMap<String, ViewInstance>,
    branches: BranchTracker,
    activations: Vec<BranchActivation>,
    tree: Option<RenderedNode>,
    _subscriptions: Vec<Subscription>,
}

impl ViewInstance {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value read through the field's accessor.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.wrapper(field).map(FieldWrapper::get)
    }

    /// Write through the field's accessor. Returns false for unknown fields.
    pub fn set(&self, field: &str, value: Value) -> bool {
        match self.wrapper(field) {
            Some(wrapper) => {
                wrapper.set(value);
                true
            }
            None => false,
        }
    }

    pub fn wrapper(&self, field: &str) -> Option<&FieldWrapper> {
        self.fields.iter().find(|(n, _)| n == field).map(|(_, w)| w)
    }

    /// Number of times any field notified this view's re-render trigger.
    pub fn rerender_requests(&self) -> u32 {
        self.rerender_requests.get()
    }

    pub fn render_count(&self) -> u32 {
        self.renders
    }

    pub fn children(&self) -> impl Iterator<Item = &ViewInstance> {
        self.children.values()
    }

    /// First child instance of component `name`, in render order.
    pub fn child(&self, name: &str) -> Option<&ViewInstance> {
        self.children.values().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut ViewInstance> {
        self.children.values_mut().find(|c| c.name == name)
    }

    pub fn activations(&self) -> &[BranchActivation] {
        &self.activations
    }

    pub fn active_branch(&self, site: u32) -> Option<u32> {
        self.branches.active(site)
    }

    pub fn tree(&self) -> Option<&RenderedNode> {
        self.tree.as_ref()
    }
}

impl std::fmt::Debug for ViewInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewInstance")
            .field("name", &self.name)
            .field("fields", &self.fields.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("children", &self.children.len())
            .field("renders", &self.renders)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ViewRuntime {
    components: HashMap<String, ComponentDecl>,
}

fn runtime_error(code: &str, component: &str, message: String) -> CompilerError {
    CompilerError::at(
        code,
        &message,
        RUNTIME_FILE,
        component,
        &SourceLocation::default(),
    )
}

impl ViewRuntime {
    pub fn new(lowered: impl IntoIterator<Item = LoweredComponent>) -> Self {
        let components = lowered
            .into_iter()
            .map(|c| (c.decl.name.clone(), c.decl))
            .collect();
        ViewRuntime { components }
    }

    pub fn from_output(output: &ModuleOutput) -> Self {
        Self::new(output.lowered().cloned())
    }

    /// Construct component `name` as a root and render it once.
    pub fn mount(&self, name: &str) -> Result<ViewInstance, CompilerError> {
        let root = RuntimeScope::root();
        let parent = FieldScope {
            fields: &[],
            locals: &[],
        };
        let mut view = self.instantiate(name, &[], &parent, &root)?;
        self.render(&mut view, &root)?;
        Ok(view)
    }

    /// Re-render a mounted root and its whole subtree.
    pub fn update(&self, root: &mut ViewInstance) -> Result<(), CompilerError> {
        self.render(root, &RuntimeScope::root())
    }

    fn instantiate(
        &self,
        name: &str,
        args: &[BoundArgument],
        parent: &FieldScope<'_>,
        scope: &RuntimeScope<'_>,
    ) -> Result<ViewInstance, CompilerError> {
        let decl = self.components.get(name).ok_or_else(|| {
            runtime_error(
                INV_UNRESOLVED_BINDING,
                name,
                format!("No lowered component named '{}'.", name),
            )
        })?;
        debug!(component = %name, "instantiating view");

        let mut fields: Vec<(String, FieldWrapper)> = Vec::new();
        let mut provided = Vec::new();
        for member in &decl.members {
            let (field, binding, initializer) = match member {
                ClassMember::Wrapper(w) => (&w.source_field, Some(&w.binding), &w.initializer),
                ClassMember::Field(f) => (&f.name, None, &f.initializer),
                _ => continue,
            };
            let arg = args.iter().find(|a| &a.field == field);
            let initial = |fields: &[(String, FieldWrapper)]| -> Value {
                match arg.map(|a| &a.value) {
                    Some(ArgumentValue::Expression { code }) => static_eval(code, parent),
                    _ => match initializer {
                        Some(code) => static_eval(code, &FieldScope { fields, locals: &[] }),
                        None => Value::Null,
                    },
                }
            };

            let wrapper = match binding {
                None => FieldWrapper::new(WrapperKind::Plain, initial(&fields)),
                Some(BindingKind::TwoWay) => {
                    let source = match arg.map(|a| &a.value) {
                        Some(ArgumentValue::Wrapper { field: source, .. }) => {
                            parent.wrapper(source)
                        }
                        _ => None,
                    };
                    source.map(|p| p.link(WrapperKind::TwoWay)).ok_or_else(|| {
                        runtime_error(
                            INV_UNRESOLVED_BINDING,
                            name,
                            format!("Two-way field '{}' has no parent wrapper.", field),
                        )
                    })?
                }
                Some(BindingKind::Shared {
                    key,
                    role: SharedRole::Consumer,
                }) => scope
                    .lookup(key)
                    .map(|p| p.link(WrapperKind::Shared))
                    .ok_or_else(|| {
                        runtime_error(
                            INV_UNRESOLVED_BINDING,
                            name,
                            format!("No ancestor provides key '{}'.", key),
                        )
                    })?,
                Some(BindingKind::Shared {
                    key,
                    role: SharedRole::Provider,
                }) => {
                    let wrapper = FieldWrapper::new(WrapperKind::Shared, initial(&fields));
                    provided.push((key.clone(), wrapper.clone()));
                    wrapper
                }
                Some(kind) => FieldWrapper::new(kind.wrapper_kind(), initial(&fields)),
            };
            fields.push((field.clone(), wrapper));
        }

        let rerender_requests = Rc::new(Cell::new(0));
        let subscriptions = fields
            .iter()
            .map(|(field, wrapper)| {
                let trigger = Rc::clone(&rerender_requests);
                let component = name.to_string();
                let field = field.clone();
                wrapper.subscribe(move |_| {
                    trace!(component = %component, field = %field, "re-render requested");
                    trigger.set(trigger.get() + 1);
                })
            })
            .collect();

        Ok(ViewInstance {
            name: name.to_string(),
            fields,
            provided,
            rerender_requests,
            renders: 0,
            children: BTreeMap::new(),
            branches: BranchTracker::default(),
            activations: Vec::new(),
            tree: None,
            _subscriptions: subscriptions,
        })
    }

    fn render(&self, view: &mut ViewInstance, scope: &RuntimeScope<'_>) -> Result<(), CompilerError> {
        let decl = self.components.get(&view.name).ok_or_else(|| {
            runtime_error(
                INV_UNRESOLVED_BINDING,
                &view.name,
                format!("No lowered component named '{}'.", view.name),
            )
        })?;

        let own_scope = RuntimeScope {
            parent: Some(scope),
            entries: view.provided.clone(),
        };
        let old_children = std::mem::take(&mut view.children);
        let mut exec = Executor {
            runtime: self,
            component: &decl.name,
            fields: &view.fields,
            scope: &own_scope,
            old_children,
            new_children: BTreeMap::new(),
            branches: &mut view.branches,
            activations: Vec::new(),
            locals: Vec::new(),
            path: Vec::new(),
        };
        let tree = exec.run(&decl.render.body)?;
        let (children, activations) = (exec.new_children, exec.activations);

        view.children = children;
        view.activations = activations;
        view.tree = Some(tree);
        view.renders += 1;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXECUTOR
// ═══════════════════════════════════════════════════════════════════════════════

struct Frame {
    node: RenderedNode,
    role_arm: bool,
    items: Option<Vec<Value>>,
}

struct Executor<'e> {
    runtime: &'e ViewRuntime,
    component: &'e str,
    fields: &'e [(String, FieldWrapper)],
    scope: &'e RuntimeScope<'e>,
    old_children: BTreeMap<String, ViewInstance>,
    new_children: BTreeMap<String, ViewInstance>,
    branches: &'e mut BranchTracker,
    activations: Vec<BranchActivation>,
    locals: Vec<(String, Value)>,
    path: Vec<String>,
}

impl Executor<'_> {
    fn run(&mut self, body: &[UiStatement]) -> Result<RenderedNode, CompilerError> {
        let mut stack = vec![Frame {
            node: RenderedNode::new(self.component),
            role_arm: false,
            items: None,
        }];
        self.exec_block(body, &mut stack)?;
        match (stack.pop(), stack.is_empty()) {
            (Some(root), true) => Ok(root.node),
            _ => Err(self.unbalanced("render ended with open markers".to_string())),
        }
    }

    fn eval(&self, code: &str) -> Value {
        static_eval(
            code,
            &FieldScope {
                fields: self.fields,
                locals: &self.locals,
            },
        )
    }

    fn unbalanced(&self, message: String) -> CompilerError {
        runtime_error(INV_UNBALANCED_TREE, self.component, message)
    }

    fn exec_block(&mut self, body: &[UiStatement], stack: &mut Vec<Frame>) -> Result<(), CompilerError> {
        let base = stack.len();
        for (index, stmt) in body.iter().enumerate() {
            match stmt {
                UiStatement::Open(open) => {
                    let mut node = RenderedNode::new(&open.component);
                    node.args = open.args.iter().map(|a| self.eval(a)).collect();
                    node.attributes = open
                        .attributes
                        .iter()
                        .map(|call| {
                            (
                                call.method.clone(),
                                call.args.iter().map(|a| self.eval(a)).collect(),
                            )
                        })
                        .collect();
                    let mut frame = Frame {
                        node,
                        role_arm: false,
                        items: None,
                    };
                    match &open.role {
                        MarkerRole::Arm { branch_id, .. } => {
                            frame.node.branch_id = Some(*branch_id);
                            frame.role_arm = true;
                        }
                        MarkerRole::Loop => {
                            let items = match frame.node.args.first() {
                                Some(Value::Array(items)) => items.clone(),
                                _ => Vec::new(),
                            };
                            frame.items = Some(items);
                        }
                        MarkerRole::Component { bindings } => {
                            let key = format!("{}/{}:{}", self.path.join("/"), index, open.component);
                            let subtree = self.render_child(key, &open.component, bindings)?;
                            frame.node.children = subtree;
                        }
                        MarkerRole::Element | MarkerRole::Conditional { .. } => {}
                    }
                    stack.push(frame);
                }
                UiStatement::Close(close) => {
                    if stack.len() <= base {
                        return Err(self.unbalanced(format!(
                            "close of '{}' without an open marker in this block",
                            close.component
                        )));
                    }
                    let Some(frame) = stack.pop() else {
                        return Err(self.unbalanced("empty open stack".to_string()));
                    };
                    let arm_matches = frame.role_arm == close.branch_id.is_some()
                        && frame.node.branch_id == close.branch_id;
                    if frame.node.name != close.component || !arm_matches {
                        return Err(self.unbalanced(format!(
                            "close of '{}' does not match open '{}'",
                            close.component, frame.node.name
                        )));
                    }
                    if let Some(parent) = stack.last_mut() {
                        parent.node.children.push(frame.node);
                    }
                }
                UiStatement::Branch(block) => {
                    let selected = block.arms.iter().find(|arm| match &arm.condition {
                        Some(code) => is_truthy(&self.eval(code)),
                        None => true,
                    });
                    let branch_id = selected.map(|arm| arm.branch_id);
                    let activation = self.branches.activate(block.site, branch_id);
                    trace!(site = block.site, ?branch_id, ?activation, "branch evaluated");
                    self.activations.push(BranchActivation {
                        site: block.site,
                        branch_id,
                        activation,
                    });
                    if let Some(arm) = selected {
                        self.path.push(format!("s{}b{}", block.site, arm.branch_id));
                        let result = self.exec_block(&arm.body, stack);
                        self.path.pop();
                        result?;
                    }
                }
                UiStatement::ItemGenerator(generator) => {
                    let items = stack
                        .last()
                        .and_then(|frame| frame.items.clone())
                        .unwrap_or_default();
                    for (i, item) in items.into_iter().enumerate() {
                        let pushed = generator.params.len().min(2);
                        if let Some(item_var) = generator.params.first() {
                            self.locals.push((item_var.clone(), item));
                        }
                        if let Some(index_var) = generator.params.get(1) {
                            self.locals.push((index_var.clone(), Value::from(i)));
                        }
                        self.path.push(format!("i{}", i));
                        let result = self.exec_block(&generator.body, stack);
                        self.path.pop();
                        self.locals.truncate(self.locals.len() - pushed);
                        result?;
                    }
                }
                UiStatement::Statement(_) => {}
                UiStatement::Element(_) | UiStatement::If(_) | UiStatement::ForEach(_) => {
                    return Err(runtime_error(
                        INV_UNSUPPORTED_NESTING,
                        self.component,
                        "declarative form reached the runtime without lowering".to_string(),
                    ));
                }
            }
        }
        if stack.len() != base {
            return Err(self.unbalanced("block ended with open markers".to_string()));
        }
        Ok(())
    }

    /// Construct or reuse the child at `key`, render it, return its subtree.
    fn render_child(
        &mut self,
        key: String,
        component: &str,
        bindings: &[BoundArgument],
    ) -> Result<Vec<RenderedNode>, CompilerError> {
        let parent = FieldScope {
            fields: self.fields,
            locals: &self.locals,
        };
        let mut child = match self.old_children.remove(&key) {
            Some(existing) if existing.name == component => {
                for bound in bindings {
                    if let (BindingKind::OneWay, ArgumentValue::Expression { code }) =
                        (&bound.binding, &bound.value)
                    {
                        let fresh = static_eval(code, &parent);
                        if existing.get(&bound.field).as_ref() != Some(&fresh) {
                            existing.set(&bound.field, fresh);
                        }
                    }
                }
                existing
            }
            _ => self
                .runtime
                .instantiate(component, bindings, &parent, self.scope)?,
        };
        self.runtime.render(&mut child, self.scope)?;
        let subtree = child
            .tree
            .as_ref()
            .map(|t| t.children.clone())
            .unwrap_or_default();
        self.new_children.insert(key, child);
        Ok(subtree)
    }
}
