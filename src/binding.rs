//! Binding Resolver.
//!
//! Classifies every field of a component into a [`BindingKind`] using only the
//! component's own declaration, validates call-site arguments against that
//! classification, and checks that every consumer has a provider somewhere in
//! its instantiation ancestry.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::observable::WrapperKind;
use crate::validate::{
    CallArgument, ClassMember, ComponentDecl, CompilerError, DecoratorTag, ElementNode,
    FieldDecl, MarkerRole, OpenMarker, SourceLocation, INV_BINDING_SHAPE,
    INV_UNRESOLVED_BINDING,
};
use crate::visitor::{walk_element, UiVisitor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SharedRole {
    Provider,
    Consumer,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BindingKind {
    OwnedSimple,
    OneWay,
    TwoWay,
    Shared { key: String, role: SharedRole },
}

impl BindingKind {
    pub fn wrapper_kind(&self) -> WrapperKind {
        match self {
            BindingKind::OwnedSimple => WrapperKind::OwnedSimple,
            BindingKind::OneWay => WrapperKind::OneWay,
            BindingKind::TwoWay => WrapperKind::TwoWay,
            BindingKind::Shared { .. } => WrapperKind::Shared,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, BindingKind::Shared { .. })
    }
}

/// Binding decision for a single declared field.
pub fn classify_field(field: &FieldDecl) -> BindingKind {
    let shared_key = |key: &Option<String>| key.clone().unwrap_or_else(|| field.name.clone());
    match &field.decorator {
        DecoratorTag::None | DecoratorTag::State => BindingKind::OwnedSimple,
        DecoratorTag::Prop => BindingKind::OneWay,
        DecoratorTag::Link => BindingKind::TwoWay,
        DecoratorTag::Provide { key } => BindingKind::Shared {
            key: shared_key(key),
            role: SharedRole::Provider,
        },
        DecoratorTag::Consume { key } => BindingKind::Shared {
            key: shared_key(key),
            role: SharedRole::Consumer,
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FIELD TABLE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    pub name: String,
    pub binding: BindingKind,
    /// False for undecorated fields, which keep a plain slot.
    pub reactive: bool,
    pub has_initializer: bool,
    pub location: SourceLocation,
}

impl FieldEntry {
    pub fn backing_name(&self) -> String {
        backing_name(&self.name)
    }
}

pub fn backing_name(field: &str) -> String {
    format!("{}__", field)
}

/// Declared fields of one component in declaration order, lowered or not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldTable {
    entries: Vec<FieldEntry>,
}

impl FieldTable {
    pub fn of(decl: &ComponentDecl) -> Self {
        let entries = decl
            .members
            .iter()
            .filter_map(|member| match member {
                ClassMember::Field(field) => Some(FieldEntry {
                    name: field.name.clone(),
                    binding: classify_field(field),
                    reactive: field.decorator != DecoratorTag::None,
                    has_initializer: field.initializer.is_some(),
                    location: field.location.clone(),
                }),
                ClassMember::Wrapper(wrapper) => Some(FieldEntry {
                    name: wrapper.source_field.clone(),
                    binding: wrapper.binding.clone(),
                    reactive: true,
                    has_initializer: wrapper.initializer.is_some(),
                    location: wrapper.location.clone(),
                }),
                _ => None,
            })
            .collect();
        FieldTable { entries }
    }

    pub fn get(&self, name: &str) -> Option<&FieldEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldEntry> {
        self.entries.iter()
    }

    pub fn reactive_names(&self) -> HashSet<String> {
        self.entries
            .iter()
            .filter(|e| e.reactive)
            .map(|e| e.name.clone())
            .collect()
    }

    fn keys_with_role(&self, role: SharedRole) -> impl Iterator<Item = (&str, &FieldEntry)> {
        self.entries.iter().filter_map(move |e| match &e.binding {
            BindingKind::Shared { key, role: r } if *r == role => Some((key.as_str(), e)),
            _ => None,
        })
    }

    pub fn provided_keys(&self) -> Vec<String> {
        self.keys_with_role(SharedRole::Provider)
            .map(|(key, _)| key.to_string())
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CALL-SITE BINDING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ArgumentValue {
    /// Plain value code evaluated in the parent at construction.
    Expression { code: String },
    /// Reference to the parent's wrapper, e.g. `this.count__`.
    Wrapper { code: String, field: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundArgument {
    pub field: String,
    pub binding: BindingKind,
    pub value: ArgumentValue,
}

/// `$count` or `this.$count` names the parent field `count`.
pub fn sigil_reference(code: &str) -> Option<&str> {
    let code = code.trim();
    let code = code.strip_prefix("this.").unwrap_or(code);
    let name = code.strip_prefix('$')?;
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return None,
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(name)
    } else {
        None
    }
}

/// Call-site context: where the child is instantiated and what the parent owns.
pub struct CallSite<'a> {
    pub file: &'a str,
    pub parent: &'a str,
    pub parent_fields: &'a FieldTable,
    pub location: &'a SourceLocation,
}

impl CallSite<'_> {
    fn error(&self, code: &str, message: String) -> CompilerError {
        CompilerError::at(code, &message, self.file, self.parent, self.location)
    }
}

/// Bind the arguments of one instantiation of `child` against its declaration.
///
/// Positional arguments fill the child's non-shared fields in declaration
/// order. Arguments aimed at provider or consumer fields are dropped; those
/// resolve through the ancestor registry instead.
pub fn bind_call_site(
    child: &ComponentDecl,
    args: &[CallArgument],
    site: &CallSite<'_>,
) -> Result<Vec<BoundArgument>, CompilerError> {
    let child_fields = FieldTable::of(child);
    let positional_slots: Vec<&FieldEntry> = child_fields
        .iter()
        .filter(|e| !e.binding.is_shared())
        .collect();

    let mut supplied: HashMap<String, &CallArgument> = HashMap::new();
    let mut next_positional = 0usize;
    for arg in args {
        let field_name = match &arg.name {
            Some(name) => {
                if child_fields.get(name).is_none() {
                    return Err(site.error(
                        INV_BINDING_SHAPE,
                        format!("'{}' has no field named '{}'.", child.name, name),
                    ));
                }
                name.clone()
            }
            None => {
                let slot = positional_slots.get(next_positional).ok_or_else(|| {
                    site.error(
                        INV_BINDING_SHAPE,
                        format!(
                            "Too many positional arguments for '{}': expected at most {}.",
                            child.name,
                            positional_slots.len()
                        ),
                    )
                })?;
                next_positional += 1;
                slot.name.clone()
            }
        };
        if supplied.insert(field_name.clone(), arg).is_some() {
            return Err(site.error(
                INV_BINDING_SHAPE,
                format!("Field '{}' of '{}' is bound twice.", field_name, child.name),
            ));
        }
    }

    let mut bound = Vec::new();
    for entry in child_fields.iter() {
        let arg = supplied.get(&entry.name);
        match (&entry.binding, arg) {
            (BindingKind::Shared { key, .. }, Some(_)) => {
                debug!(
                    child = %child.name,
                    field = %entry.name,
                    key = %key,
                    "dropping call-site argument for shared field"
                );
            }
            (BindingKind::Shared { .. }, None) => {}
            (BindingKind::TwoWay, None) => {
                return Err(site
                    .error(
                        INV_UNRESOLVED_BINDING,
                        format!(
                            "Two-way field '{}' of '{}' has no counterpart at this call site.",
                            entry.name, child.name
                        ),
                    )
                    .with_hint(format!("Pass {}: $<parentField>.", entry.name)));
            }
            (BindingKind::TwoWay, Some(arg)) => {
                let parent_field = sigil_reference(&arg.value).ok_or_else(|| {
                    site.error(
                        INV_BINDING_SHAPE,
                        format!(
                            "Two-way field '{}' of '{}' needs a $-reference, got '{}'.",
                            entry.name, child.name, arg.value
                        ),
                    )
                })?;
                let target = site
                    .parent_fields
                    .get(parent_field)
                    .filter(|p| p.reactive)
                    .ok_or_else(|| {
                        site.error(
                            INV_UNRESOLVED_BINDING,
                            format!(
                                "'${}' does not name a reactive field of '{}'.",
                                parent_field, site.parent
                            ),
                        )
                    })?;
                bound.push(BoundArgument {
                    field: entry.name.clone(),
                    binding: BindingKind::TwoWay,
                    value: ArgumentValue::Wrapper {
                        code: format!("this.{}", target.backing_name()),
                        field: target.name.clone(),
                    },
                });
            }
            (binding, Some(arg)) => {
                if sigil_reference(&arg.value).is_some() {
                    return Err(site.error(
                        INV_BINDING_SHAPE,
                        format!(
                            "Field '{}' of '{}' takes a value, not a $-reference.",
                            entry.name, child.name
                        ),
                    ));
                }
                bound.push(BoundArgument {
                    field: entry.name.clone(),
                    binding: binding.clone(),
                    value: ArgumentValue::Expression {
                        code: arg.value.trim().to_string(),
                    },
                });
            }
            (BindingKind::OneWay, None) if !entry.has_initializer => {
                return Err(site.error(
                    INV_BINDING_SHAPE,
                    format!(
                        "One-way field '{}' of '{}' has neither an argument nor an initializer.",
                        entry.name, child.name
                    ),
                ));
            }
            (_, None) => {}
        }
    }
    trace!(child = %child.name, count = bound.len(), "bound call-site arguments");
    Ok(bound)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROVIDER / CONSUMER RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Keys visible to a component: its ancestors' provided keys, innermost first.
pub struct ProviderScope<'p> {
    pub parent: Option<&'p ProviderScope<'p>>,
    pub owner: &'p str,
    pub keys: Vec<String>,
}

impl<'p> ProviderScope<'p> {
    pub fn root() -> Self {
        ProviderScope {
            parent: None,
            owner: "",
            keys: Vec::new(),
        }
    }

    /// Nearest component providing `key`.
    pub fn resolve(&self, key: &str) -> Option<&'p str> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if current.keys.iter().any(|k| k == key) {
                return Some(current.owner);
            }
            scope = current.parent;
        }
        None
    }

    fn visible(&self) -> Vec<String> {
        let mut keys = Vec::new();
        let mut scope = Some(self);
        while let Some(current) = scope {
            keys.extend(current.keys.iter().cloned());
            scope = current.parent;
        }
        keys.sort();
        keys.dedup();
        keys
    }
}

struct InstantiationCollector<'k> {
    known: &'k HashSet<&'k str>,
    found: Vec<String>,
}

impl UiVisitor for InstantiationCollector<'_> {
    fn visit_element(&mut self, element: &ElementNode) {
        if self.known.contains(element.name.as_str()) && !self.found.contains(&element.name) {
            self.found.push(element.name.clone());
        }
        walk_element(self, element);
    }

    fn visit_open(&mut self, open: &OpenMarker) {
        if matches!(open.role, MarkerRole::Component { .. }) && !self.found.contains(&open.component) {
            self.found.push(open.component.clone());
        }
    }
}

/// Custom components instantiated anywhere in `decl`'s render and builder bodies.
pub fn instantiated_children(decl: &ComponentDecl, known: &HashSet<&str>) -> Vec<String> {
    let mut collector = InstantiationCollector {
        known,
        found: Vec::new(),
    };
    collector.visit_body(&decl.render.body);
    for method in decl.methods().filter(|m| m.is_builder) {
        collector.visit_body(&method.body);
    }
    collector.found
}

/// Walks the instantiation graph from every root and records, per component,
/// the first consumer whose key has no provider on some ancestry path.
pub struct ModuleResolver<'m> {
    file: &'m str,
    decls: HashMap<&'m str, &'m ComponentDecl>,
    children: HashMap<&'m str, Vec<String>>,
    failures: HashMap<String, CompilerError>,
    visited: HashSet<(String, Vec<String>)>,
}

impl<'m> ModuleResolver<'m> {
    pub fn new(file: &'m str, components: &'m [ComponentDecl]) -> Self {
        let mut decls: HashMap<&str, &ComponentDecl> = HashMap::new();
        for decl in components {
            decls.entry(decl.name.as_str()).or_insert(decl);
        }
        let known: HashSet<&str> = decls.keys().copied().collect();
        let children = decls
            .iter()
            .map(|(name, decl)| (*name, instantiated_children(decl, &known)))
            .collect();
        ModuleResolver {
            file,
            decls,
            children,
            failures: HashMap::new(),
            visited: HashSet::new(),
        }
    }

    /// Resolve every component; returns consumer failures keyed by component.
    pub fn resolve(mut self, components: &'m [ComponentDecl]) -> HashMap<String, CompilerError> {
        let instantiated: HashSet<String> = self.children.values().flatten().cloned().collect();
        let roots: Vec<&str> = components
            .iter()
            .filter(|d| d.is_entry || !instantiated.contains(&d.name))
            .map(|d| d.name.as_str())
            .collect();

        for root in &roots {
            let scope = ProviderScope::root();
            self.visit(root, &scope, &mut Vec::new());
        }
        // Components reachable only through instantiation cycles act as roots,
        // all of them, so the outcome does not depend on declaration order.
        let cycle_only: Vec<&str> = components
            .iter()
            .map(|d| d.name.as_str())
            .filter(|name| !self.visited.iter().any(|(visited, _)| visited == name))
            .collect();
        for name in cycle_only {
            let scope = ProviderScope::root();
            self.visit(name, &scope, &mut Vec::new());
        }
        self.failures
    }

    fn visit(&mut self, name: &str, scope: &ProviderScope<'_>, path: &mut Vec<String>) {
        if path.iter().any(|p| p == name) {
            return;
        }
        let Some(decl) = self.decls.get(name).copied() else {
            return;
        };
        if !self.visited.insert((name.to_string(), scope.visible())) {
            return;
        }

        let fields = FieldTable::of(decl);
        if !self.failures.contains_key(name) {
            for (key, entry) in fields.keys_with_role(SharedRole::Consumer) {
                if scope.resolve(key).is_none() {
                    let err = CompilerError::at(
                        INV_UNRESOLVED_BINDING,
                        &format!(
                            "Consumer field '{}' of '{}' has no ancestor provider for key '{}'.",
                            entry.name, name, key
                        ),
                        self.file,
                        name,
                        &entry.location,
                    )
                    .with_hint(format!("Declare @Provide('{}') in an enclosing component.", key));
                    self.failures.insert(name.to_string(), err);
                    break;
                }
            }
        }

        let own = ProviderScope {
            parent: Some(scope),
            owner: decl.name.as_str(),
            keys: fields.provided_keys(),
        };
        let children = self.children.get(name).cloned().unwrap_or_default();
        path.push(name.to_string());
        for child in &children {
            self.visit(child, &own, path);
        }
        path.pop();
    }
}
