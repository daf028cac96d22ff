//! Decorator Lowering Pass.
//!
//! Every decorated field `f` becomes a private wrapper-backed field `f__` plus a
//! public accessor pair named `f`. Undecorated fields, already-lowered members
//! and methods are carried over unchanged, so running the pass twice is a no-op.

use std::collections::HashSet;

use tracing::debug;

use crate::binding::{backing_name, classify_field, BindingKind, SharedRole};
use crate::validate::{
    validate_fields, AccessorPair, ClassMember, ComponentDecl, CompilerError, DecoratorTag,
    WrapperField, BUILD_METHOD,
};

pub const INITIAL_RENDER_METHOD: &str = "initialRender";
pub const RENDER_METHOD: &str = "render";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoweredFields {
    pub members: Vec<ClassMember>,
    /// Keys this component registers for its descendants.
    pub provided: Vec<String>,
    /// Source names of all wrapper-backed fields.
    pub wrapped: HashSet<String>,
}

pub fn lower_fields(decl: &ComponentDecl, file: &str) -> Result<LoweredFields, CompilerError> {
    validate_fields(decl, file)?;

    let mut out = LoweredFields::default();
    for member in &decl.members {
        match member {
            ClassMember::Field(field) if field.decorator != DecoratorTag::None => {
                let binding = classify_field(field);
                record_binding(&mut out, &field.name, &binding);
                let backing = backing_name(&field.name);
                debug!(
                    component = %decl.name,
                    field = %field.name,
                    decorator = field.decorator.label(),
                    "lowering decorated field"
                );
                out.members.push(ClassMember::Wrapper(WrapperField {
                    name: backing.clone(),
                    source_field: field.name.clone(),
                    value_type: field.value_type.clone(),
                    binding,
                    initializer: field.initializer.clone(),
                    location: field.location.clone(),
                }));
                out.members.push(ClassMember::Accessors(AccessorPair {
                    name: field.name.clone(),
                    backing,
                    value_type: field.value_type.clone(),
                }));
            }
            ClassMember::Wrapper(wrapper) => {
                record_binding(&mut out, &wrapper.source_field, &wrapper.binding);
                out.members.push(member.clone());
            }
            _ => out.members.push(member.clone()),
        }
    }
    Ok(out)
}

fn record_binding(out: &mut LoweredFields, field: &str, binding: &BindingKind) {
    out.wrapped.insert(field.to_string());
    if let BindingKind::Shared {
        key,
        role: SharedRole::Provider,
    } = binding
    {
        out.provided.push(key.clone());
    }
}

/// Name of the render method after lowering.
pub fn render_method_name(current: &str, partial_update: bool) -> String {
    if current != BUILD_METHOD {
        return current.to_string();
    }
    if partial_update {
        INITIAL_RENDER_METHOD.to_string()
    } else {
        RENDER_METHOD.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{FieldDecl, MethodDecl, RenderMethod, SourceLocation};

    fn decl(members: Vec<ClassMember>) -> ComponentDecl {
        ComponentDecl {
            name: "Counter".to_string(),
            is_entry: true,
            members,
            render: RenderMethod {
                name: BUILD_METHOD.to_string(),
                body: vec![],
            },
            location: SourceLocation::default(),
        }
    }

    fn field(name: &str, decorator: DecoratorTag, init: Option<&str>) -> ClassMember {
        ClassMember::Field(FieldDecl {
            name: name.to_string(),
            value_type: "string".to_string(),
            decorator,
            initializer: init.map(str::to_string),
            location: SourceLocation::default(),
        })
    }

    #[test]
    fn test_decorated_field_becomes_wrapper_and_accessors() {
        let d = decl(vec![
            field("message", DecoratorTag::State, Some("'Hello'")),
            field("plain", DecoratorTag::None, Some("1")),
        ]);
        let lowered = lower_fields(&d, "c.ets").unwrap();
        assert_eq!(lowered.members.len(), 3);
        match &lowered.members[0] {
            ClassMember::Wrapper(w) => {
                assert_eq!(w.name, "message__");
                assert_eq!(w.source_field, "message");
                assert_eq!(w.binding, BindingKind::OwnedSimple);
                assert_eq!(w.initializer.as_deref(), Some("'Hello'"));
            }
            other => panic!("expected wrapper, got {:?}", other),
        }
        match &lowered.members[1] {
            ClassMember::Accessors(a) => {
                assert_eq!(a.name, "message");
                assert_eq!(a.backing, "message__");
            }
            other => panic!("expected accessors, got {:?}", other),
        }
        assert!(matches!(&lowered.members[2], ClassMember::Field(f) if f.name == "plain"));
        assert!(lowered.wrapped.contains("message"));
        assert!(!lowered.wrapped.contains("plain"));
    }

    #[test]
    fn test_lowering_twice_is_a_no_op() {
        let d = decl(vec![
            field("theme", DecoratorTag::Provide { key: Some("appTheme".into()) }, Some("'light'")),
            ClassMember::Method(MethodDecl {
                name: "reset".to_string(),
                params: vec![],
                is_builder: false,
                body: vec![],
                location: SourceLocation::default(),
            }),
        ]);
        let once = lower_fields(&d, "c.ets").unwrap();
        let mut again_decl = d.clone();
        again_decl.members = once.members.clone();
        let twice = lower_fields(&again_decl, "c.ets").unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.provided, vec!["appTheme".to_string()]);
    }

    #[test]
    fn test_invalid_field_is_propagated() {
        let d = decl(vec![field("count", DecoratorTag::Consume { key: None }, Some("1"))]);
        assert!(lower_fields(&d, "c.ets").is_err());
    }

    #[test]
    fn test_render_method_naming() {
        assert_eq!(render_method_name("build", true), "initialRender");
        assert_eq!(render_method_name("build", false), "render");
        assert_eq!(render_method_name("initialRender", false), "initialRender");
    }
}
