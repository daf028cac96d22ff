use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// INVARIANT CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const INV_UNRESOLVED_BINDING: &str = "ETS-ERR-BIND-001";
pub const INV_BINDING_SHAPE: &str = "ETS-ERR-BIND-002";
pub const INV_UNSUPPORTED_NESTING: &str = "ETS-ERR-NEST-001";
pub const INV_INVALID_FIELD: &str = "ETS-ERR-DECL-001";
pub const INV_MALFORMED_CONDITIONAL: &str = "ETS-ERR-DECL-002";
pub const INV_DUPLICATE_COMPONENT: &str = "ETS-ERR-DECL-003";
pub const INV_UNBALANCED_TREE: &str = "ETS-ERR-TREE-001";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        INV_UNRESOLVED_BINDING => {
            "Every linked or consumed field is connected to exactly one counterpart before construction."
        }
        INV_BINDING_SHAPE => {
            "Call-site arguments agree with the decorator tag declared on the child field."
        }
        INV_UNSUPPORTED_NESTING => {
            "UI construction only appears where the view tree can be linearized."
        }
        INV_INVALID_FIELD => {
            "Linked and consumed fields never carry local initializers; provided fields always do."
        }
        INV_MALFORMED_CONDITIONAL => "A conditional has at most one default arm and it comes last.",
        INV_DUPLICATE_COMPONENT => "Component names are unique within a module.",
        INV_UNBALANCED_TREE => "Every open marker has exactly one matching close marker.",
        _ => "Unknown invariant.",
    }
}

fn get_error_type(code: &str) -> &'static str {
    match code {
        INV_UNRESOLVED_BINDING => "UnresolvedBindingError",
        INV_BINDING_SHAPE => "BindingShapeError",
        INV_UNSUPPORTED_NESTING => "UnsupportedNestingError",
        INV_INVALID_FIELD => "InvalidFieldError",
        INV_MALFORMED_CONDITIONAL => "MalformedConditionalError",
        INV_DUPLICATE_COMPONENT => "DuplicateComponentError",
        INV_UNBALANCED_TREE => "UnbalancedTreeError",
        _ => "COMPILER_INVARIANT_VIOLATION",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// Programmatic view of [`CompilerError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnresolvedBinding,
    BindingShape,
    UnsupportedNesting,
    InvalidField,
    MalformedConditional,
    DuplicateComponent,
    UnbalancedTree,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("[{code}] {message} ({file}:{line}:{column})")]
pub struct CompilerError {
    pub code: String,
    pub error_type: String,
    pub message: String,
    pub guarantee: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub context: Option<String>,
    pub hints: Vec<String>,
}

impl CompilerError {
    pub fn new(code: &str, message: &str, file: &str, line: u32, column: u32) -> Self {
        Self::with_details(code, message, file, line, column, None, vec![])
    }

    pub fn with_details(
        code: &str,
        message: &str,
        file: &str,
        line: u32,
        column: u32,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        CompilerError {
            code: code.to_string(),
            error_type: get_error_type(code).to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            file: file.to_string(),
            line,
            column,
            context,
            hints,
        }
    }

    /// Error raised while lowering `component`, positioned at `location`.
    pub fn at(code: &str, message: &str, file: &str, component: &str, location: &SourceLocation) -> Self {
        Self::with_details(
            code,
            message,
            file,
            location.line,
            location.column,
            Some(component.to_string()),
            vec![],
        )
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code.as_str() {
            INV_UNRESOLVED_BINDING => ErrorKind::UnresolvedBinding,
            INV_BINDING_SHAPE => ErrorKind::BindingShape,
            INV_UNSUPPORTED_NESTING => ErrorKind::UnsupportedNesting,
            INV_INVALID_FIELD => ErrorKind::InvalidField,
            INV_MALFORMED_CONDITIONAL => ErrorKind::MalformedConditional,
            INV_DUPLICATE_COMPONENT => ErrorKind::DuplicateComponent,
            INV_UNBALANCED_TREE => ErrorKind::UnbalancedTree,
            _ => ErrorKind::Other,
        }
    }

    /// Component whose lowering this error aborted.
    pub fn component(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IR TYPES: DECLARATIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceModule {
    #[serde(default)]
    pub file_path: String,
    pub components: Vec<ComponentDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDecl {
    pub name: String,
    #[serde(default)]
    pub is_entry: bool,
    #[serde(default)]
    pub members: Vec<ClassMember>,
    pub render: RenderMethod,
    #[serde(default)]
    pub location: SourceLocation,
}

impl ComponentDecl {
    pub fn fields(&self) -> impl Iterator<Item = &FieldDecl> {
        self.members.iter().filter_map(|m| match m {
            ClassMember::Field(f) => Some(f),
            _ => None,
        })
    }

    pub fn wrappers(&self) -> impl Iterator<Item = &WrapperField> {
        self.members.iter().filter_map(|m| match m {
            ClassMember::Wrapper(w) => Some(w),
            _ => None,
        })
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDecl> {
        self.members.iter().filter_map(|m| match m {
            ClassMember::Method(method) => Some(method),
            _ => None,
        })
    }

    /// True once no decorated field remains to be rewritten.
    pub fn is_lowered(&self) -> bool {
        self.fields().all(|f| f.decorator == DecoratorTag::None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "member", rename_all = "kebab-case")]
pub enum ClassMember {
    Field(FieldDecl),
    Wrapper(WrapperField),
    Accessors(AccessorPair),
    Method(MethodDecl),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDecl {
    pub name: String,
    #[serde(default = "default_value_type")]
    pub value_type: String,
    #[serde(default)]
    pub decorator: DecoratorTag,
    #[serde(default)]
    pub initializer: Option<String>,
    #[serde(default)]
    pub location: SourceLocation,
}

fn default_value_type() -> String {
    "any".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DecoratorTag {
    #[default]
    None,
    State,
    Prop,
    Link,
    Provide {
        #[serde(default)]
        key: Option<String>,
    },
    Consume {
        #[serde(default)]
        key: Option<String>,
    },
}

impl DecoratorTag {
    pub fn label(&self) -> &'static str {
        match self {
            DecoratorTag::None => "none",
            DecoratorTag::State => "@State",
            DecoratorTag::Prop => "@Prop",
            DecoratorTag::Link => "@Link",
            DecoratorTag::Provide { .. } => "@Provide",
            DecoratorTag::Consume { .. } => "@Consume",
        }
    }
}

/// Private wrapper-backed field produced for a decorated field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WrapperField {
    /// Private name, `<field>__`.
    pub name: String,
    pub source_field: String,
    pub value_type: String,
    pub binding: crate::binding::BindingKind,
    #[serde(default)]
    pub initializer: Option<String>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessorPair {
    pub name: String,
    pub backing: String,
    pub value_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MethodDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub is_builder: bool,
    #[serde(default)]
    pub body: Vec<UiStatement>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderMethod {
    #[serde(default = "default_render_name")]
    pub name: String,
    #[serde(default)]
    pub body: Vec<UiStatement>,
}

pub const BUILD_METHOD: &str = "build";

fn default_render_name() -> String {
    BUILD_METHOD.to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// IR TYPES: RENDER BODY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiStatement {
    // Declarative forms
    Element(ElementNode),
    If(IfNode),
    ForEach(ForEachNode),
    Statement(RawStatement),
    // Lowered forms
    Open(OpenMarker),
    Close(CloseMarker),
    Branch(BranchBlock),
    ItemGenerator(ItemGenerator),
}

impl UiStatement {
    /// True for forms the view-tree pass must linearize.
    pub fn is_ui_construction(&self) -> bool {
        !matches!(self, UiStatement::Statement(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallArgument {
    #[serde(default)]
    pub name: Option<String>,
    pub value: String,
}

impl CallArgument {
    pub fn positional(value: impl Into<String>) -> Self {
        CallArgument {
            name: None,
            value: value.into(),
        }
    }

    pub fn named(name: impl Into<String>, value: impl Into<String>) -> Self {
        CallArgument {
            name: Some(name.into()),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChainCall {
    pub method: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub name: String,
    #[serde(default)]
    pub args: Vec<CallArgument>,
    #[serde(default)]
    pub chain: Vec<ChainCall>,
    #[serde(default)]
    pub children: Vec<UiStatement>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalArm {
    /// `None` marks the trailing `else` arm.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub body: Vec<UiStatement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IfNode {
    pub arms: Vec<ConditionalArm>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForEachNode {
    pub source: String,
    pub item_var: String,
    #[serde(default)]
    pub index_var: Option<String>,
    #[serde(default)]
    pub key_generator: Option<String>,
    #[serde(default)]
    pub body: Vec<UiStatement>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawStatement {
    pub code: String,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenMarker {
    pub component: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<ChainCall>,
    pub role: MarkerRole,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MarkerRole {
    Element,
    Component {
        bindings: Vec<crate::binding::BoundArgument>,
    },
    Conditional {
        site: u32,
    },
    Arm {
        site: u32,
        #[serde(rename = "branchId")]
        branch_id: u32,
    },
    Loop,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloseMarker {
    pub component: String,
    /// Set when this closes a conditional arm rather than a node.
    #[serde(default)]
    pub branch_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BranchBlock {
    pub site: u32,
    pub arms: Vec<LoweredArm>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoweredArm {
    #[serde(default)]
    pub condition: Option<String>,
    pub branch_id: u32,
    pub body: Vec<UiStatement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemGenerator {
    pub params: Vec<String>,
    #[serde(default)]
    pub key_generator: Option<String>,
    pub body: Vec<UiStatement>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECLARATION CHECKS
// ═══════════════════════════════════════════════════════════════════════════════

/// Checks the per-field initializer rules of a single component.
pub fn validate_fields(decl: &ComponentDecl, file: &str) -> Result<(), CompilerError> {
    let mut provided: Vec<String> = Vec::new();
    for field in decl.fields() {
        let fail = |message: String| {
            CompilerError::at(INV_INVALID_FIELD, &message, file, &decl.name, &field.location)
        };
        match &field.decorator {
            DecoratorTag::Link | DecoratorTag::Consume { .. } if field.initializer.is_some() => {
                return Err(fail(format!(
                    "{} field '{}' must not carry a local initializer.",
                    field.decorator.label(),
                    field.name
                ))
                .with_hint("Remove the initializer; the value comes from the binding source."));
            }
            DecoratorTag::Provide { key } => {
                if field.initializer.is_none() {
                    return Err(fail(format!(
                        "@Provide field '{}' must carry an initializer.",
                        field.name
                    )));
                }
                let key = key.clone().unwrap_or_else(|| field.name.clone());
                if provided.contains(&key) {
                    return Err(fail(format!(
                        "Provider key '{}' is declared twice in '{}'.",
                        key, decl.name
                    )));
                }
                provided.push(key);
            }
            _ => {}
        }
    }
    Ok(())
}
