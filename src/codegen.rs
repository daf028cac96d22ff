//! Diagnostic JavaScript printer for lowered components.
//!
//! Renders a `LoweredComponent` in create/pop style: one class extending
//! `View`, a constructor that builds every `f__` wrapper, the accessor pairs,
//! the lowered render method and the remaining methods. The printer never
//! changes semantics; it only spells out what the lowered tree already says.

use crate::binding::{ArgumentValue, BindingKind, BoundArgument, SharedRole};
use crate::pipeline::LoweredComponent;
use crate::validate::{
    AccessorPair, BranchBlock, ClassMember, CloseMarker, CompilerError, FieldDecl, ItemGenerator,
    MarkerRole, MethodDecl, OpenMarker, SourceLocation, UiStatement, WrapperField,
    INV_UNBALANCED_TREE, INV_UNSUPPORTED_NESTING,
};

const INDENT: &str = "  ";
const VIEW_BASE: &str = "View";
const ITEM_GEN_FUNCTION: &str = "__itemGenFunction__";
const KEY_GEN_FUNCTION: &str = "__keyGenFunction__";

// ═══════════════════════════════════════════════════════════════════════════════
// WRITER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct CodeWriter {
    out: String,
    depth: usize,
}

impl CodeWriter {
    fn line(&mut self, text: &str) {
        for part in text.lines() {
            if part.trim().is_empty() {
                self.out.push('\n');
                continue;
            }
            for _ in 0..self.depth {
                self.out.push_str(INDENT);
            }
            self.out.push_str(part.trim_end());
            self.out.push('\n');
        }
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn open(&mut self, text: &str) {
        self.line(text);
        self.depth += 1;
    }

    fn close(&mut self, text: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
    }

    /// Close one block and open the next on the same line (`} else {`).
    fn reopen(&mut self, text: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
        self.depth += 1;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLASS
// ═══════════════════════════════════════════════════════════════════════════════

/// Print one lowered component as a JavaScript class.
pub fn print_component(lowered: &LoweredComponent) -> Result<String, CompilerError> {
    let decl = &lowered.decl;
    let mut w = CodeWriter::default();
    w.open(&format!("class {} extends {} {{", decl.name, VIEW_BASE));

    w.open("constructor(parent, params) {");
    w.line("super(parent);");
    for member in &decl.members {
        match member {
            ClassMember::Wrapper(wrapper) => print_wrapper_init(&mut w, wrapper),
            ClassMember::Field(field) => print_plain_init(&mut w, field),
            _ => {}
        }
    }
    w.close("}");

    for member in &decl.members {
        if let ClassMember::Accessors(pair) = member {
            w.blank();
            print_accessors(&mut w, pair);
        }
    }

    let mut body = BodyPrinter::new(&decl.name);
    w.blank();
    w.open(&format!("{}() {{", decl.render.name));
    body.print_block(&mut w, &decl.render.body)?;
    w.close("}");

    for method in decl.methods() {
        w.blank();
        print_method(&mut w, &mut body, method)?;
    }

    w.close("}");
    Ok(w.out)
}

fn print_wrapper_init(w: &mut CodeWriter, wrapper: &WrapperField) {
    let field = &wrapper.source_field;
    let this_wrapper = format!("this.{}", wrapper.name);
    let from_params = |fallback: Option<&str>| match fallback {
        Some(init) => format!(
            "params.{f} !== undefined ? params.{f} : {init}",
            f = field,
            init = init
        ),
        None => format!("params.{}", field),
    };
    let init = wrapper.initializer.as_deref();
    match &wrapper.binding {
        BindingKind::OwnedSimple => w.line(&format!(
            "{} = new ObservedPropertySimple({}, this, \"{}\");",
            this_wrapper,
            from_params(init),
            field
        )),
        BindingKind::OneWay => w.line(&format!(
            "{} = new SynchedPropertySimpleOneWay({}, this, \"{}\");",
            this_wrapper,
            from_params(init),
            field
        )),
        BindingKind::TwoWay => w.line(&format!(
            "{} = new SynchedPropertySimpleTwoWay(params.{}, this, \"{}\");",
            this_wrapper, field, field
        )),
        BindingKind::Shared {
            key,
            role: SharedRole::Provider,
        } => {
            w.line(&format!(
                "{} = new ObservedPropertySimple({}, this, \"{}\");",
                this_wrapper,
                init.unwrap_or("undefined"),
                field
            ));
            w.line(&format!("this.addProvidedVar(\"{}\", {});", key, this_wrapper));
        }
        BindingKind::Shared {
            key,
            role: SharedRole::Consumer,
        } => w.line(&format!(
            "{} = this.initializeConsume(\"{}\", \"{}\");",
            this_wrapper, key, field
        )),
    }
}

fn print_plain_init(w: &mut CodeWriter, field: &FieldDecl) {
    let value = match &field.initializer {
        Some(init) => format!(
            "params.{f} !== undefined ? params.{f} : {init}",
            f = field.name,
            init = init
        ),
        None => format!("params.{}", field.name),
    };
    w.line(&format!("this.{} = {};", field.name, value));
}

fn print_accessors(w: &mut CodeWriter, pair: &AccessorPair) {
    w.open(&format!("get {}() {{", pair.name));
    w.line(&format!("return this.{}.get();", pair.backing));
    w.close("}");
    w.open(&format!("set {}(newValue) {{", pair.name));
    w.line(&format!("this.{}.set(newValue);", pair.backing));
    w.close("}");
}

fn print_method(
    w: &mut CodeWriter,
    body: &mut BodyPrinter<'_>,
    method: &MethodDecl,
) -> Result<(), CompilerError> {
    w.open(&format!("{}({}) {{", method.name, method.params.join(", ")));
    body.print_block(w, &method.body)?;
    w.close("}");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDER BODIES
// ═══════════════════════════════════════════════════════════════════════════════

/// What a close marker prints, decided when the matching open was seen.
enum OpenFrame {
    Pop(String),
    Silent(String),
}

impl OpenFrame {
    fn name(&self) -> &str {
        match self {
            OpenFrame::Pop(name) | OpenFrame::Silent(name) => name,
        }
    }
}

struct BodyPrinter<'c> {
    component: &'c str,
}

impl<'c> BodyPrinter<'c> {
    fn new(component: &'c str) -> Self {
        BodyPrinter { component }
    }

    fn print_block(&mut self, w: &mut CodeWriter, body: &[UiStatement]) -> Result<(), CompilerError> {
        let mut open: Vec<OpenFrame> = Vec::new();
        for stmt in body {
            match stmt {
                UiStatement::Open(marker) => open.push(self.print_open(w, marker)),
                UiStatement::Close(marker) => self.print_close(w, &mut open, marker)?,
                UiStatement::Branch(block) => self.print_branch(w, block)?,
                UiStatement::ItemGenerator(generator) => self.print_generator(w, generator)?,
                UiStatement::Statement(raw) => w.line(&raw.code),
                UiStatement::Element(_) | UiStatement::If(_) | UiStatement::ForEach(_) => {
                    return Err(self.error(
                        INV_UNSUPPORTED_NESTING,
                        "declarative UI form reached the printer; lower the component first",
                    ));
                }
            }
        }
        if let Some(frame) = open.last() {
            return Err(self.error(
                INV_UNBALANCED_TREE,
                &format!("'{}' is never closed", frame.name()),
            ));
        }
        Ok(())
    }

    fn print_open(&mut self, w: &mut CodeWriter, marker: &OpenMarker) -> OpenFrame {
        let name = &marker.component;
        match &marker.role {
            MarkerRole::Component { bindings } => {
                w.line(&format!(
                    "{}.create(new {}(this, {}));",
                    VIEW_BASE,
                    name,
                    params_object(bindings)
                ));
                OpenFrame::Silent(name.clone())
            }
            MarkerRole::Arm { branch_id, .. } => {
                w.line(&format!("{}.branchId({});", name, branch_id));
                OpenFrame::Silent(name.clone())
            }
            MarkerRole::Element | MarkerRole::Conditional { .. } | MarkerRole::Loop => {
                w.line(&format!("{}.create({});", name, marker.args.join(", ")));
                for attr in &marker.attributes {
                    w.line(&format!("{}.{}({});", name, attr.method, attr.args.join(", ")));
                }
                OpenFrame::Pop(name.clone())
            }
        }
    }

    fn print_close(
        &mut self,
        w: &mut CodeWriter,
        open: &mut Vec<OpenFrame>,
        marker: &CloseMarker,
    ) -> Result<(), CompilerError> {
        match open.pop() {
            Some(frame) if frame.name() == marker.component => {
                if let OpenFrame::Pop(name) = frame {
                    w.line(&format!("{}.pop();", name));
                }
                Ok(())
            }
            _ => Err(self.error(
                INV_UNBALANCED_TREE,
                &format!("close of '{}' has no matching open", marker.component),
            )),
        }
    }

    fn print_branch(&mut self, w: &mut CodeWriter, block: &BranchBlock) -> Result<(), CompilerError> {
        for (index, arm) in block.arms.iter().enumerate() {
            let head = match (&arm.condition, index) {
                (Some(cond), 0) => format!("if ({}) {{", cond),
                (Some(cond), _) => format!("}} else if ({}) {{", cond),
                (None, 0) => "{".to_string(),
                (None, _) => "} else {".to_string(),
            };
            if index == 0 {
                w.open(&head);
            } else {
                w.reopen(&head);
            }
            self.print_block(w, &arm.body)?;
        }
        if !block.arms.is_empty() {
            w.close("}");
        }
        Ok(())
    }

    fn print_generator(
        &mut self,
        w: &mut CodeWriter,
        generator: &ItemGenerator,
    ) -> Result<(), CompilerError> {
        let params = generator.params.join(", ");
        w.open(&format!("const {} = ({}) => {{", ITEM_GEN_FUNCTION, params));
        self.print_block(w, &generator.body)?;
        w.close("};");

        let item = generator.params.first().map(String::as_str).unwrap_or("item");
        let key = generator
            .key_generator
            .clone()
            .unwrap_or_else(|| format!("({}) => {}", item, item));
        w.line(&format!("const {} = {};", KEY_GEN_FUNCTION, key));
        w.line(&format!("ForEach.keyGenerator({});", KEY_GEN_FUNCTION));
        w.line(&format!("ForEach.itemGenerator({});", ITEM_GEN_FUNCTION));
        Ok(())
    }

    fn error(&self, code: &str, message: &str) -> CompilerError {
        CompilerError::at(
            code,
            message,
            "<printer>",
            self.component,
            &SourceLocation::default(),
        )
    }
}

fn params_object(bindings: &[BoundArgument]) -> String {
    if bindings.is_empty() {
        return "{}".to_string();
    }
    let entries: Vec<String> = bindings
        .iter()
        .map(|bound| {
            let code = match &bound.value {
                ArgumentValue::Expression { code } | ArgumentValue::Wrapper { code, .. } => code,
            };
            format!("{}: {}", bound.field, code)
        })
        .collect();
    format!("{{ {} }}", entries.join(", "))
}
