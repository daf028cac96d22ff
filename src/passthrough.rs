//! Pass-Through Preserver.
//!
//! Ordinary statements and embedded expressions are re-emitted verbatim apart
//! from `this.$f` wrapper references, which become `this.f__` when `f` is a
//! lowered field. UI construction found inside such code is rejected.

use std::collections::HashSet;

use oxc_allocator::Allocator;
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::SourceType;
use tracing::warn;

use crate::renamer::{apply_replacements, WrapperRefVisitor};
use crate::validate::{CompilerError, SourceLocation, INV_UNSUPPORTED_NESTING};

const BODY_PREFIX: &str = "async function __body__() {\n";
const BODY_SUFFIX: &str = "\n}";

pub struct Preserver<'c> {
    pub file: &'c str,
    pub component: &'c str,
    wrapped: HashSet<String>,
    custom_components: &'c HashSet<String>,
}

impl<'c> Preserver<'c> {
    pub fn new(
        file: &'c str,
        component: &'c str,
        wrapped: HashSet<String>,
        custom_components: &'c HashSet<String>,
    ) -> Self {
        Preserver {
            file,
            component,
            wrapped,
            custom_components,
        }
    }

    /// Preserve one or more statements of an ordinary or render body.
    pub fn statement(&self, code: &str, location: &SourceLocation) -> Result<String, CompilerError> {
        if !needs_scan(code) {
            return Ok(code.to_string());
        }
        let source = format!("{}{}{}", BODY_PREFIX, code, BODY_SUFFIX);
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &source, source_type()).parse();
        if !ret.errors.is_empty() || ret.panicked {
            warn!(
                component = %self.component,
                line = location.line,
                "pass-through statement did not parse; emitting unchanged"
            );
            return Ok(code.to_string());
        }

        let mut visitor = WrapperRefVisitor::new(&self.wrapped, self.custom_components);
        visitor.visit_program(&ret.program);
        self.finish(code, BODY_PREFIX.len() as u32, visitor, location)
    }

    /// Preserve a single expression (condition, argument, attribute value).
    pub fn expression(&self, code: &str, location: &SourceLocation) -> Result<String, CompilerError> {
        if !needs_scan(code) {
            return Ok(code.to_string());
        }
        let allocator = Allocator::default();
        match Parser::new(&allocator, code, source_type()).parse_expression() {
            Ok(expr) => {
                let mut visitor = WrapperRefVisitor::new(&self.wrapped, self.custom_components);
                visitor.visit_expression(&expr);
                self.finish(code, 0, visitor, location)
            }
            Err(_) => {
                warn!(
                    component = %self.component,
                    line = location.line,
                    expression = %code,
                    "expression did not parse; emitting unchanged"
                );
                Ok(code.to_string())
            }
        }
    }

    fn finish(
        &self,
        code: &str,
        offset: u32,
        visitor: WrapperRefVisitor<'_>,
        location: &SourceLocation,
    ) -> Result<String, CompilerError> {
        if let Some((name, _)) = visitor.ui_calls.first() {
            return Err(CompilerError::at(
                INV_UNSUPPORTED_NESTING,
                &format!(
                    "UI construction '{}(...)' appears inside ordinary code of '{}'.",
                    name, self.component
                ),
                self.file,
                self.component,
                location,
            )
            .with_hint("Move the element into the render body or an @Builder method."));
        }
        Ok(apply_replacements(code, offset, &visitor.replacements))
    }
}

fn source_type() -> SourceType {
    SourceType::default().with_typescript(true).with_module(true)
}

fn needs_scan(code: &str) -> bool {
    code.contains('$') || code.contains('(')
}
