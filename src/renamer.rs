use oxc_ast_visit::Visit;
use std::collections::HashSet;

use crate::components;

/// Collects `this.$f` spans to rewrite and UI-construction calls to reject.
pub struct WrapperRefVisitor<'s> {
    pub wrapped: &'s HashSet<String>,
    pub custom_components: &'s HashSet<String>,
    pub replacements: Vec<(u32, u32, String)>,
    pub ui_calls: Vec<(String, u32)>,
}

impl<'s> WrapperRefVisitor<'s> {
    pub fn new(wrapped: &'s HashSet<String>, custom_components: &'s HashSet<String>) -> Self {
        WrapperRefVisitor {
            wrapped,
            custom_components,
            replacements: Vec::new(),
            ui_calls: Vec::new(),
        }
    }
}

impl<'a> Visit<'a> for WrapperRefVisitor<'_> {
    fn visit_static_member_expression(
        &mut self,
        expr: &oxc_ast::ast::StaticMemberExpression<'a>,
    ) {
        if let oxc_ast::ast::Expression::ThisExpression(_) = &expr.object {
            if let Some(field) = expr.property.name.as_str().strip_prefix('$') {
                if self.wrapped.contains(field) {
                    self.replacements.push((
                        expr.property.span.start,
                        expr.property.span.end,
                        format!("{}__", field),
                    ));
                }
            }
        }
        oxc_ast_visit::walk::walk_static_member_expression(self, expr);
    }

    fn visit_call_expression(&mut self, expr: &oxc_ast::ast::CallExpression<'a>) {
        if let oxc_ast::ast::Expression::Identifier(ident) = &expr.callee {
            let name = ident.name.as_str();
            if components::is_builtin(name) || self.custom_components.contains(name) {
                self.ui_calls.push((name.to_string(), ident.span.start));
            }
        }
        oxc_ast_visit::walk::walk_call_expression(self, expr);
    }
}

/// Splice `replacements` (spans relative to `offset`) into `code`, last first.
pub fn apply_replacements(code: &str, offset: u32, replacements: &[(u32, u32, String)]) -> String {
    let mut sorted: Vec<&(u32, u32, String)> = replacements.iter().collect();
    sorted.sort_by(|a, b| b.0.cmp(&a.0));

    let mut result = code.to_string();
    for (start, end, text) in sorted {
        let (Some(start), Some(end)) = (start.checked_sub(offset), end.checked_sub(offset)) else {
            continue;
        };
        let (start, end) = (start as usize, end as usize);
        if end <= result.len() && start <= end {
            result.replace_range(start..end, text);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_replacements_in_reverse_order() {
        let code = "a.$x + a.$y";
        let out = apply_replacements(
            code,
            0,
            &[(2, 4, "x__".to_string()), (9, 11, "y__".to_string())],
        );
        assert_eq!(out, "a.x__ + a.y__");
    }

    #[test]
    fn test_apply_replacements_with_offset() {
        let out = apply_replacements("$x", 10, &[(10, 12, "x__".to_string())]);
        assert_eq!(out, "x__");
    }
}
