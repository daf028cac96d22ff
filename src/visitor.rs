use crate::validate::{
    BranchBlock, CloseMarker, ElementNode, ForEachNode, IfNode, ItemGenerator, LoweredArm,
    OpenMarker, RawStatement, UiStatement,
};

/// The UiVisitor trait is the single traversal mechanism for render bodies.
///
/// Rules:
/// 1. Traversal follows source order.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers call the matching `walk_*` function to continue traversal
///    unless pruning is intended.
/// 4. Each `visit_body` call covers one linear marker block: the top-level
///    body, a conditional arm body, or a ForEach item body.
pub trait UiVisitor {
    fn visit_body(&mut self, body: &[UiStatement]) {
        walk_body(self, body);
    }

    fn visit_statement(&mut self, stmt: &UiStatement) {
        walk_statement(self, stmt);
    }

    fn visit_element(&mut self, element: &ElementNode) {
        walk_element(self, element);
    }

    fn visit_if(&mut self, node: &IfNode) {
        walk_if(self, node);
    }

    fn visit_for_each(&mut self, node: &ForEachNode) {
        walk_for_each(self, node);
    }

    fn visit_raw(&mut self, _raw: &RawStatement) {
        // Leaf
    }

    fn visit_open(&mut self, _open: &OpenMarker) {}

    fn visit_close(&mut self, _close: &CloseMarker) {}

    fn visit_branch(&mut self, block: &BranchBlock) {
        walk_branch(self, block);
    }

    fn visit_lowered_arm(&mut self, _site: u32, arm: &LoweredArm) {
        self.visit_body(&arm.body);
    }

    fn visit_item_generator(&mut self, generator: &ItemGenerator) {
        self.visit_body(&generator.body);
    }
}

pub fn walk_body<V: UiVisitor + ?Sized>(visitor: &mut V, body: &[UiStatement]) {
    for stmt in body {
        visitor.visit_statement(stmt);
    }
}

pub fn walk_statement<V: UiVisitor + ?Sized>(visitor: &mut V, stmt: &UiStatement) {
    match stmt {
        UiStatement::Element(el) => visitor.visit_element(el),
        UiStatement::If(node) => visitor.visit_if(node),
        UiStatement::ForEach(node) => visitor.visit_for_each(node),
        UiStatement::Statement(raw) => visitor.visit_raw(raw),
        UiStatement::Open(open) => visitor.visit_open(open),
        UiStatement::Close(close) => visitor.visit_close(close),
        UiStatement::Branch(block) => visitor.visit_branch(block),
        UiStatement::ItemGenerator(generator) => visitor.visit_item_generator(generator),
    }
}

pub fn walk_element<V: UiVisitor + ?Sized>(visitor: &mut V, element: &ElementNode) {
    for child in &element.children {
        visitor.visit_statement(child);
    }
}

pub fn walk_if<V: UiVisitor + ?Sized>(visitor: &mut V, node: &IfNode) {
    for arm in &node.arms {
        visitor.visit_body(&arm.body);
    }
}

pub fn walk_for_each<V: UiVisitor + ?Sized>(visitor: &mut V, node: &ForEachNode) {
    visitor.visit_body(&node.body);
}

pub fn walk_branch<V: UiVisitor + ?Sized>(visitor: &mut V, block: &BranchBlock) {
    for arm in &block.arms {
        visitor.visit_lowered_arm(block.site, arm);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BALANCE CHECK
// ═══════════════════════════════════════════════════════════════════════════════

/// Verifies every linear block of a lowered body closes what it opens.
#[derive(Default)]
pub struct BalanceChecker {
    frames: Vec<Vec<(String, Option<u32>)>>,
    pub errors: Vec<String>,
    pub markers: usize,
}

impl BalanceChecker {
    pub fn check(body: &[UiStatement]) -> Result<usize, String> {
        let mut checker = BalanceChecker::default();
        checker.visit_body(body);
        match checker.errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(checker.markers),
        }
    }
}

impl UiVisitor for BalanceChecker {
    fn visit_body(&mut self, body: &[UiStatement]) {
        self.frames.push(Vec::new());
        walk_body(self, body);
        if let Some(frame) = self.frames.pop() {
            if let Some((name, _)) = frame.last() {
                self.errors.push(format!("'{}' is opened but never closed", name));
            }
        }
    }

    fn visit_element(&mut self, element: &ElementNode) {
        self.errors
            .push(format!("declarative element '{}' left in lowered body", element.name));
    }

    fn visit_open(&mut self, open: &OpenMarker) {
        self.markers += 1;
        let branch = match open.role {
            crate::validate::MarkerRole::Arm { branch_id, .. } => Some(branch_id),
            _ => None,
        };
        if let Some(frame) = self.frames.last_mut() {
            frame.push((open.component.clone(), branch));
        }
    }

    fn visit_close(&mut self, close: &CloseMarker) {
        self.markers += 1;
        let top = self.frames.last_mut().and_then(|frame| frame.pop());
        match top {
            Some((name, branch)) if name == close.component && branch == close.branch_id => {}
            Some((name, _)) => self.errors.push(format!(
                "close of '{}' does not match open '{}'",
                close.component, name
            )),
            None => self
                .errors
                .push(format!("close of '{}' without an open marker", close.component)),
        }
    }
}
