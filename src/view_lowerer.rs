//! View-Tree Lowering for declarative render bodies.
//!
//! Turns nested element calls into a linear open/close marker stream. Each
//! conditional becomes a container marker around a branch block whose arms
//! carry positional branchIds; each ForEach becomes a loop container around
//! an item generator. Already-lowered forms pass through unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::binding::{bind_call_site, ArgumentValue, CallSite, FieldTable};
use crate::components::{FOR_EACH_CONTAINER, IF_CONTAINER};
use crate::passthrough::Preserver;
use crate::validate::{
    BranchBlock, ChainCall, CloseMarker, ComponentDecl, CompilerError, ElementNode, ForEachNode,
    IfNode, ItemGenerator, LoweredArm, MarkerRole, OpenMarker, RawStatement, SourceLocation,
    UiStatement, INV_MALFORMED_CONDITIONAL, INV_UNBALANCED_TREE,
};

// ═══════════════════════════════════════════════════════════════════════════════
// BRANCH REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSite {
    pub site: u32,
    pub method: String,
    /// Index k holds the branchId of arm k.
    pub branch_ids: Vec<u32>,
    pub location: SourceLocation,
}

/// Per-component list of conditional sites. A site is never rewritten once
/// registered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRegistry {
    sites: Vec<BranchSite>,
}

impl BranchRegistry {
    fn register(&mut self, site: u32, method: &str, arms: usize, location: &SourceLocation) {
        if self.get(site).is_some() {
            return;
        }
        trace!(site, method, arms, "registered branch site");
        self.sites.push(BranchSite {
            site,
            method: method.to_string(),
            branch_ids: (0..arms as u32).collect(),
            location: location.clone(),
        });
    }

    pub fn get(&self, site: u32) -> Option<&BranchSite> {
        self.sites.iter().find(|s| s.site == site)
    }

    pub fn branch_id(&self, site: u32, arm: usize) -> Option<u32> {
        self.get(site).and_then(|s| s.branch_ids.get(arm).copied())
    }

    pub fn sites(&self) -> &[BranchSite] {
        &self.sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VIEW LOWERER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ViewContext<'c> {
    pub file: &'c str,
    pub component: &'c str,
    pub fields: &'c FieldTable,
    pub components: &'c HashMap<&'c str, &'c ComponentDecl>,
    pub preserver: &'c Preserver<'c>,
}

enum Step<'b> {
    Visit(&'b UiStatement),
    Close(&'b str),
}

pub struct ViewLowerer<'c> {
    ctx: &'c ViewContext<'c>,
    registry: BranchRegistry,
    next_site: u32,
    method: String,
}

impl<'c> ViewLowerer<'c> {
    pub fn new(ctx: &'c ViewContext<'c>) -> Self {
        ViewLowerer {
            ctx,
            registry: BranchRegistry::default(),
            next_site: 0,
            method: String::new(),
        }
    }

    /// Lower one method body. Sites keep counting across methods.
    pub fn lower_method(
        &mut self,
        method: &str,
        body: &[UiStatement],
    ) -> Result<Vec<UiStatement>, CompilerError> {
        self.method = method.to_string();
        self.lower_block(body)
    }

    pub fn finish(self) -> BranchRegistry {
        self.registry
    }

    fn lower_block(&mut self, body: &[UiStatement]) -> Result<Vec<UiStatement>, CompilerError> {
        let mut work: Vec<Step<'_>> = body.iter().rev().map(Step::Visit).collect();
        let mut open: Vec<&str> = Vec::new();
        let mut out = Vec::new();

        while let Some(step) = work.pop() {
            match step {
                Step::Close(name) => {
                    if open.pop() != Some(name) {
                        return Err(self.error(
                            INV_UNBALANCED_TREE,
                            format!("close of '{}' does not match the open stack", name),
                            &SourceLocation::default(),
                        ));
                    }
                    out.push(UiStatement::Close(CloseMarker {
                        component: name.to_string(),
                        branch_id: None,
                    }));
                }
                Step::Visit(stmt) => match stmt {
                    UiStatement::Element(el) => {
                        out.push(self.open_element(el)?);
                        open.push(&el.name);
                        work.push(Step::Close(&el.name));
                        work.extend(el.children.iter().rev().map(Step::Visit));
                    }
                    UiStatement::If(node) => out.extend(self.lower_if(node)?),
                    UiStatement::ForEach(node) => out.extend(self.lower_for_each(node)?),
                    UiStatement::Statement(raw) => {
                        out.push(UiStatement::Statement(RawStatement {
                            code: self.ctx.preserver.statement(&raw.code, &raw.location)?,
                            location: raw.location.clone(),
                        }));
                    }
                    UiStatement::Branch(block) => out.push(self.reregister(block)?),
                    UiStatement::ItemGenerator(generator) => {
                        out.push(UiStatement::ItemGenerator(ItemGenerator {
                            params: generator.params.clone(),
                            key_generator: generator.key_generator.clone(),
                            body: self.lower_block(&generator.body)?,
                        }));
                    }
                    UiStatement::Open(_) | UiStatement::Close(_) => out.push(stmt.clone()),
                },
            }
        }

        if let Some(name) = open.last() {
            return Err(self.error(
                INV_UNBALANCED_TREE,
                format!("'{}' left open at end of block", name),
                &SourceLocation::default(),
            ));
        }
        Ok(out)
    }

    fn open_element(&self, el: &ElementNode) -> Result<UiStatement, CompilerError> {
        let attributes = self.lower_chain(&el.chain, &el.location)?;

        if let Some(child) = self.ctx.components.get(el.name.as_str()) {
            let site = CallSite {
                file: self.ctx.file,
                parent: self.ctx.component,
                parent_fields: self.ctx.fields,
                location: &el.location,
            };
            let mut bindings = bind_call_site(child, &el.args, &site)?;
            for bound in &mut bindings {
                if let ArgumentValue::Expression { code } = &mut bound.value {
                    *code = self.ctx.preserver.expression(code, &el.location)?;
                }
            }
            return Ok(UiStatement::Open(OpenMarker {
                component: el.name.clone(),
                args: vec![],
                attributes,
                role: MarkerRole::Component { bindings },
                location: el.location.clone(),
            }));
        }

        let args = el
            .args
            .iter()
            .map(|arg| self.ctx.preserver.expression(&arg.value, &el.location))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(UiStatement::Open(OpenMarker {
            component: el.name.clone(),
            args,
            attributes,
            role: MarkerRole::Element,
            location: el.location.clone(),
        }))
    }

    fn lower_chain(
        &self,
        chain: &[ChainCall],
        location: &SourceLocation,
    ) -> Result<Vec<ChainCall>, CompilerError> {
        chain
            .iter()
            .map(|call| -> Result<ChainCall, CompilerError> {
                Ok(ChainCall {
                    method: call.method.clone(),
                    args: call
                        .args
                        .iter()
                        .map(|arg| self.ctx.preserver.expression(arg, location))
                        .collect::<Result<Vec<_>, _>>()?,
                })
            })
            .collect()
    }

    fn lower_if(&mut self, node: &IfNode) -> Result<Vec<UiStatement>, CompilerError> {
        let last = node.arms.len().saturating_sub(1);
        if let Some((index, _)) = node
            .arms
            .iter()
            .enumerate()
            .find(|(i, arm)| arm.condition.is_none() && *i != last)
        {
            return Err(self.error(
                INV_MALFORMED_CONDITIONAL,
                format!("else arm at position {} is not the last arm", index),
                &node.location,
            ));
        }

        let site = self.next_site;
        self.next_site += 1;
        self.registry
            .register(site, &self.method, node.arms.len(), &node.location);
        debug!(component = %self.ctx.component, site, arms = node.arms.len(), "lowering conditional");

        let mut arms = Vec::with_capacity(node.arms.len());
        for (index, arm) in node.arms.iter().enumerate() {
            let branch_id = self.registry.branch_id(site, index).unwrap_or(index as u32);
            let condition = match &arm.condition {
                Some(code) => Some(self.ctx.preserver.expression(code, &node.location)?),
                None => None,
            };
            let mut body = vec![UiStatement::Open(OpenMarker {
                component: IF_CONTAINER.to_string(),
                args: vec![],
                attributes: vec![],
                role: MarkerRole::Arm { site, branch_id },
                location: node.location.clone(),
            })];
            body.extend(self.lower_block(&arm.body)?);
            body.push(UiStatement::Close(CloseMarker {
                component: IF_CONTAINER.to_string(),
                branch_id: Some(branch_id),
            }));
            arms.push(LoweredArm {
                condition,
                branch_id,
                body,
            });
        }

        Ok(vec![
            UiStatement::Open(OpenMarker {
                component: IF_CONTAINER.to_string(),
                args: vec![],
                attributes: vec![],
                role: MarkerRole::Conditional { site },
                location: node.location.clone(),
            }),
            UiStatement::Branch(BranchBlock {
                site,
                arms,
                location: node.location.clone(),
            }),
            UiStatement::Close(CloseMarker {
                component: IF_CONTAINER.to_string(),
                branch_id: None,
            }),
        ])
    }

    fn lower_for_each(&mut self, node: &ForEachNode) -> Result<Vec<UiStatement>, CompilerError> {
        let source = self.ctx.preserver.expression(&node.source, &node.location)?;
        let key_generator = match &node.key_generator {
            Some(code) => Some(self.ctx.preserver.expression(code, &node.location)?),
            None => None,
        };
        let mut params = vec![node.item_var.clone()];
        params.extend(node.index_var.clone());

        Ok(vec![
            UiStatement::Open(OpenMarker {
                component: FOR_EACH_CONTAINER.to_string(),
                args: vec![source],
                attributes: vec![],
                role: MarkerRole::Loop,
                location: node.location.clone(),
            }),
            UiStatement::ItemGenerator(ItemGenerator {
                params,
                key_generator,
                body: self.lower_block(&node.body)?,
            }),
            UiStatement::Close(CloseMarker {
                component: FOR_EACH_CONTAINER.to_string(),
                branch_id: None,
            }),
        ])
    }

    /// Already-lowered conditional: keep its ids, record the site again.
    fn reregister(&mut self, block: &BranchBlock) -> Result<UiStatement, CompilerError> {
        self.registry
            .register(block.site, &self.method, block.arms.len(), &block.location);
        self.next_site = self.next_site.max(block.site + 1);
        let mut arms = Vec::with_capacity(block.arms.len());
        for arm in &block.arms {
            arms.push(LoweredArm {
                condition: arm.condition.clone(),
                branch_id: arm.branch_id,
                body: self.lower_block(&arm.body)?,
            });
        }
        Ok(UiStatement::Branch(BranchBlock {
            site: block.site,
            arms,
            location: block.location.clone(),
        }))
    }

    fn error(&self, code: &str, message: String, location: &SourceLocation) -> CompilerError {
        CompilerError::at(code, &message, self.ctx.file, self.ctx.component, location)
    }
}
