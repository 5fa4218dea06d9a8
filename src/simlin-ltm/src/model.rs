// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! A frozen, validated model: variable and link arenas plus the dependency
//! graph derived from equations and stock flow lists.

use std::collections::HashMap;

use crate::common::{ErrorCode, Ident, Result, canonicalize};
use crate::variable::{Equation, LinkPolarity, Variable};

/// Stable index of a variable in the model's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) u32);

impl VarId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable index of a link in the model's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub(crate) u32);

impl LinkId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The builtin time variable always occupies slot 0.
pub(crate) const TIME_OFF: usize = 0;
pub const TIME_IDENT: &str = "time";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// The target's equation reads the source directly.
    Instantaneous,
    /// Implicit edge from a flow into a stock it fills.
    Inflow,
    /// Implicit edge from a flow into a stock it drains.
    Outflow,
}

impl LinkKind {
    pub fn is_flow_to_stock(self) -> bool {
        matches!(self, LinkKind::Inflow | LinkKind::Outflow)
    }
}

/// A directed causal edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub from: VarId,
    pub to: VarId,
    pub polarity: LinkPolarity,
    pub kind: LinkKind,
}

/// A compiled model, frozen at load: variables and edges are never mutated
/// during a run, so a single `Rc<Model>` may back any number of concurrent
/// analyses as long as each owns its per-run storage.
#[derive(Debug)]
pub struct Model {
    vars: Vec<Variable>,
    ident_map: HashMap<Ident, VarId>,
    links: Vec<Link>,
    /// Per variable: equation inputs resolved to ids, in declaration order.
    input_ids: Vec<Vec<VarId>>,
    /// Per stock: initial-equation inputs resolved to ids.
    init_input_ids: Vec<Vec<VarId>>,
    /// Per variable: incoming instantaneous links, aligned with `input_ids`.
    incoming: Vec<Vec<LinkId>>,
    /// Per variable: all outgoing links.
    outgoing: Vec<Vec<LinkId>>,
    /// Per stock: inflow and outflow ids.
    stock_inflows: Vec<Vec<VarId>>,
    stock_outflows: Vec<Vec<VarId>>,
}

impl Model {
    /// Freeze a set of variables into a validated model.
    ///
    /// A builtin `time` variable is added at slot 0; the integrator writes it
    /// directly and equations may declare it as an input.  Fails on duplicate
    /// identifiers, dependencies on identifiers that don't exist, and stock
    /// flow lists that name missing or non-flow variables.
    pub fn new(variables: Vec<Variable>) -> Result<Model> {
        let mut vars = Vec::with_capacity(variables.len() + 1);
        vars.push(Variable::Aux {
            ident: TIME_IDENT.to_string(),
            equation: Equation::constant(f64::NAN),
        });
        vars.extend(variables);

        let mut ident_map: HashMap<Ident, VarId> = HashMap::with_capacity(vars.len());
        for (i, var) in vars.iter_mut().enumerate() {
            let ident = canonicalize(var.ident());
            set_ident(var, ident.clone());
            if ident_map.insert(ident.clone(), VarId(i as u32)).is_some() {
                return crate::model_err!(DuplicateVariable, ident);
            }
        }

        let n = vars.len();
        let mut input_ids: Vec<Vec<VarId>> = vec![vec![]; n];
        let mut init_input_ids: Vec<Vec<VarId>> = vec![vec![]; n];
        let mut incoming: Vec<Vec<LinkId>> = vec![vec![]; n];
        let mut outgoing: Vec<Vec<LinkId>> = vec![vec![]; n];
        let mut stock_inflows: Vec<Vec<VarId>> = vec![vec![]; n];
        let mut stock_outflows: Vec<Vec<VarId>> = vec![vec![]; n];
        let mut links: Vec<Link> = Vec::new();

        let resolve = |map: &HashMap<Ident, VarId>,
                       ident: &str,
                       ctx: &str,
                       code: ErrorCode|
         -> Result<VarId> {
            map.get(ident).copied().ok_or_else(|| {
                crate::common::Error::new(
                    crate::common::ErrorKind::Model,
                    code,
                    Some(format!("{ctx}: {ident}")),
                )
            })
        };

        for (i, var) in vars.iter().enumerate() {
            let to = VarId(i as u32);
            match var {
                Variable::Stock {
                    ident,
                    init,
                    inflows,
                    outflows,
                    ..
                } => {
                    for dep in init.inputs() {
                        let from = resolve(
                            &ident_map,
                            &dep.ident,
                            ident,
                            ErrorCode::UnknownDependency,
                        )?;
                        init_input_ids[i].push(from);
                    }
                    for (flows, kind) in [
                        (inflows, LinkKind::Inflow),
                        (outflows, LinkKind::Outflow),
                    ] {
                        for flow in flows {
                            let flow = canonicalize(flow);
                            let from =
                                resolve(&ident_map, &flow, ident, ErrorCode::MissingFlow)?;
                            if !vars[from.index()].is_flow() {
                                return crate::model_err!(
                                    NotAFlow,
                                    format!("{ident}: {flow}")
                                );
                            }
                            let polarity = match kind {
                                LinkKind::Inflow => LinkPolarity::Positive,
                                _ => LinkPolarity::Negative,
                            };
                            let link_id = LinkId(links.len() as u32);
                            links.push(Link {
                                from,
                                to,
                                polarity,
                                kind,
                            });
                            outgoing[from.index()].push(link_id);
                            match kind {
                                LinkKind::Inflow => stock_inflows[i].push(from),
                                _ => stock_outflows[i].push(from),
                            }
                        }
                    }
                }
                Variable::Flow { ident, equation } | Variable::Aux { ident, equation } => {
                    for dep in equation.inputs() {
                        let from = resolve(
                            &ident_map,
                            &dep.ident,
                            ident,
                            ErrorCode::UnknownDependency,
                        )?;
                        input_ids[i].push(from);
                        let link_id = LinkId(links.len() as u32);
                        links.push(Link {
                            from,
                            to,
                            polarity: dep.polarity,
                            kind: LinkKind::Instantaneous,
                        });
                        incoming[i].push(link_id);
                        outgoing[from.index()].push(link_id);
                    }
                }
            }
        }

        Ok(Model {
            vars,
            ident_map,
            links,
            input_ids,
            init_input_ids,
            incoming,
            outgoing,
            stock_inflows,
            stock_outflows,
        })
    }

    #[inline]
    pub fn n_vars(&self) -> usize {
        self.vars.len()
    }

    #[inline]
    pub fn n_links(&self) -> usize {
        self.links.len()
    }

    #[inline]
    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }

    #[inline]
    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id.index()]
    }

    pub fn vars(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.vars
            .iter()
            .enumerate()
            .map(|(i, v)| (VarId(i as u32), v))
    }

    pub fn links(&self) -> impl Iterator<Item = (LinkId, &Link)> {
        self.links
            .iter()
            .enumerate()
            .map(|(i, l)| (LinkId(i as u32), l))
    }

    pub fn var_id(&self, ident: &str) -> Option<VarId> {
        self.ident_map.get(&canonicalize(ident)).copied()
    }

    pub fn ident(&self, id: VarId) -> &str {
        self.vars[id.index()].ident()
    }

    pub(crate) fn inputs_of(&self, id: VarId) -> &[VarId] {
        &self.input_ids[id.index()]
    }

    pub(crate) fn init_inputs_of(&self, id: VarId) -> &[VarId] {
        &self.init_input_ids[id.index()]
    }

    pub(crate) fn incoming_links(&self, id: VarId) -> &[LinkId] {
        &self.incoming[id.index()]
    }

    pub fn outgoing_links(&self, id: VarId) -> &[LinkId] {
        &self.outgoing[id.index()]
    }

    pub(crate) fn stock_flows(&self, id: VarId) -> (&[VarId], &[VarId]) {
        (
            &self.stock_inflows[id.index()],
            &self.stock_outflows[id.index()],
        )
    }

    /// The first link from `from` to `to`, if any.
    pub fn link_between(&self, from: VarId, to: VarId) -> Option<LinkId> {
        self.outgoing[from.index()]
            .iter()
            .copied()
            .find(|&l| self.links[l.index()].to == to)
    }
}

fn set_ident(var: &mut Variable, canonical: Ident) {
    match var {
        Variable::Stock { ident, .. }
        | Variable::Flow { ident, .. }
        | Variable::Aux { ident, .. } => *ident = canonical,
    }
}
