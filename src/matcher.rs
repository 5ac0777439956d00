//! Backtracking subgraph matcher
//!
//! Executes a [`CompiledPattern`]'s plan against a sentence. Each plan step
//! keeps a choice point (its candidate list and the next one to try); the
//! iterator advances the deepest choice point and backtracks when it runs
//! dry, so bindings come out lazily and in canonical order: lexicographic
//! over the plan, each candidate list ascending by token index.

use std::sync::Arc;

use tracing::trace;

use crate::compiler::{Check, CompiledPattern, Source, Structural};
use crate::tree::{NodeId, ROOT, Sentence};

/// Injective assignment of pattern nodes to tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Token bound to each pattern node, in declaration order
    nodes: Vec<NodeId>,
    names: Arc<[String]>,
}

impl Binding {
    /// Get the token bound to a pattern node by name
    pub fn get(&self, name: &str) -> Option<NodeId> {
        let pos = self.names.iter().position(|n| n == name)?;
        self.nodes.get(pos).copied()
    }

    /// Tokens in pattern declaration order
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Iterate over (name, token) pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.nodes.iter().copied())
    }
}

/// A choice point: the candidates of one plan step
#[derive(Debug)]
struct Frame {
    candidates: Vec<NodeId>,
    next: usize,
}

/// Lazy iterator over the bindings of a pattern in one sentence
pub struct Matches<'p, 's> {
    pattern: &'p CompiledPattern,
    sentence: &'s Sentence,
    /// Dependents of every token (empty unless the plan needs it)
    dependents: Vec<Vec<NodeId>>,
    frames: Vec<Frame>,
    /// Token bound to each pattern node (0 = unbound)
    assignment: Vec<NodeId>,
    /// Tokens currently bound, by index
    used: Vec<bool>,
}

impl<'p, 's> Matches<'p, 's> {
    fn new(pattern: &'p CompiledPattern, sentence: &'s Sentence) -> Self {
        let needs_dependents = pattern.needs_dependents
            || pattern
                .plan
                .iter()
                .any(|s| matches!(s.source, Source::Dependents { .. }));
        let dependents = if needs_dependents {
            sentence.dependents()
        } else {
            Vec::new()
        };

        let mut matches = Self {
            pattern,
            sentence,
            dependents,
            frames: Vec::with_capacity(pattern.plan.len()),
            assignment: vec![0; pattern.var_names.len()],
            used: vec![false; sentence.len() + 1],
        };
        let first = matches.candidates(0);
        matches.frames.push(Frame {
            candidates: first,
            next: 0,
        });
        matches
    }

    /// Candidate tokens for a plan step, given the nodes bound before it
    fn candidates(&self, depth: usize) -> Vec<NodeId> {
        match self.pattern.plan[depth].source {
            Source::Scan => (1..=self.sentence.len()).collect(),
            Source::Dependents { of, .. } => self
                .dependents
                .get(self.assignment[of])
                .cloned()
                .unwrap_or_default(),
            Source::Governors { of, .. } => self
                .sentence
                .node(self.assignment[of])
                .map(|node| {
                    node.govs
                        .keys()
                        .copied()
                        .filter(|&g| g != ROOT && self.sentence.contains(g))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Whether `candidate` can fill the pattern node of plan step `depth`
    fn accepts(&self, depth: usize, candidate: NodeId) -> bool {
        let step = &self.pattern.plan[depth];
        let Some(node) = self.sentence.node(candidate) else {
            return false;
        };

        // Feature predicates
        for (key, predicates) in &self.pattern.predicates[step.var] {
            let value = node.feature(key);
            if !predicates.iter().all(|p| p.test(value)) {
                return false;
            }
        }

        // Edges to `_` and ROOT
        for constraint in &self.pattern.structural[step.var] {
            let ok = match constraint {
                Structural::Governor {
                    root_only,
                    label,
                    negated,
                } => {
                    let present = node
                        .govs
                        .iter()
                        .any(|(&gov, rel)| (!root_only || gov == ROOT) && label.test(rel));
                    present != *negated
                }
                Structural::Dependent { label, negated } => {
                    let present = self.dependents[candidate].iter().any(|&dep| {
                        self.sentence
                            .node(dep)
                            .and_then(|d| d.relation(candidate))
                            .is_some_and(|rel| label.test(rel))
                    });
                    present != *negated
                }
            };
            if !ok {
                return false;
            }
        }

        // The edge the candidate was reached through
        let reached = match step.source {
            Source::Scan => true,
            Source::Dependents { of, edge } => node
                .relation(self.assignment[of])
                .is_some_and(|rel| self.pattern.edges[edge].label.test(rel)),
            Source::Governors { of, edge } => self
                .sentence
                .node(self.assignment[of])
                .and_then(|dep| dep.relation(candidate))
                .is_some_and(|rel| self.pattern.edges[edge].label.test(rel)),
        };
        if !reached {
            return false;
        }

        // Remaining edges and precedence, with this node tentatively bound
        step.checks.iter().all(|check| match *check {
            Check::Edge(idx) => {
                let edge = &self.pattern.edges[idx];
                let gov = if edge.from == step.var {
                    candidate
                } else {
                    self.assignment[edge.from]
                };
                let dep = if edge.to == step.var {
                    candidate
                } else {
                    self.assignment[edge.to]
                };
                let present = self
                    .sentence
                    .node(dep)
                    .and_then(|d| d.relation(gov))
                    .is_some_and(|rel| edge.label.test(rel));
                present != edge.negated
            }
            Check::Precedence(idx) => {
                let precedence = self.pattern.precedences[idx];
                let position = |var: usize| {
                    if var == step.var {
                        candidate
                    } else {
                        self.assignment[var]
                    }
                };
                let (before, after) = (position(precedence.before), position(precedence.after));
                if precedence.immediate {
                    after == before + 1
                } else {
                    before < after
                }
            }
        })
    }

    fn binding(&self) -> Binding {
        Binding {
            nodes: self.assignment.clone(),
            names: Arc::clone(&self.pattern.var_names),
        }
    }
}

impl Iterator for Matches<'_, '_> {
    type Item = Binding;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let depth = self.frames.len().checked_sub(1)?;
            let var = self.pattern.plan[depth].var;

            // Release the choice made at this depth last time round
            let previous = std::mem::take(&mut self.assignment[var]);
            if previous != 0 {
                self.used[previous] = false;
            }

            let chosen = loop {
                let frame = &mut self.frames[depth];
                let Some(&candidate) = frame.candidates.get(frame.next) else {
                    break None;
                };
                frame.next += 1;
                if !self.used[candidate] && self.accepts(depth, candidate) {
                    break Some(candidate);
                }
            };

            let Some(candidate) = chosen else {
                // Choice point exhausted: backtrack
                self.frames.pop();
                continue;
            };

            self.assignment[var] = candidate;
            self.used[candidate] = true;

            if depth + 1 == self.pattern.plan.len() {
                trace!(nodes = ?self.assignment, "pattern matched");
                return Some(self.binding());
            }

            let candidates = self.candidates(depth + 1);
            self.frames.push(Frame {
                candidates,
                next: 0,
            });
        }
    }
}

impl CompiledPattern {
    /// All bindings of the pattern in `sentence`, in canonical order
    pub fn matches<'p, 's>(&'p self, sentence: &'s Sentence) -> Matches<'p, 's> {
        Matches::new(self, sentence)
    }

    /// First binding in canonical order
    pub fn first_match(&self, sentence: &Sentence) -> Option<Binding> {
        self.matches(sentence).next()
    }

    pub fn is_match(&self, sentence: &Sentence) -> bool {
        self.first_match(sentence).is_some()
    }
}
