//! Pattern compilation
//!
//! Validates a parsed pattern and turns it into a search plan: predicates
//! indexed by feature key, edges grouped by source and target node, and an
//! ordered list of steps that binds the anchor first and then walks pattern
//! edges outward. Rule action lists are resolved to binding slots here too,
//! so the rewrite engine never looks names up.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use regex::Regex;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::pattern::{
    ActionAst, EdgeConstraint, FeatureKey, FeaturePredicate, LabelTest, NodeRef, PatternAst,
    Placement, RelationType, ValueTest,
};

/// Invalid pattern or action list
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern declares no nodes")]
    EmptyPattern,

    #[error("node {name} is declared twice (line {line})")]
    DuplicateNode { name: String, line: usize },

    #[error("edge `{edge}` references undeclared node {name}")]
    UndeclaredNode { name: String, edge: String },

    #[error("edge `{edge}`: ROOT can only be a governor")]
    RootDependent { edge: String },

    #[error("edge `{edge}` relates a node to itself")]
    SelfRelation { edge: String },

    #[error("edge `{edge}` names no declared node")]
    UnanchoredEdge { edge: String },

    #[error("node {name} has contradictory predicates {first} and {second}")]
    Contradiction {
        name: String,
        first: String,
        second: String,
    },

    #[error("invalid regex /{regex}/: {message}")]
    InvalidRegex { regex: String, message: String },

    #[error("action `{action}` references unbound node {name}")]
    UnboundNode { name: String, action: String },

    #[error("action `{action}` redefines node {name}")]
    Redefined { name: String, action: String },

    #[error("rule has no actions")]
    NoActions,
}

/// Compile a regex that must match the whole value
fn full_match_regex(source: &str) -> Result<Regex, PatternError> {
    Regex::new(&format!("^(?:{})$", source)).map_err(|e| PatternError::InvalidRegex {
        regex: source.to_string(),
        message: e.to_string(),
    })
}

/// Compiled test on one feature value (`None` = feature absent)
#[derive(Debug, Clone)]
pub enum ValuePredicate {
    Equals(String),
    NotEquals(String),
    Matches(Regex),
    NotMatches(Regex),
    Absent,
}

impl ValuePredicate {
    fn compile(test: &ValueTest) -> Result<Self, PatternError> {
        Ok(match test {
            ValueTest::Equals(v) => ValuePredicate::Equals(v.clone()),
            ValueTest::NotEquals(v) => ValuePredicate::NotEquals(v.clone()),
            ValueTest::Matches(re) => ValuePredicate::Matches(full_match_regex(re)?),
            ValueTest::NotMatches(re) => ValuePredicate::NotMatches(full_match_regex(re)?),
            ValueTest::Absent => ValuePredicate::Absent,
        })
    }

    pub fn test(&self, value: Option<&str>) -> bool {
        match self {
            ValuePredicate::Equals(v) => value == Some(v.as_str()),
            ValuePredicate::NotEquals(v) => value != Some(v.as_str()),
            ValuePredicate::Matches(re) => value.is_some_and(|x| re.is_match(x)),
            ValuePredicate::NotMatches(re) => !value.is_some_and(|x| re.is_match(x)),
            ValuePredicate::Absent => value.is_none(),
        }
    }
}

/// Compiled relation label test
#[derive(Debug, Clone)]
pub enum LabelPredicate {
    Any,
    OneOf(Vec<String>),
    Matches(Regex),
}

impl LabelPredicate {
    fn compile(test: &LabelTest) -> Result<Self, PatternError> {
        Ok(match test {
            LabelTest::Any => LabelPredicate::Any,
            LabelTest::Literal(labels) => LabelPredicate::OneOf(labels.clone()),
            LabelTest::Regex(re) => LabelPredicate::Matches(full_match_regex(re)?),
        })
    }

    pub fn test(&self, label: &str) -> bool {
        match self {
            LabelPredicate::Any => true,
            LabelPredicate::OneOf(labels) => labels.iter().any(|l| l == label),
            LabelPredicate::Matches(re) => re.is_match(label),
        }
    }
}

/// Constraint on one pattern node from an edge to `_` or `ROOT`
#[derive(Debug, Clone)]
pub(crate) enum Structural {
    /// `_ -> X` (any governor, root included) or `ROOT -> X`
    Governor {
        root_only: bool,
        label: LabelPredicate,
        negated: bool,
    },
    /// `X -> _`
    Dependent {
        label: LabelPredicate,
        negated: bool,
    },
}

/// Edge between two named pattern nodes
#[derive(Debug, Clone)]
pub(crate) struct PatternEdge {
    pub(crate) from: usize,
    pub(crate) to: usize,
    pub(crate) label: LabelPredicate,
    pub(crate) negated: bool,
}

/// `A << B` or `A < B`
#[derive(Debug, Clone, Copy)]
pub(crate) struct Precedence {
    pub(crate) before: usize,
    pub(crate) after: usize,
    pub(crate) immediate: bool,
}

/// Where the candidates of a plan step come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// Every token, ascending
    Scan,
    /// Dependents of the node bound to `of`, through edge `edge`
    Dependents { of: usize, edge: usize },
    /// Governors of the node bound to `of`, through edge `edge`
    Governors { of: usize, edge: usize },
}

/// Deferred test run once both ends are bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Check {
    Edge(usize),
    Precedence(usize),
}

/// Binds one pattern node
#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub(crate) var: usize,
    pub(crate) source: Source,
    pub(crate) checks: Vec<Check>,
}

/// A validated pattern ready for matching
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub(crate) var_names: Arc<[String]>,
    var_ids: FxHashMap<String, usize>,
    pub(crate) predicates: Vec<BTreeMap<FeatureKey, Vec<ValuePredicate>>>,
    pub(crate) structural: Vec<Vec<Structural>>,
    pub(crate) edges: Vec<PatternEdge>,
    /// Edge indices by source node
    pub(crate) out_edges: Vec<Vec<usize>>,
    /// Edge indices by target node
    pub(crate) in_edges: Vec<Vec<usize>>,
    pub(crate) precedences: Vec<Precedence>,
    pub(crate) plan: Vec<Step>,
    /// Whether any structural constraint needs the dependents index
    pub(crate) needs_dependents: bool,
}

impl CompiledPattern {
    /// Pattern node names in declaration order (the anchor first)
    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    pub fn var_id(&self, name: &str) -> Option<usize> {
        self.var_ids.get(name).copied()
    }

    pub fn anchor(&self) -> &str {
        &self.var_names[0]
    }
}

fn check_contradictions(
    name: &str,
    key: &FeatureKey,
    tests: &[(ValueTest, ValuePredicate)],
) -> Result<(), PatternError> {
    let describe = |test: &ValueTest| FeaturePredicate::new(key.clone(), test.clone()).to_string();

    for (i, (first, first_pred)) in tests.iter().enumerate() {
        for (second, second_pred) in &tests[i + 1..] {
            let contradictory = match (first, second) {
                (ValueTest::Equals(a), ValueTest::Equals(b)) => a != b,
                (ValueTest::Equals(v), _) => !second_pred.test(Some(v)),
                (_, ValueTest::Equals(v)) => !first_pred.test(Some(v)),
                (ValueTest::Absent, ValueTest::Matches(_))
                | (ValueTest::Matches(_), ValueTest::Absent) => true,
                _ => false,
            };
            if contradictory {
                return Err(PatternError::Contradiction {
                    name: name.to_string(),
                    first: describe(first),
                    second: describe(second),
                });
            }
        }
    }
    Ok(())
}

/// Validate a pattern and build its search plan
pub fn compile_pattern(pattern: &PatternAst) -> Result<CompiledPattern, PatternError> {
    if pattern.nodes.is_empty() {
        return Err(PatternError::EmptyPattern);
    }

    let mut var_ids: FxHashMap<String, usize> = FxHashMap::default();
    let mut predicates = Vec::with_capacity(pattern.nodes.len());
    for (idx, decl) in pattern.nodes.iter().enumerate() {
        if var_ids.insert(decl.name.clone(), idx).is_some() {
            return Err(PatternError::DuplicateNode {
                name: decl.name.clone(),
                line: decl.position.line,
            });
        }

        let mut by_key: BTreeMap<FeatureKey, Vec<(ValueTest, ValuePredicate)>> = BTreeMap::new();
        for predicate in &decl.predicates {
            let compiled = ValuePredicate::compile(&predicate.test)?;
            by_key
                .entry(predicate.key.clone())
                .or_default()
                .push((predicate.test.clone(), compiled));
        }
        for (key, tests) in &by_key {
            check_contradictions(&decl.name, key, tests)?;
        }

        predicates.push(
            by_key
                .into_iter()
                .map(|(key, tests)| (key, tests.into_iter().map(|(_, p)| p).collect()))
                .collect(),
        );
    }

    let n = pattern.nodes.len();
    let mut structural = vec![Vec::new(); n];
    let mut edges = Vec::new();
    let mut precedences = Vec::new();

    let resolve = |node: &NodeRef, edge: &EdgeConstraint| -> Result<Option<usize>, PatternError> {
        match node {
            NodeRef::Named(name) => {
                var_ids
                    .get(name)
                    .copied()
                    .map(Some)
                    .ok_or_else(|| PatternError::UndeclaredNode {
                        name: name.clone(),
                        edge: edge.to_string(),
                    })
            }
            _ => Ok(None),
        }
    };

    for edge in &pattern.edges {
        let from = resolve(&edge.from, edge)?;
        let to = resolve(&edge.to, edge)?;
        if edge.to == NodeRef::Root {
            return Err(PatternError::RootDependent {
                edge: edge.to_string(),
            });
        }
        if from.is_some() && from == to {
            return Err(PatternError::SelfRelation {
                edge: edge.to_string(),
            });
        }

        if edge.relation != RelationType::Child {
            if let (Some(before), Some(after)) = (from, to) {
                precedences.push(Precedence {
                    before,
                    after,
                    immediate: edge.relation == RelationType::ImmediatelyPrecedes,
                });
            }
            continue;
        }

        let label = LabelPredicate::compile(&edge.label)?;
        match (from, to) {
            (Some(from), Some(to)) => edges.push(PatternEdge {
                from,
                to,
                label,
                negated: edge.negated,
            }),
            (None, Some(to)) => structural[to].push(Structural::Governor {
                root_only: edge.from == NodeRef::Root,
                label,
                negated: edge.negated,
            }),
            (Some(from), None) => structural[from].push(Structural::Dependent {
                label,
                negated: edge.negated,
            }),
            (None, None) => {
                return Err(PatternError::UnanchoredEdge {
                    edge: edge.to_string(),
                });
            }
        }
    }

    let mut out_edges = vec![Vec::new(); n];
    let mut in_edges = vec![Vec::new(); n];
    for (idx, edge) in edges.iter().enumerate() {
        out_edges[edge.from].push(idx);
        in_edges[edge.to].push(idx);
    }

    let needs_dependents = structural
        .iter()
        .flatten()
        .any(|s| matches!(s, Structural::Dependent { .. }));

    let plan = build_plan(n, &edges, &out_edges, &in_edges, &precedences);

    Ok(CompiledPattern {
        var_names: pattern.nodes.iter().map(|d| d.name.clone()).collect(),
        var_ids,
        predicates,
        structural,
        edges,
        out_edges,
        in_edges,
        precedences,
        plan,
        needs_dependents,
    })
}

/// Order the pattern nodes: the anchor (node 0) first, then breadth-first
/// along positive edges; unreached nodes start a new scan in declaration
/// order. Every other edge and precedence is checked at the step that binds
/// its later end.
fn build_plan(
    n: usize,
    edges: &[PatternEdge],
    out_edges: &[Vec<usize>],
    in_edges: &[Vec<usize>],
    precedences: &[Precedence],
) -> Vec<Step> {
    let mut order = vec![usize::MAX; n];
    let mut plan: Vec<Step> = Vec::with_capacity(n);

    for start in 0..n {
        if order[start] != usize::MAX {
            continue;
        }
        order[start] = plan.len();
        plan.push(Step {
            var: start,
            source: Source::Scan,
            checks: Vec::new(),
        });

        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            let outgoing = out_edges[current].iter().map(|&e| (e, edges[e].to, true));
            let incoming = in_edges[current].iter().map(|&e| (e, edges[e].from, false));
            let mut incident: Vec<_> = outgoing.chain(incoming).collect();
            incident.sort_unstable_by_key(|&(e, _, _)| e);

            for (edge, target, forward) in incident {
                if edges[edge].negated || order[target] != usize::MAX {
                    continue;
                }
                order[target] = plan.len();
                let source = if forward {
                    Source::Dependents { of: current, edge }
                } else {
                    Source::Governors { of: current, edge }
                };
                plan.push(Step {
                    var: target,
                    source,
                    checks: Vec::new(),
                });
                queue.push_back(target);
            }
        }
    }

    for (idx, edge) in edges.iter().enumerate() {
        let step = order[edge.from].max(order[edge.to]);
        let expansion = match plan[step].source {
            Source::Dependents { edge, .. } | Source::Governors { edge, .. } => Some(edge),
            Source::Scan => None,
        };
        if expansion != Some(idx) {
            plan[step].checks.push(Check::Edge(idx));
        }
    }
    for (idx, precedence) in precedences.iter().enumerate() {
        let step = order[precedence.before].max(order[precedence.after]);
        plan[step].checks.push(Check::Precedence(idx));
    }

    plan
}

/// Governor of an action edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorSlot {
    Root,
    Slot(usize),
}

/// Rewrite action with names resolved to binding slots
///
/// Slots `0..n` are the pattern nodes, later slots the nodes introduced by
/// `new` in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SetFeature {
        slot: usize,
        key: FeatureKey,
        value: String,
    },
    RemoveFeature {
        slot: usize,
        key: FeatureKey,
    },
    Reattach {
        governor: GovernorSlot,
        slot: usize,
        relation: String,
    },
    AddEdge {
        governor: GovernorSlot,
        slot: usize,
        relation: String,
    },
    Relabel {
        governor: GovernorSlot,
        slot: usize,
        relation: String,
    },
    DeleteEdge {
        governor: GovernorSlot,
        slot: usize,
    },
    AddNode {
        slot: usize,
        anchor: usize,
        placement: Placement,
        features: Vec<(FeatureKey, String)>,
    },
    DeleteNode {
        slot: usize,
    },
}

/// The resolved action list of one rule
#[derive(Debug, Clone)]
pub struct RuleActions {
    pub actions: Vec<Action>,
    /// Name of every slot (pattern nodes, then `new` nodes)
    pub slot_names: Vec<String>,
    /// Source text of every action, for error reports
    pub sources: Vec<String>,
}

impl RuleActions {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// A compiled transform rule
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub pattern: CompiledPattern,
    pub actions: RuleActions,
}

/// Validate a rule's pattern and resolve its actions
pub fn compile_rule(
    pattern: &PatternAst,
    actions: &[ActionAst],
) -> Result<CompiledRule, PatternError> {
    let compiled = compile_pattern(pattern)?;
    if actions.is_empty() {
        return Err(PatternError::NoActions);
    }

    let mut scope: FxHashMap<String, usize> = compiled.var_ids.clone();
    let mut slot_names: Vec<String> = compiled.var_names.to_vec();
    let mut resolved = Vec::with_capacity(actions.len());

    for action in actions {
        let unbound = |name: &str| PatternError::UnboundNode {
            name: name.to_string(),
            action: action.to_string(),
        };
        let slot = |name: &str| scope.get(name).copied().ok_or_else(|| unbound(name));
        let governor = |node: &NodeRef| match node {
            NodeRef::Root => Ok(GovernorSlot::Root),
            NodeRef::Named(name) => slot(name).map(GovernorSlot::Slot),
            NodeRef::Anonymous => Err(unbound("_")),
        };

        let compiled_action = match action {
            ActionAst::SetFeature { node, key, value } => Action::SetFeature {
                slot: slot(node)?,
                key: key.clone(),
                value: value.clone(),
            },
            ActionAst::RemoveFeature { node, key } => Action::RemoveFeature {
                slot: slot(node)?,
                key: key.clone(),
            },
            ActionAst::Reattach {
                governor: gov,
                dependent,
                relation,
            } => Action::Reattach {
                governor: governor(gov)?,
                slot: slot(dependent)?,
                relation: relation.clone(),
            },
            ActionAst::AddEdge {
                governor: gov,
                dependent,
                relation,
            } => Action::AddEdge {
                governor: governor(gov)?,
                slot: slot(dependent)?,
                relation: relation.clone(),
            },
            ActionAst::Relabel {
                governor: gov,
                dependent,
                relation,
            } => Action::Relabel {
                governor: governor(gov)?,
                slot: slot(dependent)?,
                relation: relation.clone(),
            },
            ActionAst::DeleteEdge {
                governor: gov,
                dependent,
            } => Action::DeleteEdge {
                governor: governor(gov)?,
                slot: slot(dependent)?,
            },
            ActionAst::DeleteNode { node } => Action::DeleteNode { slot: slot(node)? },
            ActionAst::AddNode {
                name,
                anchor,
                placement,
                features,
            } => {
                let anchor = slot(anchor)?;
                if scope.contains_key(name) {
                    return Err(PatternError::Redefined {
                        name: name.clone(),
                        action: action.to_string(),
                    });
                }
                let new_slot = slot_names.len();
                scope.insert(name.clone(), new_slot);
                slot_names.push(name.clone());
                Action::AddNode {
                    slot: new_slot,
                    anchor,
                    placement: *placement,
                    features: features.clone(),
                }
            }
        };
        resolved.push(compiled_action);
    }

    Ok(CompiledRule {
        pattern: compiled,
        actions: RuleActions {
            actions: resolved,
            slot_names,
            sources: actions.iter().map(ToString::to_string).collect(),
        },
    })
}
