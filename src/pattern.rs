//! Grammar AST
//!
//! Output of the grammar parser and input of the pattern compiler. Nothing
//! here is validated yet: edges may name undeclared nodes and a node may
//! carry contradictory predicates until the compiler checks them.

use std::fmt;

pub use crate::tree::FeatureKey;

/// Line/column of a construct in the grammar source (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// Test applied to a single feature value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueTest {
    /// `key="value"`
    Equals(String),
    /// `key!="value"` (an absent feature also passes)
    NotEquals(String),
    /// `key=/regex/`
    Matches(String),
    /// `key!=/regex/`
    NotMatches(String),
    /// `!key`
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeaturePredicate {
    pub key: FeatureKey,
    pub test: ValueTest,
}

impl FeaturePredicate {
    pub fn new(key: FeatureKey, test: ValueTest) -> Self {
        Self { key, test }
    }
}

impl fmt::Display for FeaturePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.test {
            ValueTest::Equals(v) => write!(f, "{}=\"{}\"", self.key, v),
            ValueTest::NotEquals(v) => write!(f, "{}!=\"{}\"", self.key, v),
            ValueTest::Matches(re) => write!(f, "{}=/{}/", self.key, re),
            ValueTest::NotMatches(re) => write!(f, "{}!=/{}/", self.key, re),
            ValueTest::Absent => write!(f, "!{}", self.key),
        }
    }
}

/// Pattern node declaration: `Name [predicates];`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDecl {
    pub name: String,
    pub predicates: Vec<FeaturePredicate>,
    pub position: Position,
}

/// Endpoint of a pattern edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    Named(String),
    /// `_`: some node not otherwise constrained
    Anonymous,
    /// `ROOT`: the virtual root (index 0)
    Root,
}

impl NodeRef {
    pub fn name(&self) -> Option<&str> {
        match self {
            NodeRef::Named(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Named(name) => write!(f, "{}", name),
            NodeRef::Anonymous => write!(f, "_"),
            NodeRef::Root => write!(f, "ROOT"),
        }
    }
}

/// Relation label test on an edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelTest {
    Any,
    /// One or more alternatives (`obj|iobj`), compared exactly
    Literal(Vec<String>),
    Regex(String),
}

impl fmt::Display for LabelTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelTest::Any => Ok(()),
            LabelTest::Literal(labels) => write!(f, "{}", labels.join("|")),
            LabelTest::Regex(re) => write!(f, "/{}/", re),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationType {
    /// `A -> B`: A governs B
    Child,
    /// `A << B`: A somewhere before B
    Precedes,
    /// `A < B`: A directly before B
    ImmediatelyPrecedes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeConstraint {
    pub from: NodeRef,
    pub to: NodeRef,
    pub relation: RelationType,
    pub label: LabelTest,
    pub negated: bool,
    pub position: Position,
}

impl fmt::Display for EdgeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let neg = if self.negated { "!" } else { "" };
        match (self.relation, &self.label) {
            (RelationType::Child, LabelTest::Any) => {
                write!(f, "{} {}-> {}", self.from, neg, self.to)
            }
            (RelationType::Child, label) => {
                write!(f, "{} {}-[{}]-> {}", self.from, neg, label, self.to)
            }
            (RelationType::Precedes, _) => write!(f, "{} << {}", self.from, self.to),
            (RelationType::ImmediatelyPrecedes, _) => write!(f, "{} < {}", self.from, self.to),
        }
    }
}

/// The statements of one `pattern` block or `match` section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternAst {
    pub nodes: Vec<NodeDecl>,
    pub edges: Vec<EdgeConstraint>,
}

/// Where `new` places the inserted token relative to its reference node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Before,
    After,
}

/// Rewrite action, one per statement of a `do` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionAst {
    /// `set X.key = "value";`
    SetFeature {
        node: String,
        key: FeatureKey,
        value: String,
    },
    /// `remove X.key;`
    RemoveFeature { node: String, key: FeatureKey },
    /// `reattach G -[rel]-> X;`
    Reattach {
        governor: NodeRef,
        dependent: String,
        relation: String,
    },
    /// `add G -[rel]-> X;`
    AddEdge {
        governor: NodeRef,
        dependent: String,
        relation: String,
    },
    /// `relabel G -[rel]-> X;`
    Relabel {
        governor: NodeRef,
        dependent: String,
        relation: String,
    },
    /// `delete G -> X;`
    DeleteEdge { governor: NodeRef, dependent: String },
    /// `new N after X [form="..."];`
    AddNode {
        name: String,
        anchor: String,
        placement: Placement,
        features: Vec<(FeatureKey, String)>,
    },
    /// `delete X;`
    DeleteNode { node: String },
}

impl fmt::Display for ActionAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionAst::SetFeature { node, key, value } => {
                write!(f, "set {}.{} = \"{}\"", node, key, value)
            }
            ActionAst::RemoveFeature { node, key } => write!(f, "remove {}.{}", node, key),
            ActionAst::Reattach {
                governor,
                dependent,
                relation,
            } => write!(f, "reattach {} -[{}]-> {}", governor, relation, dependent),
            ActionAst::AddEdge {
                governor,
                dependent,
                relation,
            } => write!(f, "add {} -[{}]-> {}", governor, relation, dependent),
            ActionAst::Relabel {
                governor,
                dependent,
                relation,
            } => write!(f, "relabel {} -[{}]-> {}", governor, relation, dependent),
            ActionAst::DeleteEdge {
                governor,
                dependent,
            } => write!(f, "delete {} -> {}", governor, dependent),
            ActionAst::AddNode {
                name,
                anchor,
                placement,
                ..
            } => {
                let placement = match placement {
                    Placement::Before => "before",
                    Placement::After => "after",
                };
                write!(f, "new {} {} {}", name, placement, anchor)
            }
            ActionAst::DeleteNode { node } => write!(f, "delete {}", node),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// `pattern NAME { ... }`
    Pattern,
    /// `rule NAME { match { ... } do { ... } }`
    Rule,
}

/// One named block of a grammar file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAst {
    pub kind: BlockKind,
    pub name: String,
    pub pattern: PatternAst,
    pub actions: Vec<ActionAst>,
    pub position: Position,
}

/// A parsed grammar: its blocks in source order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrammarAst {
    pub blocks: Vec<BlockAst>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_display() {
        let edge = EdgeConstraint {
            from: NodeRef::Named("V".to_string()),
            to: NodeRef::Anonymous,
            relation: RelationType::Child,
            label: LabelTest::Literal(vec!["obj".to_string(), "iobj".to_string()]),
            negated: true,
            position: Position::default(),
        };
        assert_eq!(edge.to_string(), "V !-[obj|iobj]-> _");

        let precedence = EdgeConstraint {
            from: NodeRef::Named("A".to_string()),
            to: NodeRef::Named("B".to_string()),
            relation: RelationType::ImmediatelyPrecedes,
            label: LabelTest::Any,
            negated: false,
            position: Position::default(),
        };
        assert_eq!(precedence.to_string(), "A < B");
    }

    #[test]
    fn test_action_display() {
        let action = ActionAst::Reattach {
            governor: NodeRef::Root,
            dependent: "X".to_string(),
            relation: "root".to_string(),
        };
        assert_eq!(action.to_string(), "reattach ROOT -[root]-> X");

        let predicate = FeaturePredicate::new(
            FeatureKey::Feat("Tense".to_string()),
            ValueTest::NotMatches("Past|Pqp".to_string()),
        );
        assert_eq!(predicate.to_string(), "feats.Tense!=/Past|Pqp/");
    }
}
