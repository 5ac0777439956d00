//! Structural diff between two versions of a sentence
//!
//! Tokens are compared by index. The diff is for reporting only: nothing in
//! the matcher or the rewrite engine reads it.

use std::collections::BTreeSet;

use crate::pattern::FeatureKey;
use crate::tree::{Node, NodeId, Sentence};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeChange {
    Added { gov: NodeId, rel: String },
    Removed { gov: NodeId, rel: String },
    Relabeled { gov: NodeId, from: String, to: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureChange {
    pub key: FeatureKey,
    pub before: Option<String>,
    pub after: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Present on both sides
    Kept,
    /// Only in the later sentence
    Added,
    /// Only in the earlier sentence
    Removed,
}

/// Changes at one token index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDiff {
    pub id: NodeId,
    pub status: NodeStatus,
    pub edges: Vec<EdgeChange>,
    pub features: Vec<FeatureChange>,
}

/// Per-token change records, ascending by index; unchanged tokens are left out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentenceDiff {
    pub nodes: Vec<NodeDiff>,
}

impl SentenceDiff {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeDiff> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

fn edge_changes(before: Option<&Node>, after: Option<&Node>) -> Vec<EdgeChange> {
    let empty = Default::default();
    let old = before.map_or(&empty, |n| &n.govs);
    let new = after.map_or(&empty, |n| &n.govs);

    let govs: BTreeSet<NodeId> = old.keys().chain(new.keys()).copied().collect();
    govs.into_iter()
        .filter_map(|gov| match (old.get(&gov), new.get(&gov)) {
            (Some(from), Some(to)) if from != to => Some(EdgeChange::Relabeled {
                gov,
                from: from.clone(),
                to: to.clone(),
            }),
            (Some(rel), None) => Some(EdgeChange::Removed {
                gov,
                rel: rel.clone(),
            }),
            (None, Some(rel)) => Some(EdgeChange::Added {
                gov,
                rel: rel.clone(),
            }),
            _ => None,
        })
        .collect()
}

fn feature_changes(before: Option<&Node>, after: Option<&Node>) -> Vec<FeatureChange> {
    let mut keys = vec![
        FeatureKey::Form,
        FeatureKey::Lemma,
        FeatureKey::Upos,
        FeatureKey::Xpos,
    ];
    let names = |node: Option<&Node>, misc: bool| -> Vec<String> {
        node.map(|n| if misc { &n.misc } else { &n.feats })
            .into_iter()
            .flat_map(|features| features.iter().map(|(k, _)| k.to_string()))
            .collect()
    };
    let union = |misc: bool| -> BTreeSet<String> {
        names(before, misc)
            .into_iter()
            .chain(names(after, misc))
            .collect()
    };
    let (feats, misc) = (union(false), union(true));
    keys.extend(feats.into_iter().map(FeatureKey::Feat));
    keys.extend(misc.into_iter().map(FeatureKey::Misc));

    keys.into_iter()
        .filter_map(|key| {
            let old = before.and_then(|n| n.feature(&key));
            let new = after.and_then(|n| n.feature(&key));
            (old != new).then(|| FeatureChange {
                before: old.map(str::to_string),
                after: new.map(str::to_string),
                key,
            })
        })
        .collect()
}

/// Compare two versions of a sentence token by token
pub fn diff(before: &Sentence, after: &Sentence) -> SentenceDiff {
    let mut nodes = Vec::new();

    for id in 1..=before.len().max(after.len()) {
        let (old, new) = (before.node(id), after.node(id));
        let status = match (old, new) {
            (Some(_), None) => NodeStatus::Removed,
            (None, Some(_)) => NodeStatus::Added,
            _ => NodeStatus::Kept,
        };

        let edges = edge_changes(old, new);
        let features = feature_changes(old, new);
        if status != NodeStatus::Kept || !edges.is_empty() || !features.is_empty() {
            nodes.push(NodeDiff {
                id,
                status,
                edges,
                features,
            });
        }
    }

    SentenceDiff { nodes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conllu::parse_sentence;
    use crate::grammar::TransGrammar;

    const FOND: &str = "1\tHe\the\tPRON\t_\tCase=Nom\t3\tnsubj\t_\t_\n\
                        2\tis\tbe\tAUX\t_\t_\t3\tcop\t_\t_\n\
                        3\tfond\tfond\tADJ\t_\t_\t0\troot\t_\t_\n\
                        4\tcheese\tcheese\tNOUN\t_\t_\t3\tobj\t_\t_\n";

    #[test]
    fn test_identical_sentences() {
        let sentence = parse_sentence(FOND).unwrap();
        assert!(diff(&sentence, &sentence.clone()).is_empty());
    }

    #[test]
    fn test_edge_and_feature_changes() {
        let before = parse_sentence(FOND).unwrap();
        let mut after = before.clone();
        TransGrammar::new(
            r#"
            rule r {
                match { A [upos="ADJ"]; O []; C [lemma="be"]; A -[obj]-> O; }
                do {
                    relabel A -[obl:arg]-> O;
                    add C -[dep]-> O;
                    set O.feats.Case = "Acc";
                    remove C.lemma;
                }
            }
            "#,
        )
        .unwrap()
        .transform(&mut after);

        let changes = diff(&before, &after);
        assert_eq!(changes.nodes.len(), 2);

        let is = changes.node(2).unwrap();
        assert_eq!(is.status, NodeStatus::Kept);
        assert!(is.edges.is_empty());
        assert_eq!(
            is.features,
            vec![FeatureChange {
                key: FeatureKey::Lemma,
                before: Some("be".to_string()),
                after: None,
            }]
        );

        let cheese = changes.node(4).unwrap();
        assert_eq!(
            cheese.edges,
            vec![
                EdgeChange::Added {
                    gov: 2,
                    rel: "dep".to_string(),
                },
                EdgeChange::Relabeled {
                    gov: 3,
                    from: "obj".to_string(),
                    to: "obl:arg".to_string(),
                },
            ]
        );
        assert_eq!(
            cheese.features,
            vec![FeatureChange {
                key: FeatureKey::Feat("Case".to_string()),
                before: None,
                after: Some("Acc".to_string()),
            }]
        );
    }

    #[test]
    fn test_added_and_removed_tokens() {
        let before = parse_sentence(FOND).unwrap();
        let mut after = before.clone();
        after.remove_node(2).unwrap();

        let changes = diff(&before, &after);
        let last = changes.node(4).unwrap();
        assert_eq!(last.status, NodeStatus::Removed);
        assert_eq!(
            last.edges,
            vec![EdgeChange::Removed {
                gov: 3,
                rel: "obj".to_string(),
            }]
        );
        // token 2 now holds what was token 3
        assert_eq!(changes.node(2).unwrap().status, NodeStatus::Kept);
        assert!(changes.node(1).is_some());

        let reverse = diff(&after, &before);
        assert_eq!(reverse.node(4).unwrap().status, NodeStatus::Added);
    }
}
