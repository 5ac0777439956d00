//! Rewrite engine
//!
//! Applies a rule's resolved action list to one binding. The edits go to a
//! copy of the sentence, and the copy is only returned if every action
//! succeeded, so a failed action list leaves no trace.

use thiserror::Error;

use crate::compiler::{Action, GovernorSlot, RuleActions};
use crate::matcher::Binding;
use crate::pattern::Placement;
use crate::tree::{GraphError, Node, NodeId, ROOT, Sentence};

/// Why an action could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityFault {
    #[error("node {0} was deleted by an earlier action")]
    Deleted(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// An action list failed; the binding's edits were discarded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("action {action} `{text}` failed: {fault}")]
pub struct GraphIntegrityError {
    /// Index of the failing action in the rule's list
    pub action: usize,
    pub text: String,
    #[source]
    pub fault: IntegrityFault,
}

/// Working state of one action list
struct Edit<'a> {
    graph: Sentence,
    /// Current token of every slot (`None` once deleted)
    slots: Vec<Option<NodeId>>,
    names: &'a [String],
}

impl Edit<'_> {
    fn node(&self, slot: usize) -> Result<NodeId, IntegrityFault> {
        self.slots[slot].ok_or_else(|| IntegrityFault::Deleted(self.names[slot].clone()))
    }

    fn governor(&self, governor: GovernorSlot) -> Result<NodeId, IntegrityFault> {
        match governor {
            GovernorSlot::Root => Ok(ROOT),
            GovernorSlot::Slot(slot) => self.node(slot),
        }
    }

    fn apply(&mut self, action: &Action) -> Result<(), IntegrityFault> {
        match action {
            Action::SetFeature { slot, key, value } => {
                let id = self.node(*slot)?;
                self.graph
                    .node_mut(id)
                    .ok_or(GraphError::NoSuchNode(id))?
                    .set_feature(key, value);
            }
            Action::RemoveFeature { slot, key } => {
                let id = self.node(*slot)?;
                self.graph
                    .node_mut(id)
                    .ok_or(GraphError::NoSuchNode(id))?
                    .remove_feature(key);
            }
            Action::Reattach {
                governor,
                slot,
                relation,
            } => {
                let (gov, dep) = (self.governor(*governor)?, self.node(*slot)?);
                self.graph.attach(gov, dep, relation)?;
            }
            Action::AddEdge {
                governor,
                slot,
                relation,
            } => {
                let (gov, dep) = (self.governor(*governor)?, self.node(*slot)?);
                self.graph.add_edge(gov, dep, relation)?;
            }
            Action::Relabel {
                governor,
                slot,
                relation,
            } => {
                let (gov, dep) = (self.governor(*governor)?, self.node(*slot)?);
                self.graph.relabel(gov, dep, relation)?;
            }
            Action::DeleteEdge { governor, slot } => {
                let (gov, dep) = (self.governor(*governor)?, self.node(*slot)?);
                self.graph.remove_edge(gov, dep)?;
            }
            Action::AddNode {
                slot,
                anchor,
                placement,
                features,
            } => {
                let anchor = self.node(*anchor)?;
                let at = match placement {
                    Placement::Before => anchor,
                    Placement::After => anchor + 1,
                };

                let mut node = Node::new(at, "_", "_", "_");
                for (key, value) in features {
                    node.set_feature(key, value);
                }
                self.graph.insert_node(at, node)?;

                for id in self.slots.iter_mut().flatten() {
                    if *id >= at {
                        *id += 1;
                    }
                }
                self.slots[*slot] = Some(at);
            }
            Action::DeleteNode { slot } => {
                let id = self.node(*slot)?;
                promote_dependents(&mut self.graph, id)?;
                self.graph.remove_node(id)?;

                for entry in &mut self.slots {
                    *entry = match *entry {
                        Some(k) if k == id => None,
                        Some(k) if k > id => Some(k - 1),
                        other => other,
                    };
                }
            }
        }
        Ok(())
    }
}

/// Move the edges governed by `id` to its basic governor
fn promote_dependents(graph: &mut Sentence, id: NodeId) -> Result<(), GraphError> {
    let Some(head) = graph.node(id).and_then(|n| n.head) else {
        return Ok(());
    };

    let dependents: Vec<(NodeId, String, bool)> = graph
        .nodes
        .iter()
        .filter_map(|n| {
            n.relation(id)
                .map(|rel| (n.id, rel.to_string(), n.head == Some(id)))
        })
        .collect();

    for (dep, rel, basic) in dependents {
        let duplicate = graph.node(dep).is_some_and(|n| n.govs.contains_key(&head));
        if dep == head || duplicate {
            continue;
        }
        if basic {
            graph.attach(head, dep, &rel)?;
        } else {
            graph.remove_edge(id, dep)?;
            graph.add_edge(head, dep, &rel)?;
        }
    }
    Ok(())
}

/// Apply an action list to one binding, returning the edited sentence
///
/// The input is never modified. Later actions see the token indices as
/// renumbered by earlier `new` and `delete` actions.
pub fn apply(
    binding: &Binding,
    actions: &RuleActions,
    sentence: &Sentence,
) -> Result<Sentence, GraphIntegrityError> {
    let mut slots: Vec<Option<NodeId>> = binding.nodes().iter().copied().map(Some).collect();
    slots.resize(actions.slot_names.len(), None);

    let mut edit = Edit {
        graph: sentence.clone(),
        slots,
        names: &actions.slot_names,
    };

    for (idx, action) in actions.actions.iter().enumerate() {
        edit.apply(action).map_err(|fault| GraphIntegrityError {
            action: idx,
            text: actions.sources[idx].clone(),
            fault,
        })?;
    }

    Ok(edit.graph)
}
