//! Sentence graph data structures
//!
//! A sentence is an ordered list of tokens indexed from 1, with index 0
//! reserved for the virtual root. Every token stores its incoming edges as a
//! governor -> relation mapping, so enhanced graphs with several governors
//! per token need no special casing. All relations are index-based.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Index of a token within its sentence (1-based, 0 is the virtual root)
pub type NodeId = usize;

/// Governor index of root edges
pub const ROOT: NodeId = 0;

/// Error raised by a graph mutation that would break the sentence invariants
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node {0} does not exist")]
    NoSuchNode(NodeId),

    #[error("no edge from {gov} to {dep}")]
    NoSuchEdge { gov: NodeId, dep: NodeId },

    #[error("node {0} cannot govern itself")]
    SelfLoop(NodeId),
}

/// Addressable token attribute
///
/// The four core columns are addressed by name, morphological features and
/// MISC entries by `feats.Name` / `misc.Name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureKey {
    Form,
    Lemma,
    Upos,
    Xpos,
    Feat(String),
    Misc(String),
}

impl FeatureKey {
    /// Parse a key as written in grammars (`upos`, `feats.Number`, ...)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "form" => Some(FeatureKey::Form),
            "lemma" => Some(FeatureKey::Lemma),
            "upos" | "tag" => Some(FeatureKey::Upos),
            "xpos" => Some(FeatureKey::Xpos),
            _ => {
                let (prefix, name) = s.split_once('.')?;
                if name.is_empty() {
                    return None;
                }
                match prefix {
                    "feats" => Some(FeatureKey::Feat(name.to_string())),
                    "misc" => Some(FeatureKey::Misc(name.to_string())),
                    _ => None,
                }
            }
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKey::Form => write!(f, "form"),
            FeatureKey::Lemma => write!(f, "lemma"),
            FeatureKey::Upos => write!(f, "upos"),
            FeatureKey::Xpos => write!(f, "xpos"),
            FeatureKey::Feat(name) => write!(f, "feats.{}", name),
            FeatureKey::Misc(name) => write!(f, "misc.{}", name),
        }
    }
}

/// Ordered `Key=Value` list (FEATS and MISC columns)
///
/// Insertion order is preserved so that untouched columns are written back
/// exactly as they were read. Entries without `=` keep a `None` value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features(Vec<(String, Option<String>)>);

impl Features {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Parse a column value (`_` is the empty list)
    pub fn parse(s: &str) -> Self {
        if s == "_" || s.is_empty() {
            return Self::new();
        }

        let entries = s
            .split('|')
            .map(|entry| match memchr::memchr(b'=', entry.as_bytes()) {
                Some(eq_pos) => (
                    entry[..eq_pos].to_string(),
                    Some(entry[eq_pos + 1..].to_string()),
                ),
                None => (entry.to_string(), None),
            })
            .collect();
        Self(entries)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    /// Set a value, keeping the position of an existing key; new keys are
    /// inserted in case-insensitive alphabetical order.
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some((_, v)) = self.0.iter_mut().find(|(k, _)| k == key) {
            *v = Some(value.to_string());
            return;
        }

        let lower = key.to_lowercase();
        let pos = self
            .0
            .iter()
            .position(|(k, _)| k.to_lowercase().cmp(&lower) == Ordering::Greater)
            .unwrap_or(self.0.len());
        self.0
            .insert(pos, (key.to_string(), Some(value.to_string())));
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.0.iter().position(|(k, _)| k == key)?;
        let (_, value) = self.0.remove(pos);
        Some(value.unwrap_or_default())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_deref().unwrap_or("")))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "_");
        }
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "|")?;
            }
            match value {
                Some(value) => write!(f, "{}={}", key, value)?,
                None => write!(f, "{}", key)?,
            }
        }
        Ok(())
    }
}

/// Original DEPS column text, kept until the node's edges change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DepsColumn {
    pub(crate) raw: Option<String>,
    /// Entries whose governor is not a plain token index (e.g. `2.1:nsubj`)
    pub(crate) unresolved: Vec<String>,
}

/// A token and its incoming edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub form: String,
    pub lemma: String,
    pub upos: String,
    pub xpos: String,
    pub feats: Features,
    pub misc: Features,
    /// Incoming edges: governor index -> relation label
    pub govs: BTreeMap<NodeId, String>,
    /// Governor written to the HEAD column (always a key of `govs`)
    pub head: Option<NodeId>,
    /// DEPREL when it differs from the enhanced label of the same edge
    /// (basic `obl` next to `1:obl:to`)
    pub(crate) basic_rel: Option<String>,
    pub(crate) deps: DepsColumn,
}

impl Node {
    /// Create an unattached node with the given attributes
    pub fn new(id: NodeId, form: &str, lemma: &str, upos: &str) -> Self {
        Self {
            id,
            form: form.to_string(),
            lemma: lemma.to_string(),
            upos: upos.to_string(),
            xpos: "_".to_string(),
            feats: Features::new(),
            misc: Features::new(),
            govs: BTreeMap::new(),
            head: None,
            basic_rel: None,
            deps: DepsColumn::default(),
        }
    }

    /// Look up an attribute; `_` in lemma/upos/xpos reads as absent
    pub fn feature(&self, key: &FeatureKey) -> Option<&str> {
        match key {
            FeatureKey::Form => Some(self.form.as_str()),
            FeatureKey::Lemma => placeholder(&self.lemma),
            FeatureKey::Upos => placeholder(&self.upos),
            FeatureKey::Xpos => placeholder(&self.xpos),
            FeatureKey::Feat(name) => self.feats.get(name),
            FeatureKey::Misc(name) => self.misc.get(name),
        }
    }

    pub fn set_feature(&mut self, key: &FeatureKey, value: &str) {
        match key {
            FeatureKey::Form => self.form = value.to_string(),
            FeatureKey::Lemma => self.lemma = value.to_string(),
            FeatureKey::Upos => self.upos = value.to_string(),
            FeatureKey::Xpos => self.xpos = value.to_string(),
            FeatureKey::Feat(name) => self.feats.set(name, value),
            FeatureKey::Misc(name) => self.misc.set(name, value),
        }
    }

    /// Remove an attribute, returning whether it was present.
    /// Core columns are reset to `_`.
    pub fn remove_feature(&mut self, key: &FeatureKey) -> bool {
        let column = match key {
            FeatureKey::Form => &mut self.form,
            FeatureKey::Lemma => &mut self.lemma,
            FeatureKey::Upos => &mut self.upos,
            FeatureKey::Xpos => &mut self.xpos,
            FeatureKey::Feat(name) => return self.feats.remove(name).is_some(),
            FeatureKey::Misc(name) => return self.misc.remove(name).is_some(),
        };
        let was_set = column != "_";
        *column = "_".to_string();
        was_set
    }

    /// Relation label of the edge from `gov`, if any
    pub fn relation(&self, gov: NodeId) -> Option<&str> {
        self.govs.get(&gov).map(String::as_str)
    }

    /// Relation label of the basic (HEAD) edge
    pub fn deprel(&self) -> Option<&str> {
        let head = self.head?;
        self.basic_rel.as_deref().or_else(|| self.relation(head))
    }

    pub fn is_root(&self) -> bool {
        self.govs.contains_key(&ROOT)
    }

    /// Drop the cached DEPS text; a lost basic edge passes to the next
    /// governor. Nodes without a HEAD keep none.
    fn edges_changed(&mut self) {
        self.deps.raw = None;
        if self.head.is_some_and(|h| !self.govs.contains_key(&h)) {
            self.lose_head();
        }
    }

    fn lose_head(&mut self) {
        self.head = self.govs.keys().next().copied();
        self.basic_rel = None;
    }
}

fn placeholder(value: &str) -> Option<&str> {
    if value == "_" { None } else { Some(value) }
}

/// Multiword token line (`3-4`), kept for re-encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiwordToken {
    pub start: NodeId,
    pub end: NodeId,
    /// The nine columns after the ID, tab-separated
    pub columns: String,
}

/// Empty node line (`5.1`), kept for re-encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyNode {
    /// Token the empty node follows (0 = sentence start)
    pub after: NodeId,
    pub sub: usize,
    pub columns: String,
}

/// A sentence: tokens, their edges, and the surrounding metadata lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    pub nodes: Vec<Node>,
    /// Comment lines without the leading `#`, in input order
    pub comments: Vec<String>,
    pub multiword: Vec<MultiwordToken>,
    pub empty_nodes: Vec<EmptyNode>,
    /// Whether the DEPS column repeats the basic edge (enhanced treebanks)
    pub enhanced: bool,
    /// Lines were read with `\r\n` endings and are written back that way
    pub crlf: bool,
}

impl Sentence {
    /// Create a new empty sentence
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get a node by index (0 and out-of-range indices give `None`)
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        id.checked_sub(1).and_then(|pos| self.nodes.get(pos))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        id.checked_sub(1).and_then(|pos| self.nodes.get_mut(pos))
    }

    fn node_mut_or_err(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.node_mut(id).ok_or(GraphError::NoSuchNode(id))
    }

    /// Whether `id` names a token or the virtual root
    pub fn contains(&self, id: NodeId) -> bool {
        id <= self.nodes.len()
    }

    /// Metadata value from a `# key = value` (or `# key: value`) comment
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.comments.iter().find_map(|comment| {
            let comment = comment.trim();
            let split = comment
                .split_once('=')
                .or_else(|| comment.split_once(':'))?;
            (split.0.trim() == key).then(|| split.1.trim())
        })
    }

    pub fn sent_id(&self) -> Option<&str> {
        self.meta("sent_id")
    }

    /// Append a token, returning its index
    pub fn push_node(&mut self, mut node: Node) -> NodeId {
        let id = self.nodes.len() + 1;
        node.id = id;
        self.nodes.push(node);
        id
    }

    /// All edges as (governor, dependent, relation), by dependent then governor
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, &str)> + '_ {
        self.nodes.iter().flat_map(|node| {
            node.govs
                .iter()
                .map(move |(&gov, rel)| (gov, node.id, rel.as_str()))
        })
    }

    /// Dependents of every governor (index 0 holds the root dependents),
    /// each list in ascending order
    pub fn dependents(&self) -> Vec<Vec<NodeId>> {
        let mut deps = vec![Vec::new(); self.nodes.len() + 1];
        for node in &self.nodes {
            for &gov in node.govs.keys() {
                if gov < deps.len() {
                    deps[gov].push(node.id);
                }
            }
        }
        deps
    }

    fn check_edge_ends(&self, gov: NodeId, dep: NodeId) -> Result<(), GraphError> {
        if self.node(dep).is_none() {
            return Err(GraphError::NoSuchNode(dep));
        }
        if !self.contains(gov) {
            return Err(GraphError::NoSuchNode(gov));
        }
        if gov == dep {
            return Err(GraphError::SelfLoop(dep));
        }
        Ok(())
    }

    /// Add (or relabel) an edge without touching the node's other governors
    pub fn add_edge(&mut self, gov: NodeId, dep: NodeId, rel: &str) -> Result<(), GraphError> {
        self.check_edge_ends(gov, dep)?;
        let node = self.node_mut_or_err(dep)?;
        node.govs.insert(gov, rel.to_string());
        node.edges_changed();
        Ok(())
    }

    /// Replace the basic edge of `dep` with `gov -rel-> dep`
    pub fn attach(&mut self, gov: NodeId, dep: NodeId, rel: &str) -> Result<(), GraphError> {
        self.check_edge_ends(gov, dep)?;
        let node = self.node_mut_or_err(dep)?;
        if let Some(old) = node.head.take() {
            node.govs.remove(&old);
        }
        node.govs.insert(gov, rel.to_string());
        node.head = Some(gov);
        node.basic_rel = None;
        node.edges_changed();
        Ok(())
    }

    /// Change the label of an existing edge
    pub fn relabel(&mut self, gov: NodeId, dep: NodeId, rel: &str) -> Result<(), GraphError> {
        let node = self.node_mut_or_err(dep)?;
        match node.govs.get_mut(&gov) {
            Some(label) => {
                if node.head == Some(gov) {
                    node.basic_rel = None;
                }
                if label.as_str() != rel {
                    *label = rel.to_string();
                    node.deps.raw = None;
                }
                Ok(())
            }
            None => Err(GraphError::NoSuchEdge { gov, dep }),
        }
    }

    /// Remove an edge, returning its label
    pub fn remove_edge(&mut self, gov: NodeId, dep: NodeId) -> Result<String, GraphError> {
        let node = self.node_mut_or_err(dep)?;
        let rel = node
            .govs
            .remove(&gov)
            .ok_or(GraphError::NoSuchEdge { gov, dep })?;
        node.edges_changed();
        Ok(rel)
    }

    /// Insert a token so that it gets index `at` (1..=len+1); every later
    /// token and every reference to it moves up by one.
    pub fn insert_node(&mut self, at: NodeId, node: Node) -> Result<NodeId, GraphError> {
        if at == 0 || at > self.nodes.len() + 1 {
            return Err(GraphError::NoSuchNode(at));
        }

        self.renumber(|k| Some(if k >= at { k + 1 } else { k }));
        self.nodes.insert(at - 1, node);
        self.reset_ids();

        for mwt in &mut self.multiword {
            if mwt.start >= at {
                mwt.start += 1;
                mwt.end += 1;
            } else if mwt.end >= at {
                mwt.end += 1;
            }
        }
        Ok(at)
    }

    /// Remove a token; every later token and every reference to it moves
    /// down by one, and edges governed by the removed token disappear.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        if self.node(id).is_none() {
            return Err(GraphError::NoSuchNode(id));
        }

        let removed = self.nodes.remove(id - 1);
        self.renumber(|k| match k.cmp(&id) {
            Ordering::Less => Some(k),
            Ordering::Equal => None,
            Ordering::Greater => Some(k - 1),
        });
        self.reset_ids();

        self.multiword.retain_mut(|mwt| {
            if mwt.start > id {
                mwt.start -= 1;
            }
            if mwt.end >= id {
                mwt.end -= 1;
            }
            mwt.end > mwt.start
        });
        Ok(removed)
    }

    fn reset_ids(&mut self) {
        for (pos, node) in self.nodes.iter_mut().enumerate() {
            node.id = pos + 1;
        }
    }

    /// Rewrite every governor reference through `map` (`None` drops the
    /// edge), empty nodes and the DEPS entries pointing at them included
    fn renumber(&mut self, map: impl Fn(NodeId) -> Option<NodeId>) {
        let moves = self.move_empty_nodes(&map);
        let remap = |gov: &str| remap_governor(gov, &map, &moves);

        for node in &mut self.nodes {
            let mut changed = false;
            let govs = std::mem::take(&mut node.govs);
            node.govs = govs
                .into_iter()
                .filter_map(|(gov, rel)| {
                    let new_gov = map(gov);
                    changed |= new_gov != Some(gov);
                    new_gov.map(|g| (g, rel))
                })
                .collect();

            let unresolved =
                remap_entries(node.deps.unresolved.iter().map(String::as_str), &remap);
            if unresolved != node.deps.unresolved {
                node.deps.unresolved = unresolved;
                changed = true;
            }

            if changed {
                node.deps.raw = None;
                if let Some(head) = node.head {
                    match map(head) {
                        Some(new_head) => node.head = Some(new_head),
                        None => node.lose_head(),
                    }
                }
            }
        }

        for empty in &mut self.empty_nodes {
            empty.remap_deps(&remap);
        }
    }

    /// Move empty nodes along with the token they follow. Those whose
    /// token is gone follow the nearest earlier one, numbered after the
    /// empty nodes already there.
    fn move_empty_nodes(&mut self, map: &impl Fn(NodeId) -> Option<NodeId>) -> Vec<EmptyMove> {
        let mut moves: Vec<EmptyMove> = Vec::with_capacity(self.empty_nodes.len());
        for empty in &mut self.empty_nodes {
            let from = (empty.after, empty.sub);
            let to = match map(empty.after) {
                Some(after) => (after, empty.sub),
                None => {
                    let after = (0..empty.after).rev().find_map(map).unwrap_or(ROOT);
                    let last = moves
                        .iter()
                        .filter(|m| m.to.0 == after)
                        .map(|m| m.to.1)
                        .max()
                        .unwrap_or(0);
                    (after, last + 1)
                }
            };
            (empty.after, empty.sub) = to;
            moves.push(EmptyMove { from, to });
        }
        moves
    }
}

/// Old and new `(after, sub)` of an empty node
struct EmptyMove {
    from: (NodeId, usize),
    to: (NodeId, usize),
}

/// New text of a DEPS governor (`7` or `6.1`), `None` if the token is gone
fn remap_governor(
    gov: &str,
    map: &impl Fn(NodeId) -> Option<NodeId>,
    moves: &[EmptyMove],
) -> Option<String> {
    if let Some((after, sub)) = gov.split_once('.') {
        let id = after.parse::<NodeId>().ok().zip(sub.parse::<usize>().ok());
        return Some(
            moves
                .iter()
                .find(|m| Some(m.from) == id)
                .map_or_else(|| gov.to_string(), |m| format!("{}.{}", m.to.0, m.to.1)),
        );
    }
    match gov.parse::<NodeId>() {
        Ok(id) => map(id).map(|id| id.to_string()),
        Err(_) => Some(gov.to_string()),
    }
}

/// Remap the governors of `gov:rel` entries, dropping those whose governor is gone
fn remap_entries<'a>(
    entries: impl Iterator<Item = &'a str>,
    remap: &impl Fn(&str) -> Option<String>,
) -> Vec<String> {
    entries
        .filter_map(|entry| match entry.split_once(':') {
            Some((gov, rel)) => remap(gov).map(|gov| format!("{}:{}", gov, rel)),
            None => Some(entry.to_string()),
        })
        .collect()
}

impl EmptyNode {
    /// Rewrite the governors in the DEPS column of the empty node line
    fn remap_deps(&mut self, remap: &impl Fn(&str) -> Option<String>) {
        let mut fields: Vec<&str> = self.columns.split('\t').collect();
        if fields.len() != 9 || fields[7] == "_" {
            return;
        }
        let entries = remap_entries(fields[7].split('|'), remap);
        let deps = if entries.is_empty() {
            "_".to_string()
        } else {
            entries.join("|")
        };
        fields[7] = &deps;
        self.columns = fields.join("\t");
    }
}
