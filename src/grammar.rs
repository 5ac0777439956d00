//! Search and transform grammars
//!
//! A search grammar is a disjunction of `pattern` blocks: a sentence matches
//! if any of them has a binding. A transform grammar is an ordered list of
//! `rule` blocks, each run to a fixpoint before the next one starts.

use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::compiler::{CompiledPattern, CompiledRule, PatternError, compile_pattern, compile_rule};
use crate::matcher::Binding;
use crate::parser::{GrammarSyntaxError, parse_grammar};
use crate::pattern::{BlockAst, BlockKind, GrammarAst};
use crate::rewrite::{self, GraphIntegrityError};
use crate::tree::Sentence;

/// Error loading a grammar; no part of the grammar is usable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error(transparent)]
    Syntax(#[from] GrammarSyntaxError),

    #[error("block {block} (line {line}): {error}")]
    Pattern {
        block: String,
        line: usize,
        #[source]
        error: PatternError,
    },

    #[error("block {block} (line {line}): {found} blocks are not allowed here")]
    WrongBlockKind {
        block: String,
        line: usize,
        found: &'static str,
    },

    #[error("block {block} (line {line}): name already used")]
    DuplicateBlock { block: String, line: usize },
}

fn kind_name(kind: BlockKind) -> &'static str {
    match kind {
        BlockKind::Pattern => "pattern",
        BlockKind::Rule => "rule",
    }
}

/// Parse `source` and check that every block has the expected kind and a
/// unique name
fn load_blocks(source: &str, expected: BlockKind) -> Result<Vec<BlockAst>, GrammarError> {
    let GrammarAst { blocks } = parse_grammar(source)?;
    let mut seen = FxHashSet::default();

    for block in &blocks {
        if block.kind != expected {
            return Err(GrammarError::WrongBlockKind {
                block: block.name.clone(),
                line: block.position.line,
                found: kind_name(block.kind),
            });
        }
        if !seen.insert(block.name.as_str()) {
            return Err(GrammarError::DuplicateBlock {
                block: block.name.clone(),
                line: block.position.line,
            });
        }
    }
    Ok(blocks)
}

fn pattern_error(block: &BlockAst) -> impl FnOnce(PatternError) -> GrammarError + '_ {
    move |error| GrammarError::Pattern {
        block: block.name.clone(),
        line: block.position.line,
        error,
    }
}

/// A binding found by a search grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit<'g> {
    /// Name of the pattern block that matched
    pub pattern: &'g str,
    pub binding: Binding,
}

/// Result of testing a sentence against a search grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome<'g> {
    /// First binding of the first pattern that matched
    Matched(SearchHit<'g>),
    NoMatch,
}

impl SearchOutcome<'_> {
    pub fn is_match(&self) -> bool {
        matches!(self, SearchOutcome::Matched(_))
    }
}

/// Compiled `pattern` blocks, tried in declaration order
#[derive(Debug, Clone)]
pub struct SearchGrammar {
    patterns: Vec<(String, CompiledPattern)>,
}

impl SearchGrammar {
    /// Parse and compile a grammar made of `pattern` blocks
    pub fn new(source: &str) -> Result<Self, GrammarError> {
        let patterns = load_blocks(source, BlockKind::Pattern)?
            .iter()
            .map(|block| {
                compile_pattern(&block.pattern)
                    .map(|pattern| (block.name.clone(), pattern))
                    .map_err(pattern_error(block))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    pub fn pattern_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.patterns.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Stop at the first pattern that has a binding
    pub fn search(&self, sentence: &Sentence) -> SearchOutcome<'_> {
        self.patterns
            .iter()
            .find_map(|(name, pattern)| {
                pattern.first_match(sentence).map(|binding| SearchHit {
                    pattern: name.as_str(),
                    binding,
                })
            })
            .map_or(SearchOutcome::NoMatch, SearchOutcome::Matched)
    }

    pub fn is_match(&self, sentence: &Sentence) -> bool {
        self.search(sentence).is_match()
    }

    /// Every binding of every pattern, pattern by pattern in canonical order
    pub fn find_all<'g, 's>(
        &'g self,
        sentence: &'s Sentence,
    ) -> impl Iterator<Item = SearchHit<'g>> {
        self.patterns.iter().flat_map(move |(name, pattern)| {
            pattern.matches(sentence).map(move |binding| SearchHit {
                pattern: name.as_str(),
                binding,
            })
        })
    }
}

/// Settings of a transform run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    /// Applications of one rule to one sentence before the loop is cut off
    pub max_iterations: usize,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
        }
    }
}

impl TransformOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// A rule kept matching after the configured number of applications
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rule {rule} still matches after {cap} applications")]
pub struct RewriteLoopError {
    pub rule: String,
    pub cap: usize,
}

/// How the loop of one rule ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// No binding left that applies
    Fixpoint,
    /// Cut off; the sentence keeps the state after the last allowed application
    Capped(RewriteLoopError),
}

/// What one rule did to one sentence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleReport {
    pub rule: String,
    pub applications: usize,
    /// Bindings whose action lists failed and were discarded
    pub rolled_back: Vec<GraphIntegrityError>,
    pub outcome: RuleOutcome,
}

/// What a transform grammar did to one sentence, rule by rule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformReport {
    pub rules: Vec<RuleReport>,
}

impl TransformReport {
    /// Total number of applied bindings
    pub fn applications(&self) -> usize {
        self.rules.iter().map(|r| r.applications).sum()
    }

    pub fn changed(&self) -> bool {
        self.applications() > 0
    }

    pub fn loop_errors(&self) -> impl Iterator<Item = &RewriteLoopError> + '_ {
        self.rules.iter().filter_map(|r| match &r.outcome {
            RuleOutcome::Capped(err) => Some(err),
            RuleOutcome::Fixpoint => None,
        })
    }

    pub fn integrity_errors(&self) -> impl Iterator<Item = (&str, &GraphIntegrityError)> + '_ {
        self.rules
            .iter()
            .flat_map(|r| r.rolled_back.iter().map(move |e| (r.rule.as_str(), e)))
    }
}

/// States of the per-rule fixpoint loop
enum Fixpoint {
    /// Looking for the first binding of the current graph that applies
    Seeking,
    /// A binding applied; the edited graph waits to replace the current one
    Applying(Sentence),
    Reached,
    Capped,
}

/// Compiled `rule` blocks, applied in declaration order
#[derive(Debug, Clone)]
pub struct TransGrammar {
    rules: Vec<(String, CompiledRule)>,
    options: TransformOptions,
}

impl TransGrammar {
    /// Parse and compile a grammar made of `rule` blocks
    pub fn new(source: &str) -> Result<Self, GrammarError> {
        Self::with_options(source, TransformOptions::default())
    }

    pub fn with_options(source: &str, options: TransformOptions) -> Result<Self, GrammarError> {
        let rules = load_blocks(source, BlockKind::Rule)?
            .iter()
            .map(|block| {
                compile_rule(&block.pattern, &block.actions)
                    .map(|rule| (block.name.clone(), rule))
                    .map_err(pattern_error(block))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { rules, options })
    }

    pub fn options(&self) -> TransformOptions {
        self.options
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.rules.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule to its fixpoint, in order
    ///
    /// The sentence is only ever replaced by fully edited versions; a
    /// binding whose actions fail leaves it as it was.
    pub fn transform(&self, sentence: &mut Sentence) -> TransformReport {
        let mut graph = std::mem::take(sentence);
        let mut report = TransformReport::default();

        for (name, rule) in &self.rules {
            let (next, rule_report) = self.run_rule(name, rule, graph);
            graph = next;
            report.rules.push(rule_report);
        }

        *sentence = graph;
        report
    }

    fn run_rule(
        &self,
        name: &str,
        rule: &CompiledRule,
        mut graph: Sentence,
    ) -> (Sentence, RuleReport) {
        let cap = self.options.max_iterations;
        let mut applications = 0;
        let mut rolled_back = Vec::new();
        let mut state = Fixpoint::Seeking;

        loop {
            state = match state {
                Fixpoint::Seeking => {
                    let mut edited = None;
                    for binding in rule.pattern.matches(&graph) {
                        match rewrite::apply(&binding, &rule.actions, &graph) {
                            Ok(next) => {
                                edited = Some(next);
                                break;
                            }
                            Err(err) => {
                                warn!(
                                    rule = name,
                                    sent_id = graph.sent_id(),
                                    error = %err,
                                    "rolled back binding"
                                );
                                rolled_back.push(err);
                            }
                        }
                    }
                    match edited {
                        None => Fixpoint::Reached,
                        Some(_) if applications == cap => Fixpoint::Capped,
                        Some(next) => Fixpoint::Applying(next),
                    }
                }
                Fixpoint::Applying(next) => {
                    graph = next;
                    applications += 1;
                    trace!(rule = name, applications, "applied rule");
                    Fixpoint::Seeking
                }
                Fixpoint::Reached => {
                    if applications > 0 {
                        debug!(
                            rule = name,
                            sent_id = graph.sent_id(),
                            applications,
                            "rule reached fixpoint"
                        );
                    }
                    return (
                        graph,
                        RuleReport {
                            rule: name.to_string(),
                            applications,
                            rolled_back,
                            outcome: RuleOutcome::Fixpoint,
                        },
                    );
                }
                Fixpoint::Capped => {
                    let err = RewriteLoopError {
                        rule: name.to_string(),
                        cap,
                    };
                    warn!(sent_id = graph.sent_id(), error = %err, "rewrite loop cut off");
                    return (
                        graph,
                        RuleReport {
                            rule: name.to_string(),
                            applications,
                            rolled_back,
                            outcome: RuleOutcome::Capped(err),
                        },
                    );
                }
            };
        }
    }
}
