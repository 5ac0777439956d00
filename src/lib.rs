//! Depgrammar: grammar-driven pattern matching and rewriting for dependency treebanks
//!
//! Grammars are small text files of named blocks. `pattern` blocks make up
//! a search grammar (a sentence matches if any block does); `rule` blocks
//! make up a transform grammar, applied in order, each to a fixpoint.
//! Sentences are read and written as CoNLL-U.

// Core modules (leaf-first)
pub mod tree; // Sentence graph with multi-governor nodes
pub mod conllu; // CoNLL-U reading and writing
pub mod pattern; // Grammar AST
pub mod parser; // Grammar language parser
pub mod compiler; // Validation and search plans
pub mod matcher; // Backtracking subgraph matcher
pub mod rewrite; // Transactional action application
pub mod grammar; // Search and transform grammars

// Reporting
pub mod diff;
pub mod stats;

// Re-exports for convenience
pub use compiler::{CompiledPattern, CompiledRule, PatternError, compile_pattern, compile_rule};
pub use conllu::{CoNLLUReader, ParseError, parse_sentence, write_sentences};
pub use diff::{SentenceDiff, diff};
pub use grammar::{
    GrammarError, RewriteLoopError, RuleOutcome, SearchGrammar, SearchOutcome, TransGrammar,
    TransformOptions, TransformReport,
};
pub use matcher::{Binding, Matches};
pub use parser::{GrammarSyntaxError, parse_grammar};
pub use rewrite::{GraphIntegrityError, apply};
pub use stats::{SentenceStats, compute as compute_stats};
pub use tree::{FeatureKey, Features, GraphError, Node, NodeId, ROOT, Sentence};
