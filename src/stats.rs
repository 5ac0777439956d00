//! Per-sentence dependency distance and branching statistics

use crate::tree::Sentence;

/// Relations counted as syntactic (compared on the label before any `:`)
pub const SYNTACTIC_RELATIONS: [&str; 24] = [
    "nsubj",
    "csubj",
    "subj",
    "obj",
    "iobj",
    "ccomp",
    "xcomp",
    "aux",
    "cop",
    "case",
    "mark",
    "cc",
    "advmod",
    "advcl",
    "obl",
    "dislocated",
    "vocative",
    "expl",
    "nummod",
    "nmod",
    "amod",
    "discourse",
    "acl",
    "det",
];

/// Label without its subtype (`obl:arg` -> `obl`)
pub fn base_relation(label: &str) -> &str {
    label.split_once(':').map_or(label, |(base, _)| base)
}

pub fn is_syntactic(label: &str) -> bool {
    SYNTACTIC_RELATIONS.contains(&base_relation(label))
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SentenceStats {
    /// Edges other than `root`
    pub relation_count: usize,
    pub syntactic_relation_count: usize,
    pub avg_distance_all: f64,
    pub avg_distance_syntactic: f64,
    /// Share of dependents after their governor, 0..=100
    pub pct_right_branching_all: f64,
    pub pct_right_branching_syntactic: f64,
}

#[derive(Default)]
struct Population {
    count: usize,
    distance: usize,
    right: usize,
}

impl Population {
    fn add(&mut self, gov: usize, dep: usize) {
        self.count += 1;
        self.distance += gov.abs_diff(dep);
        if dep > gov {
            self.right += 1;
        }
    }

    fn avg_distance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.distance as f64 / self.count as f64
        }
    }

    fn pct_right(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.right as f64 * 100.0 / self.count as f64
        }
    }
}

/// Compute the statistics over every edge of the sentence
pub fn compute(sentence: &Sentence) -> SentenceStats {
    let mut all = Population::default();
    let mut syntactic = Population::default();

    for (gov, dep, rel) in sentence.edges() {
        if base_relation(rel) == "root" {
            continue;
        }
        all.add(gov, dep);
        if is_syntactic(rel) {
            syntactic.add(gov, dep);
        }
    }

    SentenceStats {
        relation_count: all.count,
        syntactic_relation_count: syntactic.count,
        avg_distance_all: all.avg_distance(),
        avg_distance_syntactic: syntactic.avg_distance(),
        pct_right_branching_all: all.pct_right(),
        pct_right_branching_syntactic: syntactic.pct_right(),
    }
}
