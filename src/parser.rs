//! Grammar language parser
//!
//! Parses grammar source into the [`GrammarAst`] using the pest grammar in
//! `grammar.pest`. Only syntax is checked here; name resolution and
//! predicate consistency are the compiler's job.

use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;
use thiserror::Error;

use crate::pattern::{
    ActionAst, BlockAst, BlockKind, EdgeConstraint, FeatureKey, FeaturePredicate, GrammarAst,
    LabelTest, NodeDecl, NodeRef, PatternAst, Placement, Position, RelationType, ValueTest,
};

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct GrammarParser;

/// Malformed grammar source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Grammar syntax error at {line}:{column}: {message}")]
pub struct GrammarSyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl GrammarSyntaxError {
    fn at(position: Position, message: impl Into<String>) -> Self {
        Self {
            line: position.line,
            column: position.column,
            message: message.into(),
        }
    }
}

impl From<pest::error::Error<Rule>> for GrammarSyntaxError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let err = err.renamed_rules(rule_name);
        let (line, column) = match err.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };
        Self {
            line,
            column,
            message: err.variant.message().into_owned(),
        }
    }
}

fn rule_name(rule: &Rule) -> String {
    match rule {
        Rule::EOI => "end of input",
        Rule::pattern_block | Rule::kw_pattern => "`pattern` block",
        Rule::rule_block | Rule::kw_rule => "`rule` block",
        Rule::kw_match => "`match` section",
        Rule::do_section | Rule::kw_do => "`do` section",
        Rule::node_decl => "node declaration",
        Rule::edge_decl => "edge",
        Rule::precedence_decl => "precedence constraint",
        Rule::ident | Rule::root_ref | Rule::anon_ref => "node name",
        Rule::feature_key => "feature name",
        Rule::compare_op => "`=` or `!=`",
        Rule::string => "quoted string",
        Rule::regex => "/regex/",
        Rule::plain_arrow | Rule::labeled_arrow | Rule::action_arrow => "arrow",
        Rule::precedence_op => "`<` or `<<`",
        Rule::placement => "`after` or `before`",
        Rule::label | Rule::label_alts => "relation label",
        _ => return format!("{:?}", rule),
    }
    .to_string()
}

fn position(pair: &Pair<Rule>) -> Position {
    let (line, column) = pair.as_span().start_pos().line_col();
    Position { line, column }
}

/// Significant children of a pair (keywords dropped)
fn children<'i>(pair: Pair<'i, Rule>) -> impl Iterator<Item = Pair<'i, Rule>> {
    pair.into_inner().filter(|p| {
        !matches!(
            p.as_rule(),
            Rule::kw_pattern
                | Rule::kw_rule
                | Rule::kw_match
                | Rule::kw_do
                | Rule::kw_set
                | Rule::kw_remove
                | Rule::kw_reattach
                | Rule::kw_add
                | Rule::kw_relabel
                | Rule::kw_delete
                | Rule::kw_new
        )
    })
}

/// Next child, or an error pointing at the parent construct
fn next<'i>(
    pairs: &mut impl Iterator<Item = Pair<'i, Rule>>,
    at: Position,
    what: &str,
) -> Result<Pair<'i, Rule>, GrammarSyntaxError> {
    pairs
        .next()
        .ok_or_else(|| GrammarSyntaxError::at(at, format!("Expected {}", what)))
}

/// Parse grammar source into its blocks
pub fn parse_grammar(input: &str) -> Result<GrammarAst, GrammarSyntaxError> {
    let mut pairs: Pairs<Rule> = GrammarParser::parse(Rule::grammar, input)?;
    let mut grammar = GrammarAst::default();

    let Some(grammar_pair) = pairs.next() else {
        return Err(GrammarSyntaxError::at(
            Position { line: 1, column: 1 },
            "Empty grammar",
        ));
    };

    for block in grammar_pair.into_inner() {
        match block.as_rule() {
            Rule::pattern_block => grammar.blocks.push(parse_pattern_block(block)?),
            Rule::rule_block => grammar.blocks.push(parse_rule_block(block)?),
            Rule::EOI => {} // End of input
            _ => {}
        }
    }

    Ok(grammar)
}

/// `pattern NAME { statements }`
fn parse_pattern_block(pair: Pair<Rule>) -> Result<BlockAst, GrammarSyntaxError> {
    let at = position(&pair);
    let mut inner = children(pair);
    let name = next(&mut inner, at, "block name")?.as_str().to_string();

    let mut pattern = PatternAst::default();
    for statement in inner {
        parse_statement(statement, &mut pattern)?;
    }

    Ok(BlockAst {
        kind: BlockKind::Pattern,
        name,
        pattern,
        actions: Vec::new(),
        position: at,
    })
}

/// `rule NAME { match { statements } do { actions } }`
fn parse_rule_block(pair: Pair<Rule>) -> Result<BlockAst, GrammarSyntaxError> {
    let at = position(&pair);
    let mut inner = children(pair);
    let name = next(&mut inner, at, "rule name")?.as_str().to_string();

    let mut pattern = PatternAst::default();
    let match_section = next(&mut inner, at, "`match` section")?;
    for statement in children(match_section) {
        parse_statement(statement, &mut pattern)?;
    }

    let mut actions = Vec::new();
    if let Some(do_section) = inner.next() {
        for action in children(do_section) {
            actions.push(parse_action(action)?);
        }
    }

    Ok(BlockAst {
        kind: BlockKind::Rule,
        name,
        pattern,
        actions,
        position: at,
    })
}

fn parse_statement(pair: Pair<Rule>, pattern: &mut PatternAst) -> Result<(), GrammarSyntaxError> {
    match pair.as_rule() {
        Rule::node_decl => pattern.nodes.push(parse_node_decl(pair)?),
        Rule::edge_decl => pattern.edges.push(parse_edge_decl(pair)?),
        Rule::precedence_decl => pattern.edges.push(parse_precedence_decl(pair)?),
        rule => {
            return Err(GrammarSyntaxError::at(
                position(&pair),
                format!("Unexpected {}", rule_name(&rule)),
            ));
        }
    }
    Ok(())
}

/// Parse a node declaration: Name [predicate, predicate]
fn parse_node_decl(pair: Pair<Rule>) -> Result<NodeDecl, GrammarSyntaxError> {
    let at = position(&pair);
    let mut inner = pair.into_inner();

    let name = next(&mut inner, at, "node name")?.as_str().to_string();
    let predicate_list = next(&mut inner, at, "predicate list")?;
    let predicates = predicate_list
        .into_inner()
        .map(parse_predicate)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NodeDecl {
        name,
        predicates,
        position: at,
    })
}

/// Parse `key="v"`, `key!="v"`, `key=/re/`, `key!=/re/` or `!key`
fn parse_predicate(pair: Pair<Rule>) -> Result<FeaturePredicate, GrammarSyntaxError> {
    let at = position(&pair);
    let rule = pair.as_rule();
    let mut inner = pair.into_inner();
    let key = parse_feature_key(next(&mut inner, at, "feature name")?)?;

    if rule == Rule::absent_pred {
        return Ok(FeaturePredicate::new(key, ValueTest::Absent));
    }

    let negated = next(&mut inner, at, "`=` or `!=`")?.as_str() == "!=";
    let value = next(&mut inner, at, "value")?;
    let test = match (value.as_rule(), negated) {
        (Rule::regex, false) => ValueTest::Matches(regex_body(value)),
        (Rule::regex, true) => ValueTest::NotMatches(regex_body(value)),
        (_, false) => ValueTest::Equals(string_body(value)),
        (_, true) => ValueTest::NotEquals(string_body(value)),
    };

    Ok(FeaturePredicate::new(key, test))
}

fn parse_feature_key(pair: Pair<Rule>) -> Result<FeatureKey, GrammarSyntaxError> {
    FeatureKey::parse(pair.as_str()).ok_or_else(|| {
        GrammarSyntaxError::at(
            position(&pair),
            format!("Unknown feature name: {}", pair.as_str()),
        )
    })
}

fn parse_node_ref(pair: &Pair<Rule>) -> NodeRef {
    match pair.as_rule() {
        Rule::root_ref => NodeRef::Root,
        Rule::anon_ref => NodeRef::Anonymous,
        _ => NodeRef::Named(pair.as_str().to_string()),
    }
}

/// Parse edge declaration: A -[label]-> B; A -> B; A !-[label]-> B;
fn parse_edge_decl(pair: Pair<Rule>) -> Result<EdgeConstraint, GrammarSyntaxError> {
    let at = position(&pair);
    let mut inner = pair.into_inner();

    let from = parse_node_ref(&next(&mut inner, at, "governor")?);

    let mut arrow = next(&mut inner, at, "arrow")?;
    let negated = arrow.as_rule() == Rule::negation;
    if negated {
        arrow = next(&mut inner, at, "arrow")?;
    }

    let label = match arrow.into_inner().next() {
        None => LabelTest::Any,
        Some(test) if test.as_rule() == Rule::regex => LabelTest::Regex(regex_body(test)),
        Some(test) => LabelTest::Literal(test.as_str().split('|').map(str::to_string).collect()),
    };

    let to = parse_node_ref(&next(&mut inner, at, "dependent")?);

    Ok(EdgeConstraint {
        from,
        to,
        relation: RelationType::Child,
        label,
        negated,
        position: at,
    })
}

/// Parse precedence declaration: First << Second; or First < Second;
fn parse_precedence_decl(pair: Pair<Rule>) -> Result<EdgeConstraint, GrammarSyntaxError> {
    let at = position(&pair);
    let mut inner = pair.into_inner();

    let from = next(&mut inner, at, "node name")?.as_str().to_string();
    let relation = match next(&mut inner, at, "`<` or `<<`")?.as_str() {
        "<<" => RelationType::Precedes,
        _ => RelationType::ImmediatelyPrecedes,
    };
    let to = next(&mut inner, at, "node name")?.as_str().to_string();

    Ok(EdgeConstraint {
        from: NodeRef::Named(from),
        to: NodeRef::Named(to),
        relation,
        label: LabelTest::Any,
        negated: false,
        position: at,
    })
}

fn parse_action(pair: Pair<Rule>) -> Result<ActionAst, GrammarSyntaxError> {
    let at = position(&pair);
    let rule = pair.as_rule();
    let mut inner = children(pair);

    let action = match rule {
        Rule::set_action => {
            let node = next(&mut inner, at, "node name")?.as_str().to_string();
            let key = parse_feature_key(next(&mut inner, at, "feature name")?)?;
            let value = string_body(next(&mut inner, at, "quoted string")?);
            ActionAst::SetFeature { node, key, value }
        }
        Rule::remove_action => {
            let node = next(&mut inner, at, "node name")?.as_str().to_string();
            let key = parse_feature_key(next(&mut inner, at, "feature name")?)?;
            ActionAst::RemoveFeature { node, key }
        }
        Rule::reattach_action | Rule::add_edge_action | Rule::relabel_action => {
            let governor = parse_node_ref(&next(&mut inner, at, "governor")?);
            let arrow = next(&mut inner, at, "arrow")?;
            let relation = next(&mut arrow.into_inner(), at, "relation label")?
                .as_str()
                .to_string();
            let dependent = next(&mut inner, at, "dependent")?.as_str().to_string();
            match rule {
                Rule::reattach_action => ActionAst::Reattach {
                    governor,
                    dependent,
                    relation,
                },
                Rule::add_edge_action => ActionAst::AddEdge {
                    governor,
                    dependent,
                    relation,
                },
                _ => ActionAst::Relabel {
                    governor,
                    dependent,
                    relation,
                },
            }
        }
        Rule::delete_edge_action => {
            let governor = parse_node_ref(&next(&mut inner, at, "governor")?);
            let dependent = next(&mut inner, at, "dependent")?.as_str().to_string();
            ActionAst::DeleteEdge {
                governor,
                dependent,
            }
        }
        Rule::delete_node_action => {
            let node = next(&mut inner, at, "node name")?.as_str().to_string();
            ActionAst::DeleteNode { node }
        }
        Rule::new_node_action => {
            let name = next(&mut inner, at, "node name")?.as_str().to_string();
            let placement = match next(&mut inner, at, "`after` or `before`")?.as_str() {
                "before" => Placement::Before,
                _ => Placement::After,
            };
            let anchor = next(&mut inner, at, "node name")?.as_str().to_string();
            let mut features = Vec::new();
            if let Some(assignments) = inner.next() {
                for assignment in assignments.into_inner() {
                    let assignment_at = position(&assignment);
                    let mut parts = assignment.into_inner();
                    let key =
                        parse_feature_key(next(&mut parts, assignment_at, "feature name")?)?;
                    let value = string_body(next(&mut parts, assignment_at, "quoted string")?);
                    features.push((key, value));
                }
            }
            ActionAst::AddNode {
                name,
                anchor,
                placement,
                features,
            }
        }
        rule => {
            return Err(GrammarSyntaxError::at(
                at,
                format!("Unexpected {}", rule_name(&rule)),
            ));
        }
    };

    Ok(action)
}

/// Unescaped contents of a quoted string
fn string_body(pair: Pair<Rule>) -> String {
    let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match (c, chars.clone().next()) {
            ('\\', Some(escaped)) => {
                chars.next();
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
            }
            _ => out.push(c),
        }
    }
    out
}

/// Regex source between the slashes, with `\/` unescaped
fn regex_body(pair: Pair<Rule>) -> String {
    pair.into_inner()
        .next()
        .map(|p| p.as_str())
        .unwrap_or("")
        .replace("\\/", "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_pattern(source: &str) -> PatternAst {
        let grammar = parse_grammar(source).unwrap();
        assert_eq!(grammar.blocks.len(), 1);
        grammar.blocks.into_iter().next().unwrap().pattern
    }

    #[test]
    fn test_parse_empty_constraint() {
        let pattern = single_pattern("pattern p { Node []; }");

        assert_eq!(pattern.nodes.len(), 1);
        assert_eq!(pattern.nodes[0].name, "Node");
        assert!(pattern.nodes[0].predicates.is_empty());
    }

    #[test]
    fn test_parse_predicates() {
        let pattern = single_pattern(
            r#"pattern p { V [lemma="help", upos!="NOUN", feats.Tense=/Past|Pqp/, xpos!=/VB.*/, !feats.Mood]; }"#,
        );

        let predicates = &pattern.nodes[0].predicates;
        assert_eq!(predicates.len(), 5);
        assert_eq!(
            predicates[0],
            FeaturePredicate::new(FeatureKey::Lemma, ValueTest::Equals("help".to_string()))
        );
        assert_eq!(
            predicates[1],
            FeaturePredicate::new(FeatureKey::Upos, ValueTest::NotEquals("NOUN".to_string()))
        );
        assert_eq!(
            predicates[2],
            FeaturePredicate::new(
                FeatureKey::Feat("Tense".to_string()),
                ValueTest::Matches("Past|Pqp".to_string())
            )
        );
        assert_eq!(
            predicates[3],
            FeaturePredicate::new(FeatureKey::Xpos, ValueTest::NotMatches("VB.*".to_string()))
        );
        assert_eq!(
            predicates[4],
            FeaturePredicate::new(FeatureKey::Feat("Mood".to_string()), ValueTest::Absent)
        );
    }

    #[test]
    fn test_parse_absent_feature_last() {
        let pattern = single_pattern("pattern p { X [!feats.Y]; }");
        assert_eq!(
            pattern.nodes[0].predicates,
            vec![FeaturePredicate::new(FeatureKey::Feat("Y".to_string()), ValueTest::Absent)]
        );

        let pattern = single_pattern(r#"pattern p { N [upos="NOUN", !misc.X]; }"#);
        assert_eq!(
            pattern.nodes[0].predicates[1],
            FeaturePredicate::new(FeatureKey::Misc("X".to_string()), ValueTest::Absent)
        );
    }

    #[test]
    fn test_parse_layered_feature() {
        let pattern = single_pattern(
            r#"pattern p { P [feats.Number[psor]="Plur", !feats.Person[psor]]; }"#,
        );
        let predicates = &pattern.nodes[0].predicates;
        assert_eq!(predicates[0].key, FeatureKey::Feat("Number[psor]".to_string()));
        assert_eq!(
            predicates[1],
            FeaturePredicate::new(FeatureKey::Feat("Person[psor]".to_string()), ValueTest::Absent)
        );

        assert!(parse_grammar("pattern p { P [!feats.Number]x]; }").is_err());
    }

    #[test]
    fn test_parse_string_escapes() {
        let pattern = single_pattern(r#"pattern p { Q [form="\"", misc.Note="a\\b"]; }"#);

        assert_eq!(
            pattern.nodes[0].predicates[0].test,
            ValueTest::Equals("\"".to_string())
        );
        assert_eq!(
            pattern.nodes[0].predicates[1].test,
            ValueTest::Equals("a\\b".to_string())
        );
    }

    #[test]
    fn test_parse_edges() {
        let pattern = single_pattern(
            r#"
            pattern p {
                // Find help-to-verb constructions
                Help [lemma="help"];
                To [lemma="to"];
                Help -[xcomp]-> To;
                Help -> To;
                Help !-[obj|iobj]-> _;
                _ -[/obl(:.*)?/]-> To;
                ROOT -> Help;
                Help !-> To;
            }
            "#,
        );

        assert_eq!(pattern.nodes.len(), 2);
        assert_eq!(pattern.edges.len(), 6);

        let edge = &pattern.edges[0];
        assert_eq!(edge.from, NodeRef::Named("Help".to_string()));
        assert_eq!(edge.to, NodeRef::Named("To".to_string()));
        assert_eq!(edge.relation, RelationType::Child);
        assert_eq!(edge.label, LabelTest::Literal(vec!["xcomp".to_string()]));
        assert!(!edge.negated);

        assert_eq!(pattern.edges[1].label, LabelTest::Any);

        let negated = &pattern.edges[2];
        assert!(negated.negated);
        assert_eq!(negated.to, NodeRef::Anonymous);
        assert_eq!(
            negated.label,
            LabelTest::Literal(vec!["obj".to_string(), "iobj".to_string()])
        );

        assert_eq!(pattern.edges[3].from, NodeRef::Anonymous);
        assert_eq!(
            pattern.edges[3].label,
            LabelTest::Regex("obl(:.*)?".to_string())
        );
        assert_eq!(pattern.edges[4].from, NodeRef::Root);
        assert!(pattern.edges[5].negated);
        assert_eq!(pattern.edges[5].label, LabelTest::Any);
    }

    #[test]
    fn test_parse_subtyped_label() {
        let pattern = single_pattern("pattern p { A []; B []; A -[obl:arg]-> B; }");
        assert_eq!(
            pattern.edges[0].label,
            LabelTest::Literal(vec!["obl:arg".to_string()])
        );
    }

    #[test]
    fn test_parse_precedence() {
        let pattern = single_pattern("pattern p { A []; B []; C []; A < B; B << C; }");

        assert_eq!(pattern.edges.len(), 2);
        assert_eq!(pattern.edges[0].relation, RelationType::ImmediatelyPrecedes);
        assert_eq!(pattern.edges[1].relation, RelationType::Precedes);
        assert_eq!(pattern.edges[1].from, NodeRef::Named("B".to_string()));
    }

    #[test]
    fn test_parse_rule_with_actions() {
        let grammar = parse_grammar(
            r#"
            rule everything {
                match {
                    V [upos="VERB"];
                    N [];
                    V -[obj]-> N;
                }
                do {
                    set N.feats.Case = "Acc";
                    remove V.misc.SpaceAfter;
                    reattach ROOT -[root]-> N;
                    add V -[dep]-> N;
                    relabel V -[obl:arg]-> N;
                    delete V -> N;
                    new P after N [form="it", upos="PRON"];
                    new Q before V;
                    delete V;
                }
            }
            "#,
        )
        .unwrap();

        let block = &grammar.blocks[0];
        assert_eq!(block.kind, BlockKind::Rule);
        assert_eq!(block.name, "everything");
        assert_eq!(block.pattern.nodes.len(), 2);
        assert_eq!(block.actions.len(), 9);

        assert_eq!(
            block.actions[0],
            ActionAst::SetFeature {
                node: "N".to_string(),
                key: FeatureKey::Feat("Case".to_string()),
                value: "Acc".to_string(),
            }
        );
        assert_eq!(
            block.actions[1],
            ActionAst::RemoveFeature {
                node: "V".to_string(),
                key: FeatureKey::Misc("SpaceAfter".to_string()),
            }
        );
        assert_eq!(
            block.actions[2],
            ActionAst::Reattach {
                governor: NodeRef::Root,
                dependent: "N".to_string(),
                relation: "root".to_string(),
            }
        );
        assert!(matches!(&block.actions[3], ActionAst::AddEdge { relation, .. } if relation == "dep"));
        assert!(
            matches!(&block.actions[4], ActionAst::Relabel { relation, .. } if relation == "obl:arg")
        );
        assert_eq!(
            block.actions[5],
            ActionAst::DeleteEdge {
                governor: NodeRef::Named("V".to_string()),
                dependent: "N".to_string(),
            }
        );
        assert_eq!(
            block.actions[6],
            ActionAst::AddNode {
                name: "P".to_string(),
                anchor: "N".to_string(),
                placement: Placement::After,
                features: vec![
                    (FeatureKey::Form, "it".to_string()),
                    (FeatureKey::Upos, "PRON".to_string()),
                ],
            }
        );
        assert!(matches!(
            &block.actions[7],
            ActionAst::AddNode { placement: Placement::Before, features, .. } if features.is_empty()
        ));
        assert_eq!(
            block.actions[8],
            ActionAst::DeleteNode {
                node: "V".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rule_without_do() {
        let grammar = parse_grammar("rule r { match { X []; } }").unwrap();
        assert!(grammar.blocks[0].actions.is_empty());
    }

    #[test]
    fn test_parse_multiple_blocks_in_order() {
        let grammar = parse_grammar(
            r#"
            pattern first { A [upos="AUX"]; }
            rule second { match { B []; } do { delete B; } }
            pattern third { C []; }
            "#,
        )
        .unwrap();

        let names: Vec<_> = grammar.blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(grammar.blocks[1].kind, BlockKind::Rule);
        assert_eq!(grammar.blocks[1].position.line, 3);
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse_grammar("pattern p {\n  A [upos=\"X\"]\n}").unwrap_err();
        // missing semicolon is reported right after the declaration
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_unknown_feature_key() {
        let err = parse_grammar("pattern p {\n  A [colour=\"red\"];\n}").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 6);
        assert!(err.message.contains("colour"));
    }

    #[test]
    fn test_reserved_and_malformed_names() {
        assert!(parse_grammar("pattern p { ROOT []; }").is_err());
        assert!(parse_grammar("pattern p { _ []; }").is_err());
        assert!(parse_grammar("pattern { A []; }").is_err());
        assert!(parse_grammar("rule r { A []; }").is_err());
        assert!(parse_grammar("rule r { match { A []; } do { explode A; } }").is_err());
    }

    #[test]
    fn test_empty_grammar() {
        let grammar = parse_grammar("  // nothing here\n").unwrap();
        assert!(grammar.blocks.is_empty());
    }
}
