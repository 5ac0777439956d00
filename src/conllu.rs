//! CoNLL-U file parsing and writing
//!
//! Parses CoNLL-U text into Sentence structures and writes them back.
//! Lines the graph model does not interpret (comments, multiword tokens,
//! empty nodes, the DEPS text of untouched tokens) are kept verbatim, so an
//! unmodified sentence is written back byte for byte.
//!
//! CoNLL-U format: https://universaldependencies.org/format.html

use crate::tree::{EmptyNode, Features, MultiwordToken, Node, NodeId, Sentence};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Write};
use std::path::Path;
use thiserror::Error;

/// Error during CoNLL-U parsing
#[derive(Debug, Error)]
#[error("Parse error at line {line_num}: {message}")]
pub struct ParseError {
    pub line_num: usize,
    pub message: String,
}

impl ParseError {
    fn new(line_num: usize, message: impl Into<String>) -> Self {
        Self {
            line_num,
            message: message.into(),
        }
    }
}

/// Parsed ID column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenId {
    Single(NodeId),
    Range(NodeId, NodeId),
    Decimal(NodeId, usize),
}

/// CoNLL-U reader that iterates over sentences
pub struct CoNLLUReader<R: BufRead> {
    reader: R,
    line_num: usize,
}

impl<R: BufRead> CoNLLUReader<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            line_num: 0,
        }
    }

    /// Next line without its terminator, and whether it ended in `\r\n`
    fn next_line(&mut self) -> Option<io::Result<(String, bool)>> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                }
                let crlf = line.ends_with('\r');
                if crlf {
                    line.pop();
                }
                Some(Ok((line, crlf)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

impl CoNLLUReader<Box<dyn BufRead>> {
    /// Create a reader from a file path; `.gz` files are decompressed
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let reader: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self::from_reader(reader))
    }
}

impl CoNLLUReader<BufReader<Cursor<String>>> {
    /// Create a reader from a string
    pub fn from_string(text: &str) -> Self {
        Self::from_reader(BufReader::new(Cursor::new(text.to_string())))
    }
}

impl<R: BufRead> Iterator for CoNLLUReader<R> {
    type Item = Result<Sentence, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut sentence = Sentence::new();
        let mut has_content = false;

        // Read lines until we hit a blank line (sentence boundary) or EOF
        loop {
            self.line_num += 1;
            match self.next_line() {
                None => {
                    if !has_content {
                        return None;
                    }
                    // Last sentence without trailing blank line
                    break;
                }
                Some(Err(e)) => {
                    return Some(Err(ParseError::new(
                        self.line_num,
                        format!("IO error: {}", e),
                    )));
                }
                Some(Ok((line, crlf))) => {
                    if line.trim().is_empty() {
                        if has_content {
                            break;
                        }
                        // Skip multiple blank lines
                        continue;
                    }
                    if !has_content {
                        sentence.crlf = crlf;
                    }
                    has_content = true;

                    if let Some(comment) = line.strip_prefix('#') {
                        sentence.comments.push(comment.to_string());
                        continue;
                    }

                    if let Err(e) = parse_line(&line, self.line_num, &mut sentence) {
                        // Skip the rest of the broken sentence
                        self.skip_to_boundary();
                        return Some(Err(e));
                    }
                }
            }
        }

        Some(finish_sentence(sentence, self.line_num))
    }
}

impl<R: BufRead> CoNLLUReader<R> {
    fn skip_to_boundary(&mut self) {
        while let Some(Ok((line, _))) = self.next_line() {
            self.line_num += 1;
            if line.trim().is_empty() {
                break;
            }
        }
    }
}

/// Parse a single sentence from text
pub fn parse_sentence(text: &str) -> Result<Sentence, ParseError> {
    CoNLLUReader::from_string(text)
        .next()
        .unwrap_or_else(|| Err(ParseError::new(0, "no sentence found")))
}

/// Check references once every token of the sentence is known
fn finish_sentence(sentence: Sentence, line_num: usize) -> Result<Sentence, ParseError> {
    let n = sentence.len();
    for node in &sentence.nodes {
        if let Some(&gov) = node.govs.keys().find(|&&gov| gov > n) {
            return Err(ParseError::new(
                line_num,
                format!("token {} refers to missing governor {}", node.id, gov),
            ));
        }
    }
    for mwt in &sentence.multiword {
        if mwt.end > n {
            return Err(ParseError::new(
                line_num,
                format!("multiword token {}-{} extends past the sentence", mwt.start, mwt.end),
            ));
        }
    }
    Ok(sentence)
}

/// Parse a single CoNLL-U line into the sentence under construction
fn parse_line(line: &str, line_num: usize, sentence: &mut Sentence) -> Result<(), ParseError> {
    let fields: Vec<&str> = line.split('\t').collect();

    if fields.len() != 10 {
        return Err(ParseError::new(
            line_num,
            format!("Expected 10 fields, found {}", fields.len()),
        ));
    }

    // Everything after the ID column, verbatim
    let rest = &line[fields[0].len() + 1..];

    match parse_id(fields[0]).ok_or_else(|| {
        ParseError::new(line_num, format!("Invalid ID: {}", fields[0]))
    })? {
        TokenId::Range(start, end) => {
            if end <= start {
                return Err(ParseError::new(
                    line_num,
                    format!("Invalid range ID: {}", fields[0]),
                ));
            }
            sentence.multiword.push(MultiwordToken {
                start,
                end,
                columns: rest.to_string(),
            });
            Ok(())
        }
        TokenId::Decimal(after, sub) => {
            sentence.empty_nodes.push(EmptyNode {
                after,
                sub,
                columns: rest.to_string(),
            });
            Ok(())
        }
        TokenId::Single(id) => {
            if id != sentence.len() + 1 {
                return Err(ParseError::new(
                    line_num,
                    format!("Expected token {}, found {}", sentence.len() + 1, id),
                ));
            }
            let node = parse_node(&fields, line_num)?;
            if fields[8] != "_" {
                sentence.enhanced = true;
            }
            sentence.push_node(node);
            Ok(())
        }
    }
}

fn parse_node(fields: &[&str], line_num: usize) -> Result<Node, ParseError> {
    let mut node = Node::new(0, fields[1], fields[2], fields[3]);
    node.xpos = fields[4].to_string();
    node.feats = Features::parse(fields[5]);
    node.misc = Features::parse(fields[9]);

    // Field 6: HEAD, Field 7: DEPREL; `_` leaves the token without a basic edge
    if fields[6] != "_" {
        let head = parse_index(fields[6])
            .ok_or_else(|| ParseError::new(line_num, format!("Invalid HEAD: {}", fields[6])))?;
        node.govs.insert(head, fields[7].to_string());
        node.head = Some(head);
    }

    // DEPS labels take over shared governors; DEPREL is kept apart if it differs
    node.deps.raw = Some(fields[8].to_string());
    if fields[8] != "_" {
        for entry in fields[8].split('|') {
            match entry
                .split_once(':')
                .and_then(|(gov, rel)| Some((parse_index(gov)?, rel)))
            {
                Some((gov, rel)) => {
                    node.govs.insert(gov, rel.to_string());
                }
                None => node.deps.unresolved.push(entry.to_string()),
            }
        }
        if let Some(head) = node.head
            && node.relation(head) != Some(fields[7])
        {
            node.basic_rel = Some(fields[7].to_string());
        }
    }

    Ok(node)
}

#[inline]
fn parse_index(s: &str) -> Option<NodeId> {
    if s.is_empty() {
        return None;
    }
    atoi::atoi::<NodeId>(s.as_bytes()).filter(|_| s.bytes().all(|b| b.is_ascii_digit()))
}

/// Parse ID field (can be integer, range, or decimal)
fn parse_id(s: &str) -> Option<TokenId> {
    let bytes = s.as_bytes();
    if let Some(dash) = memchr::memchr(b'-', bytes) {
        Some(TokenId::Range(
            parse_index(&s[..dash])?,
            parse_index(&s[dash + 1..])?,
        ))
    } else if let Some(dot) = memchr::memchr(b'.', bytes) {
        Some(TokenId::Decimal(
            parse_index(&s[..dot])?,
            parse_index(&s[dot + 1..])?,
        ))
    } else {
        parse_index(s).filter(|&id| id > 0).map(TokenId::Single)
    }
}

impl Sentence {
    /// Encode the sentence as CoNLL-U lines (no trailing blank line)
    pub fn to_conllu(&self) -> String {
        let eol = self.line_ending();
        let mut out = String::new();

        for comment in &self.comments {
            out.push('#');
            out.push_str(comment);
            out.push_str(eol);
        }
        self.push_empty_nodes(&mut out, 0);

        for node in &self.nodes {
            for mwt in self.multiword.iter().filter(|mwt| mwt.start == node.id) {
                out.push_str(&format!("{}-{}\t{}{}", mwt.start, mwt.end, mwt.columns, eol));
            }

            let (head, deprel) = match node.head {
                Some(head) => (head.to_string(), node.deprel().unwrap_or("_")),
                None => ("_".to_string(), "_"),
            };
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}{}",
                node.id,
                node.form,
                node.lemma,
                node.upos,
                node.xpos,
                node.feats,
                head,
                deprel,
                self.deps_column(node),
                node.misc,
                eol,
            ));

            self.push_empty_nodes(&mut out, node.id);
        }

        out
    }

    fn line_ending(&self) -> &'static str {
        if self.crlf { "\r\n" } else { "\n" }
    }

    fn push_empty_nodes(&self, out: &mut String, after: NodeId) {
        let eol = self.line_ending();
        for empty in self.empty_nodes.iter().filter(|e| e.after == after) {
            out.push_str(&format!("{}.{}\t{}{}", empty.after, empty.sub, empty.columns, eol));
        }
    }

    /// DEPS text: the original column if the edges are untouched, otherwise
    /// regenerated from the edge map in the style the treebank uses
    fn deps_column(&self, node: &Node) -> String {
        if let Some(raw) = &node.deps.raw {
            return raw.clone();
        }

        let entries: Vec<String> = node
            .govs
            .iter()
            .filter(|(gov, _)| self.enhanced || Some(**gov) != node.head)
            .map(|(gov, rel)| format!("{}:{}", gov, rel))
            .chain(node.deps.unresolved.iter().cloned())
            .collect();

        if entries.is_empty() {
            "_".to_string()
        } else {
            entries.join("|")
        }
    }
}

/// Write sentences as a CoNLL-U document (each followed by a blank line)
pub fn write_sentences<'a, W: Write>(
    writer: &mut W,
    sentences: impl IntoIterator<Item = &'a Sentence>,
) -> io::Result<()> {
    for sentence in sentences {
        writer.write_all(sentence.to_conllu().as_bytes())?;
        writer.write_all(sentence.line_ending().as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ROOT;

    const SIMPLE: &str = "# sent_id = s1
# text = The dog runs.
1\tThe\tthe\tDET\tDT\tDefinite=Def|PronType=Art\t2\tdet\t_\t_
2\tdog\tdog\tNOUN\tNN\tNumber=Sing\t3\tnsubj\t_\t_
3\truns\trun\tVERB\tVBZ\t_\t0\troot\t_\tSpaceAfter=No
4\t.\t.\tPUNCT\t.\t_\t3\tpunct\t_\t_
";

    const ENHANCED: &str = "# sent_id = e1
1-2\tdella\t_\t_\t_\t_\t_\t_\t_\t_
1\tdi\tdi\tADP\t_\t_\t3\tcase\t3:case\t_
2\tla\til\tDET\t_\tDefinite=Def\t3\tdet\t3:det\t_
3\tcasa\tcasa\tNOUN\t_\t_\t0\troot\t0:root|5:nsubj:xsubj\t_
4\tè\tessere\tAUX\t_\t_\t5\tcop\t5:cop\t_
4.1\tè\tessere\tAUX\t_\t_\t_\t_\t3:orphan\t_
5\tbella\tbello\tADJ\t_\t_\t3\tacl\t3:acl|4.1:dep\t_
";

    #[test]
    fn test_parse_simple_sentence() {
        let sentence = parse_sentence(SIMPLE).unwrap();

        assert_eq!(sentence.len(), 4);
        assert_eq!(sentence.sent_id(), Some("s1"));
        assert_eq!(sentence.meta("text"), Some("The dog runs."));

        let dog = sentence.node(2).unwrap();
        assert_eq!(dog.form, "dog");
        assert_eq!(dog.lemma, "dog");
        assert_eq!(dog.upos, "NOUN");
        assert_eq!(dog.head, Some(3));
        assert_eq!(dog.deprel(), Some("nsubj"));
        assert_eq!(dog.feats.get("Number"), Some("Sing"));

        assert!(sentence.node(3).unwrap().is_root());
        assert_eq!(sentence.node(3).unwrap().misc.get("SpaceAfter"), Some("No"));
    }

    #[test]
    fn test_enhanced_edges() {
        let sentence = parse_sentence(ENHANCED).unwrap();

        assert_eq!(sentence.len(), 5);
        assert!(sentence.enhanced);
        assert_eq!(sentence.multiword.len(), 1);
        assert_eq!(sentence.empty_nodes.len(), 1);

        let casa = sentence.node(3).unwrap();
        assert_eq!(casa.govs.len(), 2);
        assert_eq!(casa.relation(0), Some("root"));
        assert_eq!(casa.relation(5), Some("nsubj:xsubj"));
        assert_eq!(casa.head, Some(0));

        let bella = sentence.node(5).unwrap();
        assert_eq!(bella.govs.len(), 1);
        assert_eq!(bella.deps.unresolved, vec!["4.1:dep".to_string()]);
    }

    #[test]
    fn test_round_trip() {
        for text in [SIMPLE, ENHANCED] {
            let sentence = parse_sentence(text).unwrap();
            assert_eq!(sentence.to_conllu(), text);
        }
    }

    #[test]
    fn test_deps_regenerated_after_edit() {
        let mut sentence = parse_sentence(ENHANCED).unwrap();
        sentence.relabel(5, 3, "nsubj").unwrap();
        sentence.attach(4, 5, "dep").unwrap();

        let text = sentence.to_conllu();
        assert!(text.contains("3\tcasa\tcasa\tNOUN\t_\t_\t0\troot\t0:root|5:nsubj\t_\n"));
        assert!(text.contains("5\tbella\tbello\tADJ\t_\t_\t4\tdep\t4:dep|4.1:dep\t_\n"));
        // untouched token keeps its column
        assert!(text.contains("1\tdi\tdi\tADP\t_\t_\t3\tcase\t3:case\t_\n"));
    }

    #[test]
    fn test_empty_node_references_follow_deletion() {
        let mut sentence = parse_sentence(ENHANCED).unwrap();
        sentence.remove_node(1).unwrap();

        assert_eq!(
            sentence.to_conllu(),
            "# sent_id = e1
1\tla\til\tDET\t_\tDefinite=Def\t2\tdet\t2:det\t_
2\tcasa\tcasa\tNOUN\t_\t_\t0\troot\t0:root|4:nsubj:xsubj\t_
3\tè\tessere\tAUX\t_\t_\t4\tcop\t4:cop\t_
3.1\tè\tessere\tAUX\t_\t_\t_\t_\t2:orphan\t_
4\tbella\tbello\tADJ\t_\t_\t2\tacl\t2:acl|3.1:dep\t_
"
        );
    }

    #[test]
    fn test_empty_node_of_deleted_token() {
        let mut sentence = parse_sentence(ENHANCED).unwrap();
        sentence.remove_node(4).unwrap();

        let text = sentence.to_conllu();
        assert!(text.contains("3\tcasa\tcasa\tNOUN\t_\t_\t0\troot\t0:root|4:nsubj:xsubj\t_\n3.1\t"));
        assert!(text.contains("3.1\tè\tessere\tAUX\t_\t_\t_\t_\t3:orphan\t_\n"));
        assert!(text.contains("4\tbella\tbello\tADJ\t_\t_\t3\tacl\t3:acl|3.1:dep\t_\n"));
    }

    #[test]
    fn test_headless_token_round_trip() {
        let text = "1\ta\ta\tX\t_\t_\t0\troot\t0:root\t_\n\
                    2\tb\tb\tX\t_\t_\t_\t_\t1:dep\t_\n";
        let mut sentence = parse_sentence(text).unwrap();
        assert_eq!(sentence.to_conllu(), text);

        let b = sentence.node(2).unwrap();
        assert_eq!(b.head, None);
        assert_eq!(b.relation(1), Some("dep"));

        sentence.relabel(1, 2, "obj").unwrap();
        assert!(sentence.to_conllu().ends_with("2\tb\tb\tX\t_\t_\t_\t_\t1:obj\t_\n"));
    }

    #[test]
    fn test_enhanced_label_kept_beside_basic_label() {
        let text = "1\twent\tgo\tVERB\t_\t_\t0\troot\t0:root\t_\n\
                    2\tto\tto\tADP\t_\t_\t3\tcase\t3:case\t_\n\
                    3\tRome\tRome\tPROPN\t_\t_\t1\tobl\t1:obl:to\t_\n";
        let mut sentence = parse_sentence(text).unwrap();
        assert_eq!(sentence.to_conllu(), text);

        let rome = sentence.node(3).unwrap();
        assert_eq!(rome.relation(1), Some("obl:to"));
        assert_eq!(rome.deprel(), Some("obl"));

        sentence.add_edge(ROOT, 3, "dep").unwrap();
        assert!(
            sentence
                .to_conllu()
                .ends_with("3\tRome\tRome\tPROPN\t_\t_\t1\tobl\t0:dep|1:obl:to\t_\n")
        );

        sentence.relabel(1, 3, "nmod").unwrap();
        assert!(
            sentence
                .to_conllu()
                .ends_with("3\tRome\tRome\tPROPN\t_\t_\t1\tnmod\t0:dep|1:nmod\t_\n")
        );
    }

    #[test]
    fn test_crlf_round_trip() {
        let text = SIMPLE.replace('\n', "\r\n");
        let sentence = parse_sentence(&text).unwrap();
        assert!(sentence.crlf);
        assert_eq!(sentence.node(3).unwrap().misc.get("SpaceAfter"), Some("No"));
        assert_eq!(sentence.to_conllu(), text);

        let mut out = Vec::new();
        write_sentences(&mut out, [&sentence]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!("{}\r\n", text));
    }

    #[test]
    fn test_basic_treebank_keeps_deps_empty() {
        let mut sentence = parse_sentence(SIMPLE).unwrap();
        sentence.attach(2, 4, "punct").unwrap();
        sentence.add_edge(1, 4, "dep").unwrap();

        let text = sentence.to_conllu();
        assert!(text.contains("4\t.\t.\tPUNCT\t.\t_\t2\tpunct\t1:dep\t_\n"));
    }

    #[test]
    fn test_multiple_sentences() {
        let text = format!("{}\n\n\n{}\n", SIMPLE, ENHANCED);
        let sentences: Vec<_> = CoNLLUReader::from_string(&text)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[1].sent_id(), Some("e1"));

        let mut out = Vec::new();
        write_sentences(&mut out, &sentences).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!("{}\n{}\n", SIMPLE, ENHANCED));
    }

    #[test]
    fn test_parse_errors() {
        let wrong_columns = "1\tThe\tthe\tDET\n";
        assert!(parse_sentence(wrong_columns).is_err());

        let gap = "1\ta\ta\tX\t_\t_\t0\troot\t_\t_\n3\tb\tb\tX\t_\t_\t1\tdep\t_\t_\n";
        let err = parse_sentence(gap).unwrap_err();
        assert_eq!(err.line_num, 2);

        let dangling = "1\ta\ta\tX\t_\t_\t7\tdep\t_\t_\n";
        assert!(parse_sentence(dangling).is_err());
    }

    #[test]
    fn test_reader_recovers_after_error() {
        let text = format!("1\tbroken\n2\tx\n\n{}", SIMPLE);
        let results: Vec<_> = CoNLLUReader::from_string(&text).collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().len(), 4);
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("1"), Some(TokenId::Single(1)));
        assert_eq!(parse_id("5-7"), Some(TokenId::Range(5, 7)));
        assert_eq!(parse_id("10.5"), Some(TokenId::Decimal(10, 5)));
        assert_eq!(parse_id("0"), None);
        assert_eq!(parse_id("x"), None);
        assert_eq!(parse_id("1-"), None);
    }

    #[test]
    fn test_read_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.conllu.gz");
        let file = File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(SIMPLE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let sentences: Vec<_> = CoNLLUReader::from_file(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].to_conllu(), SIMPLE);
    }
}
