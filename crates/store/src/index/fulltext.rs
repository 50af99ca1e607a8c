//! Inverted full-text index: token to the nodes whose string value contains it.

use super::config::FullTextConfig;
use std::collections::{BTreeMap, HashSet};
use sylva_xquery::engine::fulltext::{TermMatcher, tokenize};
use sylva_xquery::runtime::{Error, TermPattern};
use sylva_xquery::{Node, NodeId, NodeKind, XdmNode};

#[derive(Debug, Default)]
pub struct FullTextIndex {
    postings: BTreeMap<String, Vec<Node>>,
    indexed: usize,
}

impl FullTextIndex {
    /// Index every node of `root`'s tree selected by `config`.
    pub fn build(root: &Node, config: &FullTextConfig) -> Self {
        let mut index = Self::default();
        for node in root.descendants() {
            if config.indexes(&node) {
                index.add(&node);
            }
            if config.attributes && node.kind() == NodeKind::Element {
                for attr in node.attributes() {
                    if config.indexes(&attr) {
                        index.add(&attr);
                    }
                }
            }
        }
        index
    }

    fn add(&mut self, node: &Node) {
        self.indexed += 1;
        let mut seen = HashSet::new();
        for token in tokenize(&node.string_value()) {
            if seen.insert(token.clone()) {
                self.postings.entry(token).or_default().push(node.clone());
            }
        }
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.indexed
    }

    pub fn is_empty(&self) -> bool {
        self.indexed == 0
    }

    pub fn token_count(&self) -> usize {
        self.postings.len()
    }

    /// Nodes containing one term.
    fn term_hits(&self, term: &TermPattern) -> Result<Vec<Node>, Error> {
        if let TermPattern::Word(word) = term {
            return Ok(self.postings.get(word).cloned().unwrap_or_default());
        }
        let matcher = TermMatcher::new(term)?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (token, nodes) in &self.postings {
            if matcher.matches(token) {
                for n in nodes {
                    if seen.insert(n.id()) {
                        out.push(n.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    /// Nodes containing all (or any) of `terms`. No terms match nothing.
    pub fn query(&self, terms: &[TermPattern], all: bool) -> Result<Vec<Node>, Error> {
        let mut result: Option<Vec<Node>> = None;
        for term in terms {
            let hits = self.term_hits(term)?;
            result = Some(match result {
                None => hits,
                Some(acc) if all => {
                    let keep: HashSet<NodeId> = hits.iter().map(Node::id).collect();
                    acc.into_iter().filter(|n| keep.contains(&n.id())).collect()
                }
                Some(mut acc) => {
                    let have: HashSet<NodeId> = acc.iter().map(Node::id).collect();
                    acc.extend(hits.into_iter().filter(|n| !have.contains(&n.id())));
                    acc
                }
            });
        }
        Ok(result.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::config::IndexConfig;
    use sylva_xquery::xml::{ParseOptions, parse_document};

    const DESCRIPTOR: &str = r#"
        <collection xmlns="http://exist-db.org/collection-config/1.0">
            <index>
                <fulltext default="none" attributes="false">
                    <include path="//LINE"/>
                </fulltext>
            </index>
        </collection>"#;

    fn index(xml: &str) -> FullTextIndex {
        let cfg = IndexConfig::parse(DESCRIPTOR, "/db/test").unwrap();
        let doc = parse_document(xml, None, true, ParseOptions::default()).unwrap();
        FullTextIndex::build(&doc.root(), cfg.fulltext.as_ref().unwrap())
    }

    fn texts(nodes: Vec<Node>) -> Vec<String> {
        let mut v: Vec<String> = nodes.iter().map(XdmNode::string_value).collect();
        v.sort();
        v
    }

    #[test]
    fn all_and_any_terms() {
        let idx = index(
            "<S><LINE>Love is blind</LINE><LINE>The quick fox</LINE><LINE>love the fox</LINE><TITLE>love</TITLE></S>",
        );
        assert_eq!(idx.len(), 3);
        let all = idx
            .query(&[TermPattern::Word("love".into()), TermPattern::Word("fox".into())], true)
            .unwrap();
        assert_eq!(texts(all), vec!["love the fox"]);
        let any = idx
            .query(&[TermPattern::Word("blind".into()), TermPattern::Word("quick".into())], false)
            .unwrap();
        assert_eq!(texts(any), vec!["Love is blind", "The quick fox"]);
    }

    #[test]
    fn wildcard_and_regex_terms_scan_tokens() {
        let idx = index("<S><LINE>lovely day</LINE><LINE>a glove</LINE><LINE>loud</LINE></S>");
        let wild = idx.query(&[TermPattern::Wildcard("lo*".into())], true).unwrap();
        assert_eq!(texts(wild), vec!["loud", "lovely day"]);
        let re = idx.query(&[TermPattern::Regex(".*ove".into())], true).unwrap();
        assert_eq!(texts(re), vec!["a glove"]);
    }

    #[test]
    fn no_terms_match_nothing() {
        let idx = index("<S><LINE>anything</LINE></S>");
        assert!(idx.query(&[], true).unwrap().is_empty());
    }
}
