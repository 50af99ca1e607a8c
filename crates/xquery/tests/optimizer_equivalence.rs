use rstest::{fixture, rstest};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use sylva_xquery::runtime::{IndexPredicate, IndexProvider, IndexTarget, PathComponent};
use sylva_xquery::xml::{ParseOptions, parse_document};
use sylva_xquery::{
    DocumentId, DynamicContextBuilder, Error, Node, NodeKind, SerializationOptions, XdmItem,
    XdmNode, evaluate_expr, serialize_sequence,
};

/// Answers every lookup with all nodes reachable over the target path,
/// ignoring the predicate. A superset is a valid index answer.
struct SupersetIndex {
    doc: Node,
    lookups: AtomicUsize,
}

impl IndexProvider for SupersetIndex {
    fn lookup(
        &self,
        document: DocumentId,
        target: &IndexTarget,
        _predicate: &IndexPredicate,
    ) -> Result<Option<Vec<Node>>, Error> {
        if document != self.doc.document_id() {
            return Ok(None);
        }
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let mut current: Vec<Node> = self
            .doc
            .descendants()
            .into_iter()
            .filter(|n| {
                n.kind() == NodeKind::Element
                    && n.name().is_some_and(|q| q.expanded() == target.context)
            })
            .collect();
        for step in &target.path {
            current = current
                .iter()
                .flat_map(|n| match step {
                    PathComponent::Child(name) => n
                        .children()
                        .into_iter()
                        .filter(|c| c.name().is_some_and(|q| q.expanded() == *name))
                        .collect::<Vec<_>>(),
                    PathComponent::Attribute(name) => n
                        .attributes()
                        .into_iter()
                        .filter(|a| a.name().is_some_and(|q| q.expanded() == *name))
                        .collect(),
                })
                .collect();
        }
        Ok(Some(current))
    }
}

/// Declines every lookup, forcing the scan fallback.
struct NoIndex;

impl IndexProvider for NoIndex {
    fn lookup(&self, _: DocumentId, _: &IndexTarget, _: &IndexPredicate) -> Result<Option<Vec<Node>>, Error> {
        Ok(None)
    }
}

#[fixture]
fn play() -> Node {
    let mut xml = String::from("<PLAY>");
    let speakers = ["HAMLET", "HORATIO", "OPHELIA", "GHOST"];
    for act in 1..=3 {
        xml.push_str("<ACT>");
        for i in 0..20 {
            let speaker = speakers[(act + i) % speakers.len()];
            xml.push_str(&format!(
                r#"<SPEECH n="{i}"><SPEAKER>{speaker}</SPEAKER><LINE>line {i} of act {act}</LINE>"#
            ));
            if i % 3 == 0 {
                xml.push_str("<LINE>love and the quick fox</LINE>");
            }
            xml.push_str("</SPEECH>");
        }
        xml.push_str("</ACT>");
    }
    xml.push_str("</PLAY>");
    parse_document(&xml, Some("/db/shakespeare/play.xml".into()), true, ParseOptions::default())
        .unwrap()
        .root()
}

fn run(doc: &Node, query: &str, optimize: bool, indexes: Arc<dyn IndexProvider>) -> String {
    let ctx = DynamicContextBuilder::new()
        .with_context_item(XdmItem::Node(doc.clone()))
        .with_indexes(indexes)
        .with_optimize(optimize)
        .build();
    let out = evaluate_expr(query, &ctx).unwrap_or_else(|e| panic!("{query}: {e}"));
    let mut opts = SerializationOptions::default();
    opts.indent = false;
    serialize_sequence(&out, &opts).unwrap()
}

#[rstest]
#[case("//SPEECH[SPEAKER = 'HAMLET']/@n/string()")]
#[case("count(//SPEECH[SPEAKER eq 'OPHELIA'])")]
#[case("//SPEECH[@n > 15]/SPEAKER/string()")]
#[case("//SPEECH[10 < @n and SPEAKER = 'GHOST']/@n/string()")]
#[case("count(//SPEECH[starts-with(SPEAKER, 'HO') or @n = 3])")]
#[case("count(//SPEECH[contains(LINE, 'act 2')])")]
#[case("count(//SPEECH[ends-with(SPEAKER, 'ET')])")]
#[case("count(//SPEECH[matches(SPEAKER, '^h', 'i')])")]
#[case("count(//LINE[. &= 'love fox'])")]
#[case("count(//LINE[. |= 'quick missing'])")]
#[case("count(//SPEECH[text:match-all(LINE, 'qu.*k', 'lov.')])")]
#[case("//ACT[2]/SPEECH[SPEAKER = 'HAMLET'][1]/@n/string()")]
#[case("for $a in /PLAY/ACT return count($a/SPEECH[SPEAKER = 'HORATIO'])")]
fn optimized_results_match_unoptimized(play: Node, #[case] query: &str) {
    let index = Arc::new(SupersetIndex {
        doc: play.clone(),
        lookups: AtomicUsize::new(0),
    });
    let plain = run(&play, query, false, index.clone());
    assert_eq!(index.lookups.load(Ordering::Relaxed), 0, "lookup with optimize off: {query}");
    let optimized = run(&play, query, true, index.clone());
    assert_eq!(plain, optimized, "query: {query}");
    assert_eq!(run(&play, query, true, Arc::new(NoIndex)), plain, "scan fallback: {query}");
}

#[rstest]
fn index_is_consulted_when_optimizing(play: Node) {
    let index = Arc::new(SupersetIndex {
        doc: play.clone(),
        lookups: AtomicUsize::new(0),
    });
    run(&play, "count(//SPEECH[SPEAKER = 'HAMLET'])", true, index.clone());
    assert!(index.lookups.load(Ordering::Relaxed) >= 1);
}

#[rstest]
fn optimize_pragma_disables_index_use(play: Node) {
    let index = Arc::new(SupersetIndex {
        doc: play.clone(),
        lookups: AtomicUsize::new(0),
    });
    let q = r#"declare option exist:optimize "enable=no"; count(//SPEECH[SPEAKER = 'HAMLET'])"#;
    let with_option = run(&play, q, true, index.clone());
    assert_eq!(index.lookups.load(Ordering::Relaxed), 0);
    assert_eq!(with_option, run(&play, "count(//SPEECH[SPEAKER = 'HAMLET'])", false, index));
}

#[rstest]
fn results_follow_mutations_between_statements(play: Node) {
    let index: Arc<dyn IndexProvider> = Arc::new(SupersetIndex {
        doc: play.clone(),
        lookups: AtomicUsize::new(0),
    });
    let q = "count(//SPEECH[SPEAKER = 'HAMLET'])";
    let before: usize = run(&play, q, true, index.clone()).parse().unwrap();
    run(
        &play,
        "update value (//SPEAKER[. = 'GHOST'])[1] with 'HAMLET'",
        true,
        index.clone(),
    );
    let after: usize = run(&play, q, true, index.clone()).parse().unwrap();
    assert_eq!(after, before + 1);
    assert_eq!(run(&play, q, false, index).parse::<usize>().unwrap(), after);
}
