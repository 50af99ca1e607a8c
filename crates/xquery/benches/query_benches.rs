use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use sylva_xquery::parser::XQueryParser;
use sylva_xquery::xml::{ParseOptions, parse_document};
use sylva_xquery::{CompiledQuery, DynamicContextBuilder, Error, Node, XdmItem, compile, evaluate};

fn sample_queries() -> Vec<&'static str> {
    vec![
        "1 + 2 * 3",
        "//product[price > 90]/name/string()",
        "count(//product[starts-with(name, 'Product 1')])",
        "for $p in //product order by xs:decimal($p/price) descending return $p/@id",
        "for $p in //product group $p as $g by $p/price as $k return count($g)",
        "distinct-values(//product/price)",
    ]
}

fn build_sample_document() -> Node {
    let mut xml = String::from("<products>");
    for i in 1..=2000 {
        xml.push_str(&format!(
            r#"<product id="{i}"><name>Product {i}</name><price>{}</price></product>"#,
            i % 100
        ));
    }
    xml.push_str("</products>");
    parse_document(&xml, Some("/db/bench/products.xml".into()), true, ParseOptions::default())
        .expect("sample document")
        .root()
}

fn benchmark_parser(c: &mut Criterion) {
    let queries = sample_queries();
    c.bench_function("parser/parse_module", |b| {
        b.iter(|| {
            for q in &queries {
                let ast = XQueryParser::parse_module(black_box(q)).expect("parse failure");
                black_box(ast);
            }
        })
    });
}

fn benchmark_compiler(c: &mut Criterion) {
    let queries = sample_queries();
    c.bench_function("compiler/compile", |b| {
        b.iter(|| {
            for q in &queries {
                let compiled = compile(black_box(q)).expect("compile failure");
                black_box(compiled);
            }
        })
    });
}

fn prepared_compiled_queries() -> Result<Vec<(String, Arc<CompiledQuery>)>, Error> {
    sample_queries()
        .into_iter()
        .map(|q| compile(q).map(|c| (q.to_string(), Arc::new(c))))
        .collect()
}

fn benchmark_evaluator(c: &mut Criterion) {
    let document = build_sample_document();
    let ctx = DynamicContextBuilder::new()
        .with_context_item(XdmItem::Node(document))
        .build();
    let compiled = prepared_compiled_queries().expect("compile failure");

    let mut group = c.benchmark_group("evaluator/evaluate");
    for (name, query) in &compiled {
        group.bench_with_input(BenchmarkId::from_parameter(name), query, |b, query| {
            b.iter(|| {
                let result = evaluate(query, black_box(&ctx)).expect("eval failure");
                black_box(result.len());
            });
        });
    }
    group.finish();
}

fn benchmark_updates(c: &mut Criterion) {
    c.bench_function("update/insert_delete", |b| {
        let document = build_sample_document();
        let ctx = DynamicContextBuilder::new()
            .with_context_item(XdmItem::Node(document))
            .build();
        let insert = compile("update insert <flag/> into //product[price = 7]").expect("compile failure");
        let delete = compile("update delete //flag").expect("compile failure");
        b.iter(|| {
            evaluate(&insert, &ctx).expect("insert failure");
            evaluate(&delete, &ctx).expect("delete failure");
        });
    });
}

criterion_group!(
    benches,
    benchmark_parser,
    benchmark_compiler,
    benchmark_evaluator,
    benchmark_updates
);
criterion_main!(benches);
