//! Rule dispatch throughput benchmarks
//!
//! Measures a full transformation over generated documents with varying:
//! - Element counts (100, 1000, 10000)
//! - Rule table sizes (named rules spread over the name buckets vs. one
//!   generic rule)
//!
//! Run benchmarks: `cargo bench --bench dispatch_throughput`

use arbor::tree::{ParseOptions, parse_document};
use arbor::{Controller, Diagnostics, ModeId, NamePool, PreparedStylesheet, RecoveryPolicy, TextOutputter, handler_fn};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

/// A flat document of `count` elements cycling through `names` names.
fn generate_document(count: usize, names: usize) -> String {
    let mut xml = String::from("<root>");
    for i in 0..count {
        let name = format!("e{}", i % names);
        xml.push_str(&format!("<{name} n='{i}'>value {i}</{name}>"));
    }
    xml.push_str("</root>");
    xml
}

fn stylesheet_with_named_rules(names: usize) -> PreparedStylesheet {
    let mut stylesheet = PreparedStylesheet::new(Arc::new(NamePool::new()));
    for i in 0..names {
        stylesheet
            .add_template(
                &format!("root/e{i}"),
                Arc::new(handler_fn(|ctx, c| c.apply_templates(ctx, None, ctx.mode(), None))),
                ModeId::Default,
                0,
                None,
            )
            .expect("valid pattern");
    }
    stylesheet
}

fn stylesheet_with_generic_rule() -> PreparedStylesheet {
    let mut stylesheet = PreparedStylesheet::new(Arc::new(NamePool::new()));
    stylesheet
        .add_template(
            "*",
            Arc::new(handler_fn(|ctx, c| c.apply_templates(ctx, None, ctx.mode(), None))),
            ModeId::Default,
            0,
            None,
        )
        .expect("valid pattern");
    stylesheet
}

fn run(stylesheet: &PreparedStylesheet, xml: &str) -> usize {
    let doc = parse_document(stylesheet.name_pool().clone(), xml, &ParseOptions::default(), None)
        .expect("well-formed document");
    let out = std::rc::Rc::new(std::cell::RefCell::new(TextOutputter::new()));
    let mut controller = Controller::new(stylesheet, Diagnostics::standard(RecoveryPolicy::RecoverSilently, 0));
    controller.set_outputter(Box::new(out.clone()));
    controller.transform_document(&doc).expect("transformation succeeds");
    let len = out.borrow().as_str().len();
    len
}

/// Benchmark dispatch with varying document sizes
fn bench_document_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_size");
    let stylesheet = stylesheet_with_named_rules(20);
    for count in [100, 1_000, 10_000] {
        let xml = generate_document(count, 20);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &xml, |b, xml| {
            b.iter(|| run(&stylesheet, black_box(xml)))
        });
    }
    group.finish();
}

/// Benchmark named-bucket lookups against a single generic rule
fn bench_rule_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_table");
    let xml = generate_document(1_000, 200);
    group.throughput(Throughput::Elements(1_000));

    let named = stylesheet_with_named_rules(200);
    group.bench_function("named_200", |b| b.iter(|| run(&named, black_box(&xml))));

    let generic = stylesheet_with_generic_rule();
    group.bench_function("generic", |b| b.iter(|| run(&generic, black_box(&xml))));
    group.finish();
}

criterion_group!(benches, bench_document_size, bench_rule_table);
criterion_main!(benches);
