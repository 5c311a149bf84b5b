use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pyx_pep440::{MarkerEnvironment, MarkerTree, MultiConstraint, Version};

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_version", |b| {
        b.iter(|| black_box("1!2.3.4rc1.post2.dev3+local.7").parse::<Version>())
    });
    c.bench_function("parse_constraint", |b| {
        b.iter(|| black_box(">=1.4,<2.0,!=1.5.*").parse::<MultiConstraint>())
    });
}

fn bench_match(c: &mut Criterion) {
    let constraint: MultiConstraint = ">=1.4,<2.0,!=1.5.*".parse().unwrap();
    let versions: Vec<Version> = (0..100)
        .map(|i| format!("1.{}.{}", i / 10, i % 10).parse().unwrap())
        .collect();
    c.bench_function("match_constraint", |b| {
        b.iter(|| versions.iter().filter(|v| constraint.matches(v)).count())
    });

    let marker: MarkerTree = "sys_platform == 'linux' and python_version >= '3.8' or os_name == 'nt'"
        .parse()
        .unwrap();
    let env = MarkerEnvironment::linux("3.12");
    c.bench_function("evaluate_marker", |b| b.iter(|| marker.evaluate(black_box(&env))));
}

criterion_group!(benches, bench_parse, bench_match);
criterion_main!(benches);
