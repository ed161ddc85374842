use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hl7v2_fhir_core::condition::Condition;
use hl7v2_fhir_core::config::ConverterOptions;
use hl7v2_fhir_core::engine::MessageEngine;
use hl7v2_fhir_core::script::Script;
use hl7v2_fhir_core::specification::Specification;
use hl7v2_fhir_core::template::TemplateRegistry;
use hl7v2_fhir_core::terminology::TerminologyService;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

fn load_engine() -> MessageEngine {
    let templates = fixtures().join("templates");
    let mut registry = TemplateRegistry::new();

    for dir in ["resources", "datatypes"] {
        for entry in fs::read_dir(templates.join(dir)).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_stem().unwrap().to_string_lossy().to_string();
            registry
                .add_resource_yaml(&name, &fs::read_to_string(&path).unwrap())
                .unwrap();
        }
    }
    for entry in fs::read_dir(templates.join("messages")).unwrap() {
        let path = entry.unwrap().path();
        registry.add_message_yaml(&fs::read_to_string(&path).unwrap()).unwrap();
    }

    MessageEngine::new(
        Arc::new(registry),
        Arc::new(TerminologyService::with_defaults()),
        ConverterOptions::default(),
    )
    .unwrap()
}

fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Parsing");

    group.bench_function("specification", |b| {
        b.iter(|| Specification::parse(black_box("PID.3.1"), false, false))
    });

    group.bench_function("condition", |b| {
        b.iter(|| Condition::parse(black_box("$a EQUALS x && $b NOT_NULL || $c IN y,z")).unwrap())
    });

    group.bench_function("script", |b| {
        b.iter(|| Script::parse(black_box("String.join(' ', given, family)")).unwrap())
    });

    group.finish();
}

fn bench_conversion(c: &mut Criterion) {
    let engine = load_engine();
    let adt = fs::read_to_string(fixtures().join("adt_a01.hl7")).unwrap();
    let oru = fs::read_to_string(fixtures().join("oru_r01.hl7")).unwrap();

    let mut group = c.benchmark_group("Conversion");

    group.bench_function("adt_a01", |b| {
        b.iter(|| engine.convert_str(black_box(&adt)).unwrap())
    });

    group.bench_function("oru_r01", |b| {
        b.iter(|| engine.convert_str(black_box(&oru)).unwrap())
    });

    group.bench_function("oru_r01_bundle", |b| {
        b.iter(|| engine.convert_str(black_box(&oru)).unwrap().to_bundle())
    });

    group.finish();
}

criterion_group!(benches, bench_parsing, bench_conversion);
criterion_main!(benches);
