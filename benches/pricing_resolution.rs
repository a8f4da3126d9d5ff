use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tokmeter_core::Provider;
use tokmeter_pricing::{COMPARISON_MODELS, CostCalculator, PricingResolver, normalize_model_name};

const MODEL_NAMES: &[(Provider, &str)] = &[
    (Provider::OpenAi, "gpt-4o-mini-2024-07-18"),
    (Provider::OpenAi, "openai/gpt-4.1"),
    (Provider::OpenAi, "dall-e-3"),
    (Provider::Anthropic, "claude-3-5-sonnet-20241022"),
    (Provider::Anthropic, "claude-sonnet-4@20250514"),
    (Provider::Gemini, "models/gemini-1.5-flash-002"),
    (Provider::Gemini, "gemini-2.0-flash-exp"),
    (Provider::OpenAi, "not-a-real-model"),
];

fn benchmark_normalization(c: &mut Criterion) {
    c.bench_function("normalize_model_names", |b| {
        b.iter(|| {
            for (_, model) in MODEL_NAMES {
                black_box(normalize_model_name(black_box(model)));
            }
        })
    });
}

fn benchmark_resolution(c: &mut Criterion) {
    let resolver = PricingResolver::new();

    c.bench_function("resolve_known_providers", |b| {
        b.iter(|| {
            for (provider, model) in MODEL_NAMES {
                black_box(resolver.resolve_for(*provider, black_box(model)));
            }
        })
    });

    c.bench_function("resolve_unknown_provider", |b| {
        b.iter(|| black_box(resolver.resolve(black_box("mistral"), black_box("mistral-large"))))
    });
}

fn benchmark_cost(c: &mut Criterion) {
    let calculator = CostCalculator::new();

    c.bench_function("calculate_cost", |b| {
        b.iter(|| {
            for (provider, model) in MODEL_NAMES {
                black_box(calculator.calculate_for(*provider, model, black_box(1500), black_box(700)));
            }
        })
    });

    c.bench_function("compare_models", |b| {
        b.iter(|| black_box(calculator.compare_models(black_box(500), black_box(500), COMPARISON_MODELS)))
    });
}

criterion_group!(
    benches,
    benchmark_normalization,
    benchmark_resolution,
    benchmark_cost
);
criterion_main!(benches);
