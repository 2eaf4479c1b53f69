use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mnemo_core::retrieval::{retrieve, Candidate, RelationEdge, RetrievalConfig};

fn make_candidates(n: usize) -> Vec<Candidate> {
    (0..n)
        .map(|i| {
            let mut embedding = vec![0.0f32; 384];
            embedding[i % 384] = 1.0;
            Candidate {
                id: format!("m{i}"),
                embedding,
                summary: format!("memory number {i} about rock music and travel"),
                current_importance: (i % 10) as f64,
            }
        })
        .collect()
}

fn make_relations(n: usize) -> Vec<RelationEdge> {
    (0..n.saturating_sub(1))
        .map(|i| RelationEdge {
            source_id: format!("m{i}"),
            target_id: format!("m{}", i + 1),
            relation_type: "related_to".to_string(),
            weight: 0.5,
            bidirectional: true,
        })
        .collect()
}

fn bench_retrieve(c: &mut Criterion) {
    let candidates = make_candidates(2_000);
    let relations = make_relations(2_000);
    let query_embedding = {
        let mut v = vec![0.0f32; 384];
        v[0] = 1.0;
        v
    };
    let config = RetrievalConfig::default();

    c.bench_function("retrieve_2000_memories", |b| {
        b.iter(|| {
            black_box(retrieve(
                black_box(&candidates),
                black_box(&relations),
                black_box(&query_embedding),
                black_box("rock music"),
                black_box(&config),
            ))
        })
    });
}

criterion_group!(benches, bench_retrieve);
criterion_main!(benches);
