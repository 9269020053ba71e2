use commentcast::pipeline::{
    AudioArtifact, ChunkOutcome, CommentaryUnit, EventCategory, ReorderBuffer,
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn outcome(sequence: u64, audio: &Arc<[u8]>) -> ChunkOutcome {
    let unit = CommentaryUnit {
        sequence,
        english: format!("Lap {} complete", sequence),
        telugu: format!("ల్యాప్ {} పూర్తి", sequence),
        category: EventCategory::Info,
        context: None,
        fallback: false,
    };
    ChunkOutcome::Artifact(AudioArtifact::from_unit(&unit, Arc::clone(audio), "audio/wav"))
}

/// Completion order with every window of `window` results reversed.
fn completion_order(count: u64, window: u64) -> Vec<u64> {
    (0..count)
        .collect::<Vec<_>>()
        .chunks(window as usize)
        .flat_map(|w| w.iter().rev().copied().collect::<Vec<_>>())
        .collect()
}

fn bench_reorder(c: &mut Criterion) {
    const UNITS: u64 = 1024;
    let audio: Arc<[u8]> = Arc::from(vec![0u8; 32_000]);
    let mut group = c.benchmark_group("reorder_buffer");
    group.throughput(Throughput::Elements(UNITS));

    for window in [1u64, 4, 16] {
        let order = completion_order(UNITS, window);
        group.bench_with_input(BenchmarkId::new("window", window), &order, |b, order| {
            b.iter(|| {
                let mut buffer = ReorderBuffer::new(Duration::from_secs(15), 32);
                let now = Instant::now();
                for sequence in 0..UNITS {
                    buffer.admit(sequence, now);
                }
                let mut released = 0usize;
                for &sequence in order {
                    released += buffer.resolve(outcome(sequence, &audio)).len();
                }
                black_box(released)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reorder);
criterion_main!(benches);
