//! Performance benchmarks for the synthesis scheduler
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use readaloud_gateway::core::documents::InMemoryDocuments;
use readaloud_gateway::core::fingerprint::{Fingerprint, RenderParams, normalize_text};
use readaloud_gateway::core::scheduler::{
    Job, JobQueue, PoolMode, Scheduler, SchedulerConfig, SynthesisRequest, Waiter,
};
use readaloud_gateway::core::synthesis::SilenceModel;
use readaloud_gateway::handlers::ws::IncomingMessage;

fn paragraph(words: usize) -> String {
    "The quick brown fox jumps over the lazy dog. "
        .repeat(words / 9 + 1)
        .split_whitespace()
        .take(words)
        .collect::<Vec<_>>()
        .join("  ")
}

/// Benchmark fingerprinting, including text normalization
fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    group.measurement_time(Duration::from_secs(5));
    let params = RenderParams::default();

    for words in [10, 100, 1000] {
        let text = paragraph(words);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("normalize_and_hash", words), &text, |b, text| {
            b.iter(|| {
                let normalized = normalize_text(black_box(text));
                Fingerprint::compute(&normalized, "default", "alloy", &params)
            });
        });
    }

    group.finish();
}

/// Benchmark control message parsing and validation
fn bench_message_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_parsing");
    group.measurement_time(Duration::from_secs(5));

    let cursor_moved = r#"{"type":"cursor_moved","document_id":"book-1","cursor":42}"#;
    let indices: Vec<String> = (0..64).map(|i| i.to_string()).collect();
    let synthesize = format!(
        r#"{{"type":"synthesize","document_id":"book-1","block_indices":[{}],"cursor":0,"model":"default","voice":"alloy","speed":1.25}}"#,
        indices.join(",")
    );

    for (name, msg) in [("cursor_moved", cursor_moved.to_string()), ("synthesize_64", synthesize)] {
        group.throughput(Throughput::Bytes(msg.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, msg.len()), &msg, |b, msg| {
            b.iter(|| {
                let parsed: IncomingMessage = serde_json::from_str(black_box(msg)).unwrap();
                parsed.validate().unwrap();
            });
        });
    }

    group.finish();
}

fn job(index: usize) -> Job {
    let text = format!("Block number {index}.");
    Job {
        id: uuid::Uuid::new_v4(),
        fingerprint: Fingerprint::compute(&text, "default", "alloy", &RenderParams::default()),
        owner: Waiter::new("bench", "book-1", index),
        model: "default".to_string(),
        voice: "alloy".to_string(),
        params: RenderParams::default(),
        text,
        enqueued_at: Instant::now(),
    }
}

/// Benchmark per-model queue operations
fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_queue");
    group.measurement_time(Duration::from_secs(5));
    let jobs: Vec<Job> = (0..256).map(job).collect();

    group.throughput(Throughput::Elements(jobs.len() as u64));
    group.bench_function("enqueue_then_drain_256", |b| {
        b.iter_batched(
            || jobs.clone(),
            |jobs| {
                let queue = JobQueue::new();
                for job in jobs {
                    queue.enqueue(job);
                }
                while queue.try_pop("default").is_some() {}
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("duplicate_enqueue", |b| {
        let queue = JobQueue::new();
        queue.enqueue(jobs[0].clone());
        b.iter_batched(
            || jobs[0].clone(),
            |job| black_box(queue.enqueue(job)),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn scheduler(blocks: usize) -> Arc<Scheduler> {
    let docs = Arc::new(InMemoryDocuments::new());
    docs.insert(
        "book-1",
        (0..blocks).map(|i| format!("Block number {i}.")).collect(),
    );
    Scheduler::builder(SchedulerConfig::default())
        .documents(docs)
        .route("default", PoolMode::Primary, Arc::new(SilenceModel::new("silence")))
        .build()
}

fn request(indices: Vec<usize>) -> SynthesisRequest {
    SynthesisRequest {
        user_id: "bench".to_string(),
        document_id: "book-1".to_string(),
        block_indices: indices,
        cursor: 0,
        model: "default".to_string(),
        voice: "alloy".to_string(),
        params: RenderParams::default(),
    }
}

/// Benchmark batch admission on the cache-miss and cache-hit paths
fn bench_request_blocks(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("request_blocks");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(16));

    group.bench_function("miss_16", |b| {
        b.to_async(&rt).iter_batched(
            || scheduler(64),
            |scheduler| async move {
                scheduler
                    .request_blocks(request((0..16).collect()))
                    .await
                    .unwrap()
            },
            BatchSize::SmallInput,
        );
    });

    let warm = scheduler(64);
    rt.block_on(async {
        for index in 0..16 {
            let fp = Fingerprint::compute(
                &format!("Block number {index}."),
                "default",
                "alloy",
                &RenderParams::default(),
            );
            warm.cache()
                .put(&fp, Bytes::from_static(b"RIFF"))
                .await
                .unwrap();
        }
    });
    group.bench_function("hit_16", |b| {
        b.to_async(&rt).iter(|| async {
            warm.request_blocks(request((0..16).collect()))
                .await
                .unwrap()
        });
    });

    group.bench_function("move_cursor_evicts_16", |b| {
        b.to_async(&rt).iter_batched(
            || {
                let scheduler = scheduler(64);
                let req = request((0..16).collect());
                (scheduler, req)
            },
            |(scheduler, req)| async move {
                scheduler.request_blocks(req).await.unwrap();
                scheduler.move_cursor("bench", "book-1", 1_000)
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_fingerprint,
    bench_message_parsing,
    bench_queue,
    bench_request_blocks
);
criterion_main!(benches);
