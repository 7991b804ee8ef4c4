use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::{hint::black_box, time::Duration};

use flyflix::condition::feedback::{FrameBuffer, SensorFrame, VelocityEstimator, MIN_TOKENS, SENTINEL, TOKEN_SEPARATOR};

fn tracker_record(sequence: u64) -> String {
    let mut tokens = vec!["0.0123".to_string(); MIN_TOKENS];
    tokens[0] = SENTINEL.to_string();
    tokens[1] = sequence.to_string();
    tokens[17] = format!("{:.6}", sequence as f64 * 0.01);
    tokens[22] = format!("{:.3}", sequence as f64 * 10.0);
    format!("{}\n", tokens.join(TOKEN_SEPARATOR))
}

fn frame_parse_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");
    group.measurement_time(Duration::from_secs(2));
    group.sample_size(50);

    let line = tracker_record(1);
    let record = line.trim_end().to_string();
    group.bench_function("parse_record", |b| b.iter(|| SensorFrame::parse(black_box(&record))));

    // one datagram carrying a burst of records, split mid-record like a real tracker stream
    let burst: String = (1..=32).map(tracker_record).collect();
    let (head, tail) = burst.split_at(burst.len() / 2 + 7);
    group.bench_function("buffer_to_velocity_32", |b| {
        b.iter_batched(
            || (FrameBuffer::default(), VelocityEstimator::default()),
            |(mut frames, mut estimator)| {
                let mut samples = 0;
                for chunk in [head, tail] {
                    frames.push(chunk.as_bytes());
                    while let Some(record) = frames.next_record() {
                        if let Some(frame) = SensorFrame::parse(&record) {
                            samples += estimator.update(frame).is_some() as u32;
                        }
                    }
                }
                black_box(samples)
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, frame_parse_bench);
criterion_main!(benches);
