use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use statsq_common::UnixTimestamp;
use statsq_metrics::{Aggregator, AggregatorConfig, PacketParser};

/// Builds a payload of `lines` lines spread over `buckets` distinct buckets.
fn payload(lines: usize, buckets: usize) -> Vec<u8> {
    let mut payload = String::new();
    for i in 0..lines {
        let bucket = i % buckets;
        let line = match i % 4 {
            0 => format!("bench.counter.{bucket}:{i}|c|@0.5 host=h{bucket}\n"),
            1 => format!("bench.gauge.{bucket}:+{i}|g\n"),
            2 => format!("bench.timer.{bucket}:{i}|ms route=/api/{bucket}\n"),
            _ => format!("bench.set.{bucket}:user{i}|s\n"),
        };
        payload.push_str(&line);
    }
    payload.into_bytes()
}

fn bench_parse(c: &mut Criterion) {
    let parser = PacketParser::default();
    let mut group = c.benchmark_group("parse");

    for lines in [10, 100, 1000] {
        let data = payload(lines, 10);
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &data, |b, data| {
            b.iter(|| parser.parse_all(black_box(data)).count())
        });
    }

    group.finish();
}

fn bench_insert_and_flush(c: &mut Criterion) {
    let parser = PacketParser::default();
    let config = AggregatorConfig {
        percentiles: "90,99,-10".parse().unwrap(),
        ..Default::default()
    };

    for buckets in [10, 1000] {
        let packets: Vec<_> = parser.parse_all(&payload(10_000, buckets)).collect();

        let mut group = c.benchmark_group("insert");
        group.throughput(Throughput::Elements(packets.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(buckets), &packets, |b, packets| {
            b.iter_batched(
                || (Aggregator::new(config.clone()), packets.clone()),
                |(aggregator, packets)| {
                    for packet in packets {
                        aggregator.insert(packet);
                    }
                },
                criterion::BatchSize::LargeInput,
            )
        });
        group.finish();

        let mut group = c.benchmark_group("flush");
        group.bench_with_input(BenchmarkId::from_parameter(buckets), &packets, |b, packets| {
            b.iter_batched(
                || {
                    let aggregator = Aggregator::new(config.clone());
                    for packet in packets.iter().cloned() {
                        aggregator.insert(packet);
                    }
                    aggregator
                },
                |aggregator| black_box(aggregator.flush(UnixTimestamp::from_secs(1418052649))),
                criterion::BatchSize::LargeInput,
            )
        });
        group.finish();
    }
}

criterion_group!(benches, bench_parse, bench_insert_and_flush);
criterion_main!(benches);
