//! In-memory aggregation of packets and their reduction into samples.

use std::collections::BTreeMap;

use itertools::Itertools;
use parking_lot::Mutex;
use statsq_common::UnixTimestamp;

use crate::bucket_id::{BucketId, BucketKey};
use crate::packet::{Packet, PacketValue};
use crate::protocol::{Dimensions, GaugeSign, saturating_add};
use crate::sample::Sample;

mod config;

pub use self::config::*;

#[derive(Debug)]
struct CounterState {
    key: BucketKey,
    value: f64,
    updated: bool,
    idle_flushes: u32,
}

#[derive(Debug)]
struct GaugeState {
    key: BucketKey,
    value: f64,
    updated: bool,
}

#[derive(Debug)]
struct SetState {
    key: BucketKey,
    values: Vec<String>,
}

#[derive(Debug)]
struct TimerState {
    key: BucketKey,
    values: Vec<f64>,
}

/// Statistics of a single timer over one flush interval.
#[derive(Clone, Debug, PartialEq)]
struct TimerStats {
    count: usize,
    lower: f64,
    upper: f64,
    mean: f64,
}

impl TimerStats {
    /// Computes statistics over values sorted in ascending order.
    fn from_sorted(sorted: &[f64]) -> Option<Self> {
        let lower = *sorted.first()?;
        let upper = *sorted.last()?;
        let count = sorted.len();

        // Dividing first keeps the sum finite for large observations.
        let mean = sorted.iter().map(|v| v / count as f64).sum();

        Some(Self {
            count,
            lower,
            upper,
            mean,
        })
    }
}

/// Builds the name of a value derived from a bucket, keeping the postfix at the end.
fn derived_name(name: &str, suffix: &str, postfix: &str) -> String {
    match name.strip_suffix(postfix).filter(|_| !postfix.is_empty()) {
        Some(base) => format!("{base}.{suffix}{postfix}"),
        None => format!("{name}.{suffix}"),
    }
}

/// A collector of [`Packet`] submissions.
///
/// # Aggregation
///
/// Each packet is identified by a [`BucketKey`] derived from its bucket name and dimensions.
/// Packets with the same key are aggregated according to their type:
///
///  - Counters are summed up after scaling by the sample rate.
///  - Gauges keep their last value, or apply signed deltas clamped to `[0, f64::MAX]`.
///  - Sets collect their raw members.
///  - Timers collect all observations.
///
/// Each metric type lives in its own map behind its own lock. Inserting only holds the lock of
/// the affected map, so ingestion from many sockets can proceed in parallel.
///
/// # Flushing
///
/// [`flush`](Self::flush) reduces all maps into [`Sample`]s, ordered by type (counters, gauges,
/// sets, timers) and by [`BucketId`] within each type. Flushes are serialized: a second flush
/// waits until the first one has completed.
///
/// # Example
///
/// ```
/// use statsq_common::UnixTimestamp;
/// use statsq_metrics::{Aggregator, AggregatorConfig, PacketParser};
///
/// let aggregator = Aggregator::new(AggregatorConfig::default());
/// let parser = PacketParser::default();
///
/// for packet in parser.parse_all(b"gorets:100|c\ngorets:3|c") {
///     aggregator.insert(packet);
/// }
///
/// let samples = aggregator.flush(UnixTimestamp::from_secs(1418052649));
/// assert_eq!(samples[0].to_string(), "gorets 103 1418052649");
/// ```
#[derive(Debug)]
pub struct Aggregator {
    config: AggregatorConfig,
    receive_counter: Option<BucketKey>,
    counters: Mutex<BTreeMap<BucketId, CounterState>>,
    gauges: Mutex<BTreeMap<BucketId, GaugeState>>,
    sets: Mutex<BTreeMap<BucketId, SetState>>,
    timers: Mutex<BTreeMap<BucketId, TimerState>>,
    flush_lock: Mutex<()>,
}

impl Aggregator {
    /// Creates a new, empty aggregator.
    pub fn new(config: AggregatorConfig) -> Self {
        let receive_counter = config
            .receive_counter
            .as_deref()
            .filter(|name| !name.is_empty())
            .map(|name| BucketKey::new(name, Dimensions::new()));

        Self {
            config,
            receive_counter,
            counters: Mutex::default(),
            gauges: Mutex::default(),
            sets: Mutex::default(),
            timers: Mutex::default(),
            flush_lock: Mutex::default(),
        }
    }

    /// Returns the configuration of this aggregator.
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Returns the number of buckets currently held across all metric types.
    pub fn len(&self) -> usize {
        self.counters.lock().len()
            + self.gauges.lock().len()
            + self.sets.lock().len()
            + self.timers.lock().len()
    }

    /// Returns `true` if no buckets are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies a packet to the aggregate of its bucket.
    ///
    /// If a receive counter is configured, it is incremented as well.
    pub fn insert(&self, packet: Packet) {
        if let Some(key) = &self.receive_counter {
            self.count_received(key);
        }

        let Packet {
            bucket,
            value,
            sampling,
            dimensions,
        } = packet;

        let key = BucketKey::new(bucket, dimensions);
        match value {
            PacketValue::Counter(value) => self.add_counter(key, value / sampling),
            PacketValue::Gauge { value, sign } => self.set_gauge(key, value, sign),
            PacketValue::Timer(value) => {
                let mut timers = self.timers.lock();
                let state = timers.entry(key.id()).or_insert_with(|| TimerState {
                    key,
                    values: Vec::new(),
                });
                state.values.push(value);
            }
            PacketValue::Set(value) => {
                let mut sets = self.sets.lock();
                let state = sets.entry(key.id()).or_insert_with(|| SetState {
                    key,
                    values: Vec::new(),
                });
                state.values.push(value);
            }
        }
    }

    fn count_received(&self, key: &BucketKey) {
        let mut counters = self.counters.lock();
        let state = counters
            .entry(key.id())
            .or_insert_with(|| CounterState::new(key.clone()));

        if state.value < 0.0 {
            state.value = 0.0;
        }
        state.add(1.0);
    }

    fn add_counter(&self, key: BucketKey, value: f64) {
        let mut counters = self.counters.lock();
        counters
            .entry(key.id())
            .or_insert_with(|| CounterState::new(key))
            .add(value);
    }

    fn set_gauge(&self, key: BucketKey, value: f64, sign: Option<GaugeSign>) {
        let mut gauges = self.gauges.lock();
        let state = gauges.entry(key.id()).or_insert_with(|| GaugeState {
            key,
            value: 0.0,
            updated: false,
        });

        state.value = match sign {
            Some(sign) => sign.apply(state.value, value),
            None => value,
        };
        state.updated = true;
    }

    /// Reduces all aggregates into samples stamped with `timestamp`.
    ///
    /// Counters are reset to zero and removed after `persist_count_keys` inactive flushes. Sets
    /// and timers are cleared. Gauges are kept, unless [`InactiveGauges::Delete`] is configured.
    pub fn flush(&self, timestamp: UnixTimestamp) -> Vec<Sample> {
        let _guard = self.flush_lock.lock();

        let mut samples = Vec::new();
        self.flush_counters(timestamp, &mut samples);
        self.flush_gauges(timestamp, &mut samples);
        self.flush_sets(timestamp, &mut samples);
        self.flush_timers(timestamp, &mut samples);
        samples
    }

    fn flush_counters(&self, timestamp: UnixTimestamp, samples: &mut Vec<Sample>) {
        let persist = self.config.persist_count_keys;

        self.counters.lock().retain(|_, state| {
            if state.updated {
                samples.push(sample(&state.key, state.key.name(), state.value, timestamp));
                state.value = 0.0;
                state.updated = false;
                state.idle_flushes = 0;
                true
            } else if state.idle_flushes < persist {
                samples.push(sample(&state.key, state.key.name(), 0.0, timestamp));
                state.idle_flushes += 1;
                true
            } else {
                statsq_log::trace!(bucket = state.key.name(), "purging inactive counter");
                false
            }
        });
    }

    fn flush_gauges(&self, timestamp: UnixTimestamp, samples: &mut Vec<Sample>) {
        let delete = self.config.inactive_gauges == InactiveGauges::Delete;

        self.gauges.lock().retain(|_, state| {
            if state.updated || !delete {
                samples.push(sample(&state.key, state.key.name(), state.value, timestamp));
            }
            state.updated = false;
            !delete
        });
    }

    fn flush_sets(&self, timestamp: UnixTimestamp, samples: &mut Vec<Sample>) {
        let sets = std::mem::take(&mut *self.sets.lock());

        for state in sets.into_values() {
            let unique = state.values.iter().unique().count();
            if unique > 0 {
                samples.push(sample(&state.key, state.key.name(), unique as f64, timestamp));
            }
        }
    }

    fn flush_timers(&self, timestamp: UnixTimestamp, samples: &mut Vec<Sample>) {
        let timers = std::mem::take(&mut *self.timers.lock());
        let postfix = self.config.postfix.as_str();

        for mut state in timers.into_values() {
            state.values.sort_unstable_by(f64::total_cmp);
            let Some(stats) = TimerStats::from_sorted(&state.values) else {
                continue;
            };

            let name = state.key.name();
            for percentile in &self.config.percentiles {
                if let Some(value) = percentile.select(&state.values) {
                    let name = derived_name(name, &percentile.name_suffix(), postfix);
                    samples.push(sample(&state.key, &name, value, timestamp));
                }
            }

            for (suffix, value) in [
                ("mean", stats.mean),
                ("upper", stats.upper),
                ("lower", stats.lower),
                ("count", stats.count as f64),
            ] {
                let name = derived_name(name, suffix, postfix);
                samples.push(sample(&state.key, &name, value, timestamp));
            }
        }
    }
}

impl CounterState {
    fn new(key: BucketKey) -> Self {
        Self {
            key,
            value: 0.0,
            updated: false,
            idle_flushes: 0,
        }
    }

    fn add(&mut self, value: f64) {
        self.value = saturating_add(self.value, value);
        self.updated = true;
    }
}

fn sample(key: &BucketKey, name: &str, value: f64, timestamp: UnixTimestamp) -> Sample {
    Sample {
        name: name.to_owned(),
        dimensions: key.dimensions().clone(),
        value,
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::PacketParser;

    const TIMESTAMP: UnixTimestamp = UnixTimestamp::from_secs(1418052649);

    fn aggregator(config: AggregatorConfig) -> Aggregator {
        Aggregator::new(config)
    }

    fn ingest(aggregator: &Aggregator, lines: &str) {
        let parser = PacketParser::new("", aggregator.config().postfix.clone(), 1472);
        for packet in parser.parse_all(lines.as_bytes()) {
            aggregator.insert(packet);
        }
    }

    fn flush_lines(aggregator: &Aggregator) -> String {
        let mut out = String::new();
        for sample in aggregator.flush(TIMESTAMP) {
            sample.write_line(&mut out);
        }
        out
    }

    #[test]
    fn test_counter_accumulates() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "gorets:100|c");
        ingest(&aggregator, "gorets:3|c");
        ingest(&aggregator, "gorets:-4|c");
        ingest(&aggregator, "gorets:-100|c");

        assert_eq!(flush_lines(&aggregator), "gorets -1 1418052649\n");
    }

    #[test]
    fn test_counter_sampling() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "gorets:1|c|@0.5\ngorets:2|c|@0.25");

        let samples = aggregator.flush(TIMESTAMP);
        assert_eq!(samples[0].value, 1.0 / 0.5 + 2.0 / 0.25);
    }

    #[test]
    fn test_counter_sampling_decimal_rate() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "gorets:1|c|@0.1");

        assert_eq!(flush_lines(&aggregator), "gorets 10 1418052649\n");
    }

    #[test]
    fn test_counter_zero_after_flush() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "gorets:100|c\ngorets:3|c");

        assert_eq!(flush_lines(&aggregator), "gorets 103 1418052649\n");
        assert_eq!(flush_lines(&aggregator), "gorets 0 1418052649\n");
    }

    #[test]
    fn test_counter_hysteresis() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "gorets:123|c");

        let mut reported = 0;
        for _ in 0..71 {
            reported += aggregator.flush(TIMESTAMP).len();
        }

        assert_eq!(reported, 61);
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_counter_hysteresis_reset_by_activity() {
        let config = AggregatorConfig {
            persist_count_keys: 2,
            ..Default::default()
        };
        let aggregator = aggregator(config);

        ingest(&aggregator, "gorets:1|c");
        assert_eq!(aggregator.flush(TIMESTAMP).len(), 1);
        assert_eq!(aggregator.flush(TIMESTAMP).len(), 1);

        ingest(&aggregator, "gorets:1|c");
        let values: Vec<_> = (0..5)
            .map(|_| aggregator.flush(TIMESTAMP).first().map(|s| s.value))
            .collect();
        assert_eq!(values, [Some(1.0), Some(0.0), Some(0.0), None, None]);
    }

    #[test]
    fn test_counter_no_persistence() {
        let config = AggregatorConfig {
            persist_count_keys: 0,
            ..Default::default()
        };
        let aggregator = aggregator(config);

        ingest(&aggregator, "gorets:1|c");
        assert_eq!(aggregator.flush(TIMESTAMP).len(), 1);
        assert!(aggregator.flush(TIMESTAMP).is_empty());
    }

    #[test]
    fn test_gauge_absolute_and_relative() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "g:100|g\ng:-50|g\ng:+10|g");
        assert_eq!(flush_lines(&aggregator), "g 60 1418052649\n");

        // Inactive gauges are resent by default.
        assert_eq!(flush_lines(&aggregator), "g 60 1418052649\n");
    }

    #[test]
    fn test_gauge_clamps() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "low:10|g\nlow:-50|g");
        ingest(&aggregator, &format!("high:{}|g\nhigh:+20|g", f64::MAX - 10.0));

        let samples = aggregator.flush(TIMESTAMP);
        let values: BTreeMap<_, _> = samples.iter().map(|s| (s.name.as_str(), s.value)).collect();
        assert_eq!(values["low"], 0.0);
        assert_eq!(values["high"], f64::MAX);
    }

    #[test]
    fn test_gauge_relative_from_nothing() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "testGauge:+100|g");
        assert_eq!(flush_lines(&aggregator), "testGauge 100 1418052649\n");
    }

    #[test]
    fn test_gauge_delete() {
        let config = AggregatorConfig {
            inactive_gauges: InactiveGauges::Delete,
            ..Default::default()
        };
        let aggregator = aggregator(config);

        ingest(&aggregator, "testGauge:100|g");
        assert_eq!(flush_lines(&aggregator), "testGauge 100 1418052649\n");
        assert_eq!(flush_lines(&aggregator), "");

        ingest(&aggregator, "testGauge:-50|g");
        assert_eq!(flush_lines(&aggregator), "testGauge 0 1418052649\n");
    }

    #[test]
    fn test_set_cardinality() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "uniques:123|s\nuniques:234|s\nuniques:345|s");
        assert_eq!(flush_lines(&aggregator), "uniques 3 1418052649\n");

        ingest(&aggregator, "uniques:123|s\nuniques:234|s\nuniques:234|s");
        assert_eq!(flush_lines(&aggregator), "uniques 2 1418052649\n");

        assert_eq!(flush_lines(&aggregator), "");
    }

    #[test]
    fn test_timer_stats() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "glork:0|ms\nglork:30|ms\nglork:30|ms");

        insta::assert_snapshot!(flush_lines(&aggregator).trim_end(), @r###"
        glork.mean 20 1418052649
        glork.upper 30 1418052649
        glork.lower 0 1418052649
        glork.count 3 1418052649
        "###);

        assert_eq!(flush_lines(&aggregator), "");
    }

    #[test]
    fn test_timer_percentiles() {
        let config = AggregatorConfig {
            percentiles: "75,-75".parse().unwrap(),
            ..Default::default()
        };
        let aggregator = aggregator(config);
        ingest(&aggregator, "time:0|ms\ntime:1|ms\ntime:2|ms\ntime:3|ms");

        insta::assert_snapshot!(flush_lines(&aggregator).trim_end(), @r###"
        time.upper_75 2 1418052649
        time.lower_75 1 1418052649
        time.mean 1.5 1418052649
        time.upper 3 1418052649
        time.lower 0 1418052649
        time.count 4 1418052649
        "###);
    }

    #[test]
    fn test_timer_postfix() {
        let config = AggregatorConfig {
            percentiles: "75".parse().unwrap(),
            postfix: ".test".to_owned(),
            ..Default::default()
        };
        let aggregator = aggregator(config);
        ingest(&aggregator, "postfix_response_time:10|ms");

        let names: Vec<_> = aggregator
            .flush(TIMESTAMP)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            [
                "postfix_response_time.upper_75.test",
                "postfix_response_time.mean.test",
                "postfix_response_time.upper.test",
                "postfix_response_time.lower.test",
                "postfix_response_time.count.test",
            ]
        );
    }

    #[test]
    fn test_timer_ignores_sampling() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "glork:320|ms|@0.1");

        let samples = aggregator.flush(TIMESTAMP);
        let count = samples.iter().find(|s| s.name == "glork.count").unwrap();
        assert_eq!(count.value, 1.0);
    }

    #[test]
    fn test_dimensions_are_separate_buckets() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(
            &aggregator,
            "hits:1|c host=a\nhits:2|c host=b\nhits:4|c\nhits:8|c host=a",
        );

        let mut lines: Vec<_> = flush_lines(&aggregator)
            .lines()
            .map(ToOwned::to_owned)
            .collect();
        lines.sort();
        assert_eq!(
            lines,
            [
                "hits 4 1418052649",
                "hits_host=a 9 1418052649",
                "hits_host=b 2 1418052649",
            ]
        );
    }

    #[test]
    fn test_underscores_do_not_merge_buckets() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "n:1|c ame_a=x\nn_ame:2|c a=x");
        ingest(&aggregator, "b:1|c k=v_x=y\nb:2|c k=v,x=y");

        let mut values: Vec<_> = aggregator
            .flush(TIMESTAMP)
            .into_iter()
            .map(|s| (s.name, s.value))
            .collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(
            values,
            [
                ("b".to_owned(), 1.0),
                ("b".to_owned(), 2.0),
                ("n".to_owned(), 1.0),
                ("n_ame".to_owned(), 2.0),
            ]
        );
    }

    #[test]
    fn test_concurrent_insert_and_flush() {
        const THREADS: usize = 4;
        const PACKETS: usize = 10_000;

        let aggregator = aggregator(AggregatorConfig::default());
        let parser = PacketParser::default();
        let done = std::sync::atomic::AtomicUsize::new(0);

        let total = std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..PACKETS {
                        aggregator.insert(parser.parse(b"hits:1|c host=a").unwrap());
                    }
                    done.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                });
            }

            let flusher = scope.spawn(|| {
                let mut total = 0.0;
                while done.load(std::sync::atomic::Ordering::SeqCst) < THREADS {
                    total += aggregator.flush(TIMESTAMP).iter().map(|s| s.value).sum::<f64>();
                }
                total
            });

            flusher.join().unwrap()
        });

        // Everything inserted after the last concurrent flush is picked up here.
        let rest: f64 = aggregator.flush(TIMESTAMP).iter().map(|s| s.value).sum();
        assert_eq!(total + rest, (THREADS * PACKETS) as f64);
    }

    #[test]
    fn test_kind_order() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(&aggregator, "t:1|ms\ns:a|s\ng:1|g\nc:1|c");

        let names: Vec<_> = aggregator
            .flush(TIMESTAMP)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            ["c", "g", "s", "t.mean", "t.upper", "t.lower", "t.count"]
        );
    }

    #[test]
    fn test_receive_counter() {
        let config = AggregatorConfig {
            receive_counter: Some("statsq.received".to_owned()),
            ..Default::default()
        };
        let aggregator = aggregator(config);
        ingest(&aggregator, "a:1|g\nb:1|ms\nc:x|s");

        let samples = aggregator.flush(TIMESTAMP);
        let received = samples
            .iter()
            .find(|s| s.name == "statsq.received")
            .unwrap();
        assert_eq!(received.value, 3.0);
    }

    #[test]
    fn test_receive_counter_resets_negative() {
        let config = AggregatorConfig {
            receive_counter: Some("rx".to_owned()),
            ..Default::default()
        };
        let aggregator = aggregator(config);

        // The first packet increments `rx` to 1, then the packet itself subtracts 10.
        ingest(&aggregator, "rx:-10|c");
        ingest(&aggregator, "other:1|c");

        let samples = aggregator.flush(TIMESTAMP);
        let rx = samples.iter().find(|s| s.name == "rx").unwrap();
        assert_eq!(rx.value, 1.0);
    }

    #[test]
    fn test_round_trip_mixed() {
        let aggregator = aggregator(AggregatorConfig::default());
        ingest(
            &aggregator,
            "c:1|c\nc:2|c|@0.5\ng:5|g\ng:+1|g\ns:x|s\ns:y|s\ns:x|s\nt:10|ms\nt:20|ms\nbroken\n",
        );

        insta::assert_snapshot!(flush_lines(&aggregator).trim_end(), @r###"
        c 5 1418052649
        g 6 1418052649
        s 2 1418052649
        t.mean 15 1418052649
        t.upper 20 1418052649
        t.lower 10 1418052649
        t.count 2 1418052649
        "###);

        assert!(aggregator.sets.lock().is_empty());
        assert!(aggregator.timers.lock().is_empty());
        assert_eq!(aggregator.counters.lock().len(), 1);
        assert_eq!(flush_lines(&aggregator), "c 0 1418052649\ng 6 1418052649\n");
    }

    #[test]
    fn test_derived_name() {
        assert_eq!(derived_name("a", "mean", ""), "a.mean");
        assert_eq!(derived_name("a.test", "mean", ".test"), "a.mean.test");
        assert_eq!(derived_name("a", "mean", ".test"), "a.mean");
    }

    #[test]
    fn test_timer_stats_large_values() {
        let stats = TimerStats::from_sorted(&[f64::MAX, f64::MAX]).unwrap();
        assert_eq!(stats.mean, f64::MAX);
        assert!(TimerStats::from_sorted(&[]).is_none());
    }
}
