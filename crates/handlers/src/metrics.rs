//! Timers, gauges and counters through the `metrics` facade
//!
//! # Metrics
//! - `<name>` (histogram): observation duration in seconds, labelled with the
//!   low-cardinality tags plus `error` (the error kind, or `none`)
//! - `<name>.active` (gauge): observations currently running
//! - `<name>.<event>` (counter): events signalled on the observation
//!
//! Only low-cardinality tags become labels. Whatever recorder the
//! application installs does the aggregation.

use std::time::Instant;

use ::metrics::{counter, gauge, histogram, Gauge, Label};
use observa_core::{Context, Event, KeyValues, ObservationHandler};

/// Per-observation state kept in the context between start and stop
struct Sample {
    started: Instant,
    active: Gauge,
}

/// Records observations as metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsHandler;

impl MetricsHandler {
    /// Handler recording into the installed `metrics` recorder
    pub fn new() -> Self {
        Self
    }
}

fn labels(tags: &KeyValues) -> Vec<Label> {
    tags.iter().map(|(key, value)| Label::new(key.to_string(), value.to_string())).collect()
}

impl ObservationHandler for MetricsHandler {
    fn supports_context(&self, _context: &Context) -> bool {
        true
    }

    fn on_start(&self, context: &mut Context) {
        let active = gauge!(
            format!("{}.active", context.name()),
            labels(context.low_cardinality_key_values())
        );
        active.increment(1.0);
        context.put(Sample { started: Instant::now(), active });
    }

    fn on_event(&self, event: &Event, context: &mut Context) {
        counter!(
            format!("{}.{}", context.name(), event.name()),
            labels(context.low_cardinality_key_values())
        )
        .increment(1);
    }

    fn on_stop(&self, context: &Context) {
        let Some(sample) = context.get::<Sample>() else {
            return;
        };
        sample.active.decrement(1.0);

        let mut labels = labels(context.low_cardinality_key_values());
        let error = context.error().map_or("none", |error| error.kind());
        labels.push(Label::new("error", error));
        histogram!(context.name().to_string(), labels)
            .record(sample.started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
pub(crate) mod recorder {
    //! In-memory recorder for asserting on emitted metrics

    use std::collections::BTreeMap;
    use std::sync::Arc;

    use ::metrics::{
        Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata,
        Recorder, SharedString, Unit,
    };
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    pub(crate) struct Recorded {
        pub(crate) counters: BTreeMap<String, u64>,
        pub(crate) gauges: BTreeMap<String, f64>,
        pub(crate) histograms: Vec<(String, Vec<(String, String)>, f64)>,
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct TestRecorder {
        state: Arc<Mutex<Recorded>>,
    }

    impl TestRecorder {
        pub(crate) fn counter(&self, name: &str) -> u64 {
            self.state.lock().counters.get(name).copied().unwrap_or_default()
        }

        pub(crate) fn gauge(&self, name: &str) -> f64 {
            self.state.lock().gauges.get(name).copied().unwrap_or_default()
        }

        pub(crate) fn histograms(&self, name: &str) -> Vec<(Vec<(String, String)>, f64)> {
            self.state
                .lock()
                .histograms
                .iter()
                .filter(|(metric, _, _)| metric == name)
                .map(|(_, labels, value)| (labels.clone(), *value))
                .collect()
        }

        fn handle(&self, key: &Key) -> Arc<Handle> {
            Arc::new(Handle { key: key.clone(), state: Arc::clone(&self.state) })
        }
    }

    struct Handle {
        key: Key,
        state: Arc<Mutex<Recorded>>,
    }

    impl Handle {
        fn name(&self) -> String {
            self.key.name().to_string()
        }
    }

    impl CounterFn for Handle {
        fn increment(&self, value: u64) {
            *self.state.lock().counters.entry(self.name()).or_default() += value;
        }

        fn absolute(&self, value: u64) {
            self.state.lock().counters.insert(self.name(), value);
        }
    }

    impl GaugeFn for Handle {
        fn increment(&self, value: f64) {
            *self.state.lock().gauges.entry(self.name()).or_default() += value;
        }

        fn decrement(&self, value: f64) {
            *self.state.lock().gauges.entry(self.name()).or_default() -= value;
        }

        fn set(&self, value: f64) {
            self.state.lock().gauges.insert(self.name(), value);
        }
    }

    impl HistogramFn for Handle {
        fn record(&self, value: f64) {
            let labels = self
                .key
                .labels()
                .map(|label| (label.key().to_string(), label.value().to_string()))
                .collect();
            self.state.lock().histograms.push((self.name(), labels, value));
        }
    }

    impl Recorder for TestRecorder {
        fn describe_counter(
            &self,
            _key: KeyName,
            _unit: Option<Unit>,
            _description: SharedString,
        ) {
        }

        fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

        fn describe_histogram(
            &self,
            _key: KeyName,
            _unit: Option<Unit>,
            _description: SharedString,
        ) {
        }

        fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
            Counter::from_arc(self.handle(key))
        }

        fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
            Gauge::from_arc(self.handle(key))
        }

        fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
            Histogram::from_arc(self.handle(key))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use observa_core::{Observation, ObservationRegistry};

    use super::recorder::TestRecorder;
    use super::*;

    #[derive(Debug)]
    struct Declined;

    impl std::fmt::Display for Declined {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "card declined")
        }
    }

    impl std::error::Error for Declined {}

    fn registry() -> ObservationRegistry {
        let registry = ObservationRegistry::new();
        registry.register_handler(Arc::new(MetricsHandler::new()));
        registry
    }

    #[test]
    fn active_gauge_tracks_running_observations() {
        let recorder = TestRecorder::default();
        let registry = registry();

        ::metrics::with_local_recorder(&recorder, || {
            let observation = Observation::start_new("payment", &registry).expect("start");
            assert!((recorder.gauge("payment.active") - 1.0).abs() < f64::EPSILON);
            observation.stop().expect("stop");
        });

        assert!(recorder.gauge("payment.active").abs() < f64::EPSILON);
    }

    #[test]
    fn timer_carries_tags_and_error_kind() {
        let recorder = TestRecorder::default();
        let registry = registry();

        ::metrics::with_local_recorder(&recorder, || {
            let observation = Observation::create("payment", &registry);
            observation.low_cardinality_key_value(("method", "card"));
            observation.high_cardinality_key_value(("card.last4", "4242"));
            let _: Result<(), Declined> = observation.observe(|| Err(Declined));
        });

        let samples = recorder.histograms("payment");
        assert_eq!(samples.len(), 1);
        let (labels, seconds) = &samples[0];
        assert!(*seconds >= 0.0);
        assert!(labels.contains(&("method".to_string(), "card".to_string())));
        assert!(labels.contains(&("error".to_string(), "Declined".to_string())));
        assert!(!labels.iter().any(|(key, _)| key == "card.last4"));
    }

    #[test]
    fn events_are_counted_per_name() {
        let recorder = TestRecorder::default();
        let registry = registry();

        ::metrics::with_local_recorder(&recorder, || {
            let observation = Observation::start_new("sync", &registry).expect("start");
            observation.event(Event::of("retry")).expect("event");
            observation.event(Event::of("retry")).expect("event");
            observation.stop().expect("stop");
        });

        assert_eq!(recorder.counter("sync.retry"), 2);
        let samples = recorder.histograms("sync");
        assert!(samples[0].0.contains(&("error".to_string(), "none".to_string())));
    }
}
