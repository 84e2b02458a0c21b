//! Structured log line per lifecycle callback

use observa_core::{Context, Event, ObservationHandler};
use tracing::{event, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Emit at a level chosen at runtime
macro_rules! emit {
    ($level:expr, $($rest:tt)+) => {
        match $level {
            Level::TRACE => event!(Level::TRACE, $($rest)+),
            Level::DEBUG => event!(Level::DEBUG, $($rest)+),
            Level::INFO => event!(Level::INFO, $($rest)+),
            Level::WARN => event!(Level::WARN, $($rest)+),
            _ => event!(Level::ERROR, $($rest)+),
        }
    };
}

/// Logs every observation transition through `tracing`
///
/// Errors are always logged at `WARN`; every other callback uses the
/// configured level (`DEBUG` by default). High-cardinality tags are left out
/// unless enabled, since log pipelines often index every field.
#[derive(Debug, Clone)]
pub struct LoggingHandler {
    level: Level,
    high_cardinality: bool,
}

impl LoggingHandler {
    /// Handler logging at INFO, without high-cardinality tags
    pub fn new() -> Self {
        Self { level: Level::DEBUG, high_cardinality: false }
    }

    /// Level used for every callback except `on_error`
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Include high-cardinality tags in start and stop lines
    #[must_use]
    pub fn with_high_cardinality(mut self, enabled: bool) -> Self {
        self.high_cardinality = enabled;
        self
    }

    fn tags(&self, context: &Context) -> String {
        if self.high_cardinality {
            context.all_key_values().to_string()
        } else {
            context.low_cardinality_key_values().to_string()
        }
    }
}

impl Default for LoggingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservationHandler for LoggingHandler {
    fn supports_context(&self, _context: &Context) -> bool {
        true
    }

    fn on_start(&self, context: &mut Context) {
        let tags = self.tags(context);
        emit!(
            self.level,
            observation = %context.name(),
            contextual_name = context.contextual_name().unwrap_or_default(),
            tags = %tags,
            "observation started"
        );
    }

    fn on_error(&self, context: &mut Context) {
        let error = context.error().map(ToString::to_string).unwrap_or_default();
        warn!(observation = %context.name(), %error, "observation failed");
    }

    fn on_event(&self, event: &Event, context: &mut Context) {
        emit!(
            self.level,
            observation = %context.name(),
            event = %event.name(),
            contextual_name = %event.contextual_name(),
            "observation event"
        );
    }

    fn on_stop(&self, context: &Context) {
        let tags = self.tags(context);
        let error = context.error().map(|error| error.kind());
        emit!(
            self.level,
            observation = %context.name(),
            tags = %tags,
            error = error.unwrap_or("none"),
            "observation stopped"
        );
    }
}

/// Install a global subscriber writing to the test harness output
///
/// Honours `RUST_LOG`; defaults to `debug` for the observa crates. Calling
/// it more than once is harmless.
pub fn init_test_subscriber() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("observa_core=debug,observa_handlers=debug"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
pub(crate) mod capture {
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing::Subscriber;

    /// In-memory writer for formatted `tracing` output
    #[derive(Debug, Clone, Default)]
    pub(crate) struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }

        pub(crate) fn subscriber(&self) -> impl Subscriber + Send + Sync {
            let writer = self.clone();
            tracing_subscriber::fmt()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::TRACE)
                .finish()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::capture::Capture;
    use super::*;

    #[derive(Debug)]
    struct Timeout;

    impl std::fmt::Display for Timeout {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "upstream timed out")
        }
    }

    impl std::error::Error for Timeout {}

    #[test]
    fn logs_each_callback_at_configured_level() {
        let capture = Capture::default();
        tracing::subscriber::with_default(capture.subscriber(), || {
            let handler = LoggingHandler::new().with_level(Level::INFO);
            let mut context = Context::new();
            context.set_name("tax.calculate");
            context.add_low_cardinality_key_value(("type", "INCOME_TAX"));

            handler.on_start(&mut context);
            handler.on_event(&Event::of("rate.lookup"), &mut context);
            handler.on_stop(&context);
        });

        let output = capture.contents();
        assert!(output.contains("INFO"));
        assert!(output.contains("observation started"));
        assert!(output.contains("rate.lookup"));
        assert!(output.contains("type='INCOME_TAX'"));
        assert!(output.contains("observation stopped"));
    }

    #[test]
    fn high_cardinality_tags_are_opt_in() {
        let capture = Capture::default();
        tracing::subscriber::with_default(capture.subscriber(), || {
            let mut context = Context::new();
            context.add_high_cardinality_key_value(("user.id", "u-42"));
            LoggingHandler::new().on_start(&mut context);
        });
        assert!(!capture.contents().contains("u-42"));

        let capture = Capture::default();
        tracing::subscriber::with_default(capture.subscriber(), || {
            let mut context = Context::new();
            context.add_high_cardinality_key_value(("user.id", "u-42"));
            LoggingHandler::new().with_high_cardinality(true).on_start(&mut context);
        });
        assert!(capture.contents().contains("u-42"));
    }

    #[test]
    fn errors_are_logged_as_warnings() {
        let capture = Capture::default();
        let registry = observa_core::ObservationRegistry::new();
        registry.register_handler(std::sync::Arc::new(LoggingHandler::new()));

        tracing::subscriber::with_default(capture.subscriber(), || {
            let observation = observa_core::Observation::create("fetch", &registry);
            let _: Result<(), Timeout> = observation.observe(|| Err(Timeout));
        });

        let output = capture.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("Timeout: upstream timed out"));
    }
}
