//! # Contextual Bus Testing
//!
//! Testing utilities and helpers for the contextual event bus.
//!
//! This crate provides:
//! - Recording implementations of the adapter sink and of interceptors
//! - A log capture layer for asserting on what consumers logged
//! - Bus builders and polling helpers
//! - proptest strategies for context keys and values
//!
//! ## Example
//!
//! ```ignore
//! use contextual_bus_testing::{helpers::test_bus, mocks::RecordingSink};
//!
//! #[tokio::test]
//! async fn test_hello_flow() {
//!     let bus = test_bus();
//!     bus.consumer("foo", |delivery| async move {
//!         let _ = delivery.reply("world");
//!     });
//!
//!     let mut sink = RecordingSink::new();
//!     adapter.handle(&headers, &mut sink, "foo", "bar", render).await.unwrap();
//!     assert_eq!(sink.body_str(), Some("Hello world!".to_string()));
//! }
//! ```

/// Recording implementations of bus and adapter seams.
pub mod mocks {
    use bytes::Bytes;
    use contextual_bus_core::{
        DeliveryKind, Direction, Interception, InterceptionEvent, Interceptor,
    };
    use contextual_bus_runtime::{AdapterError, FailureKind, OutboundSink, SinkError};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex, PoisonError};

    /// One write accepted by a [`RecordingSink`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SinkWrite {
        /// A response body
        Body(Bytes),
        /// A failure response
        Failure {
            /// Failure class
            kind: FailureKind,
            /// Rendered error
            message: String,
        },
    }

    /// Sink that records every write.
    ///
    /// # Example
    ///
    /// ```
    /// use contextual_bus_runtime::OutboundSink;
    /// use contextual_bus_testing::mocks::RecordingSink;
    ///
    /// let mut sink = RecordingSink::new();
    /// sink.write_body("hi".into()).unwrap();
    /// assert_eq!(sink.body_str().as_deref(), Some("hi"));
    ///
    /// let mut closed = RecordingSink::rejecting("connection reset");
    /// assert!(closed.write_body("hi".into()).is_err());
    /// ```
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        writes: Vec<SinkWrite>,
        rejection: Option<Rejection>,
    }

    #[derive(Debug)]
    enum Rejection {
        Everything(String),
        BodiesOnly(String),
    }

    impl RecordingSink {
        /// Create a sink that accepts every write.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a sink that rejects every write with `reason`.
        #[must_use]
        pub fn rejecting(reason: impl Into<String>) -> Self {
            Self {
                writes: Vec::new(),
                rejection: Some(Rejection::Everything(reason.into())),
            }
        }

        /// Create a sink that rejects bodies with `reason` but records
        /// failures.
        #[must_use]
        pub fn rejecting_bodies(reason: impl Into<String>) -> Self {
            Self {
                writes: Vec::new(),
                rejection: Some(Rejection::BodiesOnly(reason.into())),
            }
        }

        /// Writes accepted so far.
        #[must_use]
        pub fn writes(&self) -> &[SinkWrite] {
            &self.writes
        }

        /// The last body written, as text.
        #[must_use]
        pub fn body_str(&self) -> Option<String> {
            self.writes.iter().rev().find_map(|write| match write {
                SinkWrite::Body(body) => Some(String::from_utf8_lossy(body).into_owned()),
                SinkWrite::Failure { .. } => None,
            })
        }

        /// The kind of the last failure written.
        #[must_use]
        pub fn failure_kind(&self) -> Option<FailureKind> {
            self.writes.iter().rev().find_map(|write| match write {
                SinkWrite::Failure { kind, .. } => Some(*kind),
                SinkWrite::Body(_) => None,
            })
        }

        fn accept(&mut self, write: SinkWrite) -> Result<(), SinkError> {
            let rejected = match (&self.rejection, &write) {
                (Some(Rejection::Everything(reason)), _)
                | (Some(Rejection::BodiesOnly(reason)), SinkWrite::Body(_)) => Some(reason),
                _ => None,
            };
            if let Some(reason) = rejected {
                return Err(SinkError::new(reason.clone()));
            }
            self.writes.push(write);
            Ok(())
        }
    }

    impl OutboundSink for RecordingSink {
        fn write_body(&mut self, body: Bytes) -> Result<(), SinkError> {
            self.accept(SinkWrite::Body(body))
        }

        fn write_failure(&mut self, failure: &AdapterError) -> Result<(), SinkError> {
            self.accept(SinkWrite::Failure {
                kind: failure.kind(),
                message: failure.to_string(),
            })
        }
    }

    /// What a [`RecordingInterceptor`] saw.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct InterceptionRecord {
        /// Interceptor name
        pub name: String,
        /// Chain direction
        pub direction: Direction,
        /// Delivery kind
        pub kind: DeliveryKind,
        /// Message address
        pub address: String,
        /// Headers as seen by the interceptor
        pub headers: Vec<(String, String)>,
        /// Context entries as seen by the interceptor
        pub context: BTreeMap<String, String>,
    }

    /// Shared, ordered log of interceptor invocations.
    #[derive(Debug, Clone, Default)]
    pub struct InterceptionLog {
        records: Arc<Mutex<Vec<InterceptionRecord>>>,
    }

    impl InterceptionLog {
        /// Create an empty log.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Copy of every record, in invocation order.
        #[must_use]
        pub fn records(&self) -> Vec<InterceptionRecord> {
            self.records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Names of the interceptors invoked, in order.
        #[must_use]
        pub fn names(&self) -> Vec<String> {
            self.records().into_iter().map(|record| record.name).collect()
        }

        fn push(&self, record: InterceptionRecord) {
            self.records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record);
        }
    }

    /// Interceptor that records each invocation and optionally aborts.
    #[derive(Debug)]
    pub struct RecordingInterceptor {
        name: String,
        log: InterceptionLog,
        abort: Option<(Option<DeliveryKind>, String)>,
    }

    impl RecordingInterceptor {
        /// Record into `log` and let every message through.
        #[must_use]
        pub fn new(name: impl Into<String>, log: &InterceptionLog) -> Self {
            Self {
                name: name.into(),
                log: log.clone(),
                abort: None,
            }
        }

        /// Abort every message with `reason` after recording it.
        #[must_use]
        pub fn aborting(mut self, reason: impl Into<String>) -> Self {
            self.abort = Some((None, reason.into()));
            self
        }

        /// Abort only messages of `kind` with `reason`.
        #[must_use]
        pub fn aborting_kind(mut self, kind: DeliveryKind, reason: impl Into<String>) -> Self {
            self.abort = Some((Some(kind), reason.into()));
            self
        }
    }

    impl Interceptor for RecordingInterceptor {
        fn intercept(&self, event: &mut InterceptionEvent<'_>) -> Interception {
            self.log.push(InterceptionRecord {
                name: self.name.clone(),
                direction: event.direction(),
                kind: event.kind(),
                address: event.message().address().to_string(),
                headers: event
                    .headers()
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
                context: event.context().snapshot(),
            });

            match &self.abort {
                Some((None, reason)) => Interception::abort(reason.clone()),
                Some((Some(kind), reason)) if *kind == event.kind() => {
                    Interception::abort(reason.clone())
                }
                _ => Interception::Continue,
            }
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}

/// Log capture for assertions on emitted `tracing` events.
pub mod logs {
    use std::fmt::{self, Write as _};
    use std::sync::{Arc, Mutex, PoisonError};
    use tracing::field::{Field, Visit};
    use tracing::subscriber::DefaultGuard;
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// Layer storing every event as a `message key=value ...` line.
    ///
    /// The capture is installed as the thread default, so it sees events from
    /// tasks running on the current-thread test runtime.
    #[derive(Debug, Clone, Default)]
    pub struct CapturedLogs {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl CapturedLogs {
        /// Install a capture as the default subscriber for this thread.
        ///
        /// The capture stops when the returned guard is dropped.
        #[must_use]
        pub fn install() -> (Self, DefaultGuard) {
            let logs = Self::default();
            let subscriber = tracing_subscriber::registry().with(logs.clone());
            let guard = tracing::subscriber::set_default(subscriber);
            (logs, guard)
        }

        /// Every captured line, in emission order.
        #[must_use]
        pub fn lines(&self) -> Vec<String> {
            self.lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Lines containing `needle`.
        #[must_use]
        pub fn matching(&self, needle: &str) -> Vec<String> {
            self.lines()
                .into_iter()
                .filter(|line| line.contains(needle))
                .collect()
        }
    }

    impl<S: Subscriber> Layer<S> for CapturedLogs {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = LineVisitor::default();
            event.record(&mut visitor);
            self.lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(visitor.finish());
        }
    }

    #[derive(Default)]
    struct LineVisitor {
        message: String,
        fields: String,
    }

    impl LineVisitor {
        fn finish(self) -> String {
            format!("{}{}", self.message, self.fields)
        }
    }

    impl Visit for LineVisitor {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "message" {
                self.message.push_str(value);
            } else {
                let _ = write!(self.fields, " {}={value}", field.name());
            }
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                let _ = write!(self.message, "{value:?}");
            } else {
                let _ = write!(self.fields, " {}={value:?}", field.name());
            }
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use contextual_bus_core::EventBus;
    use contextual_bus_runtime::{BusConfig, ContextPropagation, LocalEventBus};
    use std::time::Duration;

    /// Timeout used by [`test_bus`]; long enough for any healthy test.
    pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    /// Bus with a short default timeout and trace id propagation installed.
    #[must_use]
    pub fn test_bus() -> LocalEventBus {
        test_bus_with_config(BusConfig::new().with_default_timeout(TEST_TIMEOUT))
    }

    /// Bus built from `config` with trace id propagation installed.
    #[must_use]
    pub fn test_bus_with_config(config: BusConfig) -> LocalEventBus {
        let bus = LocalEventBus::with_config(config);
        ContextPropagation::trace_id().install(bus.interceptors());
        bus
    }

    /// Route `tracing` output to the test harness. Safe to call repeatedly.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Poll `condition` until it holds or `timeout` elapses.
    pub async fn eventually<F>(timeout: Duration, condition: F) -> bool
    where
        F: Fn() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Context keys such as `trace.id` or `tenant`.
    pub fn context_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,7}(\\.[a-z][a-z0-9]{0,7})?"
    }

    /// Non-empty values that are valid in both context entries and headers.
    pub fn context_value() -> impl Strategy<Value = String> {
        "[A-Za-z0-9-]{1,24}"
    }

    /// Sets of distinct, non-empty trace ids.
    pub fn distinct_trace_ids(max: usize) -> impl Strategy<Value = Vec<String>> {
        proptest::collection::hash_set(context_value(), 1..=max)
            .prop_map(|ids| ids.into_iter().collect())
    }
}

// Re-export commonly used items
pub use helpers::{eventually, init_test_tracing, test_bus, test_bus_with_config};
pub use logs::CapturedLogs;
pub use mocks::{InterceptionLog, RecordingInterceptor, RecordingSink, SinkWrite};
