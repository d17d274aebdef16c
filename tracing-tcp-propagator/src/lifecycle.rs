//! # Span lifecycle
//!
//! Every span moves through `Created -> Active -> Ended`. A [`ManagedSpan`]
//! only exists as the result of [`SpanLifecycle::start`], so a span can never
//! be ended before it was started. It is ended exactly once: either by an
//! explicit [`ManagedSpan::end`] or, on every other exit path (early return,
//! `?`, panic, a dropped future), when it goes out of scope.
//!
//! Using a span after it ended is reported as a [`LifecycleError`], logged,
//! and counted in [`LifecycleStats`]. It never panics.
use crate::error::LifecycleError;
use crate::telemetry::ServiceInfo;
use opentelemetry::{
    trace::{SpanContext, SpanKind, Status, TraceContextExt, Tracer},
    Context, ContextGuard, KeyValue,
};
use opentelemetry_sdk::trace::SdkTracer;
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a span is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanState {
    /// Started but not yet made current.
    Created,
    /// Made current for at least one operation.
    Active,
    /// Ended; terminal.
    Ended,
}

/// Counters shared by every span started from one [`SpanLifecycle`].
#[derive(Debug, Default)]
pub struct LifecycleStats {
    started: AtomicU64,
    ended: AtomicU64,
    misuse: AtomicU64,
}

impl LifecycleStats {
    /// Spans started so far.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Spans ended so far.
    pub fn ended(&self) -> u64 {
        self.ended.load(Ordering::Relaxed)
    }

    /// Double ends and activations after end.
    pub fn misuse(&self) -> u64 {
        self.misuse.load(Ordering::Relaxed)
    }

    /// Spans started but not yet ended.
    pub fn open_spans(&self) -> u64 {
        self.started().saturating_sub(self.ended())
    }
}

/// Starts spans carrying the fixed service attributes.
#[derive(Clone)]
pub struct SpanLifecycle {
    tracer: SdkTracer,
    attributes: Arc<[KeyValue]>,
    stats: Arc<LifecycleStats>,
}

impl fmt::Debug for SpanLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanLifecycle")
            .field("attributes", &self.attributes)
            .field("stats", &self.stats)
            .finish()
    }
}

impl SpanLifecycle {
    pub(crate) fn new(tracer: SdkTracer, service: &ServiceInfo, stats: Arc<LifecycleStats>) -> Self {
        SpanLifecycle {
            tracer,
            attributes: service.attributes().into(),
            stats,
        }
    }

    /// Start a span of `kind` whose parent is the span in `parent`, if any.
    ///
    /// A `parent` without a valid span produces a trace root.
    pub fn start(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        parent: &Context,
    ) -> ManagedSpan {
        let name = name.into();
        let span = self
            .tracer
            .span_builder(name.clone())
            .with_kind(kind)
            .with_attributes(self.attributes.iter().cloned())
            .start_with_context(&self.tracer, parent);
        let cx = parent.with_span(span);
        self.stats.started.fetch_add(1, Ordering::Relaxed);

        let span_context = cx.span().span_context().clone();
        debug!(
            name: "SpanStarted",
            span_name = %name,
            trace_id = %span_context.trace_id(),
            span_id = %span_context.span_id(),
            is_root = !parent.span().span_context().is_valid(),
        );

        ManagedSpan {
            name,
            cx,
            state: SpanState::Created,
            stats: self.stats.clone(),
        }
    }

    /// Run `f` inside a new span made current for its duration.
    ///
    /// The span is ended exactly once whether `f` succeeds, fails or panics.
    /// A failure also sets the span status to error.
    pub fn in_span<T, E, F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        parent: &Context,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Context) -> Result<T, E>,
        E: fmt::Display,
    {
        let mut span = self.start(name, kind, parent);
        let result = match span.activate_context() {
            Ok(cx) => {
                let _guard = cx.clone().attach();
                f(&cx)
            }
            // a freshly started span cannot have ended
            Err(_) => f(span.context()),
        };
        if let Err(err) = &result {
            span.record_error(err);
        }
        span.finish();
        result
    }

    /// Counters for spans started from this lifecycle.
    pub fn stats(&self) -> &LifecycleStats {
        &self.stats
    }
}

/// A started span. Ends itself when dropped.
pub struct ManagedSpan {
    name: Cow<'static, str>,
    cx: Context,
    state: SpanState,
    stats: Arc<LifecycleStats>,
}

impl fmt::Debug for ManagedSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedSpan")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("span_context", self.cx.span().span_context())
            .finish()
    }
}

impl ManagedSpan {
    /// Span name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SpanState {
        self.state
    }

    /// Identifiers of this span.
    pub fn span_context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    /// Context holding this span, derived from the parent context.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Make this span current on the calling thread until the scope drops.
    ///
    /// Dropping the scope restores the previously current context; it does
    /// not end the span.
    pub fn activate(&mut self) -> Result<SpanScope<'_>, LifecycleError> {
        self.mark_active()?;
        let guard = self.cx.clone().attach();
        Ok(SpanScope {
            span: self,
            _guard: guard,
        })
    }

    /// Context holding this span, for work that cannot keep a thread-local
    /// scope open, such as code crossing an `.await`.
    pub fn activate_context(&mut self) -> Result<Context, LifecycleError> {
        self.mark_active()?;
        Ok(self.cx.clone())
    }

    /// Mark the span as failed with `err`'s message.
    pub fn record_error(&self, err: &dyn fmt::Display) {
        if self.state == SpanState::Ended {
            return;
        }
        self.cx.span().set_status(Status::error(err.to_string()));
    }

    /// End the span. A second call is reported and ignored.
    pub fn end(&mut self) -> Result<(), LifecycleError> {
        if self.state == SpanState::Ended {
            self.report_misuse("SpanEndedTwice");
            return Err(LifecycleError::AlreadyEnded(self.name.to_string()));
        }
        self.finish();
        Ok(())
    }

    fn mark_active(&mut self) -> Result<(), LifecycleError> {
        if self.state == SpanState::Ended {
            self.report_misuse("SpanActivatedAfterEnd");
            return Err(LifecycleError::ActivatedAfterEnd(self.name.to_string()));
        }
        self.state = SpanState::Active;
        Ok(())
    }

    fn finish(&mut self) {
        self.cx.span().end();
        self.state = SpanState::Ended;
        self.stats.ended.fetch_add(1, Ordering::Relaxed);
        debug!(
            name: "SpanEnded",
            span_name = %self.name,
            trace_id = %self.cx.span().span_context().trace_id(),
            span_id = %self.cx.span().span_context().span_id(),
        );
    }

    fn report_misuse(&self, event: &'static str) {
        self.stats.misuse.fetch_add(1, Ordering::Relaxed);
        let span = self.cx.span();
        warn!(
            name: "SpanLifecycleMisuse",
            event,
            span_name = %self.name,
            trace_id = %span.span_context().trace_id(),
            span_id = %span.span_context().span_id(),
        );
    }
}

impl Drop for ManagedSpan {
    fn drop(&mut self) {
        if self.state != SpanState::Ended {
            self.finish();
        }
    }
}

/// Keeps a span current on this thread. Not `Send`.
pub struct SpanScope<'a> {
    span: &'a mut ManagedSpan,
    _guard: ContextGuard,
}

impl fmt::Debug for SpanScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanScope").field("span", &self.span).finish()
    }
}

impl SpanScope<'_> {
    /// The context made current by this scope.
    pub fn context(&self) -> &Context {
        &self.span.cx
    }

    /// The span made current by this scope.
    pub fn span(&self) -> &ManagedSpan {
        self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanId, TraceFlags, TraceId, TraceState, TracerProvider};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, InMemorySpanExporterBuilder, SdkTracerProvider};

    fn lifecycle() -> (SpanLifecycle, InMemorySpanExporter, SdkTracerProvider) {
        let exporter = InMemorySpanExporterBuilder::new().build();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let lifecycle = SpanLifecycle::new(
            provider.tracer("lifecycle-test"),
            &ServiceInfo::new("test", "unit", "0.0.1"),
            Arc::default(),
        );
        (lifecycle, exporter, provider)
    }

    fn remote_parent() -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ))
    }

    #[test]
    fn state_transitions() {
        let (lifecycle, exporter, _provider) = lifecycle();
        let mut span = lifecycle.start("op", SpanKind::Client, &Context::new());
        assert_eq!(span.state(), SpanState::Created);

        {
            let scope = span.activate().unwrap();
            assert_eq!(scope.span().state(), SpanState::Active);
            assert_eq!(
                Context::current().span().span_context(),
                scope.context().span().span_context()
            );
        }
        assert!(!Context::current().has_active_span());

        span.end().unwrap();
        assert_eq!(span.state(), SpanState::Ended);
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn span_carries_kind_and_fixed_attributes() {
        let (lifecycle, exporter, _provider) = lifecycle();
        lifecycle.start("op", SpanKind::Server, &Context::new()).end().unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        let span = &spans[0];
        assert_eq!(span.name, "op");
        assert_eq!(span.span_kind, SpanKind::Server);
        for (key, value) in [("service.name", "test"), ("deployment.environment", "unit"), ("version", "0.0.1")] {
            assert!(
                span.attributes
                    .iter()
                    .any(|kv| kv.key.as_str() == key && kv.value.as_str() == value),
                "missing {key}"
            );
        }
        assert!(span.start_time <= span.end_time);
    }

    #[test]
    fn double_end_is_reported_not_fatal() {
        let (lifecycle, exporter, _provider) = lifecycle();
        let mut span = lifecycle.start("op", SpanKind::Client, &Context::new());

        assert_eq!(span.end(), Ok(()));
        assert_eq!(span.end(), Err(LifecycleError::AlreadyEnded("op".into())));
        assert_eq!(lifecycle.stats().misuse(), 1);
        assert_eq!(lifecycle.stats().ended(), 1);
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn activate_after_end_is_reported() {
        let (lifecycle, _exporter, _provider) = lifecycle();
        let mut span = lifecycle.start("op", SpanKind::Client, &Context::new());
        span.end().unwrap();

        assert!(matches!(span.activate(), Err(LifecycleError::ActivatedAfterEnd(_))));
        assert!(span.activate_context().is_err());
        assert_eq!(lifecycle.stats().misuse(), 2);
    }

    #[test]
    fn drop_ends_open_span_once() {
        let (lifecycle, exporter, _provider) = lifecycle();
        {
            let mut span = lifecycle.start("op", SpanKind::Client, &Context::new());
            let _scope = span.activate().unwrap();
        }

        assert_eq!(lifecycle.stats().started(), 1);
        assert_eq!(lifecycle.stats().ended(), 1);
        assert_eq!(lifecycle.stats().open_spans(), 0);
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn in_span_ends_on_error_and_records_status() {
        let (lifecycle, exporter, _provider) = lifecycle();
        let result: Result<(), String> =
            lifecycle.in_span("op", SpanKind::Server, &Context::new(), |cx| {
                assert!(cx.has_active_span());
                Err("boom".to_string())
            });

        assert_eq!(result, Err("boom".to_string()));
        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::error("boom"));
        assert_eq!(lifecycle.stats().open_spans(), 0);
    }

    #[test]
    fn in_span_success_ends_once_without_misuse() {
        let (lifecycle, exporter, _provider) = lifecycle();
        let value = lifecycle
            .in_span("op", SpanKind::Internal, &Context::new(), |_| Ok::<_, String>(7))
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(lifecycle.stats().ended(), 1);
        assert_eq!(lifecycle.stats().misuse(), 0);
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn in_span_ends_on_panic() {
        let (lifecycle, exporter, _provider) = lifecycle();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), String> =
                lifecycle.in_span("op", SpanKind::Server, &Context::new(), |_| panic!("boom"));
        }));

        assert!(outcome.is_err());
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
        assert_eq!(lifecycle.stats().ended(), 1);
    }

    #[test]
    fn remote_parent_links_child() {
        let (lifecycle, exporter, _provider) = lifecycle();
        let parent = remote_parent();
        lifecycle
            .in_span("op", SpanKind::Server, &parent, |_| Ok::<_, String>(()))
            .unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].span_context.trace_id(), parent.span().span_context().trace_id());
        assert_eq!(spans[0].parent_span_id, parent.span().span_context().span_id());
    }

    #[test]
    fn invalid_parent_produces_root() {
        let (lifecycle, exporter, _provider) = lifecycle();
        let span = lifecycle.start("op", SpanKind::Server, &Context::new());
        let span_context = span.span_context();
        drop(span);

        assert!(span_context.is_valid());
        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].parent_span_id, SpanId::INVALID);
    }

    #[test]
    fn activate_context_hands_out_the_span_context() {
        let (lifecycle, _exporter, _provider) = lifecycle();
        let mut span = lifecycle.start("op", SpanKind::Client, &Context::new());

        let cx = span.activate_context().unwrap();

        assert_eq!(cx.span().span_context(), &span.span_context());
        assert_eq!(span.state(), SpanState::Active);
        span.end().unwrap();
        assert_eq!(
            span.activate_context().unwrap_err(),
            LifecycleError::ActivatedAfterEnd("op".into())
        );
    }
}
