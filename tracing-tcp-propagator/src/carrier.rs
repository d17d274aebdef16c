//! # Carrier and context codec
//!
//! A [`CarrierMap`] is the flat `name -> value` representation of a trace
//! context that travels in the header block of a wire message. The
//! [`ContextCodec`] moves a [`Context`] into and out of a carrier with the
//! registered text map propagators (W3C trace-context and W3C baggage).
//!
//! Header names are case-sensitive and unique; inserting an existing name
//! replaces its value.
use opentelemetry::{
    propagation::{Extractor, Injector, TextMapCompositePropagator, TextMapPropagator},
    Context,
};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Header carrying the W3C `traceparent` field.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// Header carrying the vendor specific `tracestate` field.
pub const TRACESTATE_HEADER: &str = "tracestate";
/// Header carrying W3C baggage entries.
pub const BAGGAGE_HEADER: &str = "baggage";

/// Ordered, case-sensitive header map produced by inject and consumed by extract.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CarrierMap {
    headers: BTreeMap<String, String>,
}

impl CarrierMap {
    /// Create an empty carrier.
    pub fn new() -> Self {
        CarrierMap::default()
    }

    /// Insert a header, returning the value it replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.headers.insert(key.into(), value.into())
    }

    /// Value of the header named exactly `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// `true` if no header is present.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Headers in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CarrierMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        CarrierMap {
            headers: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Injector for CarrierMap {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(key.to_owned(), value);
    }
}

impl Extractor for CarrierMap {
    fn get(&self, key: &str) -> Option<&str> {
        CarrierMap::get(self, key)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }
}

/// Serializes trace context into a [`CarrierMap`] and back.
///
/// Cloning is cheap; all clones share the same propagators.
#[derive(Clone)]
pub struct ContextCodec {
    propagator: Arc<dyn TextMapPropagator + Send + Sync>,
}

impl fmt::Debug for ContextCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextCodec")
            .field("fields", &self.propagator.fields().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ContextCodec {
    fn default() -> Self {
        Self::w3c()
    }
}

impl ContextCodec {
    /// Codec using W3C trace-context followed by W3C baggage.
    pub fn w3c() -> Self {
        let composite = TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]);
        Self::with_propagator(composite)
    }

    /// Codec backed by a caller supplied propagator.
    pub fn with_propagator<P>(propagator: P) -> Self
    where
        P: TextMapPropagator + Send + Sync + 'static,
    {
        ContextCodec {
            propagator: Arc::new(propagator),
        }
    }

    /// Write the propagation fields of `cx` into a fresh carrier.
    ///
    /// A context without a valid span yields no trace-context headers.
    pub fn inject(&self, cx: &Context) -> CarrierMap {
        let mut carrier = CarrierMap::new();
        self.propagator.inject_context(cx, &mut carrier);
        carrier
    }

    /// Rebuild a context from `carrier`.
    ///
    /// Missing or malformed fields are ignored, in which case the returned
    /// context has no valid remote span and any span started from it is a
    /// trace root. Extraction always starts from an empty context so that
    /// whatever is current on the calling thread never leaks into the result.
    pub fn extract(&self, carrier: &CarrierMap) -> Context {
        self.propagator
            .extract_with_context(&Context::new(), carrier)
    }

    /// Header names this codec reads and writes.
    pub fn fields(&self) -> Vec<String> {
        self.propagator.fields().map(str::to_owned).collect()
    }
}
