// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Trace context travels inside message headers: the mock sender injects the
//! current context into what it publishes, and the mock consumer extracts it to
//! parent the span it opens for each accepted delivery. With no propagator
//! installed globally both directions are no-ops and headers stay untouched.

use crate::message::{HeaderValue, Headers};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::borrow::Cow;

/// Writes trace context entries into outgoing headers.
pub(crate) struct HeaderInjector<'a> {
    headers: &'a mut Headers,
}

impl<'a> HeaderInjector<'a> {
    pub(crate) fn new(headers: &'a mut Headers) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers
            .insert(key.to_lowercase(), HeaderValue::LongString(value));
    }
}

/// Reads trace context entries from incoming headers.
pub(crate) struct HeaderExtractor<'a> {
    headers: &'a Headers,
}

impl<'a> HeaderExtractor<'a> {
    pub(crate) fn new(headers: &'a Headers) -> Self {
        Self { headers }
    }
}

impl Extractor for HeaderExtractor<'_> {
    /// Only text headers can carry trace context; anything else is ignored.
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(HeaderValue::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }
}

/// Injects the current trace context into `headers` using the globally
/// configured propagator.
pub(crate) fn inject_current(headers: &mut Headers) {
    let ctx = Context::current();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx, &mut HeaderInjector::new(headers))
    });
}

/// Creates a consumer span for a delivery, parented by the context found in
/// its headers.
pub(crate) fn new_span(headers: &Headers, tracer: &BoxedTracer, name: &str) -> (Context, BoxedSpan) {
    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor::new(headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extractor_reads_text_headers_only() {
        let mut headers = Headers::new();
        headers.insert("traceparent".to_owned(), HeaderValue::from("00-abc-def-01"));
        headers.insert("attempt".to_owned(), HeaderValue::from(2_i32));

        let extractor = HeaderExtractor::new(&headers);
        assert_eq!(extractor.get("traceparent"), Some("00-abc-def-01"));
        assert_eq!(extractor.get("attempt"), None);
        assert_eq!(extractor.keys().len(), 2);
    }

    #[test]
    fn injector_lowercases_keys() {
        let mut headers = Headers::new();
        HeaderInjector::new(&mut headers).set("TraceParent", "v".to_owned());
        assert_eq!(headers.get("traceparent"), Some(&HeaderValue::from("v")));
    }
}
