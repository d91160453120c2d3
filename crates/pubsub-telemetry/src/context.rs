//! Trace continuation across the broker.
//!
//! The publisher stamps each message with a W3C `traceparent` attribute
//! taken from the span it was published in; the dispatcher opens the handler
//! span as a child of that remote parent. Malformed or missing values simply
//! start a fresh trace.

use opentelemetry::trace::{
    SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
};
use opentelemetry::Context;
use std::collections::HashMap;
use std::fmt;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Attribute key carrying the W3C trace context.
pub const TRACEPARENT_ATTRIBUTE: &str = "traceparent";

/// Only version `00` of the header format is understood.
const VERSION: &str = "00";

/// Parsed `traceparent`: trace id, parent span id and flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceParent {
    trace_id: TraceId,
    span_id: SpanId,
    flags: TraceFlags,
}

impl TraceParent {
    /// Position of the current span, if it belongs to a sampled-or-not valid trace.
    ///
    /// Reads the `tracing` span first (populated by the OpenTelemetry layer),
    /// then the ambient OpenTelemetry context.
    pub fn current() -> Option<Self> {
        let from_span = tracing::Span::current().context().span().span_context().clone();
        let span_context = if from_span.is_valid() {
            from_span
        } else {
            Context::current().span().span_context().clone()
        };
        span_context.is_valid().then(|| Self {
            trace_id: span_context.trace_id(),
            span_id: span_context.span_id(),
            flags: span_context.trace_flags(),
        })
    }

    /// Parse a header value. Anything but a well-formed, non-zero `00` header is `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let fields: Vec<&str> = value.trim().split('-').collect();
        let [version, trace_id, span_id, flags] = fields.as_slice() else {
            return None;
        };
        if *version != VERSION
            || trace_id.len() != 32
            || span_id.len() != 16
            || flags.len() != 2
            || ![trace_id, span_id, flags].iter().all(|f| is_lower_hex(f))
        {
            return None;
        }

        let parsed = Self {
            trace_id: TraceId::from_hex(trace_id).ok()?,
            span_id: SpanId::from_hex(span_id).ok()?,
            flags: TraceFlags::new(u8::from_str_radix(flags, 16).ok()?),
        };
        (parsed.trace_id != TraceId::INVALID && parsed.span_id != SpanId::INVALID).then_some(parsed)
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn is_sampled(&self) -> bool {
        self.flags.is_sampled()
    }

    /// The remote span context a child span should hang off.
    pub fn remote_span_context(&self) -> SpanContext {
        SpanContext::new(
            self.trace_id,
            self.span_id,
            self.flags,
            true,
            TraceState::default(),
        )
    }
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{VERSION}-{}-{}-{:02x}",
            self.trace_id,
            self.span_id,
            self.flags.to_u8()
        )
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Stamp `attributes` with the current trace position.
///
/// A caller-supplied `traceparent` wins. Returns whether one was added.
pub fn inject_traceparent(attributes: &mut HashMap<String, String>) -> bool {
    if attributes.contains_key(TRACEPARENT_ATTRIBUTE) {
        return false;
    }
    match TraceParent::current() {
        Some(parent) => {
            attributes.insert(TRACEPARENT_ATTRIBUTE.to_string(), parent.to_string());
            true
        }
        None => false,
    }
}

/// Span a delivered message is handled in, parented to the publisher's span when known.
pub fn receive_span(attributes: &HashMap<String, String>, subscription: &str) -> tracing::Span {
    let parent = attributes
        .get(TRACEPARENT_ATTRIBUTE)
        .and_then(|value| TraceParent::parse(value));

    let span = tracing::info_span!(
        "pubsub_receive",
        subscription = %subscription,
        remote_trace_id = tracing::field::Empty,
    );
    if let Some(parent) = parent {
        span.record("remote_trace_id", tracing::field::display(parent.trace_id()));
        span.set_parent(Context::new().with_remote_span_context(parent.remote_span_context()));
    }
    span
}
