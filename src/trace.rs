//! W3C trace context propagation.
//!
//! Only the `traceparent` header is handled:
//! `<version>-<trace-id>-<parent-id>-<flags>` with a 2-hex version,
//! 32-hex trace id, 16-hex span id and 2-hex flags field.

use std::fmt;

const SUPPORTED_VERSION: &str = "00";
const FLAG_SAMPLED: u8 = 0x01;

/// Trace state for one request.
///
/// Extracted from an incoming `traceparent` header when it is valid,
/// freshly generated otherwise. The span id is always new; the incoming
/// span id is preserved as the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: u128,
    span_id: u64,
    parent_span_id: Option<u64>,
    sampled: bool,
}

impl TraceContext {
    /// Start a fresh trace with a random trace id, a random span id and
    /// the sampled flag set.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            trace_id: random_nonzero_u128(),
            span_id: random_nonzero_u64(),
            parent_span_id: None,
            sampled: true,
        }
    }

    /// Extract a context from an optional `traceparent` header value.
    ///
    /// A missing, malformed or unsupported-version header yields a fresh
    /// trace. A valid header propagates the trace id, records the caller
    /// span as parent and honors the sampled flag.
    #[must_use]
    pub fn extract(traceparent: Option<&str>) -> Self {
        match traceparent.and_then(parse_traceparent) {
            Some((trace_id, parent_span_id, flags)) => Self {
                trace_id,
                span_id: random_nonzero_u64(),
                parent_span_id: Some(parent_span_id),
                sampled: flags & FLAG_SAMPLED == FLAG_SAMPLED,
            },
            None => {
                tracing::trace!("invalid or absent traceparent; starting fresh trace");
                Self::generate()
            }
        }
    }

    /// Serialize in canonical `traceparent` form.
    #[must_use]
    pub fn to_traceparent(&self) -> String {
        format!(
            "{SUPPORTED_VERSION}-{:032x}-{:016x}-{}",
            self.trace_id,
            self.span_id,
            if self.sampled { "01" } else { "00" }
        )
    }

    #[must_use]
    pub fn trace_id(&self) -> u128 {
        self.trace_id
    }

    #[must_use]
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    #[must_use]
    pub fn parent_span_id(&self) -> Option<u64> {
        self.parent_span_id
    }

    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_traceparent())
    }
}

fn parse_traceparent(value: &str) -> Option<(u128, u64, u8)> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let flags = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    if version.len() != 2 || version != SUPPORTED_VERSION {
        return None;
    }
    if trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
        return None;
    }

    let trace_id = u128::from_str_radix(trace_id, 16).ok()?;
    let span_id = u64::from_str_radix(span_id, 16).ok()?;
    let flags = u8::from_str_radix(flags, 16).ok()?;

    // An all-zero trace or span id is invalid.
    if trace_id == 0 || span_id == 0 {
        return None;
    }

    Some((trace_id, span_id, flags))
}

fn random_nonzero_u128() -> u128 {
    loop {
        let id: u128 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

fn random_nonzero_u64() -> u64 {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[test]
    fn propagates_valid_traceparent() {
        let ctx = TraceContext::extract(Some(SAMPLE));
        assert_eq!(ctx.trace_id(), 0x0af7651916cd43dd8448eb211c80319c);
        assert_eq!(ctx.parent_span_id(), Some(0xb7ad6b7169203331));
        assert_ne!(ctx.span_id(), 0xb7ad6b7169203331);
        assert!(ctx.is_sampled());
    }

    #[test]
    fn unsampled_flags_are_honored() {
        let ctx =
            TraceContext::extract(Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-00"));
        assert!(!ctx.is_sampled());
        assert!(ctx.to_traceparent().ends_with("-00"));
    }

    #[test]
    fn missing_header_generates_fresh_trace() {
        let ctx = TraceContext::extract(None);
        assert!(ctx.parent_span_id().is_none());
        assert_ne!(ctx.trace_id(), 0);
        assert_ne!(ctx.span_id(), 0);
    }

    #[test]
    fn rejects_wrong_version() {
        let ctx =
            TraceContext::extract(Some("01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"));
        assert!(ctx.parent_span_id().is_none());
    }

    #[test]
    fn rejects_wrong_field_lengths() {
        for bad in [
            "00-0af7651916cd43dd8448eb211c80319-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b716920333-01",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-1",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331",
            "not-a-traceparent",
        ] {
            let ctx = TraceContext::extract(Some(bad));
            assert!(ctx.parent_span_id().is_none(), "accepted: {bad}");
        }
    }

    #[test]
    fn serializes_canonical_form() {
        let ctx = TraceContext::extract(Some(SAMPLE));
        let serialized = ctx.to_traceparent();
        let parts: Vec<&str> = serialized.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "00");
        assert_eq!(parts[1], "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(parts[2].len(), 16);
        assert_eq!(parts[3], "01");
    }
}
