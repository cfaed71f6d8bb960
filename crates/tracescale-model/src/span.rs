//! Spans and OTLP wire parsing.

use serde::{Deserialize, Serialize};
use tracescale_proto::resource::Resource;
use tracescale_proto::trace::{ResourceSpans, TracesData};
use tracing::warn;

use crate::attributes::{Attributes, SERVICE_NAME_KEY, UNKNOWN_SERVICE};

/// A single timed operation. Identifiers are lowercase hex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    /// `None` marks a root span.
    pub parent_span_id: Option<String>,
    pub service_name: String,
    pub operation_name: String,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    pub attributes: Attributes,
}

impl Span {
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// End minus start in milliseconds. Inverted timestamps yield zero.
    pub fn duration_ms(&self) -> f64 {
        nanos_to_ms(self.end_time_unix_nano.saturating_sub(self.start_time_unix_nano))
    }
}

pub fn nanos_to_ms(nanos: u64) -> f64 {
    nanos as f64 / 1_000_000.0
}

/// Hex-encode a wire identifier; empty input maps to `None`.
pub fn hex_id(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        None
    } else {
        Some(hex::encode(bytes))
    }
}

/// The `service.name` declared on a resource, or `unknown_service`.
pub fn service_name_of(resource: Option<&Resource>) -> String {
    resource
        .and_then(|r| {
            r.attributes
                .iter()
                .find(|kv| kv.key == SERVICE_NAME_KEY)
                .and_then(|kv| kv.value.as_ref())
        })
        .and_then(|v| match v.value.as_ref() {
            Some(tracescale_proto::common::any_value::Value::StringValue(s)) if !s.is_empty() => {
                Some(s.clone())
            }
            _ => None,
        })
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
}

/// Flatten a `TracesData` message into spans.
pub fn parse_spans(data: &TracesData) -> Vec<Span> {
    parse_resource_spans(&data.resource_spans)
}

/// Flatten resource → scope → span nesting. Resource and scope attributes
/// are copied onto each span without overriding the span's own keys.
pub fn parse_resource_spans(resource_spans: &[ResourceSpans]) -> Vec<Span> {
    let mut spans = Vec::new();

    for rs in resource_spans {
        let service_name = service_name_of(rs.resource.as_ref());
        let resource_attrs = rs
            .resource
            .as_ref()
            .map(|r| Attributes::from_key_values(&r.attributes))
            .unwrap_or_default();

        for ss in &rs.scope_spans {
            let scope_attrs = ss
                .scope
                .as_ref()
                .map(|s| Attributes::from_key_values(&s.attributes))
                .unwrap_or_default();

            for wire in &ss.spans {
                let Some(span_id) = hex_id(&wire.span_id) else {
                    warn!(operation = %wire.name, "skipping span without span_id");
                    continue;
                };

                let mut attributes = Attributes::from_key_values(&wire.attributes);
                attributes.merge_missing(&scope_attrs);
                attributes.merge_missing(&resource_attrs);

                spans.push(Span {
                    trace_id: hex_id(&wire.trace_id).unwrap_or_default(),
                    span_id,
                    parent_span_id: hex_id(&wire.parent_span_id),
                    service_name: service_name.clone(),
                    operation_name: wire.name.clone(),
                    start_time_unix_nano: wire.start_time_unix_nano,
                    end_time_unix_nano: wire.end_time_unix_nano,
                    attributes,
                });
            }
        }
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracescale_proto::common::{AnyValue, InstrumentationScope, KeyValue, any_value};
    use tracescale_proto::trace::{ScopeSpans, Span as WireSpan};

    fn string_kv(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(value.to_string())),
            }),
        }
    }

    fn wire_span(span_id: &[u8], parent: &[u8], name: &str, start: u64, end: u64) -> WireSpan {
        WireSpan {
            trace_id: vec![0xab; 16],
            span_id: span_id.to_vec(),
            parent_span_id: parent.to_vec(),
            name: name.to_string(),
            start_time_unix_nano: start,
            end_time_unix_nano: end,
            attributes: vec![string_kv("http.route", "/api/products")],
            ..Default::default()
        }
    }

    #[test]
    fn flattens_nesting_and_copies_attributes() {
        let data = TracesData {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![
                        string_kv("service.name", "frontend"),
                        string_kv("http.route", "resource-level"),
                    ],
                    dropped_attributes_count: 0,
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: "otel.http".into(),
                        attributes: vec![string_kv("scope.kind", "http")],
                        ..Default::default()
                    }),
                    spans: vec![
                        wire_span(&[1; 8], &[], "GET /", 1_000_000, 6_000_000),
                        wire_span(&[2; 8], &[1; 8], "SELECT", 2_000_000, 3_500_000),
                    ],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        };

        let spans = parse_spans(&data);
        assert_eq!(spans.len(), 2);

        let root = &spans[0];
        assert!(root.is_root());
        assert_eq!(root.service_name, "frontend");
        assert_eq!(root.trace_id, "ab".repeat(16));
        assert_eq!(root.span_id, "0101010101010101");
        assert_eq!(root.duration_ms(), 5.0);
        assert_eq!(root.attributes.get_str("http.route"), Some("/api/products"));
        assert_eq!(root.attributes.get_str("scope.kind"), Some("http"));

        let child = &spans[1];
        assert_eq!(child.parent_span_id.as_deref(), Some("0101010101010101"));
        assert_eq!(child.duration_ms(), 1.5);
    }

    #[test]
    fn missing_service_name_and_span_id() {
        let data = TracesData {
            resource_spans: vec![ResourceSpans {
                resource: None,
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans: vec![
                        wire_span(&[], &[], "dropped", 0, 1),
                        wire_span(&[3; 8], &[], "kept", 0, 1),
                    ],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        };

        let spans = parse_spans(&data);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].operation_name, "kept");
        assert_eq!(spans[0].service_name, UNKNOWN_SERVICE);
    }

    #[test]
    fn inverted_timestamps_have_zero_duration() {
        let mut span = parse_resource_spans(&[ResourceSpans {
            resource: None,
            scope_spans: vec![ScopeSpans {
                scope: None,
                spans: vec![wire_span(&[4; 8], &[], "x", 10, 20)],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }])
        .remove(0);
        span.start_time_unix_nano = 50;
        assert_eq!(span.duration_ms(), 0.0);
    }
}
