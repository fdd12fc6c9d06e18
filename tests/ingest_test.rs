use std::io::Write;

use celltrace::ingest::{
    decompress_if_needed, group_by_trace, load_trace_file, parse_span_records, parse_trace_bytes,
    spans_from_otlp, TraceFormat,
};
use celltrace::types::{TagValue, SPAN_KIND_TAG};
use celltrace::{build_tree, SpanKind, SpanTree};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value::Value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::span::SpanKind as OtlpSpanKind;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span as OtlpSpan};

const RECORDS: &str = r#"[
    {
        "spanId": "a",
        "traceId": "a",
        "parentId": "a",
        "serviceName": "hr--gateway-service",
        "operationName": "GET /employees",
        "startTime": 1500,
        "duration": 250,
        "tags": {"http.status_code": 200, "span.kind": "server"}
    },
    {
        "spanId": "b",
        "traceId": "a",
        "parentId": "a",
        "serviceName": "hr--employee-service",
        "operationName": "list",
        "startTime": 1600,
        "duration": 10,
        "tags": "{\"error\": true, \"component\": \"grpc\"}",
        "kind": "CLIENT"
    },
    {
        "spanId": "c",
        "traceId": "c",
        "parentId": "c"
    }
]"#;

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

fn string_attribute(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::StringValue(value.to_string())),
        }),
    }
}

fn otlp_request() -> ExportTraceServiceRequest {
    let client = OtlpSpan {
        trace_id: vec![0xab, 0xcd],
        span_id: vec![0x01],
        parent_span_id: vec![0x09],
        name: "call".to_string(),
        kind: OtlpSpanKind::Client as i32,
        start_time_unix_nano: 2_000_000_000,
        end_time_unix_nano: 2_500_000_000,
        attributes: vec![
            string_attribute("peer.service", "backend"),
            KeyValue {
                key: "retries".to_string(),
                value: Some(AnyValue {
                    value: Some(Value::IntValue(3)),
                }),
            },
        ],
        ..Default::default()
    };
    let server = OtlpSpan {
        span_id: vec![0x01],
        kind: OtlpSpanKind::Server as i32,
        start_time_unix_nano: 2_100_000_000,
        end_time_unix_nano: 2_400_000_000,
        name: "handle".to_string(),
        ..client.clone()
    };
    let internal = OtlpSpan {
        span_id: vec![0x02],
        parent_span_id: vec![0x01],
        kind: OtlpSpanKind::Internal as i32,
        name: "query".to_string(),
        attributes: Vec::new(),
        ..client.clone()
    };

    ExportTraceServiceRequest {
        resource_spans: vec![
            ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![string_attribute("service.name", "frontend")],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    spans: vec![client],
                    ..Default::default()
                }],
                ..Default::default()
            },
            ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![string_attribute("service.name", "backend")],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    spans: vec![server, internal],
                    ..Default::default()
                }],
                ..Default::default()
            },
        ],
    }
}

#[test]
fn test_parse_span_records() {
    let spans = parse_span_records(RECORDS).unwrap();
    assert_eq!(spans.len(), 3);

    let a = &spans[0];
    assert_eq!(a.span_id, "a");
    assert_eq!(a.trace_id, "a");
    assert_eq!(a.service_name, "hr--gateway-service");
    assert_eq!(a.operation_name, "GET /employees");
    assert_eq!(a.start_time, 1.5);
    assert_eq!(a.duration, 0.25);
    assert_eq!(a.end_time(), 1.75);
    assert_eq!(a.tags.get("http.status_code"), Some(&TagValue::Int(200)));
    // Kind from the tag, normalized
    assert_eq!(a.kind, Some(SpanKind::Server));
    assert_eq!(a.tags.get(SPAN_KIND_TAG), Some(&TagValue::from("SERVER")));

    let b = &spans[1];
    assert_eq!(b.kind, Some(SpanKind::Client));
    assert_eq!(b.tags.get("error"), Some(&TagValue::Bool(true)));
    assert_eq!(b.tag_text("component").as_deref(), Some("grpc"));

    let c = &spans[2];
    assert_eq!(c.kind, None);
    assert!(c.tags.is_empty());
    assert_eq!(c.service_name, "");
}

#[test]
fn test_invalid_records() {
    assert!(parse_span_records("{}").is_err());
    assert!(parse_span_records(r#"[{"traceId": "t"}]"#).is_err());
    assert!(
        parse_span_records(r#"[{"spanId": "a", "traceId": "t", "tags": "not json"}]"#).is_err()
    );
}

#[test]
fn test_group_by_trace() {
    let traces = group_by_trace(parse_span_records(RECORDS).unwrap());
    let summary: Vec<(&str, usize)> = traces
        .iter()
        .map(|(trace_id, spans)| (trace_id.as_str(), spans.len()))
        .collect();
    assert_eq!(summary, vec![("a", 2), ("c", 1)]);
    assert_eq!(traces[0].1[0].span_id, "a");
    assert_eq!(traces[0].1[1].span_id, "b");
}

#[test]
fn test_records_build_a_tree() {
    let mut traces = group_by_trace(parse_span_records(RECORDS).unwrap());
    let (_, spans) = traces.remove(0);
    let mut tree = SpanTree::new(spans);
    let root = build_tree(&mut tree).unwrap();
    assert_eq!(tree[root].span_id, "a");
    assert_eq!(tree[root].children.len(), 1);
    // Neither span has a partner with the same id
    assert_eq!(tree[root].kind, None);
}

#[test]
fn test_spans_from_otlp() {
    let spans = spans_from_otlp(&[otlp_request()]);
    assert_eq!(spans.len(), 3);

    let client = &spans[0];
    assert_eq!(client.span_id, "01");
    assert_eq!(client.trace_id, "abcd");
    assert_eq!(client.parent_id, "09");
    assert_eq!(client.service_name, "frontend");
    assert_eq!(client.operation_name, "call");
    assert_eq!(client.kind, Some(SpanKind::Client));
    assert_eq!(client.start_time, 2.0);
    assert_eq!(client.duration, 0.5);
    assert_eq!(client.tag_text("peer.service").as_deref(), Some("backend"));
    assert_eq!(client.tags.get("retries"), Some(&TagValue::Int(3)));

    let server = &spans[1];
    assert_eq!(server.service_name, "backend");
    assert_eq!(server.kind, Some(SpanKind::Server));

    assert_eq!(spans[2].kind, None);
    assert!(!spans[2].tags.contains_key(SPAN_KIND_TAG));
}

#[test]
fn test_otlp_hop_builds_a_tree() {
    let mut tree = SpanTree::new(spans_from_otlp(&[otlp_request()]));
    let root = build_tree(&mut tree).unwrap();

    assert_eq!(tree[root].service_name, "frontend");
    let server = tree[root].children[0];
    assert_eq!(tree[server].service_name, "backend");
    assert_eq!(tree[server].kind, Some(SpanKind::Server));
    assert_eq!(tree[tree[server].children[0]].operation_name, "query");
}

#[test]
fn test_decompress_if_needed() {
    let plain = RECORDS.as_bytes().to_vec();
    assert_eq!(decompress_if_needed(plain.clone()).unwrap(), plain);
    assert_eq!(decompress_if_needed(gzip(&plain)).unwrap(), plain);
    assert!(decompress_if_needed(vec![0x1f, 0x8b, 0x00]).is_err());
}

#[test]
fn test_parse_trace_bytes() {
    let spans = parse_trace_bytes(RECORDS.as_bytes().to_vec(), TraceFormat::Auto).unwrap();
    assert_eq!(spans.len(), 3);

    let spans = parse_trace_bytes(gzip(RECORDS.as_bytes()), TraceFormat::Records).unwrap();
    assert_eq!(spans.len(), 3);

    assert!(parse_trace_bytes(b"not json".to_vec(), TraceFormat::Auto).is_err());
    assert!(parse_trace_bytes(vec![0xff, 0xfe], TraceFormat::Auto).is_err());
}

#[test]
fn test_load_trace_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&gzip(RECORDS.as_bytes())).unwrap();
    file.flush().unwrap();

    let spans = load_trace_file(file.path(), TraceFormat::Auto).unwrap();
    assert_eq!(spans.len(), 3);

    let missing = file.path().with_extension("missing");
    assert!(load_trace_file(&missing, TraceFormat::Auto).is_err());
}

#[test]
fn test_trace_format_from_str() {
    assert_eq!("auto".parse::<TraceFormat>(), Ok(TraceFormat::Auto));
    assert_eq!("Records".parse::<TraceFormat>(), Ok(TraceFormat::Records));
    assert_eq!("OTLP".parse::<TraceFormat>(), Ok(TraceFormat::Otlp));
    assert!("protobuf".parse::<TraceFormat>().is_err());
}
