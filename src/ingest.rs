//! Turning fetched trace data into [`Span`]s.
//!
//! Two inputs are understood:
//! - flat span records, as returned by the tracing query endpoint (a JSON array of objects with
//!   `spanId`, `traceId`, `parentId`, `serviceName`, ... fields, times in milliseconds),
//! - OTLP `ExportTraceServiceRequest`s serialized to JSON.
//!
//! Both can be gzip compressed.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::trace::v1::span::SpanKind as OtlpSpanKind;

use crate::task_timer::TaskTimer;
use crate::types::{
    time_point_from_unix_millis, time_point_from_unix_nano, value_to_text, Span, SpanKind,
    TagValue, MILLISECONDS_PER_SECOND, SPAN_KIND_TAG,
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceFormat {
    /// Decide from the content.
    #[default]
    Auto,
    Records,
    Otlp,
}

impl FromStr for TraceFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(TraceFormat::Auto),
            "records" => Ok(TraceFormat::Records),
            "otlp" => Ok(TraceFormat::Otlp),
            other => Err(format!(
                "unknown trace format '{other}', expected one of: auto, records, otlp"
            )),
        }
    }
}

/// Tags of a span record, some endpoints send them as an encoded JSON object.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
enum RawTags {
    Map(BTreeMap<String, TagValue>),
    Encoded(String),
}

impl Default for RawTags {
    fn default() -> Self {
        RawTags::Map(BTreeMap::new())
    }
}

/// A span as returned by the tracing query endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanRecord {
    pub span_id: String,
    pub trace_id: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub operation_name: String,
    /// Milliseconds since epoch
    #[serde(default)]
    pub start_time: f64,
    /// Milliseconds
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    tags: RawTags,
    #[serde(default)]
    pub kind: Option<String>,
}

impl SpanRecord {
    pub fn into_span(self) -> Result<Span> {
        let tags = match self.tags {
            RawTags::Map(tags) => tags,
            RawTags::Encoded(text) if text.trim().is_empty() => BTreeMap::new(),
            RawTags::Encoded(text) => serde_json::from_str(&text)
                .with_context(|| format!("Invalid tags of span {}", self.span_id))?,
        };

        let mut span = Span::new(self.span_id, self.trace_id, self.parent_id);
        span.service_name = self.service_name;
        span.operation_name = self.operation_name;
        span.start_time = time_point_from_unix_millis(self.start_time);
        span.duration = self.duration / MILLISECONDS_PER_SECOND;
        span.tags = tags;

        let kind = self
            .kind
            .as_deref()
            .or_else(|| match span.tags.get(SPAN_KIND_TAG) {
                Some(TagValue::String(kind)) => Some(kind.as_str()),
                _ => None,
            })
            .and_then(SpanKind::parse);
        if let Some(kind) = kind {
            span.set_kind(kind);
        }
        Ok(span)
    }
}

pub fn parse_span_records(json: &str) -> Result<Vec<Span>> {
    let records: Vec<SpanRecord> =
        serde_json::from_str(json).context("Failed to parse span records")?;
    records.into_iter().map(SpanRecord::into_span).collect()
}

/// Accepts either a JSON array of requests or a single request.
pub fn parse_otlp_requests(json: &str) -> Result<Vec<ExportTraceServiceRequest>> {
    let value: serde_json::Value = serde_json::from_str(json).context("File is not valid JSON")?;
    let requests = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(requests)
}

pub fn spans_from_otlp(requests: &[ExportTraceServiceRequest]) -> Vec<Span> {
    let t = TaskTimer::new("Extracting spans");

    let mut spans = Vec::new();
    for request in requests {
        for rs in &request.resource_spans {
            let service_name = rs
                .resource
                .as_ref()
                .and_then(|resource| {
                    resource
                        .attributes
                        .iter()
                        .find(|attribute| attribute.key == "service.name")
                })
                .and_then(|attribute| attribute.value.as_ref())
                .and_then(|value| match &value.value {
                    Some(Value::StringValue(service_name)) => Some(service_name.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| "unknown".to_string());

            for ss in &rs.scope_spans {
                for otlp_span in &ss.spans {
                    let mut span = Span::new(
                        hex::encode(&otlp_span.span_id),
                        hex::encode(&otlp_span.trace_id),
                        hex::encode(&otlp_span.parent_span_id),
                    );
                    span.service_name = service_name.clone();
                    span.operation_name = otlp_span.name.clone();
                    span.start_time = time_point_from_unix_nano(otlp_span.start_time_unix_nano);
                    span.duration = time_point_from_unix_nano(
                        otlp_span
                            .end_time_unix_nano
                            .saturating_sub(otlp_span.start_time_unix_nano),
                    );
                    for attribute in &otlp_span.attributes {
                        if let Some(value) = attribute.value.as_ref().and_then(|v| v.value.as_ref())
                        {
                            span.tags
                                .insert(attribute.key.clone(), otlp_value_to_tag(value));
                        }
                    }

                    if otlp_span.kind == OtlpSpanKind::Client as i32 {
                        span.set_kind(SpanKind::Client);
                    } else if otlp_span.kind == OtlpSpanKind::Server as i32 {
                        span.set_kind(SpanKind::Server);
                    }
                    spans.push(span);
                }
            }
        }
    }

    t.stop();
    spans
}

fn otlp_value_to_tag(value: &Value) -> TagValue {
    match value {
        Value::StringValue(s) => TagValue::String(s.clone()),
        Value::BoolValue(b) => TagValue::Bool(*b),
        Value::IntValue(i) => TagValue::Int(*i),
        Value::DoubleValue(d) => TagValue::Double(*d),
        Value::ArrayValue(a) => TagValue::String(format!(
            "[{}]",
            a.values
                .iter()
                .filter_map(|v| v.value.as_ref())
                .map(|v| value_to_text(&otlp_value_to_tag(v)))
                .collect::<Vec<_>>()
                .join(", ")
        )),
        Value::KvlistValue(kv) => TagValue::String(format!(
            "{{{}}}",
            kv.values
                .iter()
                .map(|v| format!(
                    "{}: {}",
                    v.key,
                    v.value
                        .as_ref()
                        .and_then(|value| value.value.as_ref())
                        .map(|value| value_to_text(&otlp_value_to_tag(value)))
                        .unwrap_or_else(|| "empty".to_string())
                ))
                .collect::<Vec<_>>()
                .join(", ")
        )),
        Value::BytesValue(b) => TagValue::String(hex::encode(b)),
    }
}

/// Inflates gzip data, other data is returned as is.
pub fn decompress_if_needed(bytes: Vec<u8>) -> Result<Vec<u8>> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes);
    }
    let mut decompressed = Vec::new();
    flate2::read::GzDecoder::new(bytes.as_slice())
        .read_to_end(&mut decompressed)
        .context("Failed to decompress gzip data")?;
    Ok(decompressed)
}

fn looks_like_otlp(value: &serde_json::Value) -> bool {
    let request = match value {
        serde_json::Value::Array(items) => items.first(),
        other => Some(other),
    };
    request
        .and_then(|request| request.as_object())
        .is_some_and(|object| {
            object.contains_key("resourceSpans") || object.contains_key("resource_spans")
        })
}

pub fn parse_trace_bytes(bytes: Vec<u8>, format: TraceFormat) -> Result<Vec<Span>> {
    let t = TaskTimer::new("Parsing trace file");

    let bytes = decompress_if_needed(bytes)?;
    let text = std::str::from_utf8(&bytes).map_err(|e| anyhow::anyhow!("File is not UTF8!: {}", e))?;

    let format = match format {
        TraceFormat::Auto => {
            let value: serde_json::Value =
                serde_json::from_str(text).context("File is not valid JSON")?;
            if looks_like_otlp(&value) {
                TraceFormat::Otlp
            } else {
                TraceFormat::Records
            }
        }
        format => format,
    };

    let spans = match format {
        TraceFormat::Otlp => spans_from_otlp(&parse_otlp_requests(text)?),
        _ => parse_span_records(text)?,
    };

    t.stop();
    Ok(spans)
}

pub fn load_trace_file(path: &Path, format: TraceFormat) -> Result<Vec<Span>> {
    let mut file_bytes = Vec::new();
    std::fs::File::open(path)
        .and_then(|mut file| file.read_to_end(&mut file_bytes))
        .with_context(|| format!("Failed to read {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = file_bytes.len(), "Loaded trace file");
    parse_trace_bytes(file_bytes, format)
}

/// Splits spans of several traces into one list per trace, keeping the input order.
pub fn group_by_trace(spans: Vec<Span>) -> Vec<(String, Vec<Span>)> {
    let mut traces: Vec<(String, Vec<Span>)> = Vec::new();
    for span in spans {
        match traces
            .iter_mut()
            .find(|(trace_id, _)| *trace_id == span.trace_id)
        {
            Some((_, trace_spans)) => trace_spans.push(span),
            None => traces.push((span.trace_id.clone(), vec![span])),
        }
    }
    traces
}
