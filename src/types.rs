use std::collections::BTreeMap;
use std::fmt;

use crate::classifier::ComponentClassifier;

/// Seconds since epoch
pub type TimePoint = f64;

pub const MILLISECONDS_PER_SECOND: f64 = 1000.0;

/// Tag under which the client/server role of a span is mirrored.
pub const SPAN_KIND_TAG: &str = "span.kind";

pub fn time_point_from_unix_nano(unix_nano: u64) -> TimePoint {
    unix_nano as f64 / 1_000_000_000.0
}

pub fn time_point_from_unix_millis(unix_millis: f64) -> TimePoint {
    unix_millis / MILLISECONDS_PER_SECOND
}

pub fn time_point_to_utc_string(time: TimePoint) -> String {
    let date_time = chrono::DateTime::from_timestamp_nanos((time * 1e9) as i64);
    date_time.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Handle of a span inside a [`crate::span_tree::SpanTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpanIdx(pub usize);

impl fmt::Display for SpanIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanKind {
    Client,
    Server,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Client => "CLIENT",
            SpanKind::Server => "SERVER",
        }
    }

    pub fn parse(text: &str) -> Option<SpanKind> {
        match text.to_ascii_uppercase().as_str() {
            "CLIENT" => Some(SpanKind::Client),
            "SERVER" => Some(SpanKind::Server),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ComponentType {
    #[serde(rename = "ISTIO")]
    Istio,
    #[serde(rename = "VICK-SYSTEM")]
    VickSystem,
    #[serde(rename = "MICROSERVICE")]
    Microservice,
}

impl ComponentType {
    pub const ALL: [ComponentType; 3] = [
        ComponentType::Istio,
        ComponentType::VickSystem,
        ComponentType::Microservice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Istio => "ISTIO",
            ComponentType::VickSystem => "VICK-SYSTEM",
            ComponentType::Microservice => "MICROSERVICE",
        }
    }

    pub fn parse(text: &str) -> Option<ComponentType> {
        ComponentType::ALL
            .into_iter()
            .find(|component_type| component_type.as_str().eq_ignore_ascii_case(text))
    }
}

/// Logical grouping of microservices behind one gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Cell {
    pub name: String,
}

impl Cell {
    pub fn new(name: impl Into<String>) -> Cell {
        Cell { name: name.into() }
    }

    pub fn gateway_service_name(&self) -> String {
        format!("{}-cell-gateway", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::String(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::String(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

pub fn value_to_text(value: &TagValue) -> String {
    match value {
        TagValue::String(s) => s.clone(),
        TagValue::Bool(b) => b.to_string(),
        TagValue::Int(i) => i.to_string(),
        TagValue::Double(d) => d.to_string(),
    }
}

/// One tracing event plus the tree relations derived for it.
///
/// Identity and timing fields come from the fetched record and are never touched by the tree
/// operations. `kind`, `component_type`, `cell` and `service_name` are rewritten by the builder
/// and the labeler, `parent`, `children`, `sibling` and `tree_depth` are owned by the builder and
/// the surgery operations.
#[derive(Debug, Clone)]
pub struct Span {
    pub span_id: String,
    pub trace_id: String,
    pub parent_id: String,
    pub service_name: String,
    pub operation_name: String,
    pub start_time: TimePoint,
    /// In seconds
    pub duration: f64,
    pub tags: BTreeMap<String, TagValue>,

    pub kind: Option<SpanKind>,
    pub component_type: Option<ComponentType>,
    pub cell: Option<Cell>,

    pub parent: Option<SpanIdx>,
    pub children: Vec<SpanIdx>,
    pub sibling: Option<SpanIdx>,
    pub tree_depth: usize,
}

impl Span {
    pub fn new(
        span_id: impl Into<String>,
        trace_id: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Span {
        Span {
            span_id: span_id.into(),
            trace_id: trace_id.into(),
            parent_id: parent_id.into(),
            service_name: String::new(),
            operation_name: String::new(),
            start_time: 0.0,
            duration: 0.0,
            tags: BTreeMap::new(),
            kind: None,
            component_type: None,
            cell: None,
            parent: None,
            children: Vec::new(),
            sibling: None,
            tree_depth: 0,
        }
    }

    pub fn end_time(&self) -> TimePoint {
        self.start_time + self.duration
    }

    /// A copy with the same identity, timing, tags and classification, but no tree relations.
    pub fn shallow_clone(&self) -> Span {
        Span {
            parent: None,
            children: Vec::new(),
            sibling: None,
            tree_depth: 0,
            ..self.clone()
        }
    }

    /// Clears `parent`, `children` and `sibling` of this span only.
    pub fn reset_span_references(&mut self) {
        self.parent = None;
        self.children.clear();
        self.sibling = None;
    }

    pub fn set_kind(&mut self, kind: SpanKind) {
        self.kind = Some(kind);
        self.tags
            .insert(SPAN_KIND_TAG.to_string(), TagValue::from(kind.as_str()));
    }

    pub fn unset_kind(&mut self) {
        self.kind = None;
        self.tags.remove(SPAN_KIND_TAG);
    }

    pub fn tag_text(&self, key: &str) -> Option<String> {
        self.tags.get(key).map(value_to_text)
    }

    pub fn is_from_istio_system_component(&self, classifier: &dyn ComponentClassifier) -> bool {
        classifier.is_istio_system_component(self)
    }

    pub fn is_from_vick_system_component(&self, classifier: &dyn ComponentClassifier) -> bool {
        classifier.is_vick_system_component(self)
    }

    pub fn is_from_cell_gateway(&self, classifier: &dyn ComponentClassifier) -> bool {
        classifier.is_cell_gateway(self)
    }

    /// The cell defined by this span, `None` unless it is a cell gateway span.
    /// Cells of other spans are inherited from their ancestors by the labeler.
    pub fn get_cell(&self, classifier: &dyn ComponentClassifier) -> Option<Cell> {
        if self.is_from_cell_gateway(classifier) {
            classifier.gateway_cell(self)
        } else {
            None
        }
    }
}

/// Convert span to a string that can be used for text-based search/filtering etc.
/// Not necessarily human readable.
pub fn stringify_span(span: &Span) -> String {
    format!(
        "Span {{\n span_id: {}\n, trace_id: {}\n, parent_id: {}\n, service_name: {}\n, operation_name: {}\n, start_time: {}\n, duration: {}\n, kind: {:?}\n, component_type: {:?}\n, cell: {:?}\n, tags: {}\n",
        span.span_id,
        span.trace_id,
        span.parent_id,
        span.service_name,
        span.operation_name,
        time_point_to_utc_string(span.start_time),
        span.duration,
        span.kind.map(|kind| kind.as_str()),
        span.component_type.map(|component_type| component_type.as_str()),
        span.cell.as_ref().map(|cell| cell.name.as_str()),
        stringify_tags(&span.tags),
    )
}

pub fn stringify_tags(tags: &BTreeMap<String, TagValue>) -> String {
    let mut s = "{".to_string();
    for (key, value) in tags {
        s.push_str(&format!("\n {} = {},", key, value_to_text(value)));
    }
    s.push('}');
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_mirrored_in_tags() {
        let mut span = Span::new("a", "t", "p");
        span.set_kind(SpanKind::Client);
        assert_eq!(span.tag_text(SPAN_KIND_TAG).as_deref(), Some("CLIENT"));

        span.unset_kind();
        assert_eq!(span.kind, None);
        assert!(span.tags.is_empty());
    }

    #[test]
    fn component_type_names() {
        for component_type in ComponentType::ALL {
            assert_eq!(ComponentType::parse(component_type.as_str()), Some(component_type));
        }
        assert_eq!(ComponentType::parse("vick-system"), Some(ComponentType::VickSystem));
        assert_eq!(ComponentType::parse("gateway"), None);
    }

    #[test]
    fn stringified_span_contains_tags() {
        let mut span = Span::new("a", "t", "p");
        span.service_name = "hr--employee-service".to_string();
        span.tags.insert("http.status_code".to_string(), TagValue::Int(503));
        span.cell = Some(Cell::new("hr"));

        let text = stringify_span(&span);
        assert!(text.contains("hr--employee-service"));
        assert!(text.contains("http.status_code = 503"));
        assert!(text.contains("\"hr\""));
    }
}
