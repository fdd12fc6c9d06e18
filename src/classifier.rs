//! Classification of spans into platform components and cells.
//! The naming conventions differ between platform releases, so the tree labeler only talks to the
//! [`ComponentClassifier`] trait. [`ConventionClassifier`] is the rule-table implementation used
//! by default, its table ([`NamingConventions`]) is plain serde data that can be loaded from disk.

use regex::Regex;

use crate::types::{Cell, Span};

/// Predicates used to label spans. Implementations must be deterministic for a given span.
pub trait ComponentClassifier {
    fn is_istio_system_component(&self, span: &Span) -> bool;

    fn is_vick_system_component(&self, span: &Span) -> bool;

    fn is_cell_gateway(&self, span: &Span) -> bool;

    /// The cell a gateway span belongs to, read from the span's own tags/service name.
    /// Only called for spans accepted by [`ComponentClassifier::is_cell_gateway`].
    fn gateway_cell(&self, span: &Span) -> Option<Cell>;
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MatchCondition {
    pub operator: MatchOperator,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MatchOperator {
    /// Always matches
    Any,
    /// Never matches
    None,
    /// Matches if the value is equal to the given string
    EqualTo,
    /// Matches if the value is not equal to the given string
    NotEqualTo,
    /// Matches if the value contains the given substring
    Contains,
    /// Matches if the value starts with the given prefix
    StartsWith,
    /// Matches if the given regular expression finds a match in the value
    Regex,
}

impl MatchCondition {
    pub fn any() -> MatchCondition {
        MatchCondition {
            operator: MatchOperator::Any,
            value: String::new(),
        }
    }

    pub fn equal_to(value: &str) -> MatchCondition {
        MatchCondition {
            operator: MatchOperator::EqualTo,
            value: value.to_string(),
        }
    }

    pub fn starts_with(value: &str) -> MatchCondition {
        MatchCondition {
            operator: MatchOperator::StartsWith,
            value: value.to_string(),
        }
    }

    pub fn contains(value: &str) -> MatchCondition {
        MatchCondition {
            operator: MatchOperator::Contains,
            value: value.to_string(),
        }
    }

    pub fn regex(value: &str) -> MatchCondition {
        MatchCondition {
            operator: MatchOperator::Regex,
            value: value.to_string(),
        }
    }
}

/// Which part of a span a [`ServiceRule`] looks at.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RuleField {
    ServiceName,
    /// Text of the named tag. Spans without the tag never match.
    Tag(String),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServiceRule {
    pub field: RuleField,
    pub condition: MatchCondition,
}

impl ServiceRule {
    pub fn service_name(condition: MatchCondition) -> ServiceRule {
        ServiceRule {
            field: RuleField::ServiceName,
            condition,
        }
    }
}

/// The rule table behind [`ConventionClassifier`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NamingConventions {
    /// A span matching any of these rules comes from an Istio system component.
    pub istio_rules: Vec<ServiceRule>,
    /// A span matching any of these rules comes from a VICK system component.
    pub vick_system_rules: Vec<ServiceRule>,
    /// Service names of cell gateways. Must contain a `cell` capture group. Labeling a tree
    /// again only keeps the gateway cells if the pattern also matches the relabeled
    /// `<cell>-cell-gateway` names.
    pub cell_gateway_pattern: String,
    /// Tag naming the cell of a gateway span. Preferred over the `cell` capture group.
    pub cell_tag: String,
}

impl Default for NamingConventions {
    fn default() -> Self {
        NamingConventions {
            istio_rules: vec![ServiceRule::service_name(MatchCondition::starts_with(
                "istio-",
            ))],
            vick_system_rules: vec![
                ServiceRule::service_name(MatchCondition::equal_to("global-gateway")),
                ServiceRule::service_name(MatchCondition::starts_with("vick-system")),
                ServiceRule::service_name(MatchCondition::contains("--sts")),
            ],
            cell_gateway_pattern:
                r"^(?P<cell>[a-z0-9](?:[-a-z0-9]*[a-z0-9])?)(?:--gateway-(?:service|deployment)|-cell-gateway)$"
                    .to_string(),
            cell_tag: "cell".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Plain(MatchCondition),
    Regex(Regex),
}

impl Matcher {
    fn new(condition: &MatchCondition) -> Result<Matcher, regex::Error> {
        match condition.operator {
            MatchOperator::Regex => Ok(Matcher::Regex(Regex::new(&condition.value)?)),
            _ => Ok(Matcher::Plain(condition.clone())),
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Regex(regex) => regex.is_match(value),
            Matcher::Plain(condition) => match condition.operator {
                MatchOperator::Any => true,
                MatchOperator::None => false,
                MatchOperator::EqualTo => value == condition.value,
                MatchOperator::NotEqualTo => value != condition.value,
                MatchOperator::Contains => value.contains(condition.value.as_str()),
                MatchOperator::StartsWith => value.starts_with(condition.value.as_str()),
                MatchOperator::Regex => unreachable!("regex conditions are compiled"),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    field: RuleField,
    matcher: Matcher,
}

impl CompiledRule {
    fn matches(&self, span: &Span) -> bool {
        match &self.field {
            RuleField::ServiceName => self.matcher.matches(&span.service_name),
            RuleField::Tag(key) => span
                .tag_text(key)
                .is_some_and(|text| self.matcher.matches(&text)),
        }
    }
}

fn compile_rules(rules: &[ServiceRule]) -> Result<Vec<CompiledRule>, regex::Error> {
    rules
        .iter()
        .map(|rule| {
            Ok(CompiledRule {
                field: rule.field.clone(),
                matcher: Matcher::new(&rule.condition)?,
            })
        })
        .collect()
}

/// [`ComponentClassifier`] driven by a [`NamingConventions`] table.
#[derive(Debug, Clone)]
pub struct ConventionClassifier {
    conventions: NamingConventions,
    istio_rules: Vec<CompiledRule>,
    vick_system_rules: Vec<CompiledRule>,
    cell_gateway: Regex,
}

impl ConventionClassifier {
    pub fn new(conventions: NamingConventions) -> Result<ConventionClassifier, regex::Error> {
        Ok(ConventionClassifier {
            istio_rules: compile_rules(&conventions.istio_rules)?,
            vick_system_rules: compile_rules(&conventions.vick_system_rules)?,
            cell_gateway: Regex::new(&conventions.cell_gateway_pattern)?,
            conventions,
        })
    }

    pub fn conventions(&self) -> &NamingConventions {
        &self.conventions
    }
}

impl Default for ConventionClassifier {
    fn default() -> Self {
        ConventionClassifier::new(NamingConventions::default())
            .expect("default naming conventions are valid")
    }
}

impl ComponentClassifier for ConventionClassifier {
    fn is_istio_system_component(&self, span: &Span) -> bool {
        self.istio_rules.iter().any(|rule| rule.matches(span))
    }

    fn is_vick_system_component(&self, span: &Span) -> bool {
        self.vick_system_rules.iter().any(|rule| rule.matches(span))
    }

    fn is_cell_gateway(&self, span: &Span) -> bool {
        self.cell_gateway.is_match(&span.service_name)
    }

    fn gateway_cell(&self, span: &Span) -> Option<Cell> {
        if let Some(name) = span
            .tag_text(&self.conventions.cell_tag)
            .filter(|name| !name.is_empty())
        {
            return Some(Cell::new(name));
        }
        self.cell_gateway
            .captures(&span.service_name)
            .and_then(|captures| captures.name("cell"))
            .map(|cell| Cell::new(cell.as_str()))
    }
}
