//! Component type filters for timeline views.
//! A filtered view is built from a fresh copy of the trace, so the source spans are never touched
//! and the same trace can be re-filtered any number of times.

use crate::builder::build_tree;
use crate::classifier::ComponentClassifier;
use crate::error::Result;
use crate::labeler::label_span_tree;
use crate::span_tree::SpanTree;
use crate::surgery::{get_ordered_forest, remove_span_from_tree, top_level_spans};
use crate::types::{ComponentType, SpanIdx};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ComponentFilter {
    pub name: String,
    /// Spans of these component types stay in the view.
    pub selected: Vec<ComponentType>,
}

impl Default for ComponentFilter {
    fn default() -> Self {
        ComponentFilter::show_all()
    }
}

impl ComponentFilter {
    pub fn show_all() -> ComponentFilter {
        ComponentFilter {
            name: "Show all".to_string(),
            selected: ComponentType::ALL.to_vec(),
        }
    }

    pub fn microservices_only() -> ComponentFilter {
        ComponentFilter {
            name: "Microservices only".to_string(),
            selected: vec![ComponentType::Microservice],
        }
    }

    pub fn hide_istio() -> ComponentFilter {
        ComponentFilter {
            name: "Hide Istio".to_string(),
            selected: vec![ComponentType::VickSystem, ComponentType::Microservice],
        }
    }

    pub fn new(selected: impl IntoIterator<Item = ComponentType>) -> ComponentFilter {
        let mut filter = ComponentFilter {
            name: "Custom".to_string(),
            selected: Vec::new(),
        };
        for component_type in selected {
            if !filter.selected.contains(&component_type) {
                filter.selected.push(component_type);
            }
        }
        filter
    }

    /// Spans that were never labeled are kept.
    pub fn should_show(&self, component_type: Option<ComponentType>) -> bool {
        match component_type {
            Some(component_type) => self.selected.contains(&component_type),
            None => true,
        }
    }
}

pub fn builtin_filters() -> Vec<ComponentFilter> {
    vec![
        ComponentFilter::show_all(),
        ComponentFilter::hide_istio(),
        ComponentFilter::microservices_only(),
    ]
}

/// A labeled copy of a trace with the filtered out spans cut from the tree.
#[derive(Debug, Clone)]
pub struct FilteredView {
    pub tree: SpanTree,
    /// Root of the full tree, it may have been filtered out.
    pub root: SpanIdx,
    /// Spans that passed the filter, in input order.
    pub visible: Vec<SpanIdx>,
    /// Visible spans which lost all their visible ancestors.
    pub top_level: Vec<SpanIdx>,
}

impl FilteredView {
    /// Visible spans in tree order.
    pub fn ordered_list(&self) -> Vec<SpanIdx> {
        get_ordered_forest(&self.tree, &self.top_level)
    }
}

/// Clones `source`, builds and labels the copy (unless every span is already labeled), then
/// removes every span the filter rejects.
pub fn filtered_view(
    source: &SpanTree,
    filter: &ComponentFilter,
    classifier: &dyn ComponentClassifier,
) -> Result<FilteredView> {
    let mut tree = source.shallow_clone();
    let root = build_tree(&mut tree)?;
    // Labels survive the shallow clone, a labeled source keeps its cells and gateway names.
    if tree.spans().iter().any(|span| span.component_type.is_none()) {
        label_span_tree(&mut tree, root, classifier);
    }

    let mut visible = Vec::new();
    let indices: Vec<SpanIdx> = tree.indices().collect();
    for idx in indices {
        if filter.should_show(tree[idx].component_type) {
            visible.push(idx);
        } else {
            remove_span_from_tree(&mut tree, idx);
        }
    }

    let top_level = top_level_spans(&tree, &visible);
    tracing::debug!(
        filter = %filter.name,
        visible = visible.len(),
        removed = tree.len() - visible.len(),
        "Applied component filter"
    );

    Ok(FilteredView {
        tree,
        root,
        visible,
        top_level,
    })
}
