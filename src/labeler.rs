use crate::classifier::ComponentClassifier;
use crate::span_tree::SpanTree;
use crate::types::{Cell, ComponentType, SpanIdx};

/// Assigns `component_type` and `cell` to every span reachable from `root`.
///
/// Cells flow from the top of the tree down. A cell gateway span starts a new cell (and is
/// renamed to `<cell>-cell-gateway`), other spans inherit the cell of their closest ancestor.
/// Istio spans never get a cell, but they pass the inherited one on to their children.
pub fn label_span_tree(tree: &mut SpanTree, root: SpanIdx, classifier: &dyn ComponentClassifier) {
    tree.walk_mut(
        root,
        |span, inherited_cell: &Option<Cell>| {
            span.component_type = Some(if span.is_from_istio_system_component(classifier) {
                ComponentType::Istio
            } else if span.is_from_vick_system_component(classifier) {
                ComponentType::VickSystem
            } else {
                ComponentType::Microservice
            });

            if span.is_from_cell_gateway(classifier) {
                span.cell = span.get_cell(classifier);
                if let Some(cell) = &span.cell {
                    span.service_name = cell.gateway_service_name();
                }
                span.cell.clone()
            } else if span.component_type != Some(ComponentType::Istio) {
                span.cell = inherited_cell.clone();
                span.cell.clone()
            } else {
                span.cell = None;
                inherited_cell.clone()
            }
        },
        None,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ConventionClassifier;
    use crate::types::Span;

    #[test]
    fn labels_a_single_span() {
        let mut span = Span::new("a", "a", "a");
        span.service_name = "hr--gateway-service".to_string();
        let mut tree = SpanTree::new(vec![span]);

        label_span_tree(&mut tree, SpanIdx(0), &ConventionClassifier::default());

        let span = &tree[SpanIdx(0)];
        assert_eq!(span.component_type, Some(ComponentType::Microservice));
        assert_eq!(span.cell, Some(Cell::new("hr")));
        assert_eq!(span.service_name, "hr-cell-gateway");
    }
}
