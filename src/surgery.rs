//! Operations on an already built tree: flattening it for display, tearing it down before a
//! rebuild and cutting single spans out of it for filtered views.

use crate::span_tree::SpanTree;
use crate::types::SpanIdx;

/// Spans of the tree in pre-order, children in attachment order.
pub fn get_ordered_list(tree: &SpanTree, root: SpanIdx) -> Vec<SpanIdx> {
    let mut ordered = Vec::with_capacity(tree.len());
    tree.walk(root, |idx, _, _: &()| ordered.push(idx), ());
    ordered
}

/// Pre-order of several top level spans, one after another.
pub fn get_ordered_forest(tree: &SpanTree, roots: &[SpanIdx]) -> Vec<SpanIdx> {
    roots
        .iter()
        .flat_map(|root| get_ordered_list(tree, *root))
        .collect()
}

/// Drops every parent, child and sibling reference, leaving a flat list of spans that can be
/// built again.
pub fn reset_tree_span_references(tree: &mut SpanTree) {
    let indices: Vec<SpanIdx> = tree.indices().collect();
    for idx in indices {
        tree.reset_span_references(idx);
    }
}

/// Removes `span` from the tree without disconnecting anything below it.
///
/// The children of `span` take its place among its parent's children, in their current order. If
/// `span` has no parent its children become top level spans, picking a new root is up to the
/// caller. The sibling of `span` forgets about it, `span` itself keeps its `sibling`.
pub fn remove_span_from_tree(tree: &mut SpanTree, span: SpanIdx) {
    let parent = tree[span].parent.take();
    let children = std::mem::take(&mut tree[span].children);

    for child in &children {
        tree[*child].parent = parent;
    }

    if let Some(parent) = parent {
        let siblings = &mut tree[parent].children;
        let position = siblings
            .iter()
            .position(|child| *child == span)
            .unwrap_or_else(|| {
                panic!("span {span} is missing from the children of its parent {parent}")
            });
        let tail = siblings.split_off(position + 1);
        siblings.pop();
        siblings.extend(children);
        siblings.extend(tail);
    }

    if let Some(sibling) = tree[span].sibling {
        if tree[sibling].sibling == Some(span) {
            tree[sibling].sibling = None;
        }
    }

    tracing::trace!(%span, "Removed span from tree");
}

/// Spans without a parent, in input order.
pub fn top_level_spans(tree: &SpanTree, spans: &[SpanIdx]) -> Vec<SpanIdx> {
    spans
        .iter()
        .copied()
        .filter(|idx| tree[*idx].parent.is_none())
        .collect()
}
