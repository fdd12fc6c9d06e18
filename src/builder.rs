//! Reconstruction of the call tree from the flat span list of one trace.
//!
//! [`build_tree`] runs the passes below in order. They are public so that callers (and tests) can
//! re-run a single pass on an already built tree, each of them is idempotent.
//! - [`find_root`]: elect the root span, pairing two sibling root candidates if needed.
//! - [`classify_siblings`]: mark the two halves of every shared span id as CLIENT and SERVER.
//! - [`link_span_references`]: connect parents and children.
//! - [`compute_tree_depths`]: assign `tree_depth` from the root down.

use std::collections::HashSet;

use crate::error::{Result, TreeError};
use crate::span_tree::{is_client_of_pair, SpanTree};
use crate::task_timer::TaskTimer;
use crate::types::{SpanIdx, SpanKind};

/// Builds the tree in place and returns the root span.
///
/// Fails before any kind, link or depth is written if the root can't be determined or a pair of
/// spans sharing an id claims the same kind for both halves.
pub fn build_tree(tree: &mut SpanTree) -> Result<SpanIdx> {
    let t = TaskTimer::new("Building span tree");

    let root = find_root(tree)?;
    check_sibling_kinds(tree)?;
    classify_siblings(tree);
    link_span_references(tree);
    compute_tree_depths(tree, root);

    t.stop();
    Ok(root)
}

/// Root candidates are spans whose id is the trace id, or whose parent isn't part of the trace.
pub fn root_candidates(tree: &SpanTree) -> Vec<SpanIdx> {
    let span_ids: HashSet<&str> = tree
        .spans()
        .iter()
        .map(|span| span.span_id.as_str())
        .collect();
    tree.iter()
        .filter(|(_, span)| {
            span.span_id == span.trace_id || !span_ids.contains(span.parent_id.as_str())
        })
        .map(|(idx, _)| idx)
        .collect()
}

/// Finds the root of the trace.
///
/// A trace has either a single root candidate, or two candidates forming the client and server
/// halves of the first hop. In the latter case the client half is the root and both halves get
/// their `sibling` set.
pub fn find_root(tree: &mut SpanTree) -> Result<SpanIdx> {
    let candidates = root_candidates(tree);
    tracing::debug!(
        spans = tree.len(),
        candidates = candidates.len(),
        "Resolving root span"
    );

    match candidates.as_slice() {
        [] => {
            tracing::warn!(spans = tree.len(), "Trace has no root span candidate");
            Err(TreeError::NoRoot)
        }
        [root] => Ok(*root),
        [first, second] => {
            let (first, second) = (*first, *second);
            if !tree.is_sibling_of(first, second) {
                tracing::warn!(
                    first = %tree[first].span_id,
                    second = %tree[second].span_id,
                    "Two root span candidates which are not siblings"
                );
                return Err(invalid_sibling_root(tree, first, second));
            }

            let root = if tree.is_parent_of(first, second) {
                first
            } else if tree.is_parent_of(second, first) {
                second
            } else if tree[first].kind.is_none() && tree[second].kind.is_none() {
                // Unclassified halves that started at the same time, the sibling classification
                // makes the later one in input order the client.
                second
            } else {
                tracing::warn!(
                    span_id = %tree[first].span_id,
                    kind = ?tree[first].kind,
                    "Sibling root span candidates have the same kind"
                );
                return Err(invalid_sibling_root(tree, first, second));
            };

            tree[first].sibling = Some(second);
            tree[second].sibling = Some(first);
            Ok(root)
        }
        _ => {
            tracing::warn!(candidates = candidates.len(), "Ambiguous root span");
            Err(TreeError::AmbiguousRoot {
                candidates: candidates.len(),
            })
        }
    }
}

fn invalid_sibling_root(tree: &SpanTree, first: SpanIdx, second: SpanIdx) -> TreeError {
    TreeError::InvalidSiblingRoot {
        first: tree[first].span_id.clone(),
        second: tree[second].span_id.clone(),
    }
}

/// Both halves of a pair arriving with the same kind can't be linked to each other, nor can
/// the work below them, so such traces are rejected.
pub fn check_sibling_kinds(tree: &SpanTree) -> Result<()> {
    for (span_idx, span) in tree.iter() {
        let Some(kind) = span.kind else {
            continue;
        };
        let conflict = tree
            .indices()
            .filter(|&other| tree.is_sibling_of(span_idx, other))
            .any(|other| tree[other].kind == Some(kind));
        if conflict {
            tracing::warn!(
                span_id = %span.span_id,
                ?kind,
                "Both halves of a span pair have the same kind"
            );
            return Err(TreeError::ConflictingSiblingKinds {
                span_id: span.span_id.clone(),
                kind,
            });
        }
    }
    Ok(())
}

/// Pairs up spans sharing a span id and makes sure one of them is the CLIENT and the other one
/// the SERVER. Kinds that are already set are never overwritten. Spans without a partner lose
/// their kind (and the `span.kind` tag), a kind only makes sense for one half of a pair.
pub fn classify_siblings(tree: &mut SpanTree) {
    let indices: Vec<SpanIdx> = tree.indices().collect();
    let mut classified = 0;

    for &span_idx in &indices {
        // The last other span with the same id is the partner.
        let sibling_idx = indices
            .iter()
            .rev()
            .copied()
            .find(|&other| tree.is_sibling_of(span_idx, other));

        let Some(sibling_idx) = sibling_idx else {
            tree[span_idx].unset_kind();
            continue;
        };

        tree[span_idx].sibling = Some(sibling_idx);
        if tree[span_idx].kind.is_some() && tree[sibling_idx].kind.is_some() {
            continue;
        }

        classified += 1;
        let (span_kind, sibling_kind) =
            if is_client_of_pair(&tree[span_idx], &tree[sibling_idx]) {
                (SpanKind::Client, SpanKind::Server)
            } else {
                (SpanKind::Server, SpanKind::Client)
            };
        if tree[span_idx].kind.is_none() {
            tree[span_idx].set_kind(span_kind);
        }
        if tree[sibling_idx].kind.is_none() {
            tree[sibling_idx].set_kind(sibling_kind);
        }
    }

    tracing::debug!(classified, "Classified sibling spans");
}

/// Tries every ordered pair of spans and attaches the second under the first where it belongs.
/// Quadratic, traces are small enough for this to not matter.
pub fn link_span_references(tree: &mut SpanTree) {
    let indices: Vec<SpanIdx> = tree.indices().collect();
    let mut edges = 0;
    for &i in &indices {
        for &j in &indices {
            if i != j && tree.add_span_reference(i, j) {
                edges += 1;
            }
        }
    }
    tracing::debug!(edges, "Linked span references");
}

pub fn compute_tree_depths(tree: &mut SpanTree, root: SpanIdx) {
    tree.walk_mut(
        root,
        |span, depth: &usize| {
            span.tree_depth = *depth;
            depth + 1
        },
        0,
    );
}
