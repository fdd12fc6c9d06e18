//! Arena holding every span of one trace.
//! Spans refer to each other through [`SpanIdx`] handles, which keeps the parent/child/sibling
//! graph free of reference cycles. Indexing with a handle from another tree is a logic error and
//! panics.

use std::ops::{Index, IndexMut};
use std::rc::Rc;

use crate::types::{Span, SpanIdx, SpanKind};

#[derive(Debug, Clone, Default)]
pub struct SpanTree {
    spans: Vec<Span>,
}

impl SpanTree {
    pub fn new(spans: Vec<Span>) -> SpanTree {
        SpanTree { spans }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Handles of all spans, in input order.
    pub fn indices(&self) -> impl Iterator<Item = SpanIdx> {
        (0..self.spans.len()).map(SpanIdx)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SpanIdx, &Span)> {
        self.spans.iter().enumerate().map(|(i, span)| (SpanIdx(i), span))
    }

    /// Handles of all spans with the given span id.
    pub fn find_by_span_id(&self, span_id: &str) -> Vec<SpanIdx> {
        self.iter()
            .filter(|(_, span)| span.span_id == span_id)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// True if both spans share a span id but are different spans.
    pub fn is_sibling_of(&self, a: SpanIdx, b: SpanIdx) -> bool {
        a != b && self[a].span_id == self[b].span_id
    }

    /// True if `a` should own `b` as a child.
    ///
    /// For two halves of one RPC hop the CLIENT half owns the SERVER half. While a pair is still
    /// unclassified the half that the sibling classification would mark as CLIENT is the parent.
    /// Otherwise `a` owns `b` when `b.parent_id` names `a`, unless `a` is the CLIENT half of a
    /// pair (the work done under a hop hangs off its SERVER half) or `b` is the SERVER half of a
    /// pair (it hangs off its CLIENT half).
    pub fn is_parent_of(&self, a: SpanIdx, b: SpanIdx) -> bool {
        if a == b {
            return false;
        }
        let (span, other) = (&self[a], &self[b]);
        if self.is_sibling_of(a, b) {
            match (span.kind, other.kind) {
                (Some(kind), Some(other_kind)) => {
                    kind == SpanKind::Client && other_kind == SpanKind::Server
                }
                _ => is_client_of_pair(span, other),
            }
        } else {
            other.parent_id == span.span_id
                && span.kind != Some(SpanKind::Client)
                && other.kind != Some(SpanKind::Server)
        }
    }

    /// Attaches `b` as a child of `a` if `a` is its parent (see [`SpanTree::is_parent_of`]).
    /// A span keeps the first parent it was attached to. Returns whether a new edge was added.
    pub fn add_span_reference(&mut self, a: SpanIdx, b: SpanIdx) -> bool {
        if !self.is_parent_of(a, b) {
            return false;
        }
        match self[b].parent {
            Some(parent) if parent == a => {
                // Keep `children` consistent if only the back-reference survived.
                if !self[a].children.contains(&b) {
                    self[a].children.push(b);
                    return true;
                }
                false
            }
            Some(_) => false,
            None => {
                self.attach_child(a, b);
                true
            }
        }
    }

    /// Appends `child` to `parent`'s children and points `child` back at `parent`.
    pub fn attach_child(&mut self, parent: SpanIdx, child: SpanIdx) {
        if !self[parent].children.contains(&child) {
            self[parent].children.push(child);
        }
        self[child].parent = Some(parent);
    }

    /// Pre-order depth first traversal from `root`.
    ///
    /// `visit` gets each span and the value returned by its parent's visit (`initial` for the
    /// root). The value it returns is handed to every one of the span's children. Children are
    /// visited in attachment order, a span reachable twice is only visited the first time.
    pub fn walk<T, F>(&self, root: SpanIdx, mut visit: F, initial: T)
    where
        F: FnMut(SpanIdx, &Span, &T) -> T,
    {
        let mut visited = vec![false; self.spans.len()];
        let mut stack = vec![(root, Rc::new(initial))];
        while let Some((idx, data)) = stack.pop() {
            if std::mem::replace(&mut visited[idx.0], true) {
                continue;
            }
            let span = &self[idx];
            let next = Rc::new(visit(idx, span, &data));
            for child in span.children.iter().rev() {
                stack.push((*child, next.clone()));
            }
        }
    }

    /// Same as [`SpanTree::walk`], but the visitor may modify the spans it visits.
    /// Children are read after the visit of their parent returns.
    pub fn walk_mut<T, F>(&mut self, root: SpanIdx, mut visit: F, initial: T)
    where
        F: FnMut(&mut Span, &T) -> T,
    {
        let mut visited = vec![false; self.spans.len()];
        let mut stack = vec![(root, Rc::new(initial))];
        while let Some((idx, data)) = stack.pop() {
            if std::mem::replace(&mut visited[idx.0], true) {
                continue;
            }
            let next = Rc::new(visit(&mut self[idx], &data));
            for child in self[idx].children.iter().rev() {
                stack.push((*child, next.clone()));
            }
        }
    }

    /// Independent copy of every span, without any tree relations.
    pub fn shallow_clone(&self) -> SpanTree {
        SpanTree::new(self.spans.iter().map(Span::shallow_clone).collect())
    }

    pub fn reset_span_references(&mut self, idx: SpanIdx) {
        self[idx].reset_span_references();
    }
}

impl Index<SpanIdx> for SpanTree {
    type Output = Span;

    fn index(&self, idx: SpanIdx) -> &Span {
        &self.spans[idx.0]
    }
}

impl IndexMut<SpanIdx> for SpanTree {
    fn index_mut(&mut self, idx: SpanIdx) -> &mut Span {
        &mut self.spans[idx.0]
    }
}

impl FromIterator<Span> for SpanTree {
    fn from_iter<I: IntoIterator<Item = Span>>(iter: I) -> Self {
        SpanTree::new(iter.into_iter().collect())
    }
}

/// Whether `span` is the CLIENT half of the pair it forms with `sibling`.
/// A kind that is already known decides first, otherwise the span that started strictly earlier
/// is the client.
pub(crate) fn is_client_of_pair(span: &Span, sibling: &Span) -> bool {
    match (span.kind, sibling.kind) {
        (Some(SpanKind::Client), _) | (_, Some(SpanKind::Server)) => true,
        (Some(SpanKind::Server), _) | (_, Some(SpanKind::Client)) => false,
        (None, None) => span.start_time < sibling.start_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(span_id: &str, parent_id: &str) -> Span {
        Span::new(span_id, "t", parent_id)
    }

    #[test]
    fn walk_broadcasts_the_parent_value_to_every_child() {
        let mut tree = SpanTree::new(vec![span("a", "a"), span("b", "a"), span("c", "a")]);
        tree.attach_child(SpanIdx(0), SpanIdx(1));
        tree.attach_child(SpanIdx(0), SpanIdx(2));

        let mut seen = Vec::new();
        tree.walk(
            SpanIdx(0),
            |idx, _, depth: &usize| {
                seen.push((idx, *depth));
                depth + 1
            },
            0,
        );
        assert_eq!(
            seen,
            vec![(SpanIdx(0), 0), (SpanIdx(1), 1), (SpanIdx(2), 1)]
        );
    }

    #[test]
    fn walk_terminates_on_cycles() {
        let mut tree = SpanTree::new(vec![span("a", "b"), span("b", "a")]);
        tree[SpanIdx(0)].children.push(SpanIdx(1));
        tree[SpanIdx(1)].children.push(SpanIdx(0));

        let mut count = 0;
        tree.walk(SpanIdx(0), |_, _, _: &()| count += 1, ());
        assert_eq!(count, 2);
    }

    #[test]
    fn client_half_owns_server_half() {
        let mut tree = SpanTree::new(vec![span("x", "p"), span("x", "p")]);
        tree[SpanIdx(0)].kind = Some(SpanKind::Server);
        tree[SpanIdx(1)].kind = Some(SpanKind::Client);
        assert!(tree.is_sibling_of(SpanIdx(0), SpanIdx(1)));
        assert!(tree.is_parent_of(SpanIdx(1), SpanIdx(0)));
        assert!(!tree.is_parent_of(SpanIdx(0), SpanIdx(1)));
    }

    #[test]
    fn children_of_a_hop_attach_to_the_server_half() {
        let mut tree = SpanTree::new(vec![span("x", "p"), span("x", "p"), span("y", "x")]);
        tree[SpanIdx(0)].kind = Some(SpanKind::Client);
        tree[SpanIdx(1)].kind = Some(SpanKind::Server);

        assert!(!tree.add_span_reference(SpanIdx(0), SpanIdx(2)));
        assert!(tree.add_span_reference(SpanIdx(1), SpanIdx(2)));
        assert!(!tree.add_span_reference(SpanIdx(1), SpanIdx(2)));
        assert_eq!(tree[SpanIdx(1)].children, vec![SpanIdx(2)]);
        assert_eq!(tree[SpanIdx(2)].parent, Some(SpanIdx(1)));
    }

    #[test]
    fn shallow_clone_drops_relations() {
        let mut tree = SpanTree::new(vec![span("a", "a"), span("b", "a")]);
        tree.attach_child(SpanIdx(0), SpanIdx(1));
        tree[SpanIdx(1)].tree_depth = 1;

        let clone = tree.shallow_clone();
        assert_eq!(clone.len(), 2);
        assert!(clone[SpanIdx(0)].children.is_empty());
        assert_eq!(clone[SpanIdx(1)].parent, None);
        assert_eq!(clone[SpanIdx(1)].tree_depth, 0);
        assert_eq!(clone[SpanIdx(1)].span_id, "b");
        assert_eq!(tree[SpanIdx(0)].children, vec![SpanIdx(1)]);
    }
}
