//! Summaries of a labeled tree, used to populate search pickers and trace result rows.

use std::collections::BTreeMap;

use crate::span_tree::SpanTree;
use crate::surgery::get_ordered_list;
use crate::types::{ComponentType, SpanIdx, TimePoint};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Microservice {
    pub name: String,
    pub cell: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Operation {
    pub name: String,
    pub microservice: String,
    pub cell: String,
}

/// Cells, microservices and operations seen in a trace, in the order they are first met.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SpanCatalog {
    pub cells: Vec<String>,
    pub microservices: Vec<Microservice>,
    pub operations: Vec<Operation>,
}

impl SpanCatalog {
    /// Only spans which belong to a cell are listed. Names are unique per list.
    pub fn from_tree(tree: &SpanTree, root: SpanIdx) -> SpanCatalog {
        let mut catalog = SpanCatalog::default();
        for idx in get_ordered_list(tree, root) {
            let span = &tree[idx];
            let Some(cell) = &span.cell else {
                continue;
            };

            if !catalog.cells.contains(&cell.name) {
                catalog.cells.push(cell.name.clone());
            }
            if !catalog
                .microservices
                .iter()
                .any(|service| service.name == span.service_name)
            {
                catalog.microservices.push(Microservice {
                    name: span.service_name.clone(),
                    cell: cell.name.clone(),
                });
            }
            if !catalog
                .operations
                .iter()
                .any(|operation| operation.name == span.operation_name)
            {
                catalog.operations.push(Operation {
                    name: span.operation_name.clone(),
                    microservice: span.service_name.clone(),
                    cell: cell.name.clone(),
                });
            }
        }
        catalog
    }
}

/// What a service's spans are grouped under in a trace summary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum CellKey {
    Vick,
    Istio,
    Cell(String),
    /// Microservice spans that were not reached by any cell gateway.
    NoCell,
}

impl std::fmt::Display for CellKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellKey::Vick => write!(f, "VICK"),
            CellKey::Istio => write!(f, "ISTIO"),
            CellKey::Cell(name) => write!(f, "{name}"),
            CellKey::NoCell => write!(f, "-"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ServiceCount {
    pub cell_key: CellKey,
    pub service_name: String,
    pub count: usize,
}

/// One row of a trace search result.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub root_service_name: String,
    pub root_operation_name: String,
    pub root_start_time: TimePoint,
    pub root_duration: f64,
    /// Sorted by cell key, then service name.
    pub services: Vec<ServiceCount>,
}

impl TraceSummary {
    pub fn from_tree(tree: &SpanTree, root: SpanIdx) -> TraceSummary {
        let mut counts: BTreeMap<(CellKey, String), usize> = BTreeMap::new();
        for idx in get_ordered_list(tree, root) {
            let span = &tree[idx];
            let cell_key = match (span.component_type, &span.cell) {
                (Some(ComponentType::VickSystem), _) => CellKey::Vick,
                (Some(ComponentType::Istio), _) => CellKey::Istio,
                (_, Some(cell)) => CellKey::Cell(cell.name.clone()),
                (_, None) => CellKey::NoCell,
            };
            *counts
                .entry((cell_key, span.service_name.clone()))
                .or_default() += 1;
        }

        let root_span = &tree[root];
        TraceSummary {
            trace_id: root_span.trace_id.clone(),
            root_service_name: root_span.service_name.clone(),
            root_operation_name: root_span.operation_name.clone(),
            root_start_time: root_span.start_time,
            root_duration: root_span.duration,
            services: counts
                .into_iter()
                .map(|((cell_key, service_name), count)| ServiceCount {
                    cell_key,
                    service_name,
                    count,
                })
                .collect(),
        }
    }
}
