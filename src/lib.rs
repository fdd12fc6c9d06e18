pub mod builder;
pub mod catalog;
pub mod classifier;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod labeler;
pub mod persistent;
pub mod span_tree;
pub mod surgery;
pub mod task_timer;
pub mod types;

pub use builder::build_tree;
pub use classifier::{ComponentClassifier, ConventionClassifier, NamingConventions};
pub use error::TreeError;
pub use filter::{filtered_view, ComponentFilter, FilteredView};
pub use labeler::label_span_tree;
pub use span_tree::SpanTree;
pub use surgery::{get_ordered_list, remove_span_from_tree, reset_tree_span_references};
pub use types::{Cell, ComponentType, Span, SpanIdx, SpanKind, TimePoint};
