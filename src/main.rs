use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use celltrace::catalog::{SpanCatalog, TraceSummary};
use celltrace::ingest::{group_by_trace, load_trace_file, TraceFormat};
use celltrace::persistent::{load_conventions, save_conventions};
use celltrace::types::{stringify_span, time_point_to_utc_string, MILLISECONDS_PER_SECOND};
use celltrace::{
    build_tree, filtered_view, label_span_tree, ComponentFilter, ComponentType,
    ConventionClassifier, NamingConventions, Span, SpanIdx, SpanTree,
};

#[derive(Parser)]
#[command(name = "celltrace")]
#[command(about = "Rebuild and inspect the call tree of a distributed trace", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Trace to use when the file holds more than one
    #[arg(long, global = true)]
    trace_id: Option<String>,

    /// Naming conventions file, defaults to the one in the user's config directory
    #[arg(long, global = true)]
    conventions: Option<PathBuf>,

    /// Input format: auto, records or otlp
    #[arg(long, global = true, default_value = "auto")]
    format: TraceFormat,

    /// Log the progress of every pass
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print the labeled call tree
    Tree {
        file: PathBuf,
        /// Only print spans whose fields or tags contain this text
        #[arg(long)]
        search: Option<String>,
    },
    /// Print the call tree with only the selected component types
    Filter {
        file: PathBuf,
        /// Component types to keep (ISTIO, VICK-SYSTEM, MICROSERVICE)
        #[arg(long, value_delimiter = ',', required = true, value_parser = parse_component_type)]
        show: Vec<ComponentType>,
    },
    /// List the cells, microservices and operations of the trace
    Catalog { file: PathBuf },
    /// Print the root span and span counts per service
    Summary { file: PathBuf },
    /// Print the active naming conventions
    Conventions {
        /// Also store them in the config directory (or the --conventions file)
        #[arg(long)]
        write: bool,
    },
}

fn parse_component_type(text: &str) -> Result<ComponentType, String> {
    ComponentType::parse(text).ok_or_else(|| {
        format!("unknown component type '{text}', expected ISTIO, VICK-SYSTEM or MICROSERVICE")
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let conventions = load_conventions(cli.conventions.as_deref())?;

    match &cli.command {
        Command::Conventions { write } => {
            println!("{}", serde_json::to_string_pretty(&conventions)?);
            if *write {
                let path = save_conventions(&conventions, cli.conventions.as_deref())?;
                println!("Saved to {}", path.display());
            }
        }
        Command::Tree { file, search } => {
            let (tree, root) = load_labeled_tree(&cli, file, &classifier(conventions)?)?;
            match search {
                Some(search) => {
                    let search = search.to_lowercase();
                    print_forest(&tree, &[root], |span| {
                        stringify_span(span).to_lowercase().contains(&search)
                    });
                }
                None => print_forest(&tree, &[root], |_| true),
            }
        }
        Command::Filter { file, show } => {
            let source = SpanTree::new(load_trace(&cli, file)?);
            let filter = ComponentFilter::new(show.iter().copied());
            let view = filtered_view(&source, &filter, &classifier(conventions)?)
                .context("Could not render trace")?;
            print_forest(&view.tree, &view.top_level, |_| true);
            println!(
                "{} of {} spans shown",
                view.visible.len(),
                view.tree.len()
            );
        }
        Command::Catalog { file } => {
            let (tree, root) = load_labeled_tree(&cli, file, &classifier(conventions)?)?;
            let catalog = SpanCatalog::from_tree(&tree, root);
            println!("Cells:");
            for cell in &catalog.cells {
                println!("  {cell}");
            }
            println!("Microservices:");
            for service in &catalog.microservices {
                println!("  {} (cell: {})", service.name, service.cell);
            }
            println!("Operations:");
            for operation in &catalog.operations {
                println!(
                    "  {} (microservice: {}, cell: {})",
                    operation.name, operation.microservice, operation.cell
                );
            }
        }
        Command::Summary { file } => {
            let (tree, root) = load_labeled_tree(&cli, file, &classifier(conventions)?)?;
            let summary = TraceSummary::from_tree(&tree, root);
            println!("Trace {}", summary.trace_id);
            println!(
                "Root: {} {} at {} ({:.3}ms)",
                summary.root_service_name,
                summary.root_operation_name,
                time_point_to_utc_string(summary.root_start_time),
                summary.root_duration * MILLISECONDS_PER_SECOND
            );
            for service in &summary.services {
                println!(
                    "  [{}] {}: {} spans",
                    service.cell_key, service.service_name, service.count
                );
            }
        }
    }

    Ok(())
}

fn classifier(conventions: NamingConventions) -> Result<ConventionClassifier> {
    ConventionClassifier::new(conventions).context("Invalid naming conventions")
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_trace(cli: &Cli, file: &Path) -> Result<Vec<Span>> {
    let spans = load_trace_file(file, cli.format)?;
    let mut traces = group_by_trace(spans);

    match &cli.trace_id {
        Some(trace_id) => traces
            .into_iter()
            .find(|(id, _)| id == trace_id)
            .map(|(_, spans)| spans)
            .ok_or_else(|| anyhow::anyhow!("Trace {trace_id} not found in {}", file.display())),
        None => match traces.len() {
            0 => bail!("No spans found in {}", file.display()),
            1 => Ok(traces.remove(0).1),
            n => bail!(
                "{} contains {n} traces ({}), pick one with --trace-id",
                file.display(),
                traces
                    .iter()
                    .map(|(id, _)| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        },
    }
}

fn load_labeled_tree(
    cli: &Cli,
    file: &Path,
    classifier: &ConventionClassifier,
) -> Result<(SpanTree, SpanIdx)> {
    let mut tree = SpanTree::new(load_trace(cli, file)?);
    let root = build_tree(&mut tree).context("Could not render trace")?;
    label_span_tree(&mut tree, root, classifier);
    Ok((tree, root))
}

fn print_forest(tree: &SpanTree, roots: &[SpanIdx], show: impl Fn(&Span) -> bool) {
    for root in roots {
        tree.walk(
            *root,
            |_, span, depth: &usize| {
                if show(span) {
                    println!("{}{}", "  ".repeat(*depth), describe_span(span));
                }
                depth + 1
            },
            0,
        );
    }
}

fn describe_span(span: &Span) -> String {
    format!(
        "{} {} [{}] {} cell={} start={} duration={:.3}ms",
        span.service_name,
        span.operation_name,
        span.kind.map(|kind| kind.as_str()).unwrap_or("-"),
        span.component_type
            .map(|component_type| component_type.as_str())
            .unwrap_or("-"),
        span.cell.as_ref().map(|cell| cell.name.as_str()).unwrap_or("-"),
        time_point_to_utc_string(span.start_time),
        span.duration * MILLISECONDS_PER_SECOND,
    )
}
