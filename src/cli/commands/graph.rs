use serde_json::json;

use crate::cli::utils::{output_error, output_success};
use crate::cli::OutputFormat;
use crate::schema::{registry, DependencyGraph};

/// Prints every entity with its parents and the children that block disabling it.
pub fn handle_graph(output_format: OutputFormat) -> anyhow::Result<()> {
    let graph = DependencyGraph::from_registry()?;

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
        OutputFormat::Text => {
            for kind in graph.kinds() {
                let spec = kind.spec();
                println!("{} (/{})", kind, spec.collection);
                for relation in graph.parents(kind) {
                    let optional = if relation.optional { ", optional" } else { "" };
                    println!("  parent  {} via {}{}", relation.parent, relation.column, optional);
                }
                for relation in graph.children(kind) {
                    match relation.blocks_when {
                        Some((column, value)) => println!(
                            "  child   {} via {} (blocks when {} = {})",
                            relation.child, relation.column, column, value
                        ),
                        None => println!("  child   {} via {}", relation.child, relation.column),
                    }
                }
            }
        }
    }
    Ok(())
}

pub fn handle_check(output_format: OutputFormat) -> anyhow::Result<()> {
    match DependencyGraph::from_registry() {
        Ok(graph) => {
            if let Some(route) = registry::THROUGH_ROUTES.iter().find(|r| graph.through(r).is_none()) {
                let message = format!("{} cannot reach {} through {}", route.parent, route.child, route.via);
                output_error(output_format, &message, Some("INVALID_GRAPH"))?;
                anyhow::bail!(message);
            }
            output_success(
                output_format,
                &format!("Dependency graph is valid ({} entities)", graph.kinds().count()),
                Some(json!({ "entities": registry::all().len(), "through_routes": registry::THROUGH_ROUTES.len() })),
            )
        }
        Err(e) => {
            output_error(output_format, &e.to_string(), Some("INVALID_GRAPH"))?;
            Err(e.into())
        }
    }
}
