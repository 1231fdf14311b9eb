// src/chain.rs

//! Chain resolution: expanding declared follow-up links into derived tasks.
//!
//! A chain link names a successor task; when the predecessor completes
//! successfully the successor is enqueued with the link's effective
//! options. A link may override the successor's options and nested chain;
//! absent fields inherit the successor's own declaration, which is what
//! lets "A chains B, B chains C" expand without restating C on A's link.

use std::collections::BTreeMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ChainLink, Task, TaskSpec};

/// Hard cap on expansion depth, a backstop behind the cycle check.
pub const MAX_CHAIN_DEPTH: usize = 64;

/// Expand every spec's links into resolved task trees.
///
/// Resolution problems accumulate; the result is `Err` when any occurred,
/// and the generation must then be rejected.
pub fn resolve_all(
    specs: &BTreeMap<String, TaskSpec>,
) -> Result<BTreeMap<String, Arc<Task>>, Vec<String>> {
    let mut errors = Vec::new();

    check_cycles(specs, &mut errors);
    if !errors.is_empty() {
        // A cyclic spec map cannot be expanded; report the cycles alone.
        return Err(errors);
    }

    let mut tasks = BTreeMap::new();
    for (name, spec) in specs {
        let chain = resolve_links(&spec.name, &spec.links, specs, 0, &mut errors);
        let task = Task::assemble(spec, spec.options.clone(), spec.schedule.clone(), chain);
        tasks.insert(name.clone(), Arc::new(task));
    }

    if errors.is_empty() { Ok(tasks) } else { Err(errors) }
}

fn resolve_links(
    parent: &str,
    links: &[ChainLink],
    specs: &BTreeMap<String, TaskSpec>,
    depth: usize,
    errors: &mut Vec<String>,
) -> Vec<Arc<Task>> {
    if depth >= MAX_CHAIN_DEPTH {
        errors.push(format!(
            "chain depth limit ({MAX_CHAIN_DEPTH}) exceeded under task '{parent}'"
        ));
        return Vec::new();
    }

    let mut resolved = Vec::with_capacity(links.len());
    for link in links {
        let Some(spec) = specs.get(&link.task) else {
            errors.push(format!(
                "chained task '{}' for '{}' not found",
                link.task, parent
            ));
            continue;
        };

        let effective_links = link.chain.as_deref().unwrap_or(&spec.links);
        let nested = resolve_links(&spec.name, effective_links, specs, depth + 1, errors);

        let options = link.options.clone().unwrap_or_else(|| spec.options.clone());

        // Derived instances never fire on their own schedule.
        let task = Task::assemble(spec, options, None, nested);
        resolved.push(Arc::new(task));
    }
    resolved
}

/// A link without an explicit nested chain inherits its target's own
/// links; that inheritance is the only way expansion can recurse. The
/// graph of "declaring task -> inheriting link target" edges must
/// therefore be acyclic.
fn check_cycles(specs: &BTreeMap<String, TaskSpec>, errors: &mut Vec<String>) {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in specs.keys() {
        graph.add_node(name.as_str());
    }

    for (name, spec) in specs {
        for target in inheriting_targets(&spec.links) {
            if target == name {
                // Self-reference is the degenerate cycle; keep it out of
                // the graph and report it directly.
                errors.push(format!(
                    "cycle detected in task chains involving task '{name}'"
                ));
            } else if specs.contains_key(target) {
                graph.add_edge(name.as_str(), target, ());
            }
        }
    }

    // A topological sort fails exactly when a cycle remains.
    if let Err(cycle) = toposort(&graph, None) {
        errors.push(format!(
            "cycle detected in task chains involving task '{}'",
            cycle.node_id()
        ));
    }
}

/// Link targets anywhere in a literal link tree whose expansion would
/// consult the target's own declaration.
fn inheriting_targets(links: &[ChainLink]) -> Vec<&str> {
    let mut out = Vec::new();
    for link in links {
        match &link.chain {
            None => out.push(link.task.as_str()),
            Some(nested) => out.extend(inheriting_targets(nested)),
        }
    }
    out
}
