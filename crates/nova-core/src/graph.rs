//! Dependency-order resolution over a project's component graph.
//!
//! The traversal walks each dependency branch depth-first, carrying the
//! names seen on that branch so a revisit is reported as a cycle. Each
//! dependency yields a chain (its own transitive dependencies followed by
//! itself). Chains are merged shortest-first; every chain is moved to the
//! front of the result, removing earlier occurrences of its names. The
//! order is deterministic for a fixed graph and declaration order.

use crate::error::GraphError;

/// Read access to component dependencies.
pub trait ComponentGraph {
    /// Dependency names of `component`, or `None` if it does not exist.
    fn dependencies_of(&self, component: &str) -> Option<&[String]>;
}

/// Returns `root` and all its transitive dependencies, each exactly once,
/// with every dependency before its dependents and `root` last.
pub fn resolve<G>(graph: &G, root: &str) -> Result<Vec<String>, GraphError>
where
    G: ComponentGraph + ?Sized,
{
    let mut order = walk(graph, Vec::new(), root, Vec::new(), None)?;
    order.push(root.to_string());
    Ok(order)
}

/// Dependencies of `root` in deploy order, excluding `root` itself.
pub fn resolve_dependencies<G>(graph: &G, root: &str) -> Result<Vec<String>, GraphError>
where
    G: ComponentGraph + ?Sized,
{
    let mut order = resolve(graph, root)?;
    order.pop();
    Ok(order)
}

fn walk<G>(
    graph: &G,
    mut result: Vec<String>,
    name: &str,
    mut branch: Vec<String>,
    required_by: Option<&str>,
) -> Result<Vec<String>, GraphError>
where
    G: ComponentGraph + ?Sized,
{
    if let Some(start) = branch.iter().position(|seen| seen == name) {
        let mut cycle = branch.split_off(start);
        cycle.push(name.to_string());
        return Err(GraphError::Cycle { cycle });
    }
    branch.push(name.to_string());

    let dependencies =
        graph
            .dependencies_of(name)
            .ok_or_else(|| GraphError::ComponentNotFound {
                name: name.to_string(),
                required_by: required_by.map(str::to_string),
            })?;

    let mut chains = dependencies
        .iter()
        .map(|dep| walk(graph, vec![dep.clone()], dep, branch.clone(), Some(name)))
        .collect::<Result<Vec<_>, _>>()?;

    // Stable, so equal-length chains keep declaration order.
    chains.sort_by_key(Vec::len);

    for chain in chains {
        for component in chain.into_iter().rev() {
            result.retain(|existing| *existing != component);
            result.insert(0, component);
        }
    }

    Ok(result)
}
