use crate::error::{ConductorError, Result};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Partition components into an ordered sequence of concurrency-safe
/// batches.
///
/// Input is `(id, dependencies)` pairs; an edge `A -> B` means "A depends
/// on B", so B lands in an earlier batch than A. Components within one
/// batch are mutually independent and safe to drive concurrently. With
/// `reverse` set the edges are inverted, producing the teardown order.
///
/// Dependencies naming ids absent from the input are logged and treated as
/// satisfied; they may refer to components already running outside this
/// cohort. A cycle fails with [`ConductorError::CyclicDependency`] naming
/// one offending id, never with a partial ordering.
pub fn resolve_batches(
    components: &[(String, Vec<String>)],
    reverse: bool,
) -> Result<Vec<Vec<String>>> {
    let ids: HashSet<&str> = components.iter().map(|(id, _)| id.as_str()).collect();

    // prerequisites[id] = ids that must be done before id may run
    let mut prerequisites: HashMap<String, HashSet<String>> = components
        .iter()
        .map(|(id, _)| (id.clone(), HashSet::new()))
        .collect();

    for (id, dependencies) in components {
        for dependency in dependencies {
            if !ids.contains(dependency.as_str()) {
                warn!(
                    "Component {} depends on unknown component {}; treating it as satisfied",
                    id, dependency
                );
                continue;
            }
            if reverse {
                if let Some(prereqs) = prerequisites.get_mut(dependency) {
                    prereqs.insert(id.clone());
                }
            } else if let Some(prereqs) = prerequisites.get_mut(id) {
                prereqs.insert(dependency.clone());
            }
        }
    }

    let mut batches: Vec<Vec<String>> = Vec::new();
    let mut done: HashSet<String> = HashSet::new();

    while done.len() < prerequisites.len() {
        let mut batch: Vec<String> = prerequisites
            .iter()
            .filter(|(id, prereqs)| {
                !done.contains(*id) && prereqs.iter().all(|p| done.contains(p))
            })
            .map(|(id, _)| id.clone())
            .collect();

        if batch.is_empty() {
            // No progress: everything still pending sits on a cycle.
            let mut pending: Vec<&String> = prerequisites
                .keys()
                .filter(|id| !done.contains(*id))
                .collect();
            pending.sort();
            let offender = pending
                .first()
                .map(|id| (*id).clone())
                .unwrap_or_default();
            return Err(ConductorError::CyclicDependency { id: offender });
        }

        batch.sort();
        for id in &batch {
            done.insert(id.clone());
        }
        batches.push(batch);
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(graph: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        graph.iter()
            .map(|(id, deps)| {
                (
                    id.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    fn batch_index(batches: &[Vec<String>], id: &str) -> usize {
        batches
            .iter()
            .position(|batch| batch.iter().any(|entry| entry == id))
            .unwrap_or_else(|| panic!("{} missing from batches", id))
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let batches = resolve_batches(&[], false).expect("empty graph should resolve");
        assert!(batches.is_empty());
    }

    #[test]
    fn independent_components_share_batch_zero() {
        let batches =
            resolve_batches(&pairs(&[("a", &[]), ("b", &[]), ("c", &[])]), false).unwrap();
        assert_eq!(batches, vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn linear_chain_orders_one_per_batch() {
        let batches =
            resolve_batches(&pairs(&[("c", &["b"]), ("b", &["a"]), ("a", &[])]), false).unwrap();
        assert_eq!(batches, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn diamond_resolves_middle_concurrently() {
        let input = pairs(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
        ]);
        let batches = resolve_batches(&input, false).unwrap();
        assert_eq!(batches, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn every_id_appears_exactly_once_and_after_its_dependencies() {
        let input = pairs(&[
            ("db", &[]),
            ("cache", &[]),
            ("api", &["db", "cache"]),
            ("worker", &["db"]),
            ("gateway", &["api", "worker"]),
        ]);
        let batches = resolve_batches(&input, false).unwrap();

        let flattened: Vec<&String> = batches.iter().flatten().collect();
        assert_eq!(flattened.len(), input.len());
        let unique: HashSet<&String> = flattened.iter().copied().collect();
        assert_eq!(unique.len(), input.len());

        for (id, deps) in &input {
            for dep in deps {
                assert!(
                    batch_index(&batches, id) > batch_index(&batches, dep),
                    "{} must come after {}",
                    id,
                    dep
                );
            }
        }
    }

    #[test]
    fn reverse_places_dependents_first() {
        let input = pairs(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
        ]);
        let batches = resolve_batches(&input, true).unwrap();
        assert_eq!(batches, vec![vec!["d"], vec!["b", "c"], vec!["a"]]);

        // For every edge A -> B, B's teardown index is not earlier than A's.
        for (id, deps) in &input {
            for dep in deps {
                assert!(batch_index(&batches, dep) >= batch_index(&batches, id));
            }
        }
    }

    #[test]
    fn cycle_is_rejected() {
        let result = resolve_batches(&pairs(&[("a", &["b"]), ("b", &["a"])]), false);
        match result {
            Err(ConductorError::CyclicDependency { id }) => {
                assert!(id == "a" || id == "b");
            }
            other => panic!("expected cyclic dependency error, got {:?}", other),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let result = resolve_batches(&pairs(&[("a", &["a"])]), false);
        assert!(matches!(
            result,
            Err(ConductorError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn unknown_dependency_is_treated_as_satisfied() {
        let batches =
            resolve_batches(&pairs(&[("a", &["ghost"]), ("b", &["a"])]), false).unwrap();
        assert_eq!(batches, vec![vec!["a"], vec!["b"]]);
    }
}
