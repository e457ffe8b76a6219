//! Dependency-ordered batch planning.
//!
//! Formatters declare `before = "<name>"` edges. The planner validates
//! the resulting graph and partitions it into waves: formatters within a
//! wave are independent and may run concurrently, while every formatter
//! appears in a strictly later wave than all of its predecessors.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::formatter::Formatter;
use crate::error::PlanError;
use crate::Result;

/// The ordered wave sequence for one run.
#[derive(Debug)]
pub struct Plan {
    /// Waves in execution order. Within a wave, formatters are sorted by
    /// `(priority, name)` for deterministic spawn order.
    pub waves: Vec<Vec<Arc<Formatter>>>,
}

impl Plan {
    /// Total number of formatters across all waves.
    #[must_use]
    pub fn formatter_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// True when no formatter survived planning.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// `(name, signature)` pairs for cache bookkeeping.
    #[must_use]
    pub fn signatures(&self) -> Vec<(String, String)> {
        self.waves
            .iter()
            .flatten()
            .map(|f| (f.name.clone(), f.signature.clone()))
            .collect()
    }

    /// All formatters in wave order.
    pub fn formatters(&self) -> impl Iterator<Item = &Arc<Formatter>> {
        self.waves.iter().flatten()
    }

    /// Digest over the active formatter set, used for cache invalidation.
    #[must_use]
    pub fn global_signature(&self) -> String {
        super::formatter::global_signature(self.formatters().map(AsRef::as_ref))
    }
}

/// Partition formatters into dependency waves.
///
/// With a restriction list, formatters outside the list are dropped
/// before graph construction; a surviving `before` edge that points at a
/// dropped formatter is an error, the same as an edge to an undeclared
/// one.
///
/// # Errors
///
/// - `PlanError::UnknownFormatter` for a restriction naming no declared
///   formatter
/// - `PlanError::UnknownBefore` for a dangling `before` edge
/// - `PlanError::Cycle` when the `before` graph is cyclic
pub fn plan(formatters: Vec<Formatter>, restrict: Option<&[String]>) -> Result<Plan> {
    let mut formatters = formatters;

    if let Some(names) = restrict {
        let declared: HashSet<&str> = formatters.iter().map(|f| f.name.as_str()).collect();
        for name in names {
            if !declared.contains(name.as_str()) {
                return Err(PlanError::UnknownFormatter(name.clone()).into());
            }
        }
        let keep: HashSet<&str> = names.iter().map(String::as_str).collect();
        formatters.retain(|f| keep.contains(f.name.as_str()));
    }

    let index: BTreeMap<&str, usize> = formatters
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.as_str(), i))
        .collect();

    // each formatter has at most one outgoing edge: itself -> before target
    let mut successor: Vec<Option<usize>> = vec![None; formatters.len()];
    for (i, formatter) in formatters.iter().enumerate() {
        if let Some(before) = &formatter.before {
            match index.get(before.as_str()) {
                Some(&target) => successor[i] = Some(target),
                None => {
                    return Err(PlanError::UnknownBefore {
                        formatter: formatter.name.clone(),
                        before: before.clone(),
                    }
                    .into())
                }
            }
        }
    }

    detect_cycle(&formatters, &successor)?;

    // Kahn's algorithm over waves
    let mut indegree = vec![0_usize; formatters.len()];
    for target in successor.iter().flatten() {
        indegree[*target] += 1;
    }

    let formatters: Vec<Arc<Formatter>> = formatters.into_iter().map(Arc::new).collect();
    let mut remaining: Vec<usize> = (0..formatters.len()).collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<usize>, Vec<usize>) =
            remaining.iter().copied().partition(|&i| indegree[i] == 0);
        debug_assert!(!ready.is_empty(), "cycle slipped past detection");

        for &i in &ready {
            if let Some(target) = successor[i] {
                indegree[target] -= 1;
            }
        }

        let mut wave: Vec<Arc<Formatter>> =
            ready.iter().map(|&i| Arc::clone(&formatters[i])).collect();
        wave.sort_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)));
        waves.push(wave);

        remaining = blocked;
    }

    Ok(Plan { waves })
}

/// Walk the single-successor chains, reporting the first cycle found.
fn detect_cycle(formatters: &[Formatter], successor: &[Option<usize>]) -> Result<()> {
    const UNVISITED: u8 = 0;
    const IN_PROGRESS: u8 = 1;
    const DONE: u8 = 2;

    let mut state = vec![UNVISITED; formatters.len()];

    for start in 0..formatters.len() {
        if state[start] != UNVISITED {
            continue;
        }

        let mut path = Vec::new();
        let mut current = start;
        loop {
            if state[current] == DONE {
                break;
            }
            if state[current] == IN_PROGRESS {
                let entry = path
                    .iter()
                    .position(|&i| i == current)
                    .unwrap_or_default();
                let mut cycle: Vec<String> = path[entry..]
                    .iter()
                    .map(|&i: &usize| formatters[i].name.clone())
                    .collect();
                cycle.push(formatters[current].name.clone());
                return Err(PlanError::Cycle { cycle }.into());
            }

            state[current] = IN_PROGRESS;
            path.push(current);
            match successor[current] {
                Some(next) => current = next,
                None => break,
            }
        }

        for &i in &path {
            state[i] = DONE;
        }
    }

    Ok(())
}
