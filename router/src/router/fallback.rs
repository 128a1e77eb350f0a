//! Fallback chains for unavailable backends.
//!
//! Each backend has an ordered chain of alternatives, optionally replaced
//! for a specific task type. `resolve_fallback` is a single hop and returns
//! the head of the applicable chain; the dispatcher walks whole chains.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{BackendId, TaskType};

/// Task-specific chain that replaces a backend's default chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFallback {
    pub backend: BackendId,
    pub task: TaskType,
    pub chain: Vec<BackendId>,
}

/// A fallback walk that returns to a backend it already visited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainCycle {
    pub task: TaskType,
    /// Backends in walk order; the last entry repeats an earlier one
    pub path: Vec<BackendId>,
}

impl std::fmt::Display for ChainCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path: Vec<String> = self.path.iter().map(|b| b.to_string()).collect();
        write!(f, "{}: {}", self.task, path.join(" -> "))
    }
}

/// Backend → ordered alternatives, with per-task overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackTable {
    chains: BTreeMap<BackendId, Vec<BackendId>>,
    task_chains: BTreeMap<(BackendId, TaskType), Vec<BackendId>>,
}

impl FallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in chains. Everything degrades toward the hosted LLM, which is
    /// the end of every chain.
    pub fn default_table() -> Self {
        Self::new()
            .chain(BackendId::AnalysisModel, vec![BackendId::HostedLlm])
            .chain(
                BackendId::ClassifierModel,
                vec![BackendId::AnalysisModel, BackendId::HostedLlm],
            )
            .chain(BackendId::VisionModel, vec![BackendId::HostedLlm])
            // Image tasks skip the analysis model, which has no vision capability
            .task_chain(
                BackendId::ClassifierModel,
                TaskType::ImageAnalysis,
                vec![BackendId::VisionModel, BackendId::HostedLlm],
            )
    }

    /// Build from configuration maps
    pub fn from_parts(
        chains: BTreeMap<BackendId, Vec<BackendId>>,
        task_chains: impl IntoIterator<Item = TaskFallback>,
    ) -> Self {
        let mut table = Self {
            chains,
            task_chains: BTreeMap::new(),
        };
        for tf in task_chains {
            table.task_chains.insert((tf.backend, tf.task), tf.chain);
        }
        table
    }

    pub fn chain(mut self, backend: BackendId, alternatives: Vec<BackendId>) -> Self {
        self.chains.insert(backend, alternatives);
        self
    }

    pub fn task_chain(
        mut self,
        backend: BackendId,
        task: TaskType,
        alternatives: Vec<BackendId>,
    ) -> Self {
        self.task_chains.insert((backend, task), alternatives);
        self
    }

    /// The chain that applies to `backend` for `task`
    pub fn chain_for(&self, backend: BackendId, task: TaskType) -> &[BackendId] {
        self.task_chains
            .get(&(backend, task))
            .or_else(|| self.chains.get(&backend))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Head of the applicable chain, or `None` if it is empty or missing
    pub fn resolve_fallback(&self, backend: BackendId, task: TaskType) -> Option<BackendId> {
        self.chain_for(backend, task).first().copied()
    }

    /// First cycle reachable by walking chains depth-first, if any
    pub fn find_cycle(&self) -> Option<ChainCycle> {
        for &task in TaskType::all() {
            for &start in BackendId::all() {
                let mut path = vec![start];
                if let Some(path) = self.cycle_from(task, &mut path) {
                    return Some(ChainCycle { task, path });
                }
            }
        }
        None
    }

    fn cycle_from(&self, task: TaskType, path: &mut Vec<BackendId>) -> Option<Vec<BackendId>> {
        let current = *path.last()?;
        for &next in self.chain_for(current, task) {
            if path.contains(&next) {
                let mut cycle = path.clone();
                cycle.push(next);
                return Some(cycle);
            }
            path.push(next);
            if let Some(cycle) = self.cycle_from(task, path) {
                return Some(cycle);
            }
            path.pop();
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty() && self.task_chains.is_empty()
    }
}

/// Looks up fallbacks in a [`FallbackTable`]
#[derive(Debug, Clone, Default)]
pub struct FallbackResolver {
    table: FallbackTable,
}

impl FallbackResolver {
    pub fn new(table: FallbackTable) -> Self {
        Self { table }
    }

    pub fn resolve_fallback(&self, backend: BackendId, task: TaskType) -> Option<BackendId> {
        self.table.resolve_fallback(backend, task)
    }

    /// Full ordered chain that applies to `backend` for `task`
    pub fn chain(&self, backend: BackendId, task: TaskType) -> &[BackendId] {
        self.table.chain_for(backend, task)
    }

    pub fn table(&self) -> &FallbackTable {
        &self.table
    }
}
