//! Backend selection rules
//!
//! Maps a classified task to its primary backend. Selection never fails:
//! a task with no rule goes to the default backend with a warning.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::types::{AiRequest, BackendId, DispatchOptions, TaskType};

/// Backend used when a task type has no rule
pub const DEFAULT_BACKEND: BackendId = BackendId::HostedLlm;

/// Criteria that move a task off its primary backend.
///
/// All set criteria must hold; an override with no criteria always matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionOverride {
    pub backend: BackendId,
    /// Minimum content size in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_content_chars: Option<usize>,
    /// Minimum caller-declared complexity (1-5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_complexity: Option<u8>,
}

impl SelectionOverride {
    pub fn matches(&self, request: &AiRequest, options: &DispatchOptions) -> bool {
        if let Some(min) = self.min_content_chars {
            if request.content_chars() < min {
                return false;
            }
        }
        if let Some(min) = self.min_complexity {
            if options.complexity.unwrap_or(0) < min {
                return false;
            }
        }
        true
    }
}

/// Primary backend for one task type plus ordered overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRule {
    pub primary: BackendId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<SelectionOverride>,
}

impl SelectionRule {
    pub fn new(primary: BackendId) -> Self {
        Self {
            primary,
            overrides: Vec::new(),
        }
    }

    pub fn with_override(mut self, rule: SelectionOverride) -> Self {
        self.overrides.push(rule);
        self
    }
}

/// Task type → selection rule
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionTable {
    rules: BTreeMap<TaskType, SelectionRule>,
}

impl SelectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in assignment of tasks to backends
    pub fn default_table() -> Self {
        Self::new()
            .rule(
                TaskType::ContentAnalysis,
                SelectionRule::new(BackendId::AnalysisModel).with_override(SelectionOverride {
                    backend: BackendId::HostedLlm,
                    min_content_chars: Some(16_000),
                    min_complexity: None,
                }),
            )
            .rule(
                TaskType::Classification,
                SelectionRule::new(BackendId::ClassifierModel),
            )
            .rule(
                TaskType::RelationshipDetection,
                SelectionRule::new(BackendId::AnalysisModel).with_override(SelectionOverride {
                    backend: BackendId::HostedLlm,
                    min_content_chars: None,
                    min_complexity: Some(4),
                }),
            )
            .rule(TaskType::ImageAnalysis, SelectionRule::new(BackendId::VisionModel))
            .rule(TaskType::CreativeGeneration, SelectionRule::new(BackendId::HostedLlm))
    }

    pub fn rule(mut self, task: TaskType, rule: SelectionRule) -> Self {
        self.rules.insert(task, rule);
        self
    }

    pub fn insert(&mut self, task: TaskType, rule: SelectionRule) {
        self.rules.insert(task, rule);
    }

    pub fn get(&self, task: TaskType) -> Option<&SelectionRule> {
        self.rules.get(&task)
    }

    /// Task types without a rule
    pub fn missing_rules(&self) -> Vec<TaskType> {
        TaskType::all()
            .iter()
            .copied()
            .filter(|t| !self.rules.contains_key(t))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Why a backend was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// Caller named a registered backend
    ExplicitOverride,
    /// A rule override's criteria matched
    RuleOverride,
    /// The rule's primary backend
    Primary,
    /// No rule existed for the task type
    Default,
}

/// Result of backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub backend: BackendId,
    pub reason: SelectionReason,
}

/// Chooses the primary backend for a task.
///
/// Holds only immutable configuration, so identical inputs always yield
/// the same selection.
#[derive(Debug, Clone)]
pub struct BackendSelector {
    table: SelectionTable,
    default_backend: BackendId,
    registered: BTreeSet<BackendId>,
}

impl BackendSelector {
    pub fn new(
        table: SelectionTable,
        default_backend: BackendId,
        registered: impl IntoIterator<Item = BackendId>,
    ) -> Self {
        Self {
            table,
            default_backend,
            registered: registered.into_iter().collect(),
        }
    }

    pub fn select(
        &self,
        task: TaskType,
        request: &AiRequest,
        options: &DispatchOptions,
    ) -> Selection {
        if let Some(requested) = options.backend {
            if self.registered.contains(&requested) {
                return Selection {
                    backend: requested,
                    reason: SelectionReason::ExplicitOverride,
                };
            }
            warn!(
                backend = %requested,
                task = %task,
                "Requested backend is not registered, ignoring override"
            );
        }

        let Some(rule) = self.table.get(task) else {
            warn!(
                task = %task,
                default = %self.default_backend,
                "No selection rule for task type, using default backend"
            );
            return Selection {
                backend: self.default_backend,
                reason: SelectionReason::Default,
            };
        };

        let matched = rule
            .overrides
            .iter()
            .filter(|o| self.registered.contains(&o.backend))
            .find(|o| o.matches(request, options));

        match matched {
            Some(o) => Selection {
                backend: o.backend,
                reason: SelectionReason::RuleOverride,
            },
            None => Selection {
                backend: rule.primary,
                reason: SelectionReason::Primary,
            },
        }
    }

    pub fn table(&self) -> &SelectionTable {
        &self.table
    }

    pub fn default_backend(&self) -> BackendId {
        self.default_backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(table: SelectionTable) -> BackendSelector {
        BackendSelector::new(table, DEFAULT_BACKEND, BackendId::all().iter().copied())
    }

    #[test]
    fn test_default_table_covers_every_task() {
        assert!(SelectionTable::default_table().missing_rules().is_empty());
    }

    #[test]
    fn test_primary_from_rule() {
        let s = selector(SelectionTable::default_table());
        let sel = s.select(
            TaskType::ImageAnalysis,
            &AiRequest::new(),
            &DispatchOptions::default(),
        );
        assert_eq!(sel.backend, BackendId::VisionModel);
        assert_eq!(sel.reason, SelectionReason::Primary);
    }

    #[test]
    fn test_missing_rule_uses_default() {
        let s = selector(SelectionTable::new());
        let sel = s.select(
            TaskType::Classification,
            &AiRequest::new(),
            &DispatchOptions::default(),
        );
        assert_eq!(sel.backend, DEFAULT_BACKEND);
        assert_eq!(sel.reason, SelectionReason::Default);
    }

    #[test]
    fn test_explicit_override_wins_when_registered() {
        let s = selector(SelectionTable::default_table());
        let opts = DispatchOptions::default().with_backend(BackendId::HostedLlm);
        let sel = s.select(TaskType::Classification, &AiRequest::new(), &opts);
        assert_eq!(sel.backend, BackendId::HostedLlm);
        assert_eq!(sel.reason, SelectionReason::ExplicitOverride);
    }

    #[test]
    fn test_unregistered_override_falls_through() {
        let s = BackendSelector::new(
            SelectionTable::default_table(),
            DEFAULT_BACKEND,
            [BackendId::ClassifierModel],
        );
        let opts = DispatchOptions::default().with_backend(BackendId::VisionModel);
        let sel = s.select(TaskType::Classification, &AiRequest::new(), &opts);
        assert_eq!(sel.backend, BackendId::ClassifierModel);
        assert_eq!(sel.reason, SelectionReason::Primary);
    }

    #[test]
    fn test_content_size_override() {
        let s = selector(SelectionTable::default_table());
        let opts = DispatchOptions::default();

        let short = AiRequest::new().with_content("short caption");
        assert_eq!(
            s.select(TaskType::ContentAnalysis, &short, &opts).backend,
            BackendId::AnalysisModel
        );

        let long = AiRequest::new().with_content("x".repeat(16_000));
        let sel = s.select(TaskType::ContentAnalysis, &long, &opts);
        assert_eq!(sel.backend, BackendId::HostedLlm);
        assert_eq!(sel.reason, SelectionReason::RuleOverride);
    }

    #[test]
    fn test_complexity_override() {
        let s = selector(SelectionTable::default_table());
        let req = AiRequest::new();

        let simple = DispatchOptions::default().with_complexity(2);
        assert_eq!(
            s.select(TaskType::RelationshipDetection, &req, &simple).backend,
            BackendId::AnalysisModel
        );

        let complex = DispatchOptions::default().with_complexity(4);
        assert_eq!(
            s.select(TaskType::RelationshipDetection, &req, &complex).backend,
            BackendId::HostedLlm
        );
    }

    #[test]
    fn test_override_to_unregistered_backend_is_skipped() {
        let s = BackendSelector::new(
            SelectionTable::default_table(),
            DEFAULT_BACKEND,
            [BackendId::AnalysisModel],
        );
        let long = AiRequest::new().with_content("x".repeat(20_000));
        let sel = s.select(TaskType::ContentAnalysis, &long, &DispatchOptions::default());
        assert_eq!(sel.backend, BackendId::AnalysisModel);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let s = selector(SelectionTable::default_table());
        let req = AiRequest::new().with_content("x".repeat(17_000));
        let opts = DispatchOptions::default().with_complexity(3);
        let first = s.select(TaskType::ContentAnalysis, &req, &opts);
        for _ in 0..10 {
            assert_eq!(s.select(TaskType::ContentAnalysis, &req, &opts), first);
        }
    }

    #[test]
    fn test_table_from_toml() {
        let table: SelectionTable = toml::from_str(
            r#"
            [classification]
            primary = "classifier_model"

            [content_analysis]
            primary = "analysis_model"
            overrides = [{ backend = "hosted_llm", min_content_chars = 10 }]
            "#,
        )
        .unwrap();
        assert_eq!(
            table.get(TaskType::Classification).unwrap().primary,
            BackendId::ClassifierModel
        );
        assert_eq!(table.get(TaskType::ContentAnalysis).unwrap().overrides.len(), 1);
        assert_eq!(table.missing_rules().len(), 3);
    }
}
