//! C10 Task Router (optional)
//!
//! Classifies a free-text task description into a category via keyword
//! scoring, then maps the category to a preferred client kind. There was no
//! retrievable task-router source in this system's history to translate
//! directly; the category set below is reconstructed from how the client
//! registry's categories are used elsewhere (file/desktop/system clients,
//! each owning a fixed category set).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::registry::ClientKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    FileOperations,
    DesktopAutomation,
    SystemMonitoring,
    SystemInteraction,
    DataAnalysis,
    General,
    Hybrid,
}

struct CategoryKeywords {
    category: TaskCategory,
    keywords: &'static [&'static str],
}

const CATEGORIES: &[CategoryKeywords] = &[
    CategoryKeywords {
        category: TaskCategory::FileOperations,
        keywords: &["file", "directory", "folder", "read", "write", "path", "save", "load"],
    },
    CategoryKeywords {
        category: TaskCategory::DesktopAutomation,
        keywords: &["click", "window", "screenshot", "keyboard", "mouse", "ui", "screen"],
    },
    CategoryKeywords {
        category: TaskCategory::SystemMonitoring,
        keywords: &["cpu", "memory", "disk", "process", "monitor", "usage", "performance"],
    },
    CategoryKeywords {
        category: TaskCategory::SystemInteraction,
        keywords: &["execute", "command", "shell", "run", "terminal", "script"],
    },
    CategoryKeywords {
        category: TaskCategory::DataAnalysis,
        keywords: &["analyze", "data", "csv", "json", "parse", "aggregate", "report"],
    },
];

const MIN_CONFIDENCE: f64 = 0.2;

pub struct TaskRouter;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: TaskCategory,
    pub confidence: f64,
}

impl TaskRouter {
    /// Tokenize and score `text` against every category's keyword set.
    /// The highest-scoring category above `MIN_CONFIDENCE` wins, ties broken
    /// by declaration order; otherwise the task is `General`.
    pub fn classify(text: &str) -> Classification {
        let tokens: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if tokens.is_empty() {
            return Classification {
                category: TaskCategory::General,
                confidence: 0.0,
            };
        }

        let mut scores: HashMap<&'static str, usize> = HashMap::new();
        for category in CATEGORIES {
            let hits = category
                .keywords
                .iter()
                .filter(|kw| tokens.iter().any(|t| t == *kw))
                .count();
            if hits > 0 {
                scores.insert(category.keywords[0], hits);
            }
        }

        let best = CATEGORIES
            .iter()
            .filter_map(|c| scores.get(c.keywords[0]).map(|hits| (c.category, *hits)))
            .max_by_key(|(_, hits)| *hits);

        match best {
            Some((category, hits)) => {
                let confidence = hits as f64 / tokens.len() as f64;
                if confidence >= MIN_CONFIDENCE {
                    Classification { category, confidence }
                } else {
                    Classification {
                        category: TaskCategory::General,
                        confidence,
                    }
                }
            }
            None => Classification {
                category: TaskCategory::General,
                confidence: 0.0,
            },
        }
    }

    /// Map a category to a preferred client kind, falling back to the
    /// filesystem client for general/hybrid tasks (mirrors the registry's
    /// own fallback for unmatched categories).
    pub fn client_kind_for(category: TaskCategory) -> ClientKind {
        match category {
            TaskCategory::FileOperations | TaskCategory::DataAnalysis => ClientKind::Filesystem,
            TaskCategory::DesktopAutomation => ClientKind::Desktop,
            TaskCategory::SystemMonitoring | TaskCategory::SystemInteraction => ClientKind::System,
            TaskCategory::General | TaskCategory::Hybrid => ClientKind::Filesystem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_file_operation_task() {
        let result = TaskRouter::classify("read the file at this path and save it");
        assert_eq!(result.category, TaskCategory::FileOperations);
    }

    #[test]
    fn classifies_system_monitoring_task() {
        let result = TaskRouter::classify("monitor cpu and memory usage");
        assert_eq!(result.category, TaskCategory::SystemMonitoring);
    }

    #[test]
    fn low_confidence_falls_back_to_general() {
        let result = TaskRouter::classify("do the thing");
        assert_eq!(result.category, TaskCategory::General);
    }

    #[test]
    fn empty_text_is_general_with_zero_confidence() {
        let result = TaskRouter::classify("");
        assert_eq!(result.category, TaskCategory::General);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn general_category_falls_back_to_filesystem_client() {
        assert_eq!(
            TaskRouter::client_kind_for(TaskCategory::General),
            ClientKind::Filesystem
        );
    }
}
