//! Pattern recognition over task executions and errors
//!
//! Patterns are matched by Jaccard similarity over extracted keyword sets
//! (`|intersection| / |union|`, threshold 0.7). A pattern is promoted from
//! "candidate" to tracked only once it recurs `min_frequency` times, so a
//! one-off task never becomes a pattern.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will", "would",
    "could", "should", "this", "that", "these", "those", "i", "you", "he", "she", "it", "we", "they",
];

pub fn extract_keywords(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn jaccard_similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPattern {
    pub pattern_id: String,
    pub pattern_type: String,
    pub description: String,
    pub frequency: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub total_execution_time: f64,
    pub keywords: BTreeSet<String>,
}

impl TaskPattern {
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    pub fn avg_execution_time(&self) -> f64 {
        if self.frequency == 0 {
            0.0
        } else {
            self.total_execution_time / self.frequency as f64
        }
    }
}

pub struct PatternRecognizerConfig {
    pub min_pattern_frequency: u32,
    pub similarity_threshold: f64,
}

impl Default for PatternRecognizerConfig {
    fn default() -> Self {
        Self {
            min_pattern_frequency: 3,
            similarity_threshold: 0.7,
        }
    }
}

pub struct PatternRecognizer {
    config: PatternRecognizerConfig,
    task_patterns: RwLock<BTreeMap<String, TaskPattern>>,
    error_patterns: RwLock<BTreeMap<String, TaskPattern>>,
    candidates: RwLock<BTreeMap<String, u32>>,
}

impl PatternRecognizer {
    pub fn new(config: PatternRecognizerConfig) -> Self {
        Self {
            config,
            task_patterns: RwLock::new(BTreeMap::new()),
            error_patterns: RwLock::new(BTreeMap::new()),
            candidates: RwLock::new(BTreeMap::new()),
        }
    }

    fn pattern_id(description: &str, keywords: &BTreeSet<String>) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        description.hash(&mut hasher);
        for k in keywords {
            k.hash(&mut hasher);
        }
        format!("{:x}", hasher.finish())
    }

    fn find_similar<'a>(
        patterns: &'a BTreeMap<String, TaskPattern>,
        keywords: &BTreeSet<String>,
        threshold: f64,
    ) -> Option<&'a str> {
        patterns
            .values()
            .map(|p| (p.pattern_id.as_str(), jaccard_similarity(keywords, &p.keywords)))
            .filter(|(_, sim)| *sim >= threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id)
    }

    /// Update an existing matching task pattern, or track this description
    /// as a candidate until it recurs `min_pattern_frequency` times.
    pub fn analyze_task_execution(
        &self,
        description: &str,
        success: bool,
        execution_time_secs: f64,
    ) -> Option<TaskPattern> {
        let keywords = extract_keywords(description);
        let mut patterns = self.task_patterns.write();

        if let Some(id) = Self::find_similar(&patterns, &keywords, self.config.similarity_threshold) {
            let id = id.to_string();
            let pattern = patterns.get_mut(&id).unwrap();
            pattern.frequency += 1;
            if success {
                pattern.success_count += 1;
            } else {
                pattern.failure_count += 1;
            }
            pattern.total_execution_time += execution_time_secs;
            return Some(pattern.clone());
        }

        let id = Self::pattern_id(description, &keywords);
        let mut candidates = self.candidates.write();
        let count = candidates.entry(id.clone()).or_insert(0);
        *count += 1;
        if *count >= self.config.min_pattern_frequency {
            let pattern = TaskPattern {
                pattern_id: id.clone(),
                pattern_type: "task".to_string(),
                description: description.to_string(),
                frequency: 1,
                success_count: if success { 1 } else { 0 },
                failure_count: if success { 0 } else { 1 },
                total_execution_time: execution_time_secs,
                keywords,
            };
            patterns.insert(id, pattern.clone());
            return Some(pattern);
        }

        None
    }

    pub fn record_error(&self, description: &str, error: &str, error_type: &str) -> Option<TaskPattern> {
        let keywords = extract_keywords(&format!("{description} {error}"));
        let mut patterns = self.error_patterns.write();

        if let Some(id) = Self::find_similar(&patterns, &keywords, self.config.similarity_threshold) {
            let id = id.to_string();
            let pattern = patterns.get_mut(&id).unwrap();
            pattern.frequency += 1;
            return Some(pattern.clone());
        }

        let id = Self::pattern_id(&format!("{error_type}:{error}"), &keywords);
        let pattern = TaskPattern {
            pattern_id: id.clone(),
            pattern_type: error_type.to_string(),
            description: format!("error in {description}: {error}"),
            frequency: 1,
            success_count: 0,
            failure_count: 1,
            total_execution_time: 0.0,
            keywords,
        };
        patterns.insert(id, pattern.clone());
        Some(pattern)
    }

    /// Patterns (task or error) similar to a free-text query, most frequent
    /// and highest-success-rate first.
    pub fn find_similar_patterns(&self, query: &str, limit: usize) -> Vec<TaskPattern> {
        let keywords = extract_keywords(query);
        let task_patterns = self.task_patterns.read();
        let error_patterns = self.error_patterns.read();

        let mut matches: Vec<TaskPattern> = task_patterns
            .values()
            .chain(error_patterns.values())
            .filter(|p| jaccard_similarity(&keywords, &p.keywords) >= self.config.similarity_threshold)
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then(b.success_rate().partial_cmp(&a.success_rate()).unwrap_or(std::cmp::Ordering::Equal))
        });
        matches.truncate(limit);
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_similarity_is_one_for_identical_sets() {
        let a = extract_keywords("read the config file");
        let b = extract_keywords("read the config file");
        assert_eq!(jaccard_similarity(&a, &b), 1.0);
    }

    #[test]
    fn stop_words_are_excluded_from_keywords() {
        let keywords = extract_keywords("the and or but");
        assert!(keywords.is_empty());
    }

    #[test]
    fn pattern_emerges_only_after_min_frequency_recurrences() {
        let recognizer = PatternRecognizer::new(PatternRecognizerConfig {
            min_pattern_frequency: 3,
            similarity_threshold: 0.7,
        });
        assert!(recognizer.analyze_task_execution("deploy service to staging", true, 1.0).is_none());
        assert!(recognizer.analyze_task_execution("deploy service to staging", true, 1.0).is_none());
        let pattern = recognizer.analyze_task_execution("deploy service to staging", true, 1.0);
        assert!(pattern.is_some());
    }

    #[test]
    fn recurring_pattern_tracks_success_rate() {
        let recognizer = PatternRecognizer::new(PatternRecognizerConfig {
            min_pattern_frequency: 1,
            similarity_threshold: 0.5,
        });
        recognizer.analyze_task_execution("restart worker process", true, 2.0);
        let pattern = recognizer.analyze_task_execution("restart worker process", false, 4.0).unwrap();
        assert_eq!(pattern.success_rate(), 0.5);
    }

    #[test]
    fn error_pattern_is_found_by_similar_query() {
        let recognizer = PatternRecognizer::new(PatternRecognizerConfig::default());
        recognizer.record_error("read config file", "permission denied", "permission_error");
        let found = recognizer.find_similar_patterns("read config file permission denied", 5);
        assert!(!found.is_empty());
    }
}
