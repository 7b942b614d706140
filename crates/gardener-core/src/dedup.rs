use std::collections::BTreeSet;

use crate::types::{ConflictPrediction, DeduplicatedTask, DiscoveredTask, TrackedIssue};

// ── Similarity Seam ──────────────────────────────────────────────────────

/// Pairwise text similarity in [0, 1]. Swappable so an embedding-backed
/// scorer can replace the lexical default without touching the pipeline.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Token-set Jaccard over lowercased alphanumeric words. Cheap, deterministic
/// and good enough to catch re-discovered tasks whose wording drifted.
#[derive(Debug, Default)]
pub struct JaccardScorer;

fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

impl SimilarityScorer for JaccardScorer {
    fn score(&self, a: &str, b: &str) -> f64 {
        let ta = tokenize(a);
        let tb = tokenize(b);
        if ta.is_empty() && tb.is_empty() {
            return 0.0;
        }
        let intersection = ta.intersection(&tb).count();
        let union = ta.len() + tb.len() - intersection;
        if union == 0 {
            0.0
        } else {
            intersection as f64 / union as f64
        }
    }
}

// ── Deduplicator ─────────────────────────────────────────────────────────

/// Flags discovered tasks that look like already-tracked issues and predicts
/// path conflicts inside the batch.
pub struct Deduplicator {
    scorer: Box<dyn SimilarityScorer>,
    threshold: f64,
}

impl Deduplicator {
    pub fn new(threshold: f64) -> Self {
        Self {
            scorer: Box::new(JaccardScorer),
            threshold,
        }
    }

    pub fn with_scorer(scorer: Box<dyn SimilarityScorer>, threshold: f64) -> Self {
        Self { scorer, threshold }
    }

    fn task_text(task: &DiscoveredTask) -> String {
        format!("{} {}", task.title, task.description)
    }

    fn issue_text(issue: &TrackedIssue) -> String {
        format!("{} {}", issue.title, issue.body)
    }

    /// Annotate every task in the batch. Output order matches input order.
    /// A task is a potential duplicate when it scores at or above the
    /// threshold against any existing issue or any earlier accepted task of
    /// the same batch, or when the discovery collaborator itself linked it
    /// to an issue. Conflict prediction is pairwise path intersection among
    /// the tasks that survived duplicate flagging.
    pub fn annotate(
        &self,
        tasks: Vec<DiscoveredTask>,
        existing: &[TrackedIssue],
    ) -> Vec<DeduplicatedTask> {
        let all_paths: Vec<BTreeSet<String>> =
            tasks.iter().map(|t| t.affected_paths.clone()).collect();

        let mut reference: Vec<String> = existing.iter().map(Self::issue_text).collect();
        let duplicate_flags: Vec<bool> = tasks
            .iter()
            .map(|task| {
                let text = Self::task_text(task);
                let duplicate = !task.related_issue_ids.is_empty()
                    || reference
                        .iter()
                        .any(|r| self.scorer.score(&text, r) >= self.threshold);
                if !duplicate {
                    reference.push(text);
                }
                duplicate
            })
            .collect();

        tasks
            .into_iter()
            .enumerate()
            .map(|(i, task)| {
                let is_potential_duplicate = duplicate_flags[i];
                let mut overlapping_paths = BTreeSet::new();
                if !is_potential_duplicate {
                    for (j, other) in all_paths.iter().enumerate() {
                        if i == j || duplicate_flags[j] {
                            continue;
                        }
                        for p in task.affected_paths.intersection(other) {
                            overlapping_paths.insert(p.clone());
                        }
                    }
                }
                let conflict = ConflictPrediction {
                    has_high_conflict_risk: !overlapping_paths.is_empty(),
                    overlapping_paths,
                };
                DeduplicatedTask {
                    task,
                    is_potential_duplicate,
                    conflict,
                }
            })
            .collect()
    }
}

/// Drop flagged duplicates from an annotated batch. Each drop is logged;
/// duplicates are never silently merged into the surviving task. Idempotent.
pub fn filter_duplicates(tasks: Vec<DeduplicatedTask>) -> Vec<DeduplicatedTask> {
    tasks
        .into_iter()
        .filter(|t| {
            if t.is_potential_duplicate {
                tracing::info!(title = %t.task.title, "dropping probable duplicate task");
                false
            } else {
                true
            }
        })
        .collect()
}

/// Order a batch for execution: low-conflict-risk tasks first, preserving
/// relative order within each partition so priority ordering from discovery
/// survives.
pub fn order_by_conflict_risk(mut tasks: Vec<DeduplicatedTask>) -> Vec<DeduplicatedTask> {
    tasks.sort_by_key(|t| t.conflict.has_high_conflict_risk);
    tasks
}
