//! Creator/reviewer feedback loop.
//!
//! Content is refined over iterations: the reviewer produces a
//! [`Feedback`](crate::event::EventPayload::Feedback) event, the creator
//! answers with a [`Revision`](crate::event::EventPayload::Revision), and an
//! [`ImprovementScorer`] decides whether the loop is still paying off. The
//! default scorer is a deliberately simple length-ratio heuristic; inject a
//! different one for anything smarter.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::vulnscope::event::{Event, EventBus, EventKind, EventPayload, SubscriptionGuard};
use crate::vulnscope::task::Task;

/// Kinds of feedback a reviewer can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Correction,
    Suggestion,
    Question,
    Clarification,
    Improvement,
}

/// Scores how much the current content improved over the initial content.
///
/// Implementations must be cheap and pure; the loop calls the scorer once
/// per iteration and sums the scores into `total_improvement`.
pub trait ImprovementScorer: Send + Sync {
    fn score(&self, initial_content: &str, current_content: &str) -> f64;
}

/// Default scorer: a clamped length-ratio heuristic.
///
/// Shrinking content scores `-0.1`, growth beyond 2x caps at `0.5`, and
/// growth in between scales linearly as `0.5 * (ratio - 1)`. A reference
/// implementation only; replace it via
/// [`FeedbackLoopPattern::with_scorer`].
pub struct LengthRatioScorer;

impl ImprovementScorer for LengthRatioScorer {
    fn score(&self, initial_content: &str, current_content: &str) -> f64 {
        let initial_len = initial_content.len();
        if initial_len == 0 {
            return 0.0;
        }
        let ratio = current_content.len() as f64 / initial_len as f64;
        if ratio < 1.0 {
            -0.1
        } else if ratio > 2.0 {
            0.5
        } else {
            0.5 * (ratio - 1.0)
        }
    }
}

/// Tuning knobs for [`FeedbackLoopPattern`].
#[derive(Debug, Clone)]
pub struct FeedbackLoopConfig {
    /// Maximum number of feedback/revision iterations.
    pub max_iterations: u32,
    /// Time budget for each wait (feedback, then revision).
    pub iteration_timeout: Duration,
    /// Minimum per-iteration improvement to keep going after iteration 2.
    pub improvement_threshold: f64,
}

impl Default for FeedbackLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            iteration_timeout: Duration::from_secs(120),
            improvement_threshold: 0.1,
        }
    }
}

/// One recorded iteration.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackIteration {
    pub iteration: u32,
    pub feedback: String,
    pub feedback_type: FeedbackType,
    pub reviewer_id: String,
    pub revised_content: String,
    pub changes_made: Vec<String>,
    pub creator_id: String,
    pub improvement: f64,
}

/// Full record of one feedback loop run.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackLoopOutcome {
    pub loop_id: String,
    pub content_id: String,
    pub task_id: Option<String>,
    pub creator: String,
    pub reviewer: String,
    pub iterations: Vec<FeedbackIteration>,
    pub initial_content: String,
    pub final_content: String,
    /// Sum of per-iteration improvement scores.
    pub total_improvement: f64,
    pub completed: bool,
    pub timed_out: bool,
}

/// Coordinates an iterative creator/reviewer improvement cycle.
pub struct FeedbackLoopPattern {
    bus: Arc<EventBus>,
    config: FeedbackLoopConfig,
    scorer: Arc<dyn ImprovementScorer>,
}

impl FeedbackLoopPattern {
    /// Create a pattern with default limits and the length-ratio scorer.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            config: FeedbackLoopConfig::default(),
            scorer: Arc::new(LengthRatioScorer),
        }
    }

    /// Override the limits (builder pattern).
    pub fn with_config(mut self, config: FeedbackLoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the improvement scorer (builder pattern).
    pub fn with_scorer(mut self, scorer: Arc<dyn ImprovementScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Run one feedback loop over `initial_content`.
    ///
    /// Timeout and failure paths return a well-formed record with whatever
    /// iterations completed.
    pub async fn execute(
        &self,
        creator: &str,
        reviewer: &str,
        initial_content: &str,
        content_id: &str,
        task: Option<&Task>,
    ) -> FeedbackLoopOutcome {
        let loop_id = format!("feedback_{}", Uuid::new_v4().simple());

        // Feedback flows reviewer -> creator, revisions creator -> reviewer.
        let (feedback_id, mut feedback_rx) = self.bus.subscribe(EventKind::Feedback, creator);
        let (revision_id, mut revision_rx) = self.bus.subscribe(EventKind::Revision, reviewer);
        let _guard = SubscriptionGuard::new(self.bus.clone(), vec![feedback_id, revision_id]);

        let mut iterations: Vec<FeedbackIteration> = Vec::new();
        let mut current_content = initial_content.to_string();
        let mut total_improvement = 0.0;
        let mut timed_out = false;

        for iteration in 1..=self.config.max_iterations {
            self.bus.emit(Event::new(
                creator,
                reviewer,
                EventPayload::TaskAssignment {
                    task_id: format!("{}_feedback_{}", loop_id, iteration),
                    task_type: "provide_feedback".to_string(),
                    description: "Review the content and provide feedback".to_string(),
                    parameters: json!({
                        "loop_id": loop_id,
                        "iteration": iteration,
                        "content_reference": content_id,
                        "content": current_content,
                    }),
                    priority: 3,
                },
            ));

            let Some((feedback, feedback_type, reviewer_id)) = self
                .wait_feedback(&mut feedback_rx, &loop_id, iteration)
                .await
            else {
                log::warn!("feedback loop {} iteration {} timed out waiting for feedback", loop_id, iteration);
                timed_out = true;
                break;
            };

            self.bus.emit(Event::new(
                reviewer,
                creator,
                EventPayload::TaskAssignment {
                    task_id: format!("{}_revision_{}", loop_id, iteration),
                    task_type: "revise_content".to_string(),
                    description: "Revise the content based on feedback".to_string(),
                    parameters: json!({
                        "loop_id": loop_id,
                        "iteration": iteration,
                        "feedback": feedback,
                        "content": current_content,
                    }),
                    priority: 3,
                },
            ));

            let Some((revised_content, changes_made, creator_id)) = self
                .wait_revision(&mut revision_rx, &loop_id, iteration)
                .await
            else {
                log::warn!("feedback loop {} iteration {} timed out waiting for revision", loop_id, iteration);
                timed_out = true;
                break;
            };

            current_content = revised_content.clone();
            let improvement = self.scorer.score(initial_content, &current_content);
            total_improvement += improvement;

            iterations.push(FeedbackIteration {
                iteration,
                feedback,
                feedback_type,
                reviewer_id,
                revised_content,
                changes_made,
                creator_id,
                improvement,
            });

            if iteration > 1 && improvement < self.config.improvement_threshold {
                log::info!(
                    "feedback loop {} stopping on diminishing returns (score {:.3})",
                    loop_id,
                    improvement
                );
                break;
            }
        }

        log::info!(
            "feedback loop {} completed with {} iterations",
            loop_id,
            iterations.len()
        );

        FeedbackLoopOutcome {
            loop_id,
            content_id: content_id.to_string(),
            task_id: task.map(|t| t.id.clone()),
            creator: creator.to_string(),
            reviewer: reviewer.to_string(),
            iterations,
            initial_content: initial_content.to_string(),
            final_content: current_content,
            total_improvement,
            completed: true,
            timed_out,
        }
    }

    async fn wait_feedback(
        &self,
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<Event>,
        loop_id: &str,
        iteration: u32,
    ) -> Option<(String, FeedbackType, String)> {
        let deadline = tokio::time::Instant::now() + self.config.iteration_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) => {
                    if let EventPayload::Feedback {
                        loop_id: event_loop,
                        iteration: event_iteration,
                        feedback_type,
                        content,
                        ..
                    } = &event.payload
                    {
                        if event_loop == loop_id && *event_iteration == iteration {
                            return Some((content.clone(), *feedback_type, event.sender_id));
                        }
                    }
                }
                Ok(None) | Err(_) => return None,
            }
        }
    }

    async fn wait_revision(
        &self,
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<Event>,
        loop_id: &str,
        iteration: u32,
    ) -> Option<(String, Vec<String>, String)> {
        let deadline = tokio::time::Instant::now() + self.config.iteration_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) => {
                    if let EventPayload::Revision {
                        loop_id: event_loop,
                        iteration: event_iteration,
                        revised_content,
                        changes_made,
                    } = &event.payload
                    {
                        if event_loop == loop_id && *event_iteration == iteration {
                            return Some((
                                revised_content.clone(),
                                changes_made.clone(),
                                event.sender_id,
                            ));
                        }
                    }
                }
                Ok(None) | Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_ratio_scorer_clamps() {
        let scorer = LengthRatioScorer;
        assert_eq!(scorer.score("abcd", "ab"), -0.1);
        assert_eq!(scorer.score("ab", "abcdefghij"), 0.5);
        let mid = scorer.score("aaaa", "aaaaaa");
        assert!((mid - 0.25).abs() < 1e-9);
        assert_eq!(scorer.score("", "anything"), 0.0);
    }
}
