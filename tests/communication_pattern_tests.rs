use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vulnscope::event::{Event, EventBus, EventKind, EventPayload};
use vulnscope::patterns::chain::ChainOfThoughtConfig;
use vulnscope::patterns::debate::DebateConfig;
use vulnscope::patterns::feedback::{FeedbackLoopConfig, FeedbackType, ImprovementScorer};
use vulnscope::patterns::parallel::{Analyst, ParallelReasoningConfig};
use vulnscope::patterns::{
    ChainOfThoughtPattern, DebatePattern, FeedbackLoopPattern, ParallelReasoningPattern,
};
use vulnscope::task::{ReasoningPriority, Task};

fn chain_id_of(event: &Event) -> Option<String> {
    match &event.payload {
        EventPayload::CognitiveStep { chain_id, .. } => Some(chain_id.clone()),
        _ => None,
    }
}

#[tokio::test]
async fn chain_terminates_on_conclusion() {
    let bus = Arc::new(EventBus::new());

    // The target answers the seed step with three numbered steps; the third
    // carries the conclusion flag.
    let responder_bus = bus.clone();
    let (_sub, mut seed_rx) = bus.subscribe(EventKind::CognitiveStep, "analyst");
    tokio::spawn(async move {
        let seed = seed_rx.recv().await.unwrap();
        let chain_id = chain_id_of(&seed).unwrap();
        for step in 1..=3u32 {
            responder_bus.emit(Event::new(
                "analyst",
                "orchestrator",
                EventPayload::CognitiveStep {
                    chain_id: chain_id.clone(),
                    step_number: step,
                    reasoning: if step == 3 {
                        "The input is unsanitized, so this is injectable".to_string()
                    } else {
                        format!("step {} reasoning", step)
                    },
                    context: serde_json::json!({}),
                    is_conclusion: step == 3,
                },
            ));
        }
    });

    let pattern = ChainOfThoughtPattern::new(bus.clone()).with_config(ChainOfThoughtConfig {
        max_steps: 5,
        step_timeout: Duration::from_secs(2),
    });
    let task = Task::new("t1", "analyze", "Analyze injection risk", "orchestrator", "analyst");
    let outcome = pattern
        .execute("orchestrator", "analyst", &task, serde_json::json!({}))
        .await;

    assert_eq!(outcome.completed_steps, 3);
    assert_eq!(
        outcome.result.as_deref(),
        Some("The input is unsanitized, so this is injectable")
    );
    assert!(!outcome.timed_out);
    assert_eq!(outcome.steps.len(), 3);
}

#[tokio::test]
async fn chain_times_out_without_responses() {
    let bus = Arc::new(EventBus::new());
    let pattern = ChainOfThoughtPattern::new(bus.clone()).with_config(ChainOfThoughtConfig {
        max_steps: 2,
        step_timeout: Duration::from_millis(25),
    });
    let task = Task::new("t2", "analyze", "silent chain", "orchestrator", "analyst");
    let outcome = pattern
        .execute("orchestrator", "analyst", &task, serde_json::json!({}))
        .await;

    assert!(outcome.timed_out);
    assert!(outcome.result.is_none());
    // The seed step is still part of the transcript.
    assert_eq!(outcome.steps.len(), 1);
}

#[tokio::test]
async fn debate_round_timeout_keeps_partial_round() {
    let bus = Arc::new(EventBus::new());
    // Nobody answers the opening argument.
    let pattern = DebatePattern::new(bus.clone()).with_config(DebateConfig {
        max_rounds: 3,
        round_timeout: Duration::from_millis(50),
        conclusion_timeout: Duration::from_millis(50),
        require_evidence: true,
    });
    let outcome = pattern
        .execute("proponent", "opponent", None, "Is the finding exploitable?", None)
        .await;

    assert!(outcome.timed_out);
    assert!(outcome.conclusion.is_none());
    assert_eq!(outcome.rounds.len(), 1);
    assert_eq!(outcome.rounds[0].round_number, 1);
    assert_eq!(outcome.rounds[0].arguments.len(), 1);
    assert_eq!(
        outcome.rounds[0].arguments[0].role.as_str(),
        "proponent"
    );
}

#[tokio::test]
async fn debate_rejects_arguments_without_evidence() {
    let bus = Arc::new(EventBus::new());

    // The opponent first replies without evidence (rejected), then with.
    let responder_bus = bus.clone();
    let (_sub, mut rx) = bus.subscribe(EventKind::DebateArgument, "opponent");
    tokio::spawn(async move {
        let opening = rx.recv().await.unwrap();
        let EventPayload::DebateArgument { debate_id, .. } = &opening.payload else {
            return;
        };
        let debate_id = debate_id.clone();
        responder_bus.emit(Event::new(
            "opponent",
            "proponent",
            EventPayload::DebateArgument {
                debate_id: debate_id.clone(),
                round_number: 1,
                role: vulnscope::patterns::debate::DebateRole::Opponent,
                argument: "No evidence offered".into(),
                evidence: vec![],
            },
        ));
        responder_bus.emit(Event::new(
            "opponent",
            "proponent",
            EventPayload::DebateArgument {
                debate_id,
                round_number: 1,
                role: vulnscope::patterns::debate::DebateRole::Opponent,
                argument: "The sink is unreachable".into(),
                evidence: vec!["call graph".into()],
            },
        ));
    });

    let pattern = DebatePattern::new(bus.clone()).with_config(DebateConfig {
        max_rounds: 1,
        round_timeout: Duration::from_secs(2),
        conclusion_timeout: Duration::from_millis(50),
        require_evidence: true,
    });
    let outcome = pattern
        .execute("proponent", "opponent", None, "exploitability", None)
        .await;

    assert!(!outcome.timed_out);
    assert_eq!(outcome.rounds.len(), 1);
    let opponent_argument = outcome.rounds[0]
        .arguments
        .iter()
        .find(|a| a.role.as_str() == "opponent")
        .unwrap();
    assert_eq!(opponent_argument.argument, "The sink is unreachable");
}

#[tokio::test]
async fn debate_ignores_other_debate_ids() {
    let bus = Arc::new(EventBus::new());

    let responder_bus = bus.clone();
    let (_sub, mut rx) = bus.subscribe(EventKind::DebateArgument, "opponent");
    tokio::spawn(async move {
        let opening = rx.recv().await.unwrap();
        let EventPayload::DebateArgument { debate_id, .. } = &opening.payload else {
            return;
        };
        // An argument for a different debate must be ignored.
        responder_bus.emit(Event::new(
            "opponent",
            "proponent",
            EventPayload::DebateArgument {
                debate_id: "some_other_debate".into(),
                round_number: 1,
                role: vulnscope::patterns::debate::DebateRole::Opponent,
                argument: "wrong debate".into(),
                evidence: vec!["x".into()],
            },
        ));
        responder_bus.emit(Event::new(
            "opponent",
            "proponent",
            EventPayload::DebateArgument {
                debate_id: debate_id.clone(),
                round_number: 1,
                role: vulnscope::patterns::debate::DebateRole::Opponent,
                argument: "right debate".into(),
                evidence: vec!["y".into()],
            },
        ));
    });

    let pattern = DebatePattern::new(bus.clone()).with_config(DebateConfig {
        max_rounds: 1,
        round_timeout: Duration::from_secs(2),
        conclusion_timeout: Duration::from_millis(50),
        require_evidence: false,
    });
    let outcome = pattern
        .execute("proponent", "opponent", None, "scoping", None)
        .await;

    let opponent_argument = outcome.rounds[0]
        .arguments
        .iter()
        .find(|a| a.role.as_str() == "opponent")
        .unwrap();
    assert_eq!(opponent_argument.argument, "right debate");
}

/// Scorer that returns a scripted sequence of scores.
struct ScriptedScorer {
    scores: Vec<f64>,
    calls: AtomicUsize,
}

impl ImprovementScorer for ScriptedScorer {
    fn score(&self, _initial: &str, _current: &str) -> f64 {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.scores.get(call).copied().unwrap_or(0.0)
    }
}

#[tokio::test]
async fn feedback_loop_stops_on_diminishing_returns() {
    let bus = Arc::new(EventBus::new());

    // Reviewer answers feedback requests; creator answers revision requests.
    let reviewer_bus = bus.clone();
    let (_r, mut reviewer_rx) = bus.subscribe(EventKind::TaskAssignment, "reviewer");
    tokio::spawn(async move {
        while let Some(event) = reviewer_rx.recv().await {
            let EventPayload::TaskAssignment { task_type, parameters, .. } = &event.payload else {
                continue;
            };
            if task_type != "provide_feedback" {
                continue;
            }
            let loop_id = parameters["loop_id"].as_str().unwrap().to_string();
            let iteration = parameters["iteration"].as_u64().unwrap() as u32;
            reviewer_bus.emit(Event::new(
                "reviewer",
                "creator",
                EventPayload::Feedback {
                    loop_id,
                    iteration,
                    feedback_type: FeedbackType::Improvement,
                    content_reference: "draft".into(),
                    content: format!("feedback for iteration {}", iteration),
                },
            ));
        }
    });

    let creator_bus = bus.clone();
    let (_c, mut creator_rx) = bus.subscribe(EventKind::TaskAssignment, "creator");
    tokio::spawn(async move {
        while let Some(event) = creator_rx.recv().await {
            let EventPayload::TaskAssignment { task_type, parameters, .. } = &event.payload else {
                continue;
            };
            if task_type != "revise_content" {
                continue;
            }
            let loop_id = parameters["loop_id"].as_str().unwrap().to_string();
            let iteration = parameters["iteration"].as_u64().unwrap() as u32;
            creator_bus.emit(Event::new(
                "creator",
                "reviewer",
                EventPayload::Revision {
                    loop_id,
                    iteration,
                    revised_content: format!("revision {}", iteration),
                    changes_made: vec!["tightened wording".into()],
                },
            ));
        }
    });

    let pattern = FeedbackLoopPattern::new(bus.clone())
        .with_config(FeedbackLoopConfig {
            max_iterations: 5,
            iteration_timeout: Duration::from_secs(2),
            improvement_threshold: 0.2,
        })
        .with_scorer(Arc::new(ScriptedScorer {
            scores: vec![0.5, 0.1, 0.1, 0.1, 0.1],
            calls: AtomicUsize::new(0),
        }));

    let outcome = pattern
        .execute("creator", "reviewer", "first draft", "draft", None)
        .await;

    // Iteration 2 scored below the threshold, so the loop stops there.
    assert_eq!(outcome.iterations.len(), 2);
    assert!((outcome.total_improvement - 0.6).abs() < 1e-9);
    assert!(!outcome.timed_out);
    assert_eq!(outcome.final_content, "revision 2");
}

#[tokio::test]
async fn feedback_loop_times_out_without_reviewer() {
    let bus = Arc::new(EventBus::new());
    let pattern = FeedbackLoopPattern::new(bus.clone()).with_config(FeedbackLoopConfig {
        max_iterations: 3,
        iteration_timeout: Duration::from_millis(50),
        improvement_threshold: 0.1,
    });
    let outcome = pattern
        .execute("creator", "reviewer", "draft", "doc", None)
        .await;

    assert!(outcome.timed_out);
    assert!(outcome.iterations.is_empty());
    assert_eq!(outcome.final_content, "draft");
}

fn spawn_analyst_responder(bus: Arc<EventBus>, agent_id: &str, priority: ReasoningPriority) {
    let agent_id = agent_id.to_string();
    let (_sub, mut rx) = bus.subscribe(EventKind::TaskAssignment, &agent_id);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let EventPayload::TaskAssignment { task_type, parameters, .. } = &event.payload else {
                continue;
            };
            if task_type != "parallel_analysis" {
                continue;
            }
            let reasoning_id = parameters["reasoning_id"].as_str().unwrap().to_string();
            bus.emit(Event::new(
                &agent_id,
                "coordinator",
                EventPayload::Analysis {
                    reasoning_id,
                    reasoning: format!("{} reasoning", agent_id),
                    conclusion: format!("{} conclusion", agent_id),
                    evidence: vec!["trace".into()],
                    confidence: 0.8,
                    priority,
                },
            ));
        }
    });
}

#[tokio::test]
async fn parallel_reasoning_insufficient_analyses() {
    let bus = Arc::new(EventBus::new());
    // Only one of three analysts ever responds.
    spawn_analyst_responder(bus.clone(), "analyst_1", ReasoningPriority::Medium);

    let pattern = ParallelReasoningPattern::new(bus.clone()).with_config(ParallelReasoningConfig {
        analysis_timeout: Duration::from_millis(100),
        synthesis_timeout: Duration::from_millis(100),
        min_analyses: 2,
    });
    let analysts = vec![
        Analyst::new("analyst_1"),
        Analyst::new("analyst_2"),
        Analyst::new("analyst_3"),
    ];
    let outcome = pattern
        .execute(
            &analysts,
            "coordinator",
            "is the finding reachable",
            serde_json::json!({}),
            None,
            ReasoningPriority::Medium,
        )
        .await
        .unwrap();

    assert_eq!(outcome.timeout.as_deref(), Some("analysis_insufficient"));
    assert!(outcome.synthesis.is_none());
    assert!(!outcome.completed);
    assert_eq!(outcome.analyses.len(), 1);
}

#[tokio::test]
async fn parallel_reasoning_synthesizes_after_quorum() {
    let bus = Arc::new(EventBus::new());
    spawn_analyst_responder(bus.clone(), "analyst_1", ReasoningPriority::Medium);
    spawn_analyst_responder(bus.clone(), "analyst_2", ReasoningPriority::High);

    // The coordinator answers its self-assigned synthesis task.
    let coordinator_bus = bus.clone();
    let (_sub, mut rx) = bus.subscribe(EventKind::TaskAssignment, "coordinator");
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let EventPayload::TaskAssignment { task_type, parameters, .. } = &event.payload else {
                continue;
            };
            if task_type != "reasoning_synthesis" {
                continue;
            }
            let reasoning_id = parameters["reasoning_id"].as_str().unwrap().to_string();
            coordinator_bus.emit(Event::new(
                "coordinator",
                "coordinator",
                EventPayload::Synthesis {
                    reasoning_id,
                    synthesis: "both analysts agree".into(),
                    final_conclusion: "reachable".into(),
                    supporting_analyses: parameters["analyses"].as_array().cloned().unwrap_or_default(),
                    confidence: 0.85,
                },
            ));
        }
    });

    let pattern = ParallelReasoningPattern::new(bus.clone()).with_config(ParallelReasoningConfig {
        analysis_timeout: Duration::from_secs(2),
        synthesis_timeout: Duration::from_secs(2),
        min_analyses: 2,
    });
    let analysts = vec![
        Analyst::new("analyst_1"),
        Analyst::new("analyst_2").with_priority(ReasoningPriority::High),
    ];
    let outcome = pattern
        .execute(
            &analysts,
            "coordinator",
            "is the finding reachable",
            serde_json::json!({}),
            None,
            ReasoningPriority::High,
        )
        .await
        .unwrap();

    assert!(outcome.completed);
    assert!(outcome.timeout.is_none());
    assert_eq!(outcome.analyses.len(), 2);
    let synthesis = outcome.synthesis.unwrap();
    assert_eq!(synthesis.conclusion, "reachable");
    assert_eq!(synthesis.supporting_analyses.len(), 2);
}

#[tokio::test]
async fn parallel_reasoning_requires_enough_analysts() {
    let bus = Arc::new(EventBus::new());
    let pattern = ParallelReasoningPattern::new(bus);
    let result = pattern
        .execute(
            &[Analyst::new("only_one")],
            "coordinator",
            "problem",
            serde_json::json!({}),
            None,
            ReasoningPriority::Medium,
        )
        .await;
    assert!(result.is_err());
}
