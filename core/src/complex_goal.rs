//! ComplexGoal (C4): composite goal evaluating a set of child goals
//! under a quantifier algorithm (spec §4.4).
//!
//! `EXACTLY_X_ACCOMPLISHED` and `EXACTLY_X_ACCOMPLISHED_ORDERED` are
//! kept as distinct enum discriminants even though both carry the same
//! `usize` payload shape — some `goalee` revisions collapse them onto
//! one integer value, which spec §9 and SPEC_FULL.md §E call out as a
//! bug not to replicate.

use crate::goal::{ComplexData, Goal, GoalKind, GoalState, GoalTiming};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexAlgorithm {
    AllAccomplished,
    AllAccomplishedOrdered,
    NoneAccomplished,
    AtLeastOneAccomplished,
    ExactlyXAccomplished(usize),
    ExactlyXAccomplishedOrdered(usize),
}

impl ComplexAlgorithm {
    fn is_ordered(self) -> bool {
        matches!(self, ComplexAlgorithm::AllAccomplishedOrdered | ComplexAlgorithm::ExactlyXAccomplishedOrdered(_))
    }

    /// "Overall max_duration bounded except for NONE / EXACTLY_X
    /// algorithms (where a long healthy period is desirable)" (spec
    /// §4.4) — those two run out the full window by design, so a
    /// sibling hitting its own `max_duration` isn't itself a scenario
    /// failure signal for this composite. The runner still honors the
    /// composite's *own* `max_duration` as a hard outer bound either
    /// way; this only controls whether children are cut short early.
    fn runs_full_window(self) -> bool {
        matches!(self, ComplexAlgorithm::NoneAccomplished | ComplexAlgorithm::ExactlyXAccomplished(_))
    }
}

/// Wrap `children` under `algorithm`. Clamps each child's
/// `max_duration` down to the composite's bound and lifts each
/// child's `min_duration` up to the composite's floor, logging each
/// change (spec §4.4).
pub fn complex_goal(children: Vec<Arc<Goal>>, algorithm: ComplexAlgorithm, timing: GoalTiming) -> Arc<Goal> {
    for child in &children {
        let mut child_timing = child.timing();
        if let Some(cap) = timing.max_duration {
            if child_timing.max_duration.map_or(true, |m| m > cap) {
                warn!(child = %child.name(), bound = ?cap, "clamping child max_duration to composite bound");
                child_timing.max_duration = Some(cap);
            }
        }
        if let Some(floor) = timing.min_duration {
            if child_timing.min_duration.map_or(true, |m| m < floor) {
                warn!(child = %child.name(), bound = ?floor, "lifting child min_duration to composite bound");
                child_timing.min_duration = Some(floor);
            }
        }
        child.set_timing(child_timing);
    }
    Goal::new(GoalKind::Complex(ComplexData { children, algorithm }), timing)
}

/// Drives a `GoalKind::Complex` goal's children to completion,
/// applying the quantifier and returning the composite's terminal
/// state. Called from `Goal::enter()`.
pub(crate) async fn run(goal: &Arc<Goal>) -> GoalState {
    let (children, algorithm) = {
        let kind = goal.kind.lock();
        match &*kind {
            GoalKind::Complex(c) => (c.children.clone(), c.algorithm),
            _ => unreachable!("complex_goal::run called on a non-Complex goal"),
        }
    };

    let timing = goal.timing();
    let deadline = if algorithm.runs_full_window() { None } else { timing.max_duration.map(|d| Instant::now() + d) };

    let completed = if algorithm.is_ordered() {
        run_ordered(&children, deadline).await
    } else {
        run_unordered(&children, algorithm, deadline).await
    };

    let n = children.len();
    let success = match algorithm {
        ComplexAlgorithm::AllAccomplished | ComplexAlgorithm::AllAccomplishedOrdered => completed == n,
        ComplexAlgorithm::NoneAccomplished => completed == 0,
        ComplexAlgorithm::AtLeastOneAccomplished => completed >= 1,
        ComplexAlgorithm::ExactlyXAccomplished(x) | ComplexAlgorithm::ExactlyXAccomplishedOrdered(x) => completed == x,
    };
    if success {
        GoalState::Completed
    } else {
        GoalState::Failed
    }
}

async fn bounded_enter(child: Arc<Goal>, deadline: Option<Instant>) -> GoalState {
    match deadline {
        Some(dl) => {
            let remaining = dl.saturating_duration_since(Instant::now());
            if remaining == Duration::ZERO {
                child.terminate();
                return child.state();
            }
            match tokio::time::timeout(remaining, child.enter()).await {
                Ok(state) => state,
                Err(_) => {
                    child.terminate();
                    child.state()
                }
            }
        }
        None => child.enter().await,
    }
}

/// "Ordered algorithms run children sequentially, aborting the
/// remainder and FAILING if max_duration is exhausted" (spec §4.4).
async fn run_ordered(children: &[Arc<Goal>], deadline: Option<Instant>) -> usize {
    let mut completed = 0;
    let mut aborted_early = false;
    for child in children {
        if aborted_early {
            child.terminate();
            continue;
        }
        let state = bounded_enter(child.clone(), deadline).await;
        if state == GoalState::Completed {
            completed += 1;
        } else {
            aborted_early = true;
        }
    }
    completed
}

/// "Unordered algorithms run children in parallel worker tasks... with
/// an as_completed-style collection bounded by max_duration. For
/// AT_LEAST_ONE_ACCOMPLISHED, the composite terminates all still-
/// running children as soon as the first child reports COMPLETED"
/// (spec §4.4, testable property 5).
async fn run_unordered(children: &[Arc<Goal>], algorithm: ComplexAlgorithm, deadline: Option<Instant>) -> usize {
    let mut set = JoinSet::new();
    for child in children.iter().cloned() {
        set.spawn(async move {
            let state = bounded_enter(child.clone(), deadline).await;
            (child, state)
        });
    }

    let early_stop = algorithm == ComplexAlgorithm::AtLeastOneAccomplished;
    let mut completed = 0;
    while let Some(joined) = set.join_next().await {
        let Ok((_child, state)) = joined else { continue };
        if state == GoalState::Completed {
            completed += 1;
            if early_stop {
                break;
            }
        }
    }

    if early_stop {
        for child in children {
            if !child.state().is_terminal() {
                child.terminate();
            }
        }
        set.abort_all();
    }

    completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{AttributeMode, Entity};
    use goalkeeper_broker::BrokerDescriptor;
    use std::collections::HashMap;

    fn entity(name: &str) -> Arc<Entity> {
        Entity::with_mode(name, "sonar", format!("telemetry/{name}"), BrokerDescriptor::redis("localhost"), vec!["range".to_string()], AttributeMode::Lax)
    }

    #[tokio::test(start_paused = true)]
    async fn at_least_one_early_stop_terminates_siblings() {
        // S4: g1 range>5 on FrontSonar, g2 range>10 on RearSonar,
        // max_duration=30. FrontSonar publishes range=7 at t=1.
        let front = entity("front_sonar");
        let rear = entity("rear_sonar");

        let mut e1 = HashMap::new();
        e1.insert("front_sonar".to_string(), front.clone());
        let g1 = crate::goal::entity_state_condition_expr(e1, "front_sonar.range > 5", GoalTiming::new().with_max_duration(Duration::from_secs(30))).unwrap();

        let mut e2 = HashMap::new();
        e2.insert("rear_sonar".to_string(), rear.clone());
        let g2 = crate::goal::entity_state_condition_expr(e2, "rear_sonar.range > 10", GoalTiming::new().with_max_duration(Duration::from_secs(30))).unwrap();

        let composite = complex_goal(vec![g1.clone(), g2.clone()], ComplexAlgorithm::AtLeastOneAccomplished, GoalTiming::new().with_max_duration(Duration::from_secs(30)));

        let c = composite.clone();
        let handle = tokio::spawn(async move { c.enter().await });

        tokio::time::advance(Duration::from_secs(1)).await;
        front.update_state(&serde_json::json!({"range": 7.0}));
        tokio::time::advance(Duration::from_millis(200)).await;

        assert_eq!(handle.await.unwrap(), GoalState::Completed);
        assert_eq!(g1.state(), GoalState::Completed);
        assert_eq!(g2.state(), GoalState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn all_accomplished_requires_every_child() {
        let e = entity("front_sonar");
        let mut entities = HashMap::new();
        entities.insert("front_sonar".to_string(), e.clone());
        let g1 = crate::goal::entity_state_condition_expr(entities.clone(), "front_sonar.range > 5", GoalTiming::new().with_max_duration(Duration::from_millis(500))).unwrap();
        let g2 = crate::goal::entity_state_condition_expr(entities, "front_sonar.range > 100", GoalTiming::new().with_max_duration(Duration::from_millis(500))).unwrap();

        let composite = complex_goal(vec![g1, g2], ComplexAlgorithm::AllAccomplished, GoalTiming::new().with_max_duration(Duration::from_secs(1)));
        let c = composite.clone();
        let handle = tokio::spawn(async move { c.enter().await });
        e.update_state(&serde_json::json!({"range": 7.0}));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(handle.await.unwrap(), GoalState::Failed);
    }
}
