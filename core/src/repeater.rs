//! GoalRepeater (C5): runs a wrapped goal up to N times, succeeding
//! iff all N runs complete within the repeater's own duration window
//! (spec §4.5). `min_duration` applies to the repeater exactly as to
//! a plain `Goal` (SPEC_FULL.md §C.4, grounded on `goalee/repeater.py`'s
//! `enter()` override).

use crate::goal::{Goal, GoalKind, GoalState, GoalTiming, RepeaterData};
use std::sync::Arc;
use std::time::Instant;

/// Wrap `child` to run `repeat_count` times. Propagates the
/// repeater's `tick_freq_hz` down to the child (spec §4.5).
pub fn repeater(child: Arc<Goal>, repeat_count: u32, timing: GoalTiming) -> Arc<Goal> {
    let mut child_timing = child.timing();
    child_timing.tick_freq_hz = timing.tick_freq_hz;
    child.set_timing(child_timing);
    Goal::new(GoalKind::Repeater(RepeaterData { child, repeat_count }), timing)
}

/// Drives a `GoalKind::Repeater` goal's child through `repeat_count`
/// reset-and-reenter cycles. Called from `Goal::enter()`.
pub(crate) async fn run(goal: &Arc<Goal>) -> GoalState {
    let (child, repeat_count) = {
        let kind = goal.kind.lock();
        match &*kind {
            GoalKind::Repeater(r) => (r.child.clone(), r.repeat_count),
            _ => unreachable!("repeater::run called on a non-Repeater goal"),
        }
    };

    let timing = goal.timing();
    let deadline = timing.max_duration.map(|d| Instant::now() + d);
    let mut successes = 0u32;

    for _ in 0..repeat_count {
        if let Some(dl) = deadline {
            if Instant::now() >= dl {
                break;
            }
        }
        if child.state() != GoalState::Idle {
            child.reset();
        }
        let state = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                match tokio::time::timeout(remaining, child.enter()).await {
                    Ok(s) => s,
                    Err(_) => {
                        child.terminate();
                        child.state()
                    }
                }
            }
            None => child.enter().await,
        };
        if state == GoalState::Completed {
            successes += 1;
        } else {
            break;
        }
    }

    if successes == repeat_count {
        GoalState::Completed
    } else {
        GoalState::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{AttributeMode, Entity};
    use goalkeeper_broker::BrokerDescriptor;
    use std::time::Duration;

    fn sonar() -> Arc<Entity> {
        Entity::with_mode("front_sonar", "sonar", "telemetry/front_sonar", BrokerDescriptor::redis("localhost"), vec!["range".to_string()], AttributeMode::Lax)
    }

    #[tokio::test(start_paused = true)]
    async fn all_runs_must_complete_within_window() {
        let entity = sonar();
        let child = crate::goal::entity_state_change(entity.clone(), GoalTiming::new().with_max_duration(Duration::from_secs(5)).with_tick_freq_hz(20.0));
        let rep = repeater(child, 3, GoalTiming::new().with_max_duration(Duration::from_secs(10)).with_tick_freq_hz(20.0));

        let r = rep.clone();
        let handle = tokio::spawn(async move { r.enter().await });

        for i in 0..3u32 {
            tokio::time::advance(Duration::from_millis(50)).await;
            entity.update_state(&serde_json::json!({"range": i as f64}));
            tokio::time::advance(Duration::from_millis(50)).await;
        }

        assert_eq!(handle.await.unwrap(), GoalState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn one_run_timing_out_fails_the_repeater() {
        let entity = sonar();
        let child = crate::goal::entity_state_change(entity, GoalTiming::new().with_max_duration(Duration::from_millis(100)).with_tick_freq_hz(20.0));
        let rep = repeater(child, 2, GoalTiming::new().with_max_duration(Duration::from_secs(5)).with_tick_freq_hz(20.0));
        let r = rep.clone();
        let handle = tokio::spawn(async move { r.enter().await });
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(handle.await.unwrap(), GoalState::Failed);
    }
}
