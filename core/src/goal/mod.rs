//! Goal — base lifecycle (C3). One algebraic `GoalKind` behind a
//! common state machine (spec §9: "Re-architect as one algebraic
//! variant... behind a common contract `{enter, tick, terminate,
//! reset, serialize}`. The supervisor code depends only on the
//! contract.").
//!
//! `ComplexGoal` (C4) and `GoalRepeater` (C5) are `GoalKind` variants
//! too, but their `enter()` is driven by `crate::complex_goal` /
//! `crate::repeater` instead of the generic tick loop in this module
//! (those kinds need to drive child `Goal`s, not evaluate a predicate).

pub mod kinds;

pub use kinds::{
    AreaData, AttrStreamData, AttrStreamStrategy, ComplexData, ConditionFn, GoalKind, MovingAreaData, OrientationData,
    PollOutcome, PoseData, PositionData, RepeaterData, StateChangeData, StateConditionData, TopicMessageData,
    TopicMessageParamData, WaypointsData,
};

use crate::area::{AreaTag, Circle, Rectangle};
use crate::entity::Entity;
use crate::error::{GoalkeeperError, Result};
use crate::expr::ConditionExpr;
use crate::rtmonitor::{EventMsg, RtMonitor};
use crate::topic::RawTopicWatcher;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// IDLE → RUNNING → {COMPLETED, FAILED, TERMINATED}, re-entrant only
/// via `Goal::reset()` (spec §3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalState {
    Idle,
    Running,
    Completed,
    Failed,
    Terminated,
}

impl GoalState {
    pub fn is_terminal(self) -> bool {
        matches!(self, GoalState::Completed | GoalState::Failed | GoalState::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GoalState::Idle => "IDLE",
            GoalState::Running => "RUNNING",
            GoalState::Completed => "COMPLETED",
            GoalState::Failed => "FAILED",
            GoalState::Terminated => "TERMINATED",
        }
    }
}

/// The base goal's timing knobs (spec §3). `Copy` so that
/// `ComplexGoal`/`GoalRepeater` construction can clamp a child's
/// bounds in place (spec §4.4) without fighting the borrow checker.
#[derive(Debug, Clone, Copy)]
pub struct GoalTiming {
    pub max_duration: Option<Duration>,
    pub min_duration: Option<Duration>,
    pub for_duration: Option<Duration>,
    pub tick_freq_hz: f64,
}

impl Default for GoalTiming {
    fn default() -> Self {
        Self {
            max_duration: None,
            min_duration: None,
            for_duration: None,
            tick_freq_hz: crate::config::DEFAULT_TICK_FREQ_HZ,
        }
    }
}

impl GoalTiming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_duration(mut self, d: Duration) -> Self {
        self.max_duration = Some(d);
        self
    }

    pub fn with_min_duration(mut self, d: Duration) -> Self {
        self.min_duration = Some(d);
        self
    }

    pub fn with_for_duration(mut self, d: Duration) -> Self {
        self.for_duration = Some(d);
        self
    }

    pub fn with_tick_freq_hz(mut self, hz: f64) -> Self {
        self.tick_freq_hz = hz;
        self
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_freq_hz)
    }
}

/// A time-bounded predicate with a lifecycle (spec §3, §4.3). Owned
/// uniquely by whatever holds it (a `Scenario`, a `ComplexGoal`, a
/// `GoalRepeater`); its `Entity` references are shared (spec §9
/// "Cyclic references").
pub struct Goal {
    name: String,
    pub(crate) timing: RwLock<GoalTiming>,
    pub(crate) kind: Mutex<GoalKind>,
    state: RwLock<GoalState>,
    ts_start: RwLock<Option<Instant>>,
    ts_hold: RwLock<Option<Instant>>,
    duration: RwLock<Option<Duration>>,
    cancel: RwLock<CancellationToken>,
    monitor: RwLock<Option<Arc<RtMonitor>>>,
}

impl Goal {
    pub fn new(kind: GoalKind, timing: GoalTiming) -> Arc<Self> {
        Self::named(Uuid::new_v4().to_string(), kind, timing)
    }

    pub fn named(name: impl Into<String>, kind: GoalKind, timing: GoalTiming) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            timing: RwLock::new(timing),
            kind: Mutex::new(kind),
            state: RwLock::new(GoalState::Idle),
            ts_start: RwLock::new(None),
            ts_hold: RwLock::new(None),
            duration: RwLock::new(None),
            cancel: RwLock::new(CancellationToken::new()),
            monitor: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.lock().kind_name()
    }

    pub fn state(&self) -> GoalState {
        *self.state.read()
    }

    /// `status` (spec §3): true iff the goal reached COMPLETED.
    pub fn status(&self) -> bool {
        self.state() == GoalState::Completed
    }

    pub fn duration(&self) -> Option<Duration> {
        *self.duration.read()
    }

    pub fn timing(&self) -> GoalTiming {
        *self.timing.read()
    }

    pub(crate) fn set_timing(&self, timing: GoalTiming) {
        *self.timing.write() = timing;
    }

    /// Attaches the RT monitor, recursing into composite children so
    /// that a `ComplexGoal`/`GoalRepeater`'s own nested goals also
    /// publish `goal_state` transitions.
    pub fn attach_monitor(&self, monitor: Arc<RtMonitor>) {
        *self.monitor.write() = Some(monitor.clone());
        let kind = self.kind.lock();
        match &*kind {
            GoalKind::Complex(c) => {
                let children = c.children.clone();
                drop(kind);
                for child in &children {
                    child.attach_monitor(monitor.clone());
                }
            }
            GoalKind::Repeater(r) => {
                let child = r.child.clone();
                drop(kind);
                child.attach_monitor(monitor);
            }
            _ => {}
        }
    }

    /// The entities this goal (and, recursively, its children) reads.
    /// Used by `Scenario::build_entity_list` to compute the
    /// deduplicated union (spec §3, §4.6).
    pub fn entities(&self) -> Vec<Arc<Entity>> {
        let kind = self.kind.lock();
        let direct = match &*kind {
            GoalKind::Complex(c) => {
                let mut out: Vec<Arc<Entity>> = Vec::new();
                for child in &c.children {
                    for e in child.entities() {
                        if !out.iter().any(|o| o.name() == e.name()) {
                            out.push(e);
                        }
                    }
                }
                return out;
            }
            GoalKind::Repeater(r) => return r.child.entities(),
            other => other.direct_entities(),
        };
        direct
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.read().clone()
    }

    fn elapsed(&self) -> Duration {
        match *self.ts_start.read() {
            Some(start) => start.elapsed(),
            None => Duration::ZERO,
        }
    }

    /// IDLE → RUNNING → a terminal state. Returns the terminal state
    /// reached; a no-op (returns the current state) if the goal is
    /// not IDLE.
    pub async fn enter(self: &Arc<Self>) -> GoalState {
        {
            let mut state = self.state.write();
            if *state != GoalState::Idle {
                return *state;
            }
            *state = GoalState::Running;
        }
        *self.ts_start.write() = Some(Instant::now());
        self.emit_state_event();

        let is_complex = matches!(&*self.kind.lock(), GoalKind::Complex(_));
        let is_repeater = matches!(&*self.kind.lock(), GoalKind::Repeater(_));

        let mut final_state = if is_complex {
            crate::complex_goal::run(self).await
        } else if is_repeater {
            crate::repeater::run(self).await
        } else {
            self.run_leaf().await
        };

        // "On exit, if min_duration set and elapsed below -> FAILED"
        // (spec §4.3) applies uniformly, including to composites
        // (SPEC_FULL.md §C.4).
        if final_state == GoalState::Completed {
            if let Some(min) = self.timing().min_duration {
                if self.elapsed() < min {
                    final_state = GoalState::Failed;
                }
            }
        }

        *self.duration.write() = Some(self.elapsed());
        *self.state.write() = final_state;
        self.emit_state_event();
        final_state
    }

    /// External cancellation (spec §5, §9): flips state to
    /// TERMINATED and cascades into any not-yet-terminal children.
    pub fn terminate(self: &Arc<Self>) {
        self.cancel.read().cancel();
        {
            let kind = self.kind.lock();
            match &*kind {
                GoalKind::Complex(c) => {
                    for child in &c.children {
                        child.terminate();
                    }
                }
                GoalKind::Repeater(r) => r.child.terminate(),
                _ => {}
            }
        }
        let mut state = self.state.write();
        if !state.is_terminal() {
            *state = GoalState::Terminated;
            drop(state);
            *self.duration.write() = Some(self.elapsed());
            self.emit_state_event();
        }
    }

    /// Re-entrant reset (required for `GoalRepeater`, spec §4.5):
    /// back to IDLE with zeroed bookkeeping and a fresh cancellation
    /// token, recursing into composite children.
    pub fn reset(self: &Arc<Self>) {
        *self.state.write() = GoalState::Idle;
        *self.ts_start.write() = None;
        *self.ts_hold.write() = None;
        *self.duration.write() = None;
        *self.cancel.write() = CancellationToken::new();
        let mut kind = self.kind.lock();
        match &mut *kind {
            GoalKind::Complex(c) => {
                let children = c.children.clone();
                drop(kind);
                for child in &children {
                    child.reset();
                }
            }
            GoalKind::Repeater(r) => {
                let child = r.child.clone();
                drop(kind);
                child.reset();
            }
            other => other.reset_state(),
        }
    }

    fn emit_state_event(&self) {
        let Some(monitor) = self.monitor.read().clone() else { return };
        let entities: Vec<String> = self.entities().iter().map(|e| e.name().to_string()).collect();
        monitor.emit(EventMsg {
            event_type: "goal_state".to_string(),
            data: json!({
                "name": self.name,
                "type": self.kind_name(),
                "state": self.state().as_str(),
                "entities": entities,
            }),
        });
    }

    /// The generic tick loop for every non-composite `GoalKind`
    /// (spec §4.3): polls at `tick_freq_hz`, applies the hold window,
    /// and enforces `max_duration`.
    async fn run_leaf(self: &Arc<Self>) -> GoalState {
        let timing = self.timing();
        let cancel = self.cancel_token();
        loop {
            if cancel.is_cancelled() {
                return GoalState::Terminated;
            }

            if let Some(max) = timing.max_duration {
                if self.elapsed() > max {
                    let success_on_timeout = self.kind.lock().success_on_timeout();
                    info!(goal = %self.name, max_duration = ?max, "goal timed out");
                    return if success_on_timeout { GoalState::Completed } else { GoalState::Failed };
                }
            }

            let outcome = {
                let mut kind = self.kind.lock();
                match kind.poll() {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(goal = %self.name, error = %e, "predicate error, treating tick as not satisfied");
                        PollOutcome::Pending
                    }
                }
            };

            match outcome {
                PollOutcome::Pending => {
                    *self.ts_hold.write() = None;
                }
                PollOutcome::Satisfied | PollOutcome::Violated => {
                    let now = Instant::now();
                    let started = {
                        let mut hold = self.ts_hold.write();
                        *hold.get_or_insert(now)
                    };
                    let held_for = now.duration_since(started);
                    let hold_satisfied = timing.for_duration.map_or(true, |h| held_for >= h);
                    if hold_satisfied {
                        return if outcome == PollOutcome::Satisfied { GoalState::Completed } else { GoalState::Failed };
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(timing.period()) => {}
                _ = cancel.cancelled() => return GoalState::Terminated,
            }
        }
    }
}

// --- Factory constructors: one per spec §4.3 goal variant, matching
// the "Scenario public API surface" in spec §6. ---

pub fn entity_state_change(entity: Arc<Entity>, timing: GoalTiming) -> Arc<Goal> {
    Goal::new(GoalKind::StateChange(StateChangeData::new(entity)), timing)
}

pub fn entity_state_condition_expr(
    entities: HashMap<String, Arc<Entity>>,
    expression: &str,
    timing: GoalTiming,
) -> Result<Arc<Goal>> {
    let condition = ConditionExpr::parse(expression)?;
    Ok(Goal::new(
        GoalKind::StateCondition(StateConditionData { entities, condition: ConditionFn::Expr(condition) }),
        timing,
    ))
}

pub fn entity_state_condition_fn(
    entities: HashMap<String, Arc<Entity>>,
    condition: Arc<dyn Fn(&HashMap<String, Arc<Entity>>) -> bool + Send + Sync>,
    timing: GoalTiming,
) -> Arc<Goal> {
    Goal::new(GoalKind::StateCondition(StateConditionData { entities, condition: ConditionFn::Closure(condition) }), timing)
}

pub fn entity_attr_stream(
    entity: Arc<Entity>,
    attr: impl Into<String>,
    values: Vec<serde_json::Value>,
    strategy: AttrStreamStrategy,
    timing: GoalTiming,
) -> Arc<Goal> {
    Goal::new(GoalKind::AttrStream(AttrStreamData::new(entity, attr, values, strategy)), timing)
}

pub fn rectangle_area(monitored: Vec<Arc<Entity>>, rectangle: Rectangle, tag: AreaTag, timing: GoalTiming) -> Arc<Goal> {
    Goal::new(GoalKind::Rectangle(AreaData::new(monitored, rectangle, tag)), timing)
}

pub fn circular_area(monitored: Vec<Arc<Entity>>, circle: Circle, tag: AreaTag, timing: GoalTiming) -> Arc<Goal> {
    Goal::new(GoalKind::Circle(AreaData::new(monitored, circle, tag)), timing)
}

pub fn moving_area(
    monitored: Vec<Arc<Entity>>,
    motion_entity: Arc<Entity>,
    radius: f64,
    tag: AreaTag,
    timing: GoalTiming,
) -> Arc<Goal> {
    Goal::new(GoalKind::MovingCircle(MovingAreaData::new(monitored, motion_entity, radius, tag)), timing)
}

pub fn position_goal(entity: Arc<Entity>, target: (f64, f64, f64), deviation: f64, timing: GoalTiming) -> Arc<Goal> {
    Goal::new(GoalKind::Position(PositionData { entity, target, deviation }), timing)
}

pub fn orientation_goal(entity: Arc<Entity>, target: (f64, f64, f64), deviation: f64, timing: GoalTiming) -> Arc<Goal> {
    Goal::new(GoalKind::Orientation(OrientationData { entity, target, deviation }), timing)
}

pub fn pose_goal(
    entity: Arc<Entity>,
    target_position: (f64, f64, f64),
    target_orientation: (f64, f64, f64),
    deviation: f64,
    timing: GoalTiming,
) -> Arc<Goal> {
    Goal::new(GoalKind::Pose(PoseData { entity, target_position, target_orientation, deviation }), timing)
}

pub fn waypoint_trajectory(entity: Arc<Entity>, waypoints: Vec<(f64, f64, f64)>, deviation: f64, timing: GoalTiming) -> Arc<Goal> {
    Goal::new(GoalKind::Waypoints(WaypointsData::new(entity, waypoints, deviation)), timing)
}

pub fn topic_message_received(watcher: Arc<RawTopicWatcher>, timing: GoalTiming) -> Arc<Goal> {
    Goal::new(GoalKind::TopicMessage(TopicMessageData { watcher }), timing)
}

pub fn topic_message_param(
    watcher: Arc<RawTopicWatcher>,
    predicate: Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>,
    timing: GoalTiming,
) -> Arc<Goal> {
    Goal::new(GoalKind::TopicMessageParam(TopicMessageParamData { watcher, predicate }), timing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::AttributeMode;
    use goalkeeper_broker::BrokerDescriptor;
    use std::time::Duration;

    fn sonar() -> Arc<Entity> {
        Entity::with_mode(
            "front_sonar",
            "sonar",
            "telemetry/front_sonar",
            BrokerDescriptor::redis("localhost"),
            vec!["range".to_string()],
            AttributeMode::Lax,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn condition_with_hold_completes_after_two_seconds() {
        // S1: range>5 held for 2.0s, publishing range=3 at t=0, 7 at
        // t=1, 7 again at t=2.5.
        let entity = sonar();
        let mut entities = HashMap::new();
        entities.insert("front_sonar".to_string(), entity.clone());
        let goal = entity_state_condition_expr(
            entities,
            "front_sonar.range > 5",
            GoalTiming::new().with_for_duration(Duration::from_secs_f64(2.0)).with_max_duration(Duration::from_secs_f64(10.0)).with_tick_freq_hz(10.0),
        )
        .unwrap();

        let g = goal.clone();
        let handle = tokio::spawn(async move { g.enter().await });

        entity.update_state(&serde_json::json!({"range": 3.0}));
        tokio::time::advance(Duration::from_secs_f64(1.0)).await;
        entity.update_state(&serde_json::json!({"range": 7.0}));
        tokio::time::advance(Duration::from_secs_f64(1.5)).await;
        entity.update_state(&serde_json::json!({"range": 7.0}));
        tokio::time::advance(Duration::from_secs_f64(2.0)).await;

        let state = handle.await.unwrap();
        assert_eq!(state, GoalState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_without_satisfying_condition_fails() {
        let entity = sonar();
        let mut entities = HashMap::new();
        entities.insert("front_sonar".to_string(), entity.clone());
        let goal = entity_state_condition_expr(
            entities,
            "front_sonar.range > 5",
            GoalTiming::new().with_max_duration(Duration::from_secs_f64(1.0)).with_tick_freq_hz(10.0),
        )
        .unwrap();

        let g = goal.clone();
        let handle = tokio::spawn(async move { g.enter().await });
        tokio::time::advance(Duration::from_secs_f64(2.0)).await;
        assert_eq!(handle.await.unwrap(), GoalState::Failed);
    }

    #[tokio::test]
    async fn terminate_before_enter_is_terminal_immediately() {
        let entity = sonar();
        let goal = entity_state_change(entity, GoalTiming::new());
        goal.terminate();
        assert_eq!(goal.state(), GoalState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_allows_re_entry() {
        let entity = sonar();
        let goal = entity_state_change(entity.clone(), GoalTiming::new().with_max_duration(Duration::from_millis(200)).with_tick_freq_hz(20.0));
        let g = goal.clone();
        let handle = tokio::spawn(async move { g.enter().await });
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(handle.await.unwrap(), GoalState::Failed);

        goal.reset();
        assert_eq!(goal.state(), GoalState::Idle);
        let g2 = goal.clone();
        let handle2 = tokio::spawn(async move { g2.enter().await });
        tokio::time::advance(Duration::from_millis(10)).await;
        entity.update_state(&serde_json::json!({"range": 1.0}));
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(handle2.await.unwrap(), GoalState::Completed);
    }
}
