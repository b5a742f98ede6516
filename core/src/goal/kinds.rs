//! The algebraic `GoalKind` variant set (spec §9 design note): one
//! enum instead of an inheritance hierarchy, each variant carrying its
//! own mutable predicate state. `Goal` (in `super`) owns the common
//! lifecycle; this module only answers "what does this tick mean".

use super::Goal;
use crate::area::{AreaTag, Circle, Rectangle};
use crate::entity::Entity;
use crate::error::GoalkeeperError;
use crate::expr::{ConditionExpr, ExprContext};
use crate::topic::RawTopicWatcher;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a tick observed, richer than a plain bool so that AVOID-style
/// goals (and `EntityAttrStream::None`) can drive the base loop toward
/// FAILED instead of COMPLETED (spec §9: "treat AVOID as hold the
/// invariant `dist > radius`... a violation ... ⇒ FAILED").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing notable this tick; clears any in-progress hold window.
    Pending,
    /// The goal's positive condition holds this tick; feeds the hold
    /// window toward COMPLETED.
    Satisfied,
    /// The goal's negative condition holds this tick; feeds a hold
    /// window toward FAILED.
    Violated,
}

pub enum ConditionFn {
    Expr(ConditionExpr),
    Closure(Arc<dyn Fn(&HashMap<String, Arc<Entity>>) -> bool + Send + Sync>),
}

struct EntityMapCtx<'a>(&'a HashMap<String, Arc<Entity>>);

impl ExprContext for EntityMapCtx<'_> {
    fn attr(&self, entity: &str, attr: &str) -> Option<f64> {
        self.0.get(entity)?.get_attr(attr)?.as_f64()
    }

    fn buffer(&self, entity: &str, attr: &str, n: usize) -> Result<Vec<f64>, GoalkeeperError> {
        match self.0.get(entity) {
            Some(e) => e.get_buffer(attr, n),
            None => Ok(vec![0.0; n]),
        }
    }
}

/// `EntityAttrStream`'s seven strategies (spec §4.3; NONE grounded on
/// the same "long healthy period" idea spec §4.4 applies to
/// ComplexGoal's NONE/EXACTLY_X algorithms).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrStreamStrategy {
    All,
    AllOrdered,
    None,
    AtLeastOne,
    JustOne,
    ExactlyX(usize),
    ExactlyXOrdered(usize),
}

pub struct StateChangeData {
    pub entity: Arc<Entity>,
    previous: Option<HashMap<String, Value>>,
}

impl StateChangeData {
    pub fn new(entity: Arc<Entity>) -> Self {
        Self { entity, previous: None }
    }

    fn poll(&mut self) -> PollOutcome {
        let snapshot = self.entity.snapshot();
        match self.previous.replace(snapshot.clone()) {
            None => PollOutcome::Pending,
            Some(prev) if prev == snapshot => PollOutcome::Pending,
            Some(_) => PollOutcome::Satisfied,
        }
    }
}

pub struct StateConditionData {
    pub entities: HashMap<String, Arc<Entity>>,
    pub condition: ConditionFn,
}

impl StateConditionData {
    fn poll(&mut self) -> Result<PollOutcome, GoalkeeperError> {
        let satisfied = match &self.condition {
            ConditionFn::Expr(expr) => expr.eval(&EntityMapCtx(&self.entities))?,
            ConditionFn::Closure(f) => f(&self.entities),
        };
        Ok(if satisfied { PollOutcome::Satisfied } else { PollOutcome::Pending })
    }
}

pub struct AttrStreamData {
    pub entity: Arc<Entity>,
    pub attr: String,
    expected: Vec<Value>,
    strategy: AttrStreamStrategy,
    seen: Vec<bool>,
    cursor: usize,
    last_observed: Option<Value>,
}

impl AttrStreamData {
    pub fn new(entity: Arc<Entity>, attr: impl Into<String>, expected: Vec<Value>, strategy: AttrStreamStrategy) -> Self {
        let len = expected.len();
        Self { entity, attr: attr.into(), expected, strategy, seen: vec![false; len], cursor: 0, last_observed: None }
    }

    pub fn success_on_timeout(&self) -> bool {
        matches!(self.strategy, AttrStreamStrategy::None)
    }

    fn reset(&mut self) {
        self.seen = vec![false; self.expected.len()];
        self.cursor = 0;
        self.last_observed = None;
    }

    fn observe_new_value(&mut self, value: Value) {
        match self.strategy {
            AttrStreamStrategy::AllOrdered | AttrStreamStrategy::ExactlyXOrdered(_) => {
                if self.cursor < self.expected.len() && self.expected[self.cursor] == value {
                    self.seen[self.cursor] = true;
                    self.cursor += 1;
                } else if let Some(j) = self.expected.iter().position(|e| *e == value) {
                    // Out-of-order hit: clears that slot's mark (invariant 7).
                    if self.seen[j] {
                        self.seen[j] = false;
                        if j < self.cursor {
                            self.cursor = self.seen.iter().position(|s| !*s).unwrap_or(self.seen.len());
                        }
                    }
                }
            }
            _ => {
                if let Some(j) = self.expected.iter().position(|e| *e == value) {
                    self.seen[j] = true;
                }
            }
        }
    }

    fn poll(&mut self) -> PollOutcome {
        if let Some(current) = self.entity.get_attr(&self.attr) {
            if self.last_observed.as_ref() != Some(&current) {
                self.last_observed = Some(current.clone());
                self.observe_new_value(current);
            }
        }

        let count = self.seen.iter().filter(|s| **s).count();
        match self.strategy {
            AttrStreamStrategy::All => {
                if self.seen.iter().all(|s| *s) {
                    PollOutcome::Satisfied
                } else {
                    PollOutcome::Pending
                }
            }
            AttrStreamStrategy::AllOrdered => {
                if self.cursor == self.expected.len() {
                    PollOutcome::Satisfied
                } else {
                    PollOutcome::Pending
                }
            }
            AttrStreamStrategy::None => {
                if count >= 1 {
                    PollOutcome::Violated
                } else {
                    PollOutcome::Pending
                }
            }
            AttrStreamStrategy::AtLeastOne => {
                if count >= 1 {
                    PollOutcome::Satisfied
                } else {
                    PollOutcome::Pending
                }
            }
            AttrStreamStrategy::JustOne => {
                if count == 1 {
                    PollOutcome::Satisfied
                } else if count > 1 {
                    PollOutcome::Violated
                } else {
                    PollOutcome::Pending
                }
            }
            AttrStreamStrategy::ExactlyX(x) => {
                if count == x {
                    PollOutcome::Satisfied
                } else if count > x {
                    PollOutcome::Violated
                } else {
                    PollOutcome::Pending
                }
            }
            AttrStreamStrategy::ExactlyXOrdered(x) => {
                if self.cursor == x {
                    PollOutcome::Satisfied
                } else if self.cursor > x {
                    PollOutcome::Violated
                } else {
                    PollOutcome::Pending
                }
            }
        }
    }
}

/// Shared geometric evaluation for Rectangle/Circle/MovingCircle.
/// EXIT and STEP need a small per-entity phase machine; ENTER and
/// AVOID only need the current inside/outside reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum StepPhase {
    #[default]
    AwaitingEnter,
    AwaitingExit,
    Done,
}

pub struct AreaData<S> {
    pub monitored: Vec<Arc<Entity>>,
    pub shape: S,
    pub tag: AreaTag,
    exited_once: HashMap<String, bool>,
    step_phase: HashMap<String, StepPhase>,
}

impl<S> AreaData<S> {
    pub fn new(monitored: Vec<Arc<Entity>>, shape: S, tag: AreaTag) -> Self {
        Self { monitored, shape, tag, exited_once: HashMap::new(), step_phase: HashMap::new() }
    }

    pub fn success_on_timeout(&self) -> bool {
        self.tag == AreaTag::Avoid
    }

    fn reset_phase(&mut self) {
        self.exited_once.clear();
        self.step_phase.clear();
    }

    fn poll_with(&mut self, contains: impl Fn(&S, (f64, f64)) -> bool) -> PollOutcome {
        match self.tag {
            AreaTag::Enter => {
                let inside = self.monitored.iter().any(|e| e.position().map(|(x, y, _)| contains(&self.shape, (x, y))).unwrap_or(false));
                if inside {
                    PollOutcome::Satisfied
                } else {
                    PollOutcome::Pending
                }
            }
            AreaTag::Avoid => {
                let violated = self.monitored.iter().any(|e| e.position().map(|(x, y, _)| contains(&self.shape, (x, y))).unwrap_or(false));
                if violated {
                    PollOutcome::Violated
                } else {
                    PollOutcome::Pending
                }
            }
            AreaTag::Exit => {
                // `exited_once` here tracks "has been seen inside at
                // least once"; a later outside reading after that is
                // the exit transition.
                let mut any_exited = false;
                for entity in &self.monitored {
                    let Some((x, y, _)) = entity.position() else { continue };
                    let inside = contains(&self.shape, (x, y));
                    let was_inside = *self.exited_once.get(entity.name()).unwrap_or(&false);
                    if inside {
                        self.exited_once.insert(entity.name().to_string(), true);
                    } else if was_inside {
                        any_exited = true;
                    }
                }
                if any_exited {
                    PollOutcome::Satisfied
                } else {
                    PollOutcome::Pending
                }
            }
            AreaTag::Step => {
                let mut done = false;
                for entity in &self.monitored {
                    let Some((x, y, _)) = entity.position() else { continue };
                    let inside = contains(&self.shape, (x, y));
                    let phase = self.step_phase.entry(entity.name().to_string()).or_default();
                    *phase = match (*phase, inside) {
                        (StepPhase::AwaitingEnter, true) => StepPhase::AwaitingExit,
                        (StepPhase::AwaitingExit, false) => StepPhase::Done,
                        (other, _) => other,
                    };
                    if *phase == StepPhase::Done {
                        done = true;
                    }
                }
                if done {
                    PollOutcome::Satisfied
                } else {
                    PollOutcome::Pending
                }
            }
        }
    }
}

impl AreaData<Rectangle> {
    fn poll(&mut self) -> PollOutcome {
        self.poll_with(|shape, point| shape.contains(point))
    }
}

impl AreaData<Circle> {
    fn poll(&mut self) -> PollOutcome {
        self.poll_with(|shape, point| shape.contains(point))
    }
}

/// MovingAreaGoal: the circle centre tracks a reference motion
/// entity's live position; that entity is excluded from `monitored`
/// (spec §4.3).
pub struct MovingAreaData {
    pub monitored: Vec<Arc<Entity>>,
    pub motion_entity: Arc<Entity>,
    pub radius: f64,
    pub tag: AreaTag,
    exited_once: HashMap<String, bool>,
    step_phase: HashMap<String, StepPhase>,
}

impl MovingAreaData {
    pub fn new(monitored: Vec<Arc<Entity>>, motion_entity: Arc<Entity>, radius: f64, tag: AreaTag) -> Self {
        Self { monitored, motion_entity, radius, tag, exited_once: HashMap::new(), step_phase: HashMap::new() }
    }

    pub fn success_on_timeout(&self) -> bool {
        self.tag == AreaTag::Avoid
    }

    fn reset_phase(&mut self) {
        self.exited_once.clear();
        self.step_phase.clear();
    }

    fn poll(&mut self) -> PollOutcome {
        let Some((cx, cy, _)) = self.motion_entity.position() else {
            return PollOutcome::Pending;
        };
        let circle = Circle { center: (cx, cy), radius: self.radius };
        let mut area = AreaData {
            monitored: self.monitored.clone(),
            shape: circle,
            tag: self.tag,
            exited_once: std::mem::take(&mut self.exited_once),
            step_phase: std::mem::take(&mut self.step_phase),
        };
        let outcome = area.poll_with(|shape, point| shape.contains(point));
        self.exited_once = area.exited_once;
        self.step_phase = area.step_phase;
        outcome
    }
}

pub struct PositionData {
    pub entity: Arc<Entity>,
    pub target: (f64, f64, f64),
    pub deviation: f64,
}

impl PositionData {
    fn poll(&mut self) -> PollOutcome {
        match self.entity.position() {
            Some((x, y, z)) => {
                let within = (x - self.target.0).abs() <= self.deviation
                    && (y - self.target.1).abs() <= self.deviation
                    && (z - self.target.2).abs() <= self.deviation;
                if within {
                    PollOutcome::Satisfied
                } else {
                    PollOutcome::Pending
                }
            }
            None => PollOutcome::Pending,
        }
    }
}

pub struct OrientationData {
    pub entity: Arc<Entity>,
    pub target: (f64, f64, f64),
    pub deviation: f64,
}

impl OrientationData {
    fn poll(&mut self) -> PollOutcome {
        match self.entity.orientation() {
            Some((r, p, y)) => {
                let within = (r - self.target.0).abs() <= self.deviation
                    && (p - self.target.1).abs() <= self.deviation
                    && (y - self.target.2).abs() <= self.deviation;
                if within {
                    PollOutcome::Satisfied
                } else {
                    PollOutcome::Pending
                }
            }
            None => PollOutcome::Pending,
        }
    }
}

pub struct PoseData {
    pub entity: Arc<Entity>,
    pub target_position: (f64, f64, f64),
    pub target_orientation: (f64, f64, f64),
    pub deviation: f64,
}

impl PoseData {
    fn poll(&mut self) -> PollOutcome {
        let pos_ok = self.entity.position().map(|(x, y, z)| {
            (x - self.target_position.0).abs() <= self.deviation
                && (y - self.target_position.1).abs() <= self.deviation
                && (z - self.target_position.2).abs() <= self.deviation
        });
        let ori_ok = self.entity.orientation().map(|(r, p, yw)| {
            (r - self.target_orientation.0).abs() <= self.deviation
                && (p - self.target_orientation.1).abs() <= self.deviation
                && (yw - self.target_orientation.2).abs() <= self.deviation
        });
        match (pos_ok, ori_ok) {
            (Some(true), Some(true)) => PollOutcome::Satisfied,
            _ => PollOutcome::Pending,
        }
    }
}

pub struct WaypointsData {
    pub entity: Arc<Entity>,
    pub waypoints: Vec<(f64, f64, f64)>,
    pub deviation: f64,
    reached: Vec<bool>,
}

impl WaypointsData {
    pub fn new(entity: Arc<Entity>, waypoints: Vec<(f64, f64, f64)>, deviation: f64) -> Self {
        let n = waypoints.len();
        Self { entity, waypoints, deviation, reached: vec![false; n] }
    }

    fn reset(&mut self) {
        self.reached = vec![false; self.waypoints.len()];
    }

    fn poll(&mut self) -> PollOutcome {
        if let Some((x, y, z)) = self.entity.position() {
            for (i, wp) in self.waypoints.iter().enumerate() {
                if self.reached[i] {
                    continue;
                }
                let within = (x - wp.0).abs() <= self.deviation && (y - wp.1).abs() <= self.deviation && (z - wp.2).abs() <= self.deviation;
                if within {
                    self.reached[i] = true;
                }
            }
        }
        if self.reached.iter().all(|r| *r) {
            PollOutcome::Satisfied
        } else {
            PollOutcome::Pending
        }
    }
}

pub struct TopicMessageData {
    pub watcher: Arc<RawTopicWatcher>,
}

impl TopicMessageData {
    fn poll(&mut self) -> PollOutcome {
        if self.watcher.received() {
            PollOutcome::Satisfied
        } else {
            PollOutcome::Pending
        }
    }
}

pub struct TopicMessageParamData {
    pub watcher: Arc<RawTopicWatcher>,
    pub predicate: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl TopicMessageParamData {
    fn poll(&mut self) -> PollOutcome {
        match self.watcher.last() {
            Some(v) if (self.predicate)(&v) => PollOutcome::Satisfied,
            _ => PollOutcome::Pending,
        }
    }
}

/// `ComplexGoal` (C4) and `GoalRepeater` (C5) are also `GoalKind`
/// variants (spec §9), but their lifecycle is orchestrated by
/// `crate::complex_goal` / `crate::repeater` rather than the generic
/// leaf tick loop, because they drive child `Goal`s instead of
/// evaluating a predicate directly.
pub struct ComplexData {
    pub children: Vec<Arc<Goal>>,
    pub algorithm: crate::complex_goal::ComplexAlgorithm,
}

pub struct RepeaterData {
    pub child: Arc<Goal>,
    pub repeat_count: u32,
}

pub enum GoalKind {
    StateChange(StateChangeData),
    StateCondition(StateConditionData),
    AttrStream(AttrStreamData),
    Rectangle(AreaData<Rectangle>),
    Circle(AreaData<Circle>),
    MovingCircle(MovingAreaData),
    Position(PositionData),
    Orientation(OrientationData),
    Pose(PoseData),
    Waypoints(WaypointsData),
    TopicMessage(TopicMessageData),
    TopicMessageParam(TopicMessageParamData),
    Complex(ComplexData),
    Repeater(RepeaterData),
}

impl GoalKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            GoalKind::StateChange(_) => "EntityStateChange",
            GoalKind::StateCondition(_) => "EntityStateCondition",
            GoalKind::AttrStream(_) => "EntityAttrStream",
            GoalKind::Rectangle(_) => "RectangleAreaGoal",
            GoalKind::Circle(_) => "CircularAreaGoal",
            GoalKind::MovingCircle(_) => "MovingAreaGoal",
            GoalKind::Position(_) => "PositionGoal",
            GoalKind::Orientation(_) => "OrientationGoal",
            GoalKind::Pose(_) => "PoseGoal",
            GoalKind::Waypoints(_) => "WaypointTrajectoryGoal",
            GoalKind::TopicMessage(_) => "TopicMessageReceivedGoal",
            GoalKind::TopicMessageParam(_) => "TopicMessageParamGoal",
            GoalKind::Complex(_) => "ComplexGoal",
            GoalKind::Repeater(_) => "GoalRepeater",
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, GoalKind::Complex(_) | GoalKind::Repeater(_))
    }

    /// Clears whatever mutable polling progress a leaf variant has
    /// accumulated (partial stream matches, area phase tracking, seen
    /// waypoints), so that `Goal::reset()` is a true re-entrant reset
    /// (spec §3, §4.5). Composite kinds reset via their children
    /// instead (handled in `Goal::reset`), so they are not matched
    /// here.
    pub fn reset_state(&mut self) {
        match self {
            GoalKind::StateChange(d) => d.previous = None,
            GoalKind::AttrStream(d) => d.reset(),
            GoalKind::Rectangle(d) => d.reset_phase(),
            GoalKind::Circle(d) => d.reset_phase(),
            GoalKind::MovingCircle(d) => d.reset_phase(),
            GoalKind::Waypoints(d) => d.reset(),
            GoalKind::StateCondition(_)
            | GoalKind::Position(_)
            | GoalKind::Orientation(_)
            | GoalKind::Pose(_)
            | GoalKind::TopicMessage(_)
            | GoalKind::TopicMessageParam(_) => {}
            GoalKind::Complex(_) | GoalKind::Repeater(_) => {}
        }
    }

    /// Whether hitting `max_duration` without resolving should count
    /// as success rather than failure (AVOID-style goals and
    /// EntityAttrStream::None; spec §9, §4.3).
    pub fn success_on_timeout(&self) -> bool {
        match self {
            GoalKind::Rectangle(a) => a.success_on_timeout(),
            GoalKind::Circle(a) => a.success_on_timeout(),
            GoalKind::MovingCircle(a) => a.success_on_timeout(),
            GoalKind::AttrStream(a) => a.success_on_timeout(),
            _ => false,
        }
    }

    /// Directly-referenced entities, not recursing into composites
    /// (composites handle their own union via `Goal::entities()`).
    pub fn direct_entities(&self) -> Vec<Arc<Entity>> {
        match self {
            GoalKind::StateChange(d) => vec![d.entity.clone()],
            GoalKind::StateCondition(d) => d.entities.values().cloned().collect(),
            GoalKind::AttrStream(d) => vec![d.entity.clone()],
            GoalKind::Rectangle(d) => d.monitored.clone(),
            GoalKind::Circle(d) => d.monitored.clone(),
            GoalKind::MovingCircle(d) => {
                let mut v = d.monitored.clone();
                v.push(d.motion_entity.clone());
                v
            }
            GoalKind::Position(d) => vec![d.entity.clone()],
            GoalKind::Orientation(d) => vec![d.entity.clone()],
            GoalKind::Pose(d) => vec![d.entity.clone()],
            GoalKind::Waypoints(d) => vec![d.entity.clone()],
            GoalKind::TopicMessage(_) | GoalKind::TopicMessageParam(_) => vec![],
            GoalKind::Complex(_) | GoalKind::Repeater(_) => vec![],
        }
    }

    pub fn poll(&mut self) -> Result<PollOutcome, GoalkeeperError> {
        match self {
            GoalKind::StateChange(d) => Ok(d.poll()),
            GoalKind::StateCondition(d) => d.poll(),
            GoalKind::AttrStream(d) => Ok(d.poll()),
            GoalKind::Rectangle(d) => Ok(d.poll()),
            GoalKind::Circle(d) => Ok(d.poll()),
            GoalKind::MovingCircle(d) => Ok(d.poll()),
            GoalKind::Position(d) => Ok(d.poll()),
            GoalKind::Orientation(d) => Ok(d.poll()),
            GoalKind::Pose(d) => Ok(d.poll()),
            GoalKind::Waypoints(d) => Ok(d.poll()),
            GoalKind::TopicMessage(d) => Ok(d.poll()),
            GoalKind::TopicMessageParam(d) => Ok(d.poll()),
            GoalKind::Complex(_) | GoalKind::Repeater(_) => {
                unreachable!("composite goals are driven by their own orchestration, not GoalKind::poll")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::AttributeMode;
    use goalkeeper_broker::BrokerDescriptor;
    use serde_json::json;

    fn posed_entity(name: &str) -> Arc<Entity> {
        Entity::with_mode(
            name,
            "robot",
            format!("telemetry/{name}"),
            BrokerDescriptor::redis("localhost"),
            vec!["position".to_string(), "orientation".to_string()],
            AttributeMode::Lax,
        )
    }

    fn set_position(entity: &Entity, x: f64, y: f64, z: f64) {
        entity.update_state(&json!({"position": {"x": x, "y": y, "z": z}}));
    }

    fn set_orientation(entity: &Entity, roll: f64, pitch: f64, yaw: f64) {
        entity.update_state(&json!({"orientation": {"roll": roll, "pitch": pitch, "yaw": yaw}}));
    }

    #[test]
    fn rectangle_enter_satisfied_when_any_monitored_entity_inside() {
        // S2: bottom-left (0,0) length (5,5), tag=ENTER, position (1,1).
        let robot = posed_entity("robot_1");
        let rect = Rectangle { bottom_left: (0.0, 0.0), length: (5.0, 5.0) };
        let mut area = AreaData::new(vec![robot.clone()], rect, AreaTag::Enter);
        assert_eq!(area.poll(), PollOutcome::Pending);
        set_position(&robot, 1.0, 1.0, 0.0);
        assert_eq!(area.poll(), PollOutcome::Satisfied);
    }

    #[test]
    fn rectangle_enter_ignores_boundary_points() {
        let robot = posed_entity("robot_1");
        let rect = Rectangle { bottom_left: (0.0, 0.0), length: (5.0, 5.0) };
        let mut area = AreaData::new(vec![robot.clone()], rect, AreaTag::Enter);
        set_position(&robot, 0.0, 0.0, 0.0);
        assert_eq!(area.poll(), PollOutcome::Pending);
        set_position(&robot, 5.0, 5.0, 0.0);
        assert_eq!(area.poll(), PollOutcome::Pending);
    }

    #[test]
    fn rectangle_avoid_violated_when_entity_enters() {
        // S3: same rectangle tag=AVOID, position (3,3).
        let robot = posed_entity("robot_1");
        let rect = Rectangle { bottom_left: (0.0, 0.0), length: (5.0, 5.0) };
        let mut area = AreaData::new(vec![robot.clone()], rect, AreaTag::Avoid);
        assert!(area.success_on_timeout());
        assert_eq!(area.poll(), PollOutcome::Pending);
        set_position(&robot, 3.0, 3.0, 0.0);
        assert_eq!(area.poll(), PollOutcome::Violated);
    }

    #[test]
    fn rectangle_avoid_outside_never_violates() {
        let robot = posed_entity("robot_1");
        let rect = Rectangle { bottom_left: (0.0, 0.0), length: (5.0, 5.0) };
        let mut area = AreaData::new(vec![robot.clone()], rect, AreaTag::Avoid);
        set_position(&robot, 20.0, 20.0, 0.0);
        assert_eq!(area.poll(), PollOutcome::Pending);
    }

    #[test]
    fn circle_enter_uses_strict_containment() {
        let robot = posed_entity("robot_1");
        let circle = Circle { center: (0.0, 0.0), radius: 2.0 };
        let mut area = AreaData::new(vec![robot.clone()], circle, AreaTag::Enter);
        set_position(&robot, 2.0, 0.0, 0.0);
        assert_eq!(area.poll(), PollOutcome::Pending);
        set_position(&robot, 1.0, 0.0, 0.0);
        assert_eq!(area.poll(), PollOutcome::Satisfied);
    }

    #[test]
    fn moving_area_centre_tracks_motion_entity() {
        let robot = posed_entity("robot_1");
        let decoy = posed_entity("decoy");
        let motion = posed_entity("drone");
        set_position(&motion, 10.0, 10.0, 0.0);

        let mut moving = MovingAreaData::new(vec![robot.clone(), decoy.clone()], motion.clone(), 1.5, AreaTag::Enter);
        set_position(&robot, 0.0, 0.0, 0.0);
        assert_eq!(moving.poll(), PollOutcome::Pending);

        set_position(&robot, 10.5, 10.0, 0.0);
        assert_eq!(moving.poll(), PollOutcome::Satisfied);

        // The motion entity itself is excluded from the monitored set.
        assert!(!moving.monitored.iter().any(|e| e.name() == "drone"));
    }

    #[test]
    fn position_goal_checks_each_axis_independently() {
        let robot = posed_entity("robot_1");
        let mut data = PositionData { entity: robot.clone(), target: (1.0, 2.0, 0.0), deviation: 0.5 };
        set_position(&robot, 1.4, 2.0, 0.0);
        assert_eq!(data.poll(), PollOutcome::Satisfied);
        set_position(&robot, 1.6, 2.0, 0.0);
        assert_eq!(data.poll(), PollOutcome::Pending);
    }

    #[test]
    fn pose_goal_requires_both_position_and_orientation() {
        let robot = posed_entity("robot_1");
        let mut data = PoseData {
            entity: robot.clone(),
            target_position: (0.0, 0.0, 0.0),
            target_orientation: (0.0, 0.0, 0.0),
            deviation: 0.1,
        };
        set_position(&robot, 0.0, 0.0, 0.0);
        assert_eq!(data.poll(), PollOutcome::Pending);
        set_orientation(&robot, 0.0, 0.0, 0.0);
        assert_eq!(data.poll(), PollOutcome::Satisfied);
    }

    #[test]
    fn waypoint_trajectory_completes_once_all_flags_set_any_order() {
        // S6: waypoints [(2,0),(4,0),(6,0)], deviation 0.5.
        let robot = posed_entity("robot_1");
        let mut data = WaypointsData::new(robot.clone(), vec![(2.0, 0.0, 0.0), (4.0, 0.0, 0.0), (6.0, 0.0, 0.0)], 0.5);

        set_position(&robot, 2.1, 0.0, 0.0);
        assert_eq!(data.poll(), PollOutcome::Pending);

        set_position(&robot, 4.0, 0.4, 0.0);
        assert_eq!(data.poll(), PollOutcome::Pending);

        set_position(&robot, 6.2, -0.1, 0.0);
        assert_eq!(data.poll(), PollOutcome::Satisfied);
    }

    #[test]
    fn waypoint_trajectory_does_not_require_in_order_arrival() {
        let robot = posed_entity("robot_1");
        let mut data = WaypointsData::new(robot.clone(), vec![(2.0, 0.0, 0.0), (4.0, 0.0, 0.0)], 0.1);
        set_position(&robot, 4.0, 0.0, 0.0);
        assert_eq!(data.poll(), PollOutcome::Pending);
        set_position(&robot, 2.0, 0.0, 0.0);
        assert_eq!(data.poll(), PollOutcome::Satisfied);
    }

    fn stream_entity() -> Arc<Entity> {
        Entity::with_mode(
            "tag_reader",
            "sensor",
            "telemetry/tag_reader",
            BrokerDescriptor::redis("localhost"),
            vec!["tag".to_string()],
            AttributeMode::Lax,
        )
    }

    #[test]
    fn attr_stream_all_matches_unordered_multiset() {
        let e = stream_entity();
        let mut data = AttrStreamData::new(e.clone(), "tag", vec![json!("a"), json!("b")], AttrStreamStrategy::All);
        e.update_state(&json!({"tag": "b"}));
        assert_eq!(data.poll(), PollOutcome::Pending);
        e.update_state(&json!({"tag": "a"}));
        assert_eq!(data.poll(), PollOutcome::Satisfied);
    }

    #[test]
    fn attr_stream_all_ordered_requires_exact_sequence() {
        let e = stream_entity();
        let mut data = AttrStreamData::new(e.clone(), "tag", vec![json!("a"), json!("b"), json!("c")], AttrStreamStrategy::AllOrdered);
        e.update_state(&json!({"tag": "a"}));
        assert_eq!(data.poll(), PollOutcome::Pending);
        e.update_state(&json!({"tag": "b"}));
        assert_eq!(data.poll(), PollOutcome::Pending);
        e.update_state(&json!({"tag": "c"}));
        assert_eq!(data.poll(), PollOutcome::Satisfied);
    }

    #[test]
    fn attr_stream_all_ordered_resets_on_out_of_order_hit() {
        // Testable property 7: receiving v_k before v_{k-1} clears
        // v_k's mark. 'a' is marked in order (cursor -> 1), then a
        // distinct unrelated value passes through so the next 'a' is
        // observed as a fresh value again while the cursor still
        // expects 'b' — the stale mark on 'a' is cleared and the
        // cursor rewinds to it.
        let e = stream_entity();
        let mut data = AttrStreamData::new(e.clone(), "tag", vec![json!("a"), json!("b"), json!("c")], AttrStreamStrategy::AllOrdered);
        e.update_state(&json!({"tag": "a"}));
        assert_eq!(data.poll(), PollOutcome::Pending);

        e.update_state(&json!({"tag": "unrelated"}));
        assert_eq!(data.poll(), PollOutcome::Pending);

        e.update_state(&json!({"tag": "a"}));
        // Out-of-order re-hit on the already-seen 'a' slot: cleared,
        // cursor rewinds back to it instead of silently staying put.
        assert_eq!(data.poll(), PollOutcome::Pending);

        e.update_state(&json!({"tag": "unrelated2"}));
        e.update_state(&json!({"tag": "a"}));
        e.update_state(&json!({"tag": "unrelated3"}));
        e.update_state(&json!({"tag": "b"}));
        assert_eq!(data.poll(), PollOutcome::Pending);
        e.update_state(&json!({"tag": "c"}));
        assert_eq!(data.poll(), PollOutcome::Satisfied);
    }

    #[test]
    fn attr_stream_none_is_violated_by_any_match() {
        let e = stream_entity();
        let mut data = AttrStreamData::new(e.clone(), "tag", vec![json!("forbidden")], AttrStreamStrategy::None);
        assert!(data.success_on_timeout());
        e.update_state(&json!({"tag": "ok"}));
        assert_eq!(data.poll(), PollOutcome::Pending);
        e.update_state(&json!({"tag": "forbidden"}));
        assert_eq!(data.poll(), PollOutcome::Violated);
    }

    #[test]
    fn attr_stream_just_one_violated_by_second_match() {
        let e = stream_entity();
        let mut data = AttrStreamData::new(e.clone(), "tag", vec![json!("a"), json!("b")], AttrStreamStrategy::JustOne);
        e.update_state(&json!({"tag": "a"}));
        assert_eq!(data.poll(), PollOutcome::Satisfied);
        e.update_state(&json!({"tag": "b"}));
        assert_eq!(data.poll(), PollOutcome::Violated);
    }

    #[test]
    fn attr_stream_exactly_x_ordered_is_distinct_from_exactly_x() {
        // spec §9: the two ExactlyX variants must be distinct
        // discriminants, not collapsed onto the same integer.
        let unordered = AttrStreamStrategy::ExactlyX(2);
        let ordered = AttrStreamStrategy::ExactlyXOrdered(2);
        assert_ne!(
            std::mem::discriminant(&unordered),
            std::mem::discriminant(&ordered)
        );
    }

    #[test]
    fn topic_message_received_satisfied_after_any_message() {
        let watcher = RawTopicWatcher::new("telemetry/raw", BrokerDescriptor::redis("localhost"));
        let mut data = TopicMessageData { watcher: watcher.clone() };
        assert_eq!(data.poll(), PollOutcome::Pending);
        watcher.inject(json!({"k": 1}));
        assert_eq!(data.poll(), PollOutcome::Satisfied);
    }

    #[test]
    fn topic_message_param_requires_predicate_match() {
        let watcher = RawTopicWatcher::new("telemetry/raw", BrokerDescriptor::redis("localhost"));
        let predicate: Arc<dyn Fn(&Value) -> bool + Send + Sync> = Arc::new(|v: &Value| v["k"].as_i64() == Some(1));
        let mut data = TopicMessageParamData { watcher: watcher.clone(), predicate };

        watcher.inject(json!({"k": 2}));
        assert_eq!(data.poll(), PollOutcome::Pending);

        watcher.inject(json!({"k": 1}));
        assert_eq!(data.poll(), PollOutcome::Satisfied);
    }
}
