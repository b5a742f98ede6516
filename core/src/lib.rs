//! Goalkeeper core: the runtime goal-monitoring engine's evaluation
//! kernel (spec §2). Four tightly coupled components — the Goal
//! lifecycle (C3), the concurrent Scenario executor (C6), the
//! ComplexGoal composition algebra (C4), and the Entity subscription /
//! attribute-buffering pipeline (C2) — plus their supporting cast:
//! GoalRepeater (C5) and the RT Monitor (C7).
//!
//! Broker wire protocols (C1) live in the sibling `goalkeeper_broker`
//! crate; this crate only depends on its `BrokerTransport` contract.

pub mod area;
pub mod complex_goal;
pub mod config;
pub mod entity;
pub mod error;
pub mod expr;
pub mod goal;
pub mod logging;
pub mod repeater;
pub mod rtmonitor;
pub mod scenario;
pub mod topic;

pub use area::{AreaTag, Circle, Rectangle};
pub use complex_goal::{complex_goal, ComplexAlgorithm};
pub use config::EngineConfig;
pub use entity::{AttributeMode, Entity, RingBuffer};
pub use error::{GoalkeeperError, Result};
pub use expr::ConditionExpr;
pub use goal::{
    circular_area, entity_attr_stream, entity_state_change, entity_state_condition_expr, entity_state_condition_fn,
    moving_area, orientation_goal, pose_goal, position_goal, rectangle_area, topic_message_param,
    topic_message_received, waypoint_trajectory, AttrStreamStrategy, Goal, GoalState, GoalTiming,
};
pub use logging::LogMsg;
pub use repeater::repeater;
pub use rtmonitor::{default_topics, EventMsg, RtMonitor};
pub use scenario::{ExecutionStrategy, Scenario, ScenarioResult};
pub use topic::RawTopicWatcher;

pub use goalkeeper_broker::{BrokerDescriptor, BrokerTransport};
