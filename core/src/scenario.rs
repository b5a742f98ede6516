//! Scenario Executor (C6): owns entities, goals, anti-goals, fatal
//! goals; orchestrates sequential or concurrent evaluation; computes
//! the weighted score; drives the RT monitor (spec §4.6).

use crate::entity::Entity;
use crate::error::{GoalkeeperError, Result};
use crate::goal::{Goal, GoalState};
use crate::rtmonitor::{default_topics, EventMsg, RtMonitor};
use goalkeeper_broker::{BrokerDescriptor, BrokerTransport};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    Sequential,
    Concurrent,
}

impl ExecutionStrategy {
    fn as_str(self) -> &'static str {
        match self {
            ExecutionStrategy::Sequential => "sequential",
            ExecutionStrategy::Concurrent => "concurrent",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GoalSummary {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    state: String,
    entities: Vec<String>,
}

impl GoalSummary {
    fn of(goal: &Arc<Goal>) -> Self {
        Self {
            name: goal.name().to_string(),
            kind: goal.kind_name().to_string(),
            state: goal.state().as_str().to_string(),
            entities: goal.entities().iter().map(|e| e.name().to_string()).collect(),
        }
    }
}

/// Result handed back after `run_seq`/`run_concurrent` complete: the
/// final score plus the per-goal pass/fail list (spec §6:
/// `"results"` on `scenario_finished`).
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub score: f64,
    pub results: Vec<(String, bool)>,
}

/// If `weights.len() != n`, "the engine replaces with uniform weights
/// and logs a warning" (spec §3, §7).
fn normalize_weights(weights: &[f64], n: usize, label: &str) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if weights.len() != n {
        warn!(label, expected = n, got = weights.len(), "weight vector length mismatch; replacing with uniform weights");
        return vec![1.0 / n as f64; n];
    }
    weights.to_vec()
}

/// A named bundle of entities, goals, anti-goals, fatal goals,
/// weights, and an execution strategy (spec §3, GLOSSARY).
pub struct Scenario {
    name: String,
    broker: Option<BrokerDescriptor>,
    goals: RwLock<Vec<Arc<Goal>>>,
    anti_goals: RwLock<Vec<Arc<Goal>>>,
    fatal_goals: RwLock<Vec<Arc<Goal>>>,
    goal_weights: RwLock<Vec<f64>>,
    antigoal_weights: RwLock<Vec<f64>>,
    entities: RwLock<Vec<Arc<Entity>>>,
    transport: RwLock<Option<Arc<dyn BrokerTransport>>>,
    monitor: RwLock<Option<Arc<RtMonitor>>>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, broker: Option<BrokerDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            broker,
            goals: RwLock::new(Vec::new()),
            anti_goals: RwLock::new(Vec::new()),
            fatal_goals: RwLock::new(Vec::new()),
            goal_weights: RwLock::new(Vec::new()),
            antigoal_weights: RwLock::new(Vec::new()),
            entities: RwLock::new(Vec::new()),
            transport: RwLock::new(None),
            monitor: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_goal(&self, goal: Arc<Goal>) {
        self.goals.write().push(goal);
    }

    pub fn add_anti_goal(&self, goal: Arc<Goal>) {
        self.anti_goals.write().push(goal);
    }

    pub fn add_fatal_goal(&self, goal: Arc<Goal>) {
        self.fatal_goals.write().push(goal);
    }

    pub fn set_goal_weights(&self, weights: Vec<f64>) {
        *self.goal_weights.write() = weights;
    }

    pub fn set_antigoal_weights(&self, weights: Vec<f64>) {
        *self.antigoal_weights.write() = weights;
    }

    /// Walks all goal categories — including nested `ComplexGoal`s and
    /// `GoalRepeater`s via `Goal::entities()` — and stores the
    /// deduplicated union. Stable after this point (spec §3: "A
    /// scenario's entity list is stable after `run_*` begins").
    pub fn build_entity_list(&self) -> Vec<Arc<Entity>> {
        let mut out: Vec<Arc<Entity>> = Vec::new();
        let categories = [self.goals.read().clone(), self.anti_goals.read().clone(), self.fatal_goals.read().clone()];
        for category in categories {
            for goal in category {
                for entity in goal.entities() {
                    if !out.iter().any(|e| e.name() == entity.name()) {
                        out.push(entity);
                    }
                }
            }
        }
        *self.entities.write() = out.clone();
        out
    }

    pub fn entities(&self) -> Vec<Arc<Entity>> {
        self.entities.read().clone()
    }

    async fn transport_or_connect(&self) -> Result<Arc<dyn BrokerTransport>> {
        if let Some(t) = self.transport.read().clone() {
            return Ok(t);
        }
        let broker = self.broker.as_ref().ok_or_else(|| GoalkeeperError::Configuration(format!("scenario '{}' has no broker configured", self.name)))?;
        let transport = goalkeeper_broker::connect(broker).await?;
        *self.transport.write() = Some(transport.clone());
        Ok(transport)
    }

    /// Idempotent: `start()` on every entity in the deduplicated list
    /// (spec §4.6).
    pub async fn start_entities(&self) -> Result<()> {
        let entities = self.entities.read().clone();
        if entities.is_empty() {
            return Ok(());
        }
        let transport = self.transport_or_connect().await?;
        for entity in entities {
            entity.start(transport.clone()).await?;
        }
        Ok(())
    }

    /// Wires the RT monitor to `event_topic`/`log_topic` over the
    /// scenario's broker connection and attaches it to every goal
    /// (spec §6: `init_rtmonitor(event_topic, log_topic)`). A `None`
    /// broker (offline tests, spec §3) makes this a no-op with a
    /// warning rather than a hard failure.
    pub async fn init_rtmonitor(
        self: &Arc<Self>,
        event_topic: impl Into<String>,
        log_topic: impl Into<String>,
        log_rx: tokio::sync::mpsc::UnboundedReceiver<crate::logging::LogMsg>,
    ) {
        let transport = match self.transport_or_connect().await {
            Ok(t) => t,
            Err(e) => {
                warn!(scenario = %self.name, error = %e, "rt monitor not installed: no broker configured");
                return;
            }
        };
        let monitor = RtMonitor::install(transport, event_topic, log_topic, log_rx);
        *self.monitor.write() = Some(monitor.clone());
        for goal in self.goals.read().iter().chain(self.anti_goals.read().iter()).chain(self.fatal_goals.read().iter()) {
            goal.attach_monitor(monitor.clone());
        }
    }

    fn effective_goal_weights(&self) -> Vec<f64> {
        let goals = self.goals.read();
        normalize_weights(&self.goal_weights.read(), goals.len(), "goal_weights")
    }

    fn effective_antigoal_weights(&self) -> Vec<f64> {
        let anti = self.anti_goals.read();
        normalize_weights(&self.antigoal_weights.read(), anti.len(), "antigoal_weights")
    }

    /// "score = Σ goal_i.status·w_i − Σ antigoal_j.status·w_j" (spec
    /// §3, §4.6; testable property 4: in [-1, 1] when weights sum to
    /// 1 on each side).
    pub fn score(&self) -> f64 {
        let goal_weights = self.effective_goal_weights();
        let antigoal_weights = self.effective_antigoal_weights();
        let positive: f64 = self.goals.read().iter().zip(goal_weights.iter()).map(|(g, w)| if g.status() { *w } else { 0.0 }).sum();
        let negative: f64 = self.anti_goals.read().iter().zip(antigoal_weights.iter()).map(|(g, w)| if g.status() { *w } else { 0.0 }).sum();
        positive - negative
    }

    fn emit_scenario_event(&self, event_type: &str, execution: ExecutionStrategy, finished: bool) {
        let Some(monitor) = self.monitor.read().clone() else { return };
        let goals: Vec<GoalSummary> = self.goals.read().iter().map(GoalSummary::of).collect();
        let anti_goals: Vec<GoalSummary> = self.anti_goals.read().iter().map(GoalSummary::of).collect();
        let fatal_goals: Vec<GoalSummary> = self.fatal_goals.read().iter().map(GoalSummary::of).collect();

        let mut data = json!({
            "name": self.name,
            "goals": goals,
            "anti_goals": anti_goals,
            "fatal_goals": fatal_goals,
            "goal_weights": self.effective_goal_weights(),
            "antigoal_weights": self.effective_antigoal_weights(),
            "execution": execution.as_str(),
        });
        if event_type != "scenario_started" {
            data["score"] = json!(self.score());
        }
        if finished {
            let results: Vec<(String, bool)> = self.goals.read().iter().map(|g| (g.name().to_string(), g.status())).collect();
            data["results"] = json!(results);
        }
        monitor.emit(EventMsg { event_type: event_type.to_string(), data });
    }

    /// Any fatal goal reaching COMPLETED or TERMINATED halts sequential
    /// progress (spec §4.6). Only COMPLETED cascades a terminate into
    /// main + anti goals — a fatal goal that times out (FAILED) "is
    /// not fatal to the scenario" (spec §4.6, §7).
    fn fatal_halts(&self) -> bool {
        self.fatal_goals.read().iter().any(|g| matches!(g.state(), GoalState::Completed | GoalState::Terminated))
    }

    fn cascade_fatal_termination(&self) {
        for goal in self.goals.read().iter().chain(self.anti_goals.read().iter()) {
            if !goal.state().is_terminal() {
                goal.terminate();
            }
        }
    }

    fn spawn_watcher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scenario = self.clone();
        tokio::spawn(async move {
            loop {
                if scenario.fatal_goals.read().iter().any(|g| g.status()) {
                    scenario.cascade_fatal_termination();
                    break;
                }
                if scenario.fatal_goals.read().iter().all(|g| g.state().is_terminal()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
    }

    fn spawn_all(goals: &[Arc<Goal>]) -> Vec<tokio::task::JoinHandle<GoalState>> {
        goals.iter().cloned().map(|g| tokio::spawn(async move { g.enter().await })).collect()
    }

    /// "Starts fatal and anti-goals as background tasks, then enters
    /// each main goal in order, emitting a scenario_update event after
    /// each one. Breaks out of the loop if any fatal goal reaches
    /// COMPLETED or TERMINATED" (spec §4.6).
    pub async fn run_seq(self: &Arc<Self>) -> ScenarioResult {
        self.build_entity_list();
        if let Err(e) = self.start_entities().await {
            warn!(scenario = %self.name, error = %e, "failed to start entities");
        }
        self.emit_scenario_event("scenario_started", ExecutionStrategy::Sequential, false);

        let watcher = self.spawn_watcher();
        let fatal_handles = Self::spawn_all(&self.fatal_goals.read());
        let anti_handles = Self::spawn_all(&self.anti_goals.read());

        let main_goals = self.goals.read().clone();
        for goal in &main_goals {
            if self.fatal_halts() {
                break;
            }
            goal.enter().await;
            self.emit_scenario_event("scenario_update", ExecutionStrategy::Sequential, false);
            if self.fatal_halts() {
                break;
            }
        }

        watcher.abort();
        for handle in fatal_handles.into_iter().chain(anti_handles) {
            handle.abort();
        }

        self.finish(ExecutionStrategy::Sequential).await
    }

    /// "Submits every main goal to a worker pool; also starts fatal
    /// and anti-goals in the pool; waits for all main goals to finish
    /// (or fatal-induced termination)" (spec §4.6).
    pub async fn run_concurrent(self: &Arc<Self>) -> ScenarioResult {
        self.build_entity_list();
        if let Err(e) = self.start_entities().await {
            warn!(scenario = %self.name, error = %e, "failed to start entities");
        }
        self.emit_scenario_event("scenario_started", ExecutionStrategy::Concurrent, false);

        let watcher = self.spawn_watcher();
        let fatal_handles = Self::spawn_all(&self.fatal_goals.read());
        let anti_handles = Self::spawn_all(&self.anti_goals.read());
        let main_handles = Self::spawn_all(&self.goals.read());

        for handle in main_handles {
            let _ = handle.await;
        }

        watcher.abort();
        for handle in fatal_handles.into_iter().chain(anti_handles) {
            handle.abort();
        }

        self.finish(ExecutionStrategy::Concurrent).await
    }

    /// "The thread pool is shut down with cancellation; the
    /// communication node is stopped after a ≈500 ms grace to flush
    /// outbound events" (spec §4.6).
    async fn finish(self: &Arc<Self>, execution: ExecutionStrategy) -> ScenarioResult {
        self.emit_scenario_event("scenario_finished", execution, true);
        if let Some(monitor) = self.monitor.read().clone() {
            monitor.shutdown().await;
        }
        if let Some(transport) = self.transport.read().clone() {
            transport.stop().await;
        }
        let results: Vec<(String, bool)> = self.goals.read().iter().map(|g| (g.name().to_string(), g.status())).collect();
        ScenarioResult { score: self.score(), results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{AttributeMode, Entity};
    use crate::goal::GoalTiming;
    use std::collections::HashMap;

    fn entity(name: &str) -> Arc<Entity> {
        Entity::with_mode(name, "sonar", format!("telemetry/{name}"), BrokerDescriptor::redis("localhost"), vec!["range".to_string()], AttributeMode::Lax)
    }

    #[tokio::test(start_paused = true)]
    async fn weighted_score_with_anti_goal() {
        // S5: goal=EntityStateChange(FrontSonar, max=10) weight 1.0,
        // anti_goal=EntityStateCondition(range>5, max=10) weight 0.5.
        // One distinct message range=7 -> score = 1*1 - 1*0.5 = 0.5.
        let front = entity("front_sonar");
        let scenario = Scenario::new("s5", None);

        let goal = crate::goal::entity_state_change(front.clone(), GoalTiming::new().with_max_duration(Duration::from_secs(10)).with_tick_freq_hz(20.0));
        scenario.add_goal(goal.clone());
        scenario.set_goal_weights(vec![1.0]);

        let mut entities = HashMap::new();
        entities.insert("front_sonar".to_string(), front.clone());
        let anti = crate::goal::entity_state_condition_expr(entities, "front_sonar.range > 5", GoalTiming::new().with_max_duration(Duration::from_secs(10)).with_tick_freq_hz(20.0)).unwrap();
        scenario.add_anti_goal(anti.clone());
        scenario.set_antigoal_weights(vec![0.5]);

        scenario.build_entity_list();

        let s = scenario.clone();
        let handle = tokio::spawn(async move { s.run_concurrent().await });

        tokio::time::advance(Duration::from_millis(100)).await;
        front.update_state(&serde_json::json!({"range": 7.0}));
        tokio::time::advance(Duration::from_secs(11)).await;

        let result = handle.await.unwrap();
        assert_eq!(result.score, 0.5);
    }

    #[tokio::test]
    async fn mismatched_weight_vector_falls_back_to_uniform() {
        let scenario = Scenario::new("mismatch", None);
        let e = entity("front_sonar");
        let g1 = crate::goal::entity_state_change(e.clone(), GoalTiming::new());
        let g2 = crate::goal::entity_state_change(e, GoalTiming::new());
        scenario.add_goal(g1);
        scenario.add_goal(g2);
        scenario.set_goal_weights(vec![1.0]);
        let weights = scenario.effective_goal_weights();
        assert_eq!(weights, vec![0.5, 0.5]);
    }
}
