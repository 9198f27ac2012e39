//! Scale decisions: candidates, fair allocation, preemption.
//!
//! The engine is pure: it takes endpoint configs with their metrics, a
//! cluster budget, and a clock value, and produces a decision list. All I/O
//! happens in the collector before and the executor after, which keeps every
//! allocation property testable without time-mocking machinery.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::domains::endpoints::{Endpoint, EndpointLifecycle};

use super::metrics::EndpointMetrics;
use super::resources::{ClusterResources, Resources};

/// Added on top of any dynamic boost once an endpoint has waited past the
/// starvation threshold. Dominates the default dynamic boost range so a
/// starving endpoint strictly outranks same-base-priority peers.
pub const STARVATION_BOOST: i64 = 1000;

/// One endpoint's view going into a pass.
#[derive(Debug, Clone)]
pub struct DecisionInput {
    pub endpoint: Endpoint,
    pub metrics: EndpointMetrics,
    /// Resources of a single replica of this endpoint's spec.
    pub per_replica: Resources,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScaleDecision {
    pub endpoint: String,
    pub current: i32,
    pub desired: i32,
    /// Positive = scale up, negative = scale down, zero = blocked only.
    pub amount: i32,
    pub priority: i64,
    pub queue_length: i64,
    pub approved: bool,
    pub blocked: bool,
    pub reason: String,
    pub preempted_from: Vec<String>,
}

/// Base priority plus the dynamic high-load boost plus the starvation boost.
pub fn effective_priority(
    endpoint: &Endpoint,
    metrics: &EndpointMetrics,
    starvation_time: Duration,
) -> i64 {
    let mut priority = endpoint.priority as i64;
    if endpoint.enable_dynamic_prio && metrics.pending >= endpoint.high_load_threshold {
        priority += endpoint.priority_boost as i64;
    }
    if metrics.waiting_time.is_some_and(|w| w > starvation_time) {
        priority += STARVATION_BOOST;
    }
    priority
}

pub struct DecisionEngine {
    pub global_enabled: bool,
    pub starvation_time: Duration,
}

struct UpCandidate {
    idx: usize,
    target: i32,
    amount: i32,
    priority: i64,
    queue: i64,
}

struct Victim {
    idx: usize,
    priority: i64,
    desired_now: i32,
}

impl DecisionEngine {
    /// Plan one pass. `scope` restricts which endpoints get candidates (a
    /// targeted run); the cluster budget always reflects every endpoint.
    /// `cluster.used` must already account for ready replicas.
    pub fn plan(
        &self,
        inputs: &[DecisionInput],
        mut cluster: ClusterResources,
        scope: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<ScaleDecision> {
        let in_scope = |input: &DecisionInput| scope.map_or(true, |s| input.endpoint.name == s);

        let mut ups = Vec::new();
        for (idx, input) in inputs.iter().enumerate() {
            if !in_scope(input) {
                continue;
            }
            if let Some(candidate) = self.scale_up_candidate(idx, input, now) {
                ups.push(candidate);
            }
        }
        ups.sort_by(|a, b| b.priority.cmp(&a.priority).then(b.queue.cmp(&a.queue)));

        let mut decisions = Vec::new();
        let blocked = self.allocate_fairly(inputs, ups, &mut cluster, &mut decisions);
        let victims = self.preempt(inputs, blocked, &mut cluster, &mut decisions);

        let scaled_up: Vec<String> = decisions
            .iter()
            .filter(|d| d.amount > 0)
            .map(|d| d.endpoint.clone())
            .collect();

        for input in inputs {
            if !in_scope(input) {
                continue;
            }
            let name = &input.endpoint.name;
            if victims.contains(name) || scaled_up.contains(name) {
                continue;
            }
            if let Some(decision) = self.scale_down_candidate(input, now) {
                decisions.push(decision);
            }
        }

        decisions
    }

    fn scale_up_candidate(
        &self,
        idx: usize,
        input: &DecisionInput,
        now: DateTime<Utc>,
    ) -> Option<UpCandidate> {
        let ep = &input.endpoint;
        let m = &input.metrics;

        if ep.lifecycle == EndpointLifecycle::Stopped {
            return None;
        }
        if !ep.autoscaling_active(self.global_enabled) {
            return None;
        }
        if m.replicas_desired >= ep.max_replicas {
            return None;
        }
        if let Some(last) = ep.last_scale_time {
            if now - last < Duration::seconds(ep.scale_up_cooldown_secs) {
                return None;
            }
        }

        let demand = (m.pending + m.running) as i32;
        let target = demand.clamp(ep.min_replicas, ep.max_replicas);
        // Capacity already provisioned: pods may still be starting, do not
        // pile duplicate scale-ups on top.
        if target <= m.replicas_desired {
            return None;
        }
        // Scale-from-zero needs enough of a queue to be worth a cold start.
        if m.replicas_desired == 0 && m.pending < ep.scale_up_threshold {
            return None;
        }

        Some(UpCandidate {
            idx,
            target,
            amount: target - m.replicas_desired,
            priority: effective_priority(ep, m, self.starvation_time),
            queue: m.pending,
        })
    }

    /// Two-phase fair allocation. Phase 1 grants every queued candidate one
    /// replica; phase 2 fills remainders by priority, replica by replica.
    /// Emits an approved decision per granted candidate and returns the
    /// candidates that got nothing.
    fn allocate_fairly(
        &self,
        inputs: &[DecisionInput],
        ups: Vec<UpCandidate>,
        cluster: &mut ClusterResources,
        decisions: &mut Vec<ScaleDecision>,
    ) -> Vec<UpCandidate> {
        let mut granted: Vec<i32> = vec![0; ups.len()];
        let mut residuals: Vec<usize> = Vec::new();

        // Phase 1: minimum guarantee for every candidate with a queue.
        for (pos, candidate) in ups.iter().enumerate() {
            if candidate.queue <= 0 {
                residuals.push(pos);
                continue;
            }
            let one = inputs[candidate.idx].per_replica;
            if cluster.can_allocate(&one) {
                cluster.commit(&one);
                granted[pos] = 1;
                if candidate.amount > 1 {
                    residuals.push(pos);
                }
            }
        }

        // Phase 2: priority fill of the remainders, replica by replica.
        residuals.sort_by(|&a, &b| ups[b].priority.cmp(&ups[a].priority));
        for pos in residuals {
            let candidate = &ups[pos];
            let one = inputs[candidate.idx].per_replica;
            while granted[pos] < candidate.amount && cluster.can_allocate(&one) {
                cluster.commit(&one);
                granted[pos] += 1;
            }
        }

        let mut blocked = Vec::new();
        for (pos, candidate) in ups.into_iter().enumerate() {
            if granted[pos] == 0 {
                blocked.push(candidate);
                continue;
            }
            let input = &inputs[candidate.idx];
            let current = input.metrics.replicas_desired;
            decisions.push(ScaleDecision {
                endpoint: input.endpoint.name.clone(),
                current,
                desired: current + granted[pos],
                amount: granted[pos],
                priority: candidate.priority,
                queue_length: candidate.queue,
                approved: true,
                blocked: granted[pos] < candidate.amount,
                reason: format!("queue {} needs {} replicas", candidate.queue, candidate.target),
                preempted_from: vec![],
            });
        }
        blocked
    }

    /// Steal replicas from strictly-lower-priority idle endpoints, one at a
    /// time, until each blocked candidate fits or no victim remains. Returns
    /// the names of endpoints that lost replicas.
    fn preempt(
        &self,
        inputs: &[DecisionInput],
        blocked: Vec<UpCandidate>,
        cluster: &mut ClusterResources,
        decisions: &mut Vec<ScaleDecision>,
    ) -> Vec<String> {
        if blocked.is_empty() {
            return vec![];
        }

        let mut victims: Vec<Victim> = inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| {
                input.endpoint.lifecycle == EndpointLifecycle::Running
                    && input.metrics.replicas_desired > input.endpoint.min_replicas
                    && input.metrics.pending == 0
            })
            .map(|(idx, input)| Victim {
                idx,
                priority: effective_priority(&input.endpoint, &input.metrics, self.starvation_time),
                desired_now: input.metrics.replicas_desired,
            })
            .collect();
        victims.sort_by(|a, b| a.priority.cmp(&b.priority));

        let mut victim_names: Vec<String> = Vec::new();

        // `blocked` is still priority-descending from the candidate sort.
        for candidate in blocked {
            let input = &inputs[candidate.idx];
            let one = input.per_replica;
            let mut granted = 0;
            let mut stolen: Vec<String> = Vec::new();

            while granted < candidate.amount {
                if cluster.can_allocate(&one) {
                    cluster.commit(&one);
                    granted += 1;
                    continue;
                }
                // Lowest-priority victim strictly below the candidate.
                let Some(victim) = victims.iter_mut().find(|v| {
                    v.priority < candidate.priority
                        && v.desired_now > inputs[v.idx].endpoint.min_replicas
                        && inputs[v.idx].endpoint.name != input.endpoint.name
                }) else {
                    break;
                };

                let victim_input = &inputs[victim.idx];
                let from = victim.desired_now;
                victim.desired_now -= 1;
                cluster.release(&victim_input.per_replica);
                decisions.push(ScaleDecision {
                    endpoint: victim_input.endpoint.name.clone(),
                    current: from,
                    desired: from - 1,
                    amount: -1,
                    priority: victim.priority,
                    queue_length: 0,
                    approved: true,
                    blocked: false,
                    reason: format!("preempted by {}", input.endpoint.name),
                    preempted_from: vec![],
                });
                stolen.push(victim_input.endpoint.name.clone());
                if !victim_names.contains(&victim_input.endpoint.name) {
                    victim_names.push(victim_input.endpoint.name.clone());
                }
            }

            let current = input.metrics.replicas_desired;
            if granted > 0 {
                let reason = if stolen.is_empty() {
                    format!("queue {} needs {} replicas", candidate.queue, candidate.target)
                } else {
                    format!(
                        "queue {} needs {} replicas, preempting {}",
                        candidate.queue,
                        candidate.target,
                        stolen.join(", ")
                    )
                };
                decisions.push(ScaleDecision {
                    endpoint: input.endpoint.name.clone(),
                    current,
                    desired: current + granted,
                    amount: granted,
                    priority: candidate.priority,
                    queue_length: candidate.queue,
                    approved: true,
                    blocked: granted < candidate.amount,
                    reason,
                    preempted_from: stolen,
                });
            } else {
                decisions.push(ScaleDecision {
                    endpoint: input.endpoint.name.clone(),
                    current,
                    desired: current,
                    amount: 0,
                    priority: candidate.priority,
                    queue_length: candidate.queue,
                    approved: false,
                    blocked: true,
                    reason: "insufficient cluster resources".to_string(),
                    preempted_from: vec![],
                });
            }
        }

        victim_names
    }

    fn scale_down_candidate(
        &self,
        input: &DecisionInput,
        now: DateTime<Utc>,
    ) -> Option<ScaleDecision> {
        let ep = &input.endpoint;
        let m = &input.metrics;

        if ep.lifecycle == EndpointLifecycle::Stopped {
            return None;
        }
        if !ep.autoscaling_active(self.global_enabled) {
            return None;
        }
        if m.replicas_desired <= ep.min_replicas {
            return None;
        }
        // A previous scale-down is still in flight.
        if m.replicas_desired < m.replicas_ready {
            return None;
        }
        if m.pending > 0 {
            return None;
        }

        // Keep one spare replica while anything is still running.
        let min_required = m.running as i32 + if m.running > 0 { 1 } else { 0 };
        if m.replicas_desired <= min_required {
            return None;
        }

        let idle_cfg = Duration::seconds(ep.scale_down_idle_secs);
        // A never-used endpoint counts as idle forever.
        if m.idle_time.is_some_and(|idle| idle < idle_cfg) {
            return None;
        }
        if let Some(last) = ep.last_scale_time {
            if now - last < Duration::seconds(ep.scale_down_cooldown_secs) {
                return None;
            }
        }

        let floor = min_required.max(ep.min_replicas);
        let long_idle = m.idle_time.map_or(true, |idle| idle > idle_cfg * 2);
        let desired = if long_idle {
            floor
        } else {
            floor.max(m.replicas_desired - 1)
        };
        if desired >= m.replicas_desired {
            return None;
        }

        Some(ScaleDecision {
            endpoint: ep.name.clone(),
            current: m.replicas_desired,
            desired,
            amount: desired - m.replicas_desired,
            priority: effective_priority(ep, m, self.starvation_time),
            queue_length: 0,
            approved: true,
            blocked: false,
            reason: format!(
                "idle with {} running, {} pending",
                m.running, m.pending
            ),
            preempted_from: vec![],
        })
    }
}
