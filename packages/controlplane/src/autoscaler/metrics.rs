//! Per-endpoint metrics snapshot feeding the decision engine.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::common::Result;
use crate::domains::endpoints::Endpoint;
use crate::domains::tasks::TaskStatus;
use crate::kernel::ControlKernel;

use super::provider::{AppStatus, ReplicaEvent};

#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub endpoint: String,
    pub replicas_desired: i32,
    pub replicas_ready: i32,
    pub replicas_available: i32,
    pub pending: i64,
    pub running: i64,
    /// `now - last_task_time`; `None` when the endpoint never ran a task
    /// (treated as idle forever by the decision engine).
    pub idle_time: Option<Duration>,
    /// `now - first_pending_time`; `None` when the queue is empty.
    pub waiting_time: Option<Duration>,
}

/// Collects metrics on demand. Replica-watch events feed a live override
/// cache so a pass sees fresher ready counts than the last provider poll.
pub struct MetricsCollector {
    kernel: Arc<ControlKernel>,
    live: RwLock<HashMap<String, AppStatus>>,
}

impl MetricsCollector {
    pub fn new(kernel: Arc<ControlKernel>) -> Self {
        Self {
            kernel,
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Record a replica-change event into the override cache.
    pub fn observe(&self, event: &ReplicaEvent) {
        self.live.write().unwrap().insert(
            event.endpoint.clone(),
            AppStatus {
                desired: event.desired,
                ready: event.ready,
                available: event.available,
            },
        );
    }

    pub async fn collect(&self, endpoint: &Endpoint, now: DateTime<Utc>) -> Result<EndpointMetrics> {
        let pending = self
            .kernel
            .tasks
            .count(&endpoint.name, TaskStatus::Pending)
            .await?;
        let running = self
            .kernel
            .tasks
            .count(&endpoint.name, TaskStatus::InProgress)
            .await?;

        let cached = self.live.read().unwrap().get(&endpoint.name).copied();
        let status = match cached {
            Some(status) => status,
            None => self
                .kernel
                .deployments
                .get_app(&endpoint.name)
                .await?
                .unwrap_or(AppStatus {
                    desired: 0,
                    ready: 0,
                    available: 0,
                }),
        };

        // Starvation watermark: stamped when the queue goes 0 -> >0,
        // cleared when it drains back to 0.
        let waiting_time = if pending > 0 {
            match endpoint.first_pending_time {
                Some(first) => Some(now - first),
                None => {
                    self.kernel
                        .endpoints
                        .set_first_pending(&endpoint.name, Some(now))
                        .await?;
                    Some(Duration::zero())
                }
            }
        } else {
            if endpoint.first_pending_time.is_some() {
                self.kernel
                    .endpoints
                    .set_first_pending(&endpoint.name, None)
                    .await?;
            }
            None
        };

        Ok(EndpointMetrics {
            endpoint: endpoint.name.clone(),
            replicas_desired: endpoint.replicas_desired,
            replicas_ready: status.ready,
            replicas_available: status.available,
            pending,
            running,
            idle_time: endpoint.last_task_time.map(|t| now - t),
            waiting_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tasks::NewTask;
    use crate::kernel::TestDependencies;

    fn endpoint(name: &str) -> Endpoint {
        Endpoint::builder()
            .name(name.to_string())
            .spec_name("small".to_string())
            .build()
    }

    #[tokio::test]
    async fn counts_pending_and_running() {
        let deps = TestDependencies::new();
        let ep = deps.kernel.endpoints.upsert(endpoint("e")).await.unwrap();
        for i in 0..3 {
            deps.kernel
                .tasks
                .create(NewTask {
                    task_id: format!("t{i}"),
                    endpoint: "e".to_string(),
                    input: None,
                })
                .await
                .unwrap();
        }
        deps.kernel
            .tasks
            .assign_pending("e", 1, "w1")
            .await
            .unwrap();

        let collector = MetricsCollector::new(Arc::clone(&deps.kernel));
        let m = collector.collect(&ep, Utc::now()).await.unwrap();
        assert_eq!(m.pending, 2);
        assert_eq!(m.running, 1);
    }

    #[tokio::test]
    async fn stamps_and_clears_first_pending_time() {
        let deps = TestDependencies::new();
        let ep = deps.kernel.endpoints.upsert(endpoint("e")).await.unwrap();
        let collector = MetricsCollector::new(Arc::clone(&deps.kernel));

        // Empty queue: no watermark.
        let m = collector.collect(&ep, Utc::now()).await.unwrap();
        assert!(m.waiting_time.is_none());

        deps.kernel
            .tasks
            .create(NewTask {
                task_id: "t1".to_string(),
                endpoint: "e".to_string(),
                input: None,
            })
            .await
            .unwrap();

        // 0 -> >0 stamps the watermark.
        let ep = deps.kernel.endpoints.get("e").await.unwrap();
        collector.collect(&ep, Utc::now()).await.unwrap();
        let ep = deps.kernel.endpoints.get("e").await.unwrap();
        assert!(ep.first_pending_time.is_some());

        // Drain the queue; >0 -> 0 clears it.
        deps.kernel
            .tasks
            .assign_pending("e", 5, "w1")
            .await
            .unwrap();
        collector.collect(&ep, Utc::now()).await.unwrap();
        let ep = deps.kernel.endpoints.get("e").await.unwrap();
        assert!(ep.first_pending_time.is_none());
    }

    #[tokio::test]
    async fn watch_events_override_provider_snapshot() {
        let deps = TestDependencies::new();
        let ep = deps.kernel.endpoints.upsert(endpoint("e")).await.unwrap();
        let collector = MetricsCollector::new(Arc::clone(&deps.kernel));

        collector.observe(&ReplicaEvent {
            endpoint: "e".to_string(),
            desired: 3,
            ready: 2,
            available: 2,
            spec_changed: false,
        });

        let m = collector.collect(&ep, Utc::now()).await.unwrap();
        assert_eq!(m.replicas_ready, 2);
        assert_eq!(m.replicas_available, 2);
    }
}
