//! Task Coordinator (§4.5): capability-bound unit-of-work lifecycle with
//! schema-validated input/output and signed callbacks. One critical
//! section per task id, same pattern as the escrow coordinator.

use crate::adapters::capability::{CapabilityLookup, CapabilityStatus, PricingStrategy};
use crate::adapters::Persistence;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::escrow::{TransactionCoordinator, TransactionSource};
use crate::events::webhook::{sign_body, SharedDispatcher};
use crate::events::EventFabric;
use crate::ids::{AgentId, CapabilityId, TaskId};
use crate::schema::SchemaValidator;
use crate::task::task::{Task, TaskHistoryRow, TaskStatus};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

pub struct CreateTaskRequest {
    pub capability_id: CapabilityId,
    pub input: Value,
    pub callback_url: Option<String>,
    pub callback_secret: Option<String>,
    pub metadata: Value,
}

pub struct TaskCoordinator {
    persistence: Arc<dyn Persistence>,
    capabilities: Arc<dyn CapabilityLookup>,
    schema: Arc<dyn SchemaValidator>,
    pricing: Arc<dyn PricingStrategy>,
    events: EventFabric,
    webhooks: SharedDispatcher,
    transactions: Arc<TransactionCoordinator>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    locks: DashMap<TaskId, Arc<Mutex<()>>>,
}

impl TaskCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        persistence: Arc<dyn Persistence>,
        capabilities: Arc<dyn CapabilityLookup>,
        schema: Arc<dyn SchemaValidator>,
        pricing: Arc<dyn PricingStrategy>,
        events: EventFabric,
        webhooks: SharedDispatcher,
        transactions: Arc<TransactionCoordinator>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            persistence,
            capabilities,
            schema,
            pricing,
            events,
            webhooks,
            transactions,
            clock,
            config,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, id: TaskId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// §4.5 `CreateTask`.
    pub async fn create_task(&self, requester_id: AgentId, request: CreateTaskRequest) -> Result<Task> {
        let capability = self
            .capabilities
            .get(request.capability_id)
            .await?
            .ok_or(Error::NotFound)?;
        if capability.status != CapabilityStatus::Active || !capability.accepting_tasks {
            return Err(Error::invalid_state("inactive", "create_task"));
        }
        if capability.agent_id == requester_id {
            return Err(Error::NotAuthorized);
        }

        self.schema.validate(&request.input, &capability.input_schema)?;

        let price = self.pricing.price_for(&capability);

        let task = Task {
            id: TaskId::new(),
            requester_id,
            executor_id: capability.agent_id,
            capability_id: capability.id,
            input: request.input,
            output: None,
            status: TaskStatus::Pending,
            current_event: None,
            current_event_data: None,
            callback_url: request.callback_url,
            callback_secret: request.callback_secret,
            price: price.amount,
            currency: price.currency,
            transaction_id: None,
            error_message: None,
            retry_count: 0,
            max_retries: self.config.task_default_max_retries,
            deadline_at: None,
            started_at: None,
            completed_at: None,
            metadata: request.metadata,
        };

        self.persistence.save_task(task.clone()).await?;
        self.append_history(&task, None, None, None, None).await?;
        self.events
            .publish(
                "task.created",
                json!({"requester_id": task.requester_id.to_string(), "executor_id": task.executor_id.to_string()}),
            )
            .await?;
        self.deliver_callback(&task, None, None).await;
        Ok(task)
    }

    /// `pending -> accepted`: creates the escrow Transaction and links it.
    pub async fn accept(&self, task_id: TaskId, executor_id: AgentId) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.load(task_id).await?;
        self.authorize(&task, executor_id, Actor::Executor)?;
        if task.status != TaskStatus::Pending {
            return Err(Error::invalid_state(format!("{:?}", task.status), "accept"));
        }

        let transaction = self
            .transactions
            .create(
                task.requester_id,
                task.executor_id,
                task.price,
                task.currency,
                TransactionSource::TaskAssignment,
                task.id.to_string(),
            )
            .await?;

        let from = task.status;
        task.transaction_id = Some(transaction.id);
        task.status = TaskStatus::Accepted;
        self.persistence.save_task(task.clone()).await?;
        self.append_history(&task, Some(from), None, None, Some(executor_id)).await?;
        self.events
            .publish(
                "task.accepted",
                json!({"requester_id": task.requester_id.to_string(), "executor_id": task.executor_id.to_string()}),
            )
            .await?;
        self.deliver_callback(&task, None, None).await;
        Ok(task)
    }

    /// `{pending, accepted} -> cancelled`.
    pub async fn cancel(&self, task_id: TaskId, requester_id: AgentId) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.load(task_id).await?;
        self.authorize(&task, requester_id, Actor::Requester)?;
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Accepted) {
            return Err(Error::invalid_state(format!("{:?}", task.status), "cancel"));
        }

        let from = task.status;
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(self.clock.now());
        self.persistence.save_task(task.clone()).await?;
        self.append_history(&task, Some(from), None, None, Some(requester_id)).await?;
        self.events
            .publish(
                "task.cancelled",
                json!({"requester_id": task.requester_id.to_string(), "executor_id": task.executor_id.to_string()}),
            )
            .await?;
        self.deliver_callback(&task, None, None).await;
        Ok(task)
    }

    /// `{accepted, in_progress} -> in_progress`.
    pub async fn progress(&self, task_id: TaskId, executor_id: AgentId, event: String, event_data: Option<Value>) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.load(task_id).await?;
        self.authorize(&task, executor_id, Actor::Executor)?;
        if !matches!(task.status, TaskStatus::Accepted | TaskStatus::InProgress) {
            return Err(Error::invalid_state(format!("{:?}", task.status), "progress"));
        }

        if let Some(capability) = self.capabilities.get(task.capability_id).await? {
            if let Some(allowed) = &capability.status_events {
                if !allowed.iter().any(|e| e == &event) {
                    return Err(Error::invalid_input("/event", format!("{event} is not a declared status event")));
                }
            }
        }

        let from = task.status;
        if task.started_at.is_none() {
            task.started_at = Some(self.clock.now());
        }
        task.status = TaskStatus::InProgress;
        task.current_event = Some(event.clone());
        task.current_event_data = event_data.clone();
        self.persistence.save_task(task.clone()).await?;
        self.append_history(&task, Some(from), Some(event.clone()), event_data.clone(), Some(executor_id))
            .await?;
        self.events
            .publish(
                "task.progress",
                json!({"requester_id": task.requester_id.to_string(), "executor_id": task.executor_id.to_string(), "event": event}),
            )
            .await?;
        self.deliver_callback(&task, Some(event), event_data).await;
        Ok(task)
    }

    /// `{accepted, in_progress} -> delivered`.
    pub async fn deliver(&self, task_id: TaskId, executor_id: AgentId, output: Value) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.load(task_id).await?;
        self.authorize(&task, executor_id, Actor::Executor)?;
        if !matches!(task.status, TaskStatus::Accepted | TaskStatus::InProgress) {
            return Err(Error::invalid_state(format!("{:?}", task.status), "deliver"));
        }

        if let Some(capability) = self.capabilities.get(task.capability_id).await? {
            if let Some(output_schema) = &capability.output_schema {
                self.schema.validate(&output, output_schema)?;
            }
        }

        let from = task.status;
        task.output = Some(output);
        task.status = TaskStatus::Delivered;
        self.persistence.save_task(task.clone()).await?;
        self.append_history(&task, Some(from), None, None, Some(executor_id)).await?;
        self.events
            .publish(
                "task.delivered",
                json!({"requester_id": task.requester_id.to_string(), "executor_id": task.executor_id.to_string()}),
            )
            .await?;
        self.deliver_callback(&task, None, None).await;
        Ok(task)
    }

    /// `delivered -> completed`.
    pub async fn confirm(&self, task_id: TaskId, requester_id: AgentId) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.load(task_id).await?;
        self.authorize(&task, requester_id, Actor::Requester)?;
        if task.status != TaskStatus::Delivered {
            return Err(Error::invalid_state(format!("{:?}", task.status), "confirm"));
        }

        let from = task.status;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(self.clock.now());
        self.persistence.save_task(task.clone()).await?;
        self.append_history(&task, Some(from), None, None, Some(requester_id)).await?;
        self.capabilities.record_outcome(task.capability_id, true).await?;
        self.events
            .publish(
                "task.completed",
                json!({"requester_id": task.requester_id.to_string(), "executor_id": task.executor_id.to_string()}),
            )
            .await?;
        self.deliver_callback(&task, None, None).await;
        Ok(task)
    }

    /// Any non-terminal state: `fail` with optional retry.
    pub async fn fail(&self, task_id: TaskId, executor_id: AgentId, error_message: String, retry: bool) -> Result<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.load(task_id).await?;
        self.authorize(&task, executor_id, Actor::Executor)?;
        if task.status.is_terminal() {
            return Err(Error::invalid_state(format!("{:?}", task.status), "fail"));
        }

        let from = task.status;
        task.error_message = Some(error_message);

        if retry && task.retry_count < task.max_retries {
            task.retry_count += 1;
            task.status = TaskStatus::Pending;
            self.persistence.save_task(task.clone()).await?;
            self.append_history(&task, Some(from), None, None, Some(executor_id)).await?;
            self.events
                .publish(
                    "task.retry",
                    json!({"requester_id": task.requester_id.to_string(), "executor_id": task.executor_id.to_string(), "retry_count": task.retry_count}),
                )
                .await?;
            self.deliver_callback(&task, None, None).await;
        } else {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(self.clock.now());
            self.persistence.save_task(task.clone()).await?;
            self.append_history(&task, Some(from), None, None, Some(executor_id)).await?;
            self.capabilities.record_outcome(task.capability_id, false).await?;
            self.events
                .publish(
                    "task.failed",
                    json!({"requester_id": task.requester_id.to_string(), "executor_id": task.executor_id.to_string()}),
                )
                .await?;
            self.deliver_callback(&task, None, None).await;
        }
        Ok(task)
    }

    pub async fn history(&self, task_id: TaskId) -> Result<Vec<TaskHistoryRow>> {
        self.persistence.task_history(task_id).await
    }

    fn authorize(&self, task: &Task, caller_id: AgentId, actor: Actor) -> Result<()> {
        let expected = match actor {
            Actor::Requester => task.requester_id,
            Actor::Executor => task.executor_id,
        };
        if caller_id != expected {
            return Err(Error::NotAuthorized);
        }
        Ok(())
    }

    async fn load(&self, id: TaskId) -> Result<Task> {
        self.persistence.get_task(id).await?.ok_or(Error::NotFound)
    }

    async fn append_history(
        &self,
        task: &Task,
        from_status: Option<TaskStatus>,
        event: Option<String>,
        event_data: Option<Value>,
        changed_by: Option<AgentId>,
    ) -> Result<()> {
        self.persistence
            .append_task_history(TaskHistoryRow {
                task_id: task.id,
                from_status,
                to_status: task.status,
                event,
                event_data,
                changed_by,
                created_at: self.clock.now(),
            })
            .await
    }

    /// §4.5 "Callback delivery": a signed JSON envelope through the Event
    /// Fabric's webhook pathway (shared retry policy), not the topic/log
    /// sinks — this is a direct POST to `callback_url`, not a subscription.
    async fn deliver_callback(&self, task: &Task, event: Option<String>, event_data: Option<Value>) {
        let (Some(url), Some(secret)) = (&task.callback_url, &task.callback_secret) else {
            return;
        };

        let envelope = json!({
            "task_id": task.id.to_string(),
            "capability_id": task.capability_id.to_string(),
            "status": format!("{:?}", task.status).to_lowercase(),
            "event": event,
            "event_data": event_data,
            "output": task.output,
            "error": task.error_message,
            "transaction_id": task.transaction_id.map(|id| id.to_string()),
            "timestamp": self.clock.now().timestamp(),
        });
        let body = envelope.to_string();
        let signature = sign_body(&body, secret);

        let webhooks = self.webhooks.clone();
        let url = url.clone();
        tokio::spawn(async move {
            if let Err(err) = webhooks.deliver_callback(&url, body, signature).await {
                warn!(error = %err, "task callback delivery failed");
            }
        });
    }
}

enum Actor {
    Requester,
    Executor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::capability::{CapabilityRecord, FixedFeePricing, InMemoryCapabilities};
    use crate::adapters::{InMemoryPayments, InMemoryPersistence, InMemoryScoring};
    use crate::clock::SystemClock;
    use crate::escrow::TransactionCoordinator;
    use crate::money::{Currency, Money};
    use crate::schema::StructuralValidator;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn harness() -> (TaskCoordinator, CapabilityId, AgentId, AgentId) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let config = Arc::new(Config::default());
        let persistence = InMemoryPersistence::new();
        let events = EventFabric::new(persistence.clone(), clock.clone(), config.clone());

        let transactions = Arc::new(TransactionCoordinator::new(
            persistence.clone(),
            Arc::new(InMemoryPayments::new()),
            Arc::new(InMemoryScoring::new()),
            events.clone(),
            clock.clone(),
            config.clone(),
        ));

        let capabilities = Arc::new(InMemoryCapabilities::new());
        let executor = AgentId::new();
        let capability_id = CapabilityId::new();
        capabilities.register(CapabilityRecord {
            id: capability_id,
            agent_id: executor,
            status: CapabilityStatus::Active,
            accepting_tasks: true,
            input_schema: json!({
                "type": "object",
                "properties": {"x": {"type": "integer"}},
                "required": ["x"],
            }),
            output_schema: None,
            status_events: Some(vec!["scanning".to_string()]),
            base_fee: Money::new(dec!(5), Currency::usd()),
        });

        let webhooks = Arc::new(crate::events::webhook::WebhookDispatcher::new(
            Duration::from_secs(1),
            0,
            Duration::from_millis(1),
        ));

        let coordinator = TaskCoordinator::new(
            persistence,
            capabilities,
            Arc::new(StructuralValidator),
            Arc::new(FixedFeePricing),
            events,
            webhooks,
            transactions,
            clock,
            config,
        );
        let requester = AgentId::new();
        (coordinator, capability_id, requester, executor)
    }

    fn request(capability_id: CapabilityId, input: Value) -> CreateTaskRequest {
        CreateTaskRequest {
            capability_id,
            input,
            callback_url: None,
            callback_secret: None,
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn s6_schema_violation_rejects_with_no_task_created() {
        let (coordinator, capability_id, requester, _executor) = harness();
        let err = coordinator
            .create_task(requester, request(capability_id, json!({"x": "hello"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn full_lifecycle_reaches_completed_with_history() {
        let (coordinator, capability_id, requester, executor) = harness();
        let task = coordinator
            .create_task(requester, request(capability_id, json!({"x": 1})))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let task = coordinator.accept(task.id, executor).await.unwrap();
        assert_eq!(task.status, TaskStatus::Accepted);
        assert!(task.transaction_id.is_some());

        let task = coordinator
            .progress(task.id, executor, "scanning".into(), None)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);

        let task = coordinator.deliver(task.id, executor, json!({"result": "ok"})).await.unwrap();
        assert_eq!(task.status, TaskStatus::Delivered);

        let task = coordinator.confirm(task.id, requester).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        let history = coordinator.history(task.id).await.unwrap();
        let completions: Vec<_> = history.iter().filter(|r| r.to_status == TaskStatus::Completed).collect();
        assert_eq!(completions.len(), 1);
        assert!(history.last().unwrap().to_status == TaskStatus::Completed);
    }

    #[tokio::test]
    async fn undeclared_progress_event_is_rejected() {
        let (coordinator, capability_id, requester, executor) = harness();
        let task = coordinator
            .create_task(requester, request(capability_id, json!({"x": 1})))
            .await
            .unwrap();
        coordinator.accept(task.id, executor).await.unwrap();

        assert!(coordinator.progress(task.id, executor, "unknown_event".into(), None).await.is_err());
    }

    #[tokio::test]
    async fn fail_with_retry_returns_to_pending_until_exhausted() {
        let (coordinator, capability_id, requester, executor) = harness();
        let task = coordinator
            .create_task(requester, request(capability_id, json!({"x": 1})))
            .await
            .unwrap();
        let task = coordinator.accept(task.id, executor).await.unwrap();

        let mut current = task;
        for _ in 0..current.max_retries {
            current = coordinator.fail(current.id, executor, "boom".into(), true).await.unwrap();
            assert_eq!(current.status, TaskStatus::Pending);
        }
        current = coordinator.fail(current.id, executor, "boom".into(), true).await.unwrap();
        assert_eq!(current.status, TaskStatus::Failed);
        assert_eq!(current.retry_count, current.max_retries);
    }

    #[tokio::test]
    async fn self_assignment_is_rejected() {
        let (coordinator, capability_id, _requester, executor) = harness();
        let err = coordinator
            .create_task(executor, request(capability_id, json!({"x": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAuthorized));
    }
}
