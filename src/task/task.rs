//! Task model (§3).

use crate::ids::{AgentId, CapabilityId, TaskId, TransactionId};
use crate::money::Currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Accepted,
    InProgress,
    Delivered,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub requester_id: AgentId,
    pub executor_id: AgentId,
    pub capability_id: CapabilityId,
    pub input: Value,
    pub output: Option<Value>,
    pub status: TaskStatus,
    pub current_event: Option<String>,
    pub current_event_data: Option<Value>,
    pub callback_url: Option<String>,
    /// Never serialized back out to API responses; present here only so
    /// the coordinator can sign callback deliveries.
    #[serde(skip_serializing)]
    pub callback_secret: Option<String>,
    pub price: Decimal,
    pub currency: Currency,
    pub transaction_id: Option<TransactionId>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub deadline_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

/// §4.5 "History": an immutable row appended on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHistoryRow {
    pub task_id: TaskId,
    pub from_status: Option<TaskStatus>,
    pub to_status: TaskStatus,
    pub event: Option<String>,
    pub event_data: Option<Value>,
    pub changed_by: Option<AgentId>,
    pub created_at: DateTime<Utc>,
}
