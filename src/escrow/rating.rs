//! Rating model (§4.4): "After completed, either party may submit exactly
//! one rating for the counterparty."

use crate::ids::{AgentId, RatingId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub id: RatingId,
    pub transaction_id: TransactionId,
    pub rater_id: AgentId,
    pub ratee_id: AgentId,
    pub score: u8,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}
