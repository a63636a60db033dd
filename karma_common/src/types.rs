use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;

/// Role an agent plays during its heartbeat loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Seller,
    Buyer,
    BuyerSeller,
    Validator,
    Coordinator,
    CommunityBuyer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Seller => "seller",
            Role::Buyer => "buyer",
            Role::BuyerSeller => "buyer-seller",
            Role::Validator => "validator",
            Role::Coordinator => "coordinator",
            Role::CommunityBuyer => "community-buyer",
        }
    }
}

/// Closed set of evidence kinds the marketplace accepts on submissions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    JsonResponse,
    TextResponse,
    UrlReference,
    FileArtifact,
    CodeOutput,
    StructuredData,
    TextReport,
    Screenshot,
    ApiResponse,
}

/// A logical actor: stable name, wallet, registry id, role, derivation index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub address: Address,
    pub registry_id: Option<u64>,
    pub role: Role,
    pub derivation_index: u32,
    pub offered_products: Vec<String>,
    pub desired_products: Vec<String>,
}

/// A named data artifact a seller offers, content-addressed by (seller, name).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub seller_address: Address,
    pub name: String,
    pub price: u64,
    pub evidence_kind: EvidenceKind,
    pub category: String,
}

/// Finite set of states a task's escrow can occupy.
///
/// `Failed` is a local sub-state for a permanent (422) schema rejection; it is
/// not reachable from a remote event and is never reported back to the
/// marketplace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Unknown,
    Published,
    Applied,
    Assigned,
    Submitted,
    Approved,
    Settled,
    Rejected,
    Expired,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Settled
                | TaskState::Rejected
                | TaskState::Expired
                | TaskState::Cancelled
                | TaskState::Failed
        )
    }
}

/// The escrow unit. Immutable fields are set at creation; the rest mutate as
/// the task moves through the state machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub publisher_address: Address,
    pub title: String,
    pub description: String,
    pub category: String,
    pub bounty: u64,
    pub evidence_required: BTreeSet<EvidenceKind>,
    pub deadline: DateTime<Utc>,
    pub state: TaskState,
    pub assignee_address: Option<Address>,
    pub application_id: Option<String>,
    pub submission_id: Option<String>,
    pub validator_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Application {
    pub application_id: String,
    pub task_id: Uuid,
    pub applicant_address: Address,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Evidence is always keyed by kind, never `{type, data}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
    pub submission_id: String,
    pub task_id: Uuid,
    pub executor_address: Address,
    pub evidence: std::collections::BTreeMap<EvidenceKind, serde_json::Value>,
    pub submitted_at: DateTime<Utc>,
}

/// A pre-signed, time-bounded, nonce-unique transfer instruction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: u64,
    pub valid_after: u64,
    pub valid_before: u64,
    #[serde(with = "hex::serde")]
    pub nonce: [u8; 32],
    pub v: u8,
    #[serde(with = "hex::serde")]
    pub r: [u8; 32],
    #[serde(with = "hex::serde")]
    pub s: [u8; 32],
}

/// Per-layer reputation figure: score in [0,100], confidence in [0,1].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ReputationLayer {
    pub score: f64,
    pub confidence: f64,
    pub available: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReputationTier {
    Worst,
    Low,
    Mid,
    High,
    Best,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReputationSnapshot {
    pub agent_address: Address,
    pub on_chain: ReputationLayer,
    pub off_chain: ReputationLayer,
    pub transactional: ReputationLayer,
    pub composite: f64,
    pub tier: ReputationTier,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Ok,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub at: DateTime<Utc>,
    pub agent_name: String,
    pub step: u64,
    pub action: String,
    pub state_delta: String,
    pub status: HeartbeatStatus,
}
