use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    Open,
    PairingRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRequest {
    pub id: String,
    pub channel: String,
    pub user_id: String,
    pub platform: String,
    pub code: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Outcome of `check_access` — mirrors the two shapes spec §4.7 describes:
/// `{status: allowed}` and `{status: pending, request}`.
#[derive(Debug, Clone)]
pub enum AccessCheck {
    Allowed,
    Pending(PairingRequest),
}

#[derive(Debug, Clone)]
pub enum DmPolicyEvent {
    RequestCreated(PairingRequest),
    RequestApproved(PairingRequest),
    RequestRejected(PairingRequest),
    RequestExpired(PairingRequest),
}
