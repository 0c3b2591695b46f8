//! Gatekeeper for inbound direct messages: per-channel open/pairing-required
//! policy and the pairing-code approval workflow.

pub mod error;
pub mod store;
pub mod types;

pub use error::{DmPolicyError, Result};
pub use store::DmPolicyStore;
pub use types::{AccessCheck, DmPolicyEvent, PairingRequest, PolicyMode, RequestStatus};
