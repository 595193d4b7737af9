//! Response bodies for the probe endpoints.
use serde::Serialize;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ReadyStatus {
    pub status: String,
    /// `claims` or `store`.
    pub resolver: String,
}
