//! # Types
//!
//! Shared data structures read from the crowdfunding contract. None of these
//! are owned by this crate: they are decoded snapshots of on-chain state and
//! are only ever replaced wholesale by a newer read.
//!
//! Amounts are `u128` base units and travel as decimal strings on the wire,
//! since JSON numbers cannot hold the full range.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::SyncError;

/// Contract-assigned project identifier.
pub type ProjectId = u64;

/// Account address, stored lowercase with its `0x` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let body = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or_else(|| SyncError::InvalidInput(format!("address missing 0x prefix: {raw}")))?;
        let bytes = hex::decode(body)
            .map_err(|e| SyncError::InvalidInput(format!("address {raw}: {e}")))?;
        if bytes.len() != 20 {
            return Err(SyncError::InvalidInput(format!(
                "address {raw} has {} bytes, expected 20",
                bytes.len()
            )));
        }
        Ok(Self(format!("0x{}", hex::encode(bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// 32-byte transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHash(String);

impl TxHash {
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let body = raw
            .strip_prefix("0x")
            .ok_or_else(|| SyncError::InvalidInput(format!("tx hash missing 0x prefix: {raw}")))?;
        let bytes = hex::decode(body)
            .map_err(|e| SyncError::InvalidInput(format!("tx hash {raw}: {e}")))?;
        if bytes.len() != 32 {
            return Err(SyncError::InvalidInput(format!(
                "tx hash {raw} has {} bytes, expected 32",
                bytes.len()
            )));
        }
        Ok(Self(format!("0x{}", hex::encode(bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TxHash::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `u128` amounts carried as decimal strings.
pub mod amount {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => s.parse().map_err(serde::de::Error::custom),
            Value::Number(n) => n
                .as_u64()
                .map(u128::from)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid amount {n}"))),
            other => Err(serde::de::Error::custom(format!("invalid amount {other}"))),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Entities
// ─────────────────────────────────────────────────────────

/// Roles derived for one account. Only ever built once every role read has
/// settled, so the three flags are mutually consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roles {
    pub is_citizen: bool,
    /// Holds the admin flag, or is the main admin.
    pub is_admin: bool,
    pub is_main_admin: bool,
}

impl Roles {
    pub fn derive(account: &Address, citizen: bool, admin_flag: bool, main_admin: &Address) -> Self {
        let is_main_admin = account == main_admin;
        Self {
            is_citizen: citizen,
            is_admin: admin_flag || is_main_admin,
            is_main_admin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub name: String,
    pub creator: Address,
    pub approved: bool,
    #[serde(with = "amount")]
    pub total_funds: u128,
    pub current_milestone: u32,
    pub milestone_count: u32,
    pub funding_expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub description: String,
    pub completed: bool,
    pub votes_for: u64,
    pub votes_against: u64,
    pub funds_released: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investor {
    pub address: Address,
    #[serde(with = "amount")]
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub summary: ProjectSummary,
    pub description: String,
    pub icon_ref: String,
    pub banner_ref: String,
    pub milestones: Vec<Milestone>,
    pub investors: Vec<Investor>,
}

/// Screening-round tally. Counts only grow within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    pub project_id: ProjectId,
    pub votes_for: u64,
    pub votes_against: u64,
}

impl VoteTally {
    /// True when `self` could have been observed after `earlier`.
    pub fn is_successor_of(&self, earlier: &VoteTally) -> bool {
        self.votes_for >= earlier.votes_for && self.votes_against >= earlier.votes_against
    }
}

/// A tally as seen by one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStatus {
    pub tally: VoteTally,
    pub has_voted: bool,
    /// A vote from this account is signed or awaiting confirmation.
    pub pending: bool,
}

/// Result of a list sweep. Projects that failed to load are reported by id
/// instead of failing the whole list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPage {
    pub projects: Vec<ProjectSummary>,
    pub failed: Vec<ProjectId>,
}

impl ProjectPage {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}
