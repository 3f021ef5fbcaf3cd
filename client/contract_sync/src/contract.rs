//! Contract boundary: method names, argument order and return shapes.
//!
//! The contract's logic lives on-chain. This module only knows how to name a
//! call, lay out its arguments, and which cached entities a write touches.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};

use crate::errors::{Result, SyncError};
use crate::types::{amount, Address, ProjectDetail, ProjectId, ProjectSummary, VoteTally};

/// A single contract invocation as it travels to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractCall {
    pub method: &'static str,
    pub args: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
}

impl ContractCall {
    pub fn new(method: &'static str, args: Vec<Value>) -> Self {
        Self {
            method,
            args,
            from: None,
        }
    }

    pub fn sent_by(mut self, sender: &Address) -> Self {
        self.from = Some(sender.clone());
        self
    }
}

// ─────────────────────────────────────────────────────────
// Cached entity identities
// ─────────────────────────────────────────────────────────

/// Identity of every piece of on-chain state this crate caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    /// Full project record, milestones and investors included.
    Project(ProjectId),
    /// Summaries of every project, loaded in one sweep.
    ProjectIndex,
    ScreeningVotes(ProjectId),
    /// Whether an account has cast its screening vote on a project.
    ScreeningBallot(ProjectId, Address),
    Citizenship(Address),
    AdminRole(Address),
    MainAdmin,
    CitizenshipRequests,
}

impl EntityKey {
    /// The read that loads this entity. `ProjectIndex` has none: it is a sweep.
    pub fn read_call(&self) -> Option<ContractCall> {
        let call = match self {
            Self::Project(id) => ContractCall::new("getProjectDetails", vec![json!(id)]),
            Self::ProjectIndex => return None,
            Self::ScreeningVotes(id) => ContractCall::new("getScreeningVotes", vec![json!(id)]),
            Self::ScreeningBallot(id, account) => ContractCall::new(
                "hasVotedScreening",
                vec![json!(id), json!(account.as_str())],
            ),
            Self::Citizenship(account) => {
                ContractCall::new("isCitizen", vec![json!(account.as_str())])
            }
            Self::AdminRole(account) => ContractCall::new("isAdmin", vec![json!(account.as_str())]),
            Self::MainAdmin => ContractCall::new("mainAdmin", vec![]),
            Self::CitizenshipRequests => ContractCall::new("getPendingCitizenshipRequests", vec![]),
        };
        Some(call)
    }

    /// Keys that decide an account's [`Roles`](crate::types::Roles).
    pub fn is_role_of(&self, account: &Address) -> bool {
        match self {
            Self::Citizenship(a) | Self::AdminRole(a) => a == account,
            Self::MainAdmin => true,
            _ => false,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project(id) => write!(f, "project/{id}"),
            Self::ProjectIndex => write!(f, "projects"),
            Self::ScreeningVotes(id) => write!(f, "project/{id}/screening"),
            Self::ScreeningBallot(id, a) => write!(f, "project/{id}/screening/{a}"),
            Self::Citizenship(a) => write!(f, "citizen/{a}"),
            Self::AdminRole(a) => write!(f, "admin/{a}"),
            Self::MainAdmin => write!(f, "main-admin"),
            Self::CitizenshipRequests => write!(f, "citizenship-requests"),
        }
    }
}

impl Serialize for EntityKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Well-known read calls that are not tied to a cached key.
pub fn project_count_call() -> ContractCall {
    ContractCall::new("projectCount", vec![])
}

pub fn project_summary_call(id: ProjectId) -> ContractCall {
    ContractCall::new("getProject", vec![json!(id)])
}

// ─────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────

/// Everything needed to register a project with the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSubmission {
    pub name: String,
    pub description: String,
    pub icon_ref: String,
    pub banner_ref: String,
    pub milestones: Vec<String>,
    #[serde(with = "amount")]
    pub funding_goal: u128,
    pub funding_days: u32,
}

/// Every state-changing entry point of the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum WriteCall {
    RequestCitizenship,
    ApproveCitizenship { account: Address },
    RejectCitizenship { account: Address },
    RevokeCitizenship { account: Address },
    AddAdmin { account: Address },
    RemoveAdmin { account: Address },
    SubmitProject(ProjectSubmission),
    #[serde(rename_all = "camelCase")]
    VoteScreening { project_id: ProjectId, approve: bool },
    #[serde(rename_all = "camelCase")]
    FundProject {
        project_id: ProjectId,
        #[serde(with = "amount")]
        amount: u128,
    },
    #[serde(rename_all = "camelCase")]
    SubmitMilestone {
        project_id: ProjectId,
        milestone: u32,
        report: String,
    },
    #[serde(rename_all = "camelCase")]
    VoteMilestone {
        project_id: ProjectId,
        milestone: u32,
        approve: bool,
    },
    #[serde(rename_all = "camelCase")]
    FinalizeMilestone { project_id: ProjectId, milestone: u32 },
    #[serde(rename_all = "camelCase")]
    RequestBailout { project_id: ProjectId },
    #[serde(rename_all = "camelCase")]
    EmergencyWithdraw { project_id: ProjectId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    RequestCitizenship,
    ApproveCitizenship,
    RejectCitizenship,
    RevokeCitizenship,
    AddAdmin,
    RemoveAdmin,
    SubmitProject,
    VoteScreening,
    FundProject,
    SubmitMilestone,
    VoteMilestone,
    FinalizeMilestone,
    RequestBailout,
    EmergencyWithdraw,
}

impl WriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestCitizenship => "request_citizenship",
            Self::ApproveCitizenship => "approve_citizenship",
            Self::RejectCitizenship => "reject_citizenship",
            Self::RevokeCitizenship => "revoke_citizenship",
            Self::AddAdmin => "add_admin",
            Self::RemoveAdmin => "remove_admin",
            Self::SubmitProject => "submit_project",
            Self::VoteScreening => "vote_screening",
            Self::FundProject => "fund_project",
            Self::SubmitMilestone => "submit_milestone",
            Self::VoteMilestone => "vote_milestone",
            Self::FinalizeMilestone => "finalize_milestone",
            Self::RequestBailout => "request_bailout",
            Self::EmergencyWithdraw => "emergency_withdraw",
        }
    }
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WriteCall {
    pub fn kind(&self) -> WriteKind {
        match self {
            Self::RequestCitizenship => WriteKind::RequestCitizenship,
            Self::ApproveCitizenship { .. } => WriteKind::ApproveCitizenship,
            Self::RejectCitizenship { .. } => WriteKind::RejectCitizenship,
            Self::RevokeCitizenship { .. } => WriteKind::RevokeCitizenship,
            Self::AddAdmin { .. } => WriteKind::AddAdmin,
            Self::RemoveAdmin { .. } => WriteKind::RemoveAdmin,
            Self::SubmitProject(_) => WriteKind::SubmitProject,
            Self::VoteScreening { .. } => WriteKind::VoteScreening,
            Self::FundProject { .. } => WriteKind::FundProject,
            Self::SubmitMilestone { .. } => WriteKind::SubmitMilestone,
            Self::VoteMilestone { .. } => WriteKind::VoteMilestone,
            Self::FinalizeMilestone { .. } => WriteKind::FinalizeMilestone,
            Self::RequestBailout { .. } => WriteKind::RequestBailout,
            Self::EmergencyWithdraw { .. } => WriteKind::EmergencyWithdraw,
        }
    }

    /// The entity a duplicate of this write would collide on. Duplicates are
    /// only ever counted per sender.
    pub fn subject(&self, sender: &Address) -> EntityKey {
        match self {
            Self::RequestCitizenship => EntityKey::Citizenship(sender.clone()),
            Self::ApproveCitizenship { account }
            | Self::RejectCitizenship { account }
            | Self::RevokeCitizenship { account } => EntityKey::Citizenship(account.clone()),
            Self::AddAdmin { account } | Self::RemoveAdmin { account } => {
                EntityKey::AdminRole(account.clone())
            }
            Self::SubmitProject(_) => EntityKey::ProjectIndex,
            Self::VoteScreening { project_id, .. } => {
                EntityKey::ScreeningBallot(*project_id, sender.clone())
            }
            Self::FundProject { project_id, .. }
            | Self::SubmitMilestone { project_id, .. }
            | Self::VoteMilestone { project_id, .. }
            | Self::FinalizeMilestone { project_id, .. }
            | Self::RequestBailout { project_id }
            | Self::EmergencyWithdraw { project_id } => EntityKey::Project(*project_id),
        }
    }

    /// Every cached entity whose value may change once this write confirms.
    pub fn related(&self, sender: &Address) -> Vec<EntityKey> {
        match self {
            Self::RequestCitizenship => vec![
                EntityKey::Citizenship(sender.clone()),
                EntityKey::CitizenshipRequests,
            ],
            Self::ApproveCitizenship { account } | Self::RejectCitizenship { account } => vec![
                EntityKey::Citizenship(account.clone()),
                EntityKey::CitizenshipRequests,
            ],
            Self::RevokeCitizenship { account } => vec![EntityKey::Citizenship(account.clone())],
            Self::AddAdmin { account } | Self::RemoveAdmin { account } => {
                vec![EntityKey::AdminRole(account.clone())]
            }
            Self::SubmitProject(_) => vec![EntityKey::ProjectIndex],
            Self::VoteScreening { project_id, .. } => vec![
                EntityKey::ScreeningVotes(*project_id),
                EntityKey::ScreeningBallot(*project_id, sender.clone()),
                EntityKey::Project(*project_id),
                EntityKey::ProjectIndex,
            ],
            Self::FundProject { project_id, .. }
            | Self::SubmitMilestone { project_id, .. }
            | Self::VoteMilestone { project_id, .. }
            | Self::FinalizeMilestone { project_id, .. }
            | Self::RequestBailout { project_id }
            | Self::EmergencyWithdraw { project_id } => {
                vec![EntityKey::Project(*project_id), EntityKey::ProjectIndex]
            }
        }
    }

    /// Native value attached to the transaction.
    pub fn value(&self) -> u128 {
        match self {
            Self::FundProject { amount, .. } => *amount,
            _ => 0,
        }
    }

    pub fn to_call(&self, sender: &Address) -> ContractCall {
        let (method, args) = match self {
            Self::RequestCitizenship => ("requestCitizenship", vec![]),
            Self::ApproveCitizenship { account } => {
                ("approveCitizenship", vec![json!(account.as_str())])
            }
            Self::RejectCitizenship { account } => {
                ("rejectCitizenship", vec![json!(account.as_str())])
            }
            Self::RevokeCitizenship { account } => {
                ("revokeCitizenship", vec![json!(account.as_str())])
            }
            Self::AddAdmin { account } => ("addAdmin", vec![json!(account.as_str())]),
            Self::RemoveAdmin { account } => ("removeAdmin", vec![json!(account.as_str())]),
            Self::SubmitProject(s) => (
                "submitProject",
                vec![
                    json!(s.name),
                    json!(s.description),
                    json!(s.icon_ref),
                    json!(s.banner_ref),
                    json!(s.milestones),
                    json!(s.funding_goal.to_string()),
                    json!(s.funding_days),
                ],
            ),
            Self::VoteScreening {
                project_id,
                approve,
            } => ("voteScreening", vec![json!(project_id), json!(approve)]),
            Self::FundProject { project_id, .. } => ("fundProject", vec![json!(project_id)]),
            Self::SubmitMilestone {
                project_id,
                milestone,
                report,
            } => (
                "submitMilestone",
                vec![json!(project_id), json!(milestone), json!(report)],
            ),
            Self::VoteMilestone {
                project_id,
                milestone,
                approve,
            } => (
                "voteMilestone",
                vec![json!(project_id), json!(milestone), json!(approve)],
            ),
            Self::FinalizeMilestone {
                project_id,
                milestone,
            } => (
                "finalizeMilestone",
                vec![json!(project_id), json!(milestone)],
            ),
            Self::RequestBailout { project_id } => ("requestBailout", vec![json!(project_id)]),
            Self::EmergencyWithdraw { project_id } => {
                ("emergencyWithdraw", vec![json!(project_id)])
            }
        };
        ContractCall::new(method, args).sent_by(sender)
    }
}

// ─────────────────────────────────────────────────────────
// Return-shape decoding
// ─────────────────────────────────────────────────────────

pub fn decode_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
        Value::String(s) if s == "true" || s == "false" => Ok(s == "true"),
        other => Err(SyncError::Decode(format!("expected bool, got {other}"))),
    }
}

pub fn decode_u64(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| SyncError::Decode(format!("expected u64, got {n}"))),
        Value::String(s) => s
            .parse()
            .map_err(|_| SyncError::Decode(format!("expected u64, got {s:?}"))),
        other => Err(SyncError::Decode(format!("expected u64, got {other}"))),
    }
}

pub fn decode_address(value: &Value) -> Result<Address> {
    let raw = value
        .as_str()
        .ok_or_else(|| SyncError::Decode(format!("expected address, got {value}")))?;
    Address::parse(raw).map_err(|e| SyncError::Decode(e.to_string()))
}

pub fn decode_addresses(value: &Value) -> Result<Vec<Address>> {
    value
        .as_array()
        .ok_or_else(|| SyncError::Decode(format!("expected address list, got {value}")))?
        .iter()
        .map(decode_address)
        .collect()
}

pub fn decode_summary(value: Value) -> Result<ProjectSummary> {
    serde_json::from_value(value).map_err(|e| SyncError::Decode(format!("project summary: {e}")))
}

pub fn decode_detail(value: Value) -> Result<ProjectDetail> {
    serde_json::from_value(value).map_err(|e| SyncError::Decode(format!("project detail: {e}")))
}

pub fn decode_tally(project_id: ProjectId, value: &Value) -> Result<VoteTally> {
    let field = |key: &str| {
        value
            .get(key)
            .ok_or_else(|| SyncError::Decode(format!("tally missing {key}")))
            .and_then(decode_u64)
    };
    Ok(VoteTally {
        project_id,
        votes_for: field("votesFor")?,
        votes_against: field("votesAgainst")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::parse(&format!("0x{}", hex::encode([byte; 20]))).unwrap()
    }

    #[test]
    fn vote_targets_sender_ballot() {
        let voter = addr(7);
        let call = WriteCall::VoteScreening {
            project_id: 7,
            approve: true,
        };
        assert_eq!(call.subject(&voter), EntityKey::ScreeningBallot(7, voter.clone()));
        let related = call.related(&voter);
        assert!(related.contains(&EntityKey::ScreeningVotes(7)));
        assert!(related.contains(&EntityKey::Project(7)));

        let wire = call.to_call(&voter);
        assert_eq!(wire.method, "voteScreening");
        assert_eq!(wire.args, vec![json!(7), json!(true)]);
        assert_eq!(wire.from, Some(voter));
    }

    #[test]
    fn fund_carries_value() {
        let call = WriteCall::FundProject {
            project_id: 3,
            amount: 1_000,
        };
        assert_eq!(call.value(), 1_000);
        assert_eq!(call.kind(), WriteKind::FundProject);
    }

    #[test]
    fn write_call_deserializes_from_tagged_json() {
        let call: WriteCall = serde_json::from_value(json!({
            "method": "voteScreening",
            "projectId": 4,
            "approve": false
        }))
        .unwrap();
        assert_eq!(
            call,
            WriteCall::VoteScreening {
                project_id: 4,
                approve: false
            }
        );
    }

    #[test]
    fn decode_tally_accepts_string_counts() {
        let tally = decode_tally(2, &json!({ "votesFor": "5", "votesAgainst": 1 })).unwrap();
        assert_eq!(tally.votes_for, 5);
        assert_eq!(tally.votes_against, 1);
        assert!(decode_tally(2, &json!({ "votesFor": 1 })).is_err());
    }

    #[test]
    fn decode_bool_variants() {
        assert!(decode_bool(&json!(true)).unwrap());
        assert!(!decode_bool(&json!(0)).unwrap());
        assert!(decode_bool(&json!("yes")).is_err());
    }

    #[test]
    fn role_keys() {
        let a = addr(1);
        assert!(EntityKey::Citizenship(a.clone()).is_role_of(&a));
        assert!(EntityKey::MainAdmin.is_role_of(&a));
        assert!(!EntityKey::AdminRole(addr(2)).is_role_of(&a));
    }
}
