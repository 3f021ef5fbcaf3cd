//! Canonical event types emitted by the crowdfunding contract, and the cached
//! entities each one makes out of date.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::EntityKey;
use crate::rpc::RawEvent;
use crate::types::{Address, ProjectId};

/// All recognised event kinds from the crowdfunding contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProjectSubmitted,
    ProjectApproved,
    ProjectRejected,
    /// A citizen voted during project screening.
    ScreeningVoteCast,
    ProjectFunded,
    MilestoneSubmitted,
    /// An investor voted on a milestone report.
    MilestoneVoteCast,
    /// Milestone closed and, if approved, its tranche released.
    MilestoneFinalized,
    BailoutRequested,
    EmergencyWithdrawal,
    CitizenshipRequested,
    CitizenshipApproved,
    CitizenshipRejected,
    CitizenshipRevoked,
    AdminAdded,
    AdminRemoved,
    MainAdminChanged,
    /// An event from this contract that we don't recognise yet.
    Unknown,
}

impl EventKind {
    /// Parse the event name as emitted by the contract.
    pub fn from_name(name: &str) -> Self {
        match name {
            "ProjectSubmitted" => Self::ProjectSubmitted,
            "ProjectApproved" => Self::ProjectApproved,
            "ProjectRejected" => Self::ProjectRejected,
            "ScreeningVoteCast" => Self::ScreeningVoteCast,
            "ProjectFunded" => Self::ProjectFunded,
            "MilestoneSubmitted" => Self::MilestoneSubmitted,
            "MilestoneVoteCast" => Self::MilestoneVoteCast,
            "MilestoneFinalized" => Self::MilestoneFinalized,
            "BailoutRequested" => Self::BailoutRequested,
            "EmergencyWithdrawal" => Self::EmergencyWithdrawal,
            "CitizenshipRequested" => Self::CitizenshipRequested,
            "CitizenshipApproved" => Self::CitizenshipApproved,
            "CitizenshipRejected" => Self::CitizenshipRejected,
            "CitizenshipRevoked" => Self::CitizenshipRevoked,
            "AdminAdded" => Self::AdminAdded,
            "AdminRemoved" => Self::AdminRemoved,
            "MainAdminChanged" => Self::MainAdminChanged,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectSubmitted => "project_submitted",
            Self::ProjectApproved => "project_approved",
            Self::ProjectRejected => "project_rejected",
            Self::ScreeningVoteCast => "screening_vote_cast",
            Self::ProjectFunded => "project_funded",
            Self::MilestoneSubmitted => "milestone_submitted",
            Self::MilestoneVoteCast => "milestone_vote_cast",
            Self::MilestoneFinalized => "milestone_finalized",
            Self::BailoutRequested => "bailout_requested",
            Self::EmergencyWithdrawal => "emergency_withdrawal",
            Self::CitizenshipRequested => "citizenship_requested",
            Self::CitizenshipApproved => "citizenship_approved",
            Self::CitizenshipRejected => "citizenship_rejected",
            Self::CitizenshipRevoked => "citizenship_revoked",
            Self::AdminAdded => "admin_added",
            Self::AdminRemoved => "admin_removed",
            Self::MainAdminChanged => "main_admin_changed",
            Self::Unknown => "unknown",
        }
    }
}

/// A decoded contract event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEvent {
    pub kind: EventKind,
    pub project_id: Option<ProjectId>,
    /// The account the event is about: voter, funder, applicant or admin.
    pub account: Option<Address>,
    pub block: u64,
    pub tx_hash: Option<String>,
}

impl ContractEvent {
    pub fn decode(raw: &RawEvent) -> Self {
        Self {
            kind: EventKind::from_name(&raw.name),
            project_id: extract_field(&raw.args, &["projectId", "id"]).and_then(as_u64),
            account: extract_field(&raw.args, &["account", "voter", "funder", "creator", "admin"])
                .and_then(|v| v.as_str())
                .and_then(|s| Address::parse(s).ok()),
            block: raw.block_number,
            tx_hash: raw.transaction_hash.clone(),
        }
    }

    /// Cached entities whose value this event may have changed.
    pub fn affected_keys(&self) -> Vec<EntityKey> {
        use EventKind::*;

        let project = |extra: &mut Vec<EntityKey>| {
            if let Some(id) = self.project_id {
                extra.push(EntityKey::Project(id));
            }
            extra.push(EntityKey::ProjectIndex);
        };

        let mut keys = Vec::new();
        match self.kind {
            ProjectSubmitted | ProjectApproved | ProjectRejected | ProjectFunded
            | MilestoneSubmitted | MilestoneVoteCast | MilestoneFinalized | BailoutRequested
            | EmergencyWithdrawal => project(&mut keys),
            ScreeningVoteCast => {
                if let Some(id) = self.project_id {
                    keys.push(EntityKey::ScreeningVotes(id));
                    if let Some(voter) = &self.account {
                        keys.push(EntityKey::ScreeningBallot(id, voter.clone()));
                    }
                }
                project(&mut keys);
            }
            CitizenshipRequested | CitizenshipApproved | CitizenshipRejected => {
                if let Some(account) = &self.account {
                    keys.push(EntityKey::Citizenship(account.clone()));
                }
                keys.push(EntityKey::CitizenshipRequests);
            }
            CitizenshipRevoked => keys.extend(self.account.clone().map(EntityKey::Citizenship)),
            AdminAdded | AdminRemoved => keys.extend(self.account.clone().map(EntityKey::AdminRole)),
            MainAdminChanged => keys.push(EntityKey::MainAdmin),
            Unknown => {}
        }
        keys
    }
}

/// First of `names` present in the event arguments.
fn extract_field<'a>(args: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| args.get(*name))
}

fn as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
