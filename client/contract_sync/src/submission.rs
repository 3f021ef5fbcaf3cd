//! Project submission pipeline.
//!
//! validate → AI review → score threshold → role check → duplicate check →
//! upload artwork → `submitProject` through the tracker.
//!
//! Every check that can refuse the draft runs before anything is uploaded or
//! signed, so a rejected draft costs neither storage nor gas.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::contract::{EntityKey, ProjectSubmission, WriteCall, WriteKind};
use crate::errors::{Result, SyncError};
use crate::facade::ReadFacade;
use crate::review::{ReviewRequest, ReviewService, ReviewVerdict};
use crate::storage::FileStore;
use crate::tracker::TxId;
use crate::types::Address;

/// A file picked in the submission form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// The submission form as the creator filled it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDraft {
    pub name: String,
    pub description: String,
    pub milestones: Vec<String>,
    pub funding_goal: u128,
    pub funding_days: u32,
    pub icon: Upload,
    pub banner: Upload,
}

impl ProjectDraft {
    fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SyncError::InvalidInput(msg.to_string()));
        if self.name.trim().is_empty() {
            return invalid("project name is required");
        }
        if self.description.trim().is_empty() {
            return invalid("project description is required");
        }
        if self.milestones.is_empty() || self.milestones.iter().any(|m| m.trim().is_empty()) {
            return invalid("at least one non-empty milestone is required");
        }
        if self.funding_goal == 0 {
            return invalid("funding goal must be positive");
        }
        if self.funding_days == 0 {
            return invalid("funding period must be at least one day");
        }
        if self.icon.bytes.is_empty() || self.banner.bytes.is_empty() {
            return invalid("icon and banner images are required");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    pub tx: TxId,
    pub verdict: ReviewVerdict,
    pub submission: ProjectSubmission,
}

pub struct SubmissionPipeline {
    facade: ReadFacade,
    review: Arc<dyn ReviewService>,
    storage: Arc<dyn FileStore>,
    min_score: u8,
}

impl SubmissionPipeline {
    pub fn new(
        facade: ReadFacade,
        review: Arc<dyn ReviewService>,
        storage: Arc<dyn FileStore>,
        min_score: u8,
    ) -> Self {
        Self {
            facade,
            review,
            storage,
            min_score,
        }
    }

    pub async fn submit(&self, creator: &Address, draft: ProjectDraft) -> Result<SubmissionOutcome> {
        draft.validate()?;

        let verdict = self
            .review
            .review(&ReviewRequest {
                name: draft.name.clone(),
                description: draft.description.clone(),
                milestones: draft.milestones.clone(),
            })
            .await?;
        verdict.require(self.min_score)?;

        if !self.facade.is_citizen(creator).await? {
            return Err(SyncError::NotAuthorized(format!(
                "{creator} must be a citizen to submit projects"
            )));
        }
        if self
            .facade
            .tracker()
            .is_pending(WriteKind::SubmitProject, creator, &EntityKey::ProjectIndex)
        {
            return Err(SyncError::DuplicatePending {
                kind: WriteKind::SubmitProject.to_string(),
                subject: EntityKey::ProjectIndex.to_string(),
            });
        }

        let icon_ref = self
            .storage
            .upload(&draft.icon.file_name, draft.icon.bytes)
            .await?;
        let banner_ref = self
            .storage
            .upload(&draft.banner.file_name, draft.banner.bytes)
            .await?;

        let submission = ProjectSubmission {
            name: draft.name,
            description: draft.description,
            icon_ref,
            banner_ref,
            milestones: draft.milestones,
            funding_goal: draft.funding_goal,
            funding_days: draft.funding_days,
        };
        let tx = self
            .facade
            .tracker()
            .submit(creator, WriteCall::SubmitProject(submission.clone()))
            .await?;

        info!("Project {:?} submitted by {creator} as transaction {tx}", submission.name);
        Ok(SubmissionOutcome {
            tx,
            verdict,
            submission,
        })
    }
}
