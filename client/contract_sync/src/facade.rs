//! Read façade.
//!
//! Typed, domain-named reads over the entity cache, plus the few write
//! pre-checks that need cached state (a vote is refused if the ballot is
//! already cast, funding needs a positive amount).

use serde::Deserialize;

use crate::cache::EntityCache;
use crate::contract::{EntityKey, WriteCall, WriteKind};
use crate::errors::{Result, SyncError};
use crate::tracker::{Tracker, TxId};
use crate::types::{
    Address, ProjectDetail, ProjectId, ProjectPage, ProjectSummary, Roles, VoteStatus, VoteTally,
};

/// Which projects a list view wants.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProjectFilter {
    #[default]
    All,
    Approved,
    /// Submitted but not yet through community screening.
    PendingScreening,
    /// Approved and still accepting funds.
    Funding,
    ByCreator(Address),
}

impl ProjectFilter {
    pub fn matches(&self, project: &ProjectSummary) -> bool {
        match self {
            Self::All => true,
            Self::Approved => project.approved,
            Self::PendingScreening => !project.approved,
            Self::Funding => project.approved && !project.funding_expired,
            Self::ByCreator(creator) => &project.creator == creator,
        }
    }
}

/// Query-string form of [`ProjectFilter`].
#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    pub filter: Option<String>,
    pub creator: Option<Address>,
}

impl TryFrom<FilterQuery> for ProjectFilter {
    type Error = SyncError;

    fn try_from(query: FilterQuery) -> Result<Self> {
        if let Some(creator) = query.creator {
            return Ok(Self::ByCreator(creator));
        }
        match query.filter.as_deref() {
            None | Some("all") => Ok(Self::All),
            Some("approved") => Ok(Self::Approved),
            Some("pending") => Ok(Self::PendingScreening),
            Some("funding") => Ok(Self::Funding),
            Some(other) => Err(SyncError::InvalidInput(format!("unknown filter {other:?}"))),
        }
    }
}

#[derive(Clone)]
pub struct ReadFacade {
    cache: EntityCache,
    tracker: Tracker,
}

impl ReadFacade {
    pub fn new(cache: EntityCache, tracker: Tracker) -> Self {
        Self { cache, tracker }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    // ─────────────────────────────────────────────────────────
    // Projects
    // ─────────────────────────────────────────────────────────

    /// Every project matching `filter`. Projects that failed to load are
    /// reported in `failed` and never dropped silently.
    pub async fn list_projects(&self, filter: &ProjectFilter) -> Result<ProjectPage> {
        let page = self.cache.projects().await?;
        Ok(ProjectPage {
            projects: page
                .projects
                .into_iter()
                .filter(|p| filter.matches(p))
                .collect(),
            failed: page.failed,
        })
    }

    pub async fn get_project(&self, id: ProjectId) -> Result<ProjectDetail> {
        self.cache.project(id).await
    }

    // ─────────────────────────────────────────────────────────
    // Screening
    // ─────────────────────────────────────────────────────────

    pub async fn screening_votes(&self, id: ProjectId) -> Result<VoteTally> {
        self.cache.tally(id).await
    }

    pub async fn has_voted(&self, id: ProjectId, account: &Address) -> Result<bool> {
        self.cache
            .flag(EntityKey::ScreeningBallot(id, account.clone()))
            .await
    }

    /// Tally and ballot together, plus whether a vote from `account` is in flight.
    pub async fn vote_status(&self, id: ProjectId, account: &Address) -> Result<VoteStatus> {
        let (tally, has_voted) =
            futures_util::try_join!(self.screening_votes(id), self.has_voted(id, account))?;
        let ballot = EntityKey::ScreeningBallot(id, account.clone());
        Ok(VoteStatus {
            tally,
            has_voted,
            pending: self
                .tracker
                .is_pending(WriteKind::VoteScreening, account, &ballot),
        })
    }

    // ─────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────

    pub async fn is_citizen(&self, account: &Address) -> Result<bool> {
        self.cache.flag(EntityKey::Citizenship(account.clone())).await
    }

    /// The three role reads run concurrently; roles are only derived once all
    /// of them have answered.
    pub async fn roles(&self, account: &Address) -> Result<Roles> {
        let (citizen, admin_flag, main_admin) = futures_util::try_join!(
            self.is_citizen(account),
            self.cache.flag(EntityKey::AdminRole(account.clone())),
            self.cache.main_admin(),
        )?;
        Ok(Roles::derive(account, citizen, admin_flag, &main_admin))
    }

    pub async fn citizenship_requests(&self) -> Result<Vec<Address>> {
        self.cache.citizenship_requests().await
    }

    // ─────────────────────────────────────────────────────────
    // Guarded writes
    // ─────────────────────────────────────────────────────────

    /// Cast a screening vote, refusing locally if `voter` already voted.
    pub async fn vote_screening(&self, voter: &Address, id: ProjectId, approve: bool) -> Result<TxId> {
        if self.has_voted(id, voter).await? {
            return Err(SyncError::AlreadyVoted {
                project_id: id,
                account: voter.to_string(),
            });
        }
        self.tracker
            .submit(
                voter,
                WriteCall::VoteScreening {
                    project_id: id,
                    approve,
                },
            )
            .await
    }

    pub async fn request_citizenship(&self, account: &Address) -> Result<TxId> {
        if self.is_citizen(account).await? {
            return Err(SyncError::InvalidInput(format!("{account} is already a citizen")));
        }
        self.tracker
            .submit(account, WriteCall::RequestCitizenship)
            .await
    }

    pub async fn fund_project(&self, funder: &Address, id: ProjectId, amount: u128) -> Result<TxId> {
        if amount == 0 {
            return Err(SyncError::InvalidInput("funding amount must be positive".to_string()));
        }
        self.tracker
            .submit(
                funder,
                WriteCall::FundProject {
                    project_id: id,
                    amount,
                },
            )
            .await
    }
}
