//! End-to-end reconciliation scenarios over the in-memory chain.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::contract::{EntityKey, WriteCall, WriteKind};
use crate::errors::SyncError;
use crate::session::SessionState;
use crate::submission::{ProjectDraft, SubmissionPipeline, Upload};
use crate::testing::{addr, Fixture, MemoryStore, StubReview};
use crate::tracker::{FailureKind, TxFailure, TxId, TxStatus, TxUpdate};

async fn settled(rx: &mut broadcast::Receiver<TxUpdate>, id: TxId) -> TxStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let update = rx.recv().await.unwrap();
            if update.id == id && update.status.is_terminal() {
                return update.status;
            }
        }
    })
    .await
    .expect("transaction never settled")
}

#[tokio::test]
async fn screening_vote_round_trip() {
    let voter = addr(0xa1);
    let fx = Fixture::new(&voter);
    fx.chain.add_citizen(&voter);
    for _ in 0..8 {
        fx.chain.add_project(&addr(2), false);
    }

    let before = fx.facade.screening_votes(7).await.unwrap();
    assert!(!fx.facade.has_voted(7, &voter).await.unwrap());

    let mut rx = fx.tracker.subscribe();
    let id = fx.facade.vote_screening(&voter, 7, true).await.unwrap();

    // While pending the old tally is still served, flagged as processing.
    assert_eq!(fx.facade.screening_votes(7).await.unwrap(), before);
    assert!(fx.cache.is_processing(&EntityKey::ScreeningVotes(7)));

    fx.chain.mine();
    assert!(matches!(settled(&mut rx, id).await, TxStatus::Confirmed { .. }));

    let after = fx.facade.screening_votes(7).await.unwrap();
    assert_eq!(after.votes_for, before.votes_for + 1);
    assert_eq!(after.votes_against, before.votes_against);
    assert!(fx.facade.has_voted(7, &voter).await.unwrap());

    // A second vote is refused locally and never reaches the wallet.
    let sent = fx.wallet.sent();
    let err = fx.facade.vote_screening(&voter, 7, true).await.unwrap_err();
    assert!(matches!(err, SyncError::AlreadyVoted { project_id: 7, .. }));
    assert_eq!(fx.wallet.sent(), sent);
}

#[tokio::test]
async fn duplicate_pending_write_never_reaches_chain_client() {
    let applicant = addr(0xa2);
    let fx = Fixture::new(&applicant);

    fx.facade.request_citizenship(&applicant).await.unwrap();
    assert_eq!(fx.wallet.sent(), 1);
    assert_eq!(fx.chain.mempool_len(), 1);

    let err = fx
        .tracker
        .submit(&applicant, WriteCall::RequestCitizenship)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DuplicatePending { .. }));
    assert_eq!(fx.wallet.sent(), 1);
    assert_eq!(fx.chain.mempool_len(), 1);
    assert!(fx
        .tracker
        .is_pending(WriteKind::RequestCitizenship, &applicant, &EntityKey::Citizenship(applicant.clone())));
}

#[tokio::test]
async fn reads_after_confirmation_never_predate_it() {
    let fx = Fixture::new(&addr(0xad));
    let applicant = addr(0xa3);
    let key = EntityKey::Citizenship(applicant.clone());
    assert!(!fx.cache.flag(key.clone()).await.unwrap());
    let version_before = fx.cache.version(&key);

    // The node lags one block behind the head from here on.
    fx.chain.set_read_lag(1);
    let mut rx = fx.tracker.subscribe();
    let id = fx
        .tracker
        .submit(
            &addr(0xad),
            WriteCall::ApproveCitizenship {
                account: applicant.clone(),
            },
        )
        .await
        .unwrap();
    let block = fx.chain.mine();
    assert_eq!(settled(&mut rx, id).await, TxStatus::Confirmed { block });
    assert!(fx.cache.version(&key) > version_before);

    // Catch the lagging node up while the cache keeps discarding its reads.
    let chain = fx.chain.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2)).await;
        chain.set_read_lag(0);
    });
    let mut value = None;
    for _ in 0..50 {
        match fx.cache.flag(key.clone()).await {
            Ok(v) => {
                value = Some(v);
                break;
            }
            Err(SyncError::Rpc(_)) => tokio::time::sleep(Duration::from_millis(2)).await,
            Err(e) => panic!("unexpected error {e}"),
        }
    }
    assert_eq!(value, Some(true));
    assert!(fx.cache.served_block(&key).unwrap() >= block);
}

#[tokio::test]
async fn roles_gate_on_every_read() {
    let account = addr(0xa4);
    let fx = Fixture::new(&account);
    fx.chain.add_admin(&account);
    fx.chain.delay("isAdmin", Duration::from_millis(60));
    let session = SessionState::new(fx.wallet.clone(), fx.facade.clone(), None);
    let mut rx = session.subscribe();

    let observer = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let s = rx.borrow_and_update().clone();
            let done = !s.loading && s.is_connected();
            seen.push(s);
            if done {
                break;
            }
        }
        seen
    });

    session.connect().await.unwrap();
    let seen = tokio::time::timeout(Duration::from_secs(5), observer)
        .await
        .unwrap()
        .unwrap();

    for s in &seen {
        if s.loading {
            assert_eq!(s.roles(), None);
            assert!(!s.is_admin());
        }
    }
    let last = seen.last().unwrap();
    assert!(last.is_admin());
    assert!(!last.is_citizen());
}

#[tokio::test]
async fn disconnect_fails_pending_writes_without_touching_cache() {
    let account = addr(0xa5);
    let fx = Fixture::new(&account);
    fx.chain.add_citizen(&account);
    fx.chain.add_project(&addr(2), true);
    let session = SessionState::new(fx.wallet.clone(), fx.facade.clone(), None);
    session.connect().await.unwrap();

    let project = EntityKey::Project(0);
    fx.facade.get_project(0).await.unwrap();
    let version = fx.cache.version(&project);

    let mut rx = fx.tracker.subscribe();
    let id = fx.facade.fund_project(&account, 0, 1_000).await.unwrap();
    assert!(fx.cache.is_processing(&project));

    session.disconnect();

    match settled(&mut rx, id).await {
        TxStatus::Failed(TxFailure { kind, .. }) => assert_eq!(kind, FailureKind::WalletRejected),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(fx.cache.version(&project), version);
    assert!(!fx.cache.is_processing(&project));
    assert!(fx.tracker.pending().is_empty());
}

#[tokio::test]
async fn low_review_score_blocks_submission() {
    let creator = addr(0xa6);
    let fx = Fixture::new(&creator);
    fx.chain.add_citizen(&creator);
    let review = StubReview::new(42);
    let storage = MemoryStore::new();
    let pipeline = SubmissionPipeline::new(
        fx.facade.clone(),
        review.clone(),
        storage.clone(),
        fx.config.min_review_score,
    );

    let draft = ProjectDraft {
        name: "Bike lanes".to_string(),
        description: "Protected lanes on Main St".to_string(),
        milestones: vec!["Design".to_string()],
        funding_goal: 10_000,
        funding_days: 14,
        icon: Upload {
            file_name: "icon.png".to_string(),
            bytes: vec![1],
        },
        banner: Upload {
            file_name: "banner.png".to_string(),
            bytes: vec![2],
        },
    };
    let err = pipeline.submit(&creator, draft).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::ReviewBelowThreshold {
            score: 42,
            minimum: 50
        }
    ));
    assert_eq!(review.calls(), 1);
    assert!(fx.chain.calls().is_empty());
    assert_eq!(fx.chain.batches(), 0);
    assert!(storage.uploads().is_empty());
    assert_eq!(fx.wallet.sent(), 0);
}

#[tokio::test]
async fn fifty_projects_in_one_sweep() {
    let fx = Fixture::new(&addr(1));
    for i in 0..50u8 {
        fx.chain.add_project(&addr(i), i % 2 == 0);
    }

    let page = fx.facade.list_projects(&Default::default()).await.unwrap();
    assert_eq!(page.projects.len(), 50);
    assert!(!page.is_partial());
    assert_eq!(fx.chain.batches(), 1);
    assert_eq!(fx.chain.batch_sizes(), vec![50]);
    assert_eq!(fx.chain.count_calls("getProject"), 0);
    assert_eq!(fx.chain.count_calls("projectCount"), 1);

    // Served from cache afterwards.
    fx.facade.list_projects(&Default::default()).await.unwrap();
    assert_eq!(fx.chain.batches(), 1);
}
