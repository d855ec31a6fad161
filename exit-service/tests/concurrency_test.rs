//! Race tests: conditional updates must admit exactly one winner.

mod common;

use common::{draft, TestApp};
use exit_service::models::{Decision, ProfileUpdate, RequestStatus, Role};
use exit_service::services::LifecycleError;
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reviews_have_one_winner() {
    let app = Arc::new(TestApp::spawn().await);
    let request = app.submit(app.student).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let app = app.clone();
        let decision = if i % 2 == 0 {
            Decision::Approve
        } else {
            Decision::Decline
        };
        handles.push(tokio::spawn(async move {
            let result = app
                .state
                .engine
                .review(app.hall_admin, request.request_id, decision)
                .await;
            (decision, result)
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        let (decision, result) = handle.await.unwrap();
        match result {
            Ok(reviewed) => winners.push((decision, reviewed)),
            Err(LifecycleError::InvalidState { expected, .. }) => {
                assert_eq!(expected, RequestStatus::Pending)
            }
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    assert_eq!(winners.len(), 1, "exactly one review must succeed");
    let (decision, reviewed) = &winners[0];

    let stored = app
        .state
        .engine
        .request_detail(app.super_admin, request.request_id)
        .await
        .unwrap();
    assert_eq!(stored.request.status, decision.target_status());
    assert_eq!(stored.request.pass_credential, reviewed.pass_credential);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_issue_distinct_credentials() {
    let app = Arc::new(TestApp::spawn().await);

    let mut request_ids = Vec::new();
    for i in 0..20 {
        let student = app
            .add_student(&format!("Student {:02}", i), Some(&app.hall))
            .await;
        request_ids.push(app.submit(student).await.request_id);
    }

    let mut handles = Vec::new();
    for request_id in request_ids {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            app.state
                .engine
                .review(app.hall_admin, request_id, Decision::Approve)
                .await
        }));
    }

    let mut credentials = HashSet::new();
    for handle in handles {
        let approved = handle.await.unwrap().expect("Approval failed");
        assert!(credentials.insert(approved.pass_credential.unwrap()));
    }
    assert_eq!(credentials.len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_leave_one_active_request() {
    let app = Arc::new(TestApp::spawn().await);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            app.state.engine.submit(app.student, draft()).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(LifecycleError::ActiveRequestExists) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    assert_eq!(created, 1);
    let mine = app.state.engine.my_requests(app.student).await.unwrap();
    assert_eq!(mine.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_gate_exits_have_one_winner() {
    let app = Arc::new(TestApp::spawn().await);
    let approved = app.approved(app.student).await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            app.state
                .verifier
                .mark_exited(app.security, approved.request_id)
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(request) => {
                successes += 1;
                assert_eq!(request.status, RequestStatus::Exited);
            }
            Err(LifecycleError::InvalidState { actual, .. }) => {
                assert_eq!(actual, RequestStatus::Exited)
            }
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    assert_eq!(successes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn withdraw_racing_review_never_leaves_a_half_state() {
    let app = Arc::new(TestApp::spawn().await);
    let request = app.submit(app.student).await;

    let reviewer = {
        let app = app.clone();
        tokio::spawn(async move {
            app.state
                .engine
                .review(app.hall_admin, request.request_id, Decision::Approve)
                .await
        })
    };
    let withdrawer = {
        let app = app.clone();
        tokio::spawn(async move {
            app.state
                .engine
                .withdraw(app.student, request.request_id)
                .await
        })
    };

    let reviewed = reviewer.await.unwrap();
    let withdrawn = withdrawer.await.unwrap();

    assert!(
        reviewed.is_ok() != withdrawn.is_ok(),
        "exactly one of review and withdraw must win"
    );

    let stored = app
        .state
        .engine
        .request_detail(app.super_admin, request.request_id)
        .await;
    match (reviewed, stored) {
        (Ok(_), Ok(view)) => assert_eq!(view.request.status, RequestStatus::Approved),
        (Err(_), Err(LifecycleError::NotFound(_))) => {}
        (r, s) => panic!("inconsistent outcome: {:?} / {:?}", r, s),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_hall_admin_affiliations_keep_the_first_hall() {
    let app = Arc::new(TestApp::spawn().await);
    let warden = app.add_member("New Warden", Some(Role::HallAdmin), None).await;

    let mut handles = Vec::new();
    let halls = [&app.hall, &app.other_hall, &app.hall, &app.other_hall].map(|h| h.hall_id);
    for hall_id in halls {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let update = ProfileUpdate {
                hall_id: Some(hall_id),
                ..Default::default()
            };
            let result = app.state.identity.update_profile(warden, update).await;
            (hall_id, result)
        }));
    }

    let mut accepted = HashSet::new();
    for handle in handles {
        let (hall_id, result) = handle.await.unwrap();
        match result {
            Ok(_) => {
                accepted.insert(hall_id);
            }
            Err(LifecycleError::Forbidden(_)) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    assert_eq!(accepted.len(), 1, "only one hall may be accepted");
    let stored = app.state.identity.hall_of(warden).await.unwrap().unwrap();
    assert!(accepted.contains(&stored.hall_id));
}
