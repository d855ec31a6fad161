//! Exit request lifecycle integration tests.
//! Covers submit, edit, withdraw and review against the in-memory store.

mod common;

use chrono::{Duration, Utc};
use common::{draft, TestApp};
use exit_service::config::ReviewConfig;
use exit_service::models::{Decision, ExitRequestDraft, RequestStatus};
use exit_service::services::LifecycleError;

fn assert_invalid_state(err: LifecycleError, expected: RequestStatus, actual: RequestStatus) {
    match err {
        LifecycleError::InvalidState {
            expected: e,
            actual: a,
        } => {
            assert_eq!(e, expected, "expected status");
            assert_eq!(a, actual, "actual status");
        }
        other => panic!("expected InvalidState, got {:?}", other),
    }
}

#[tokio::test]
async fn full_lifecycle_from_submit_to_return() {
    let app = TestApp::spawn().await;
    let engine = &app.state.engine;
    let verifier = &app.state.verifier;

    let request = app.submit(app.student).await;
    assert_eq!(request.status, RequestStatus::Pending);
    assert!(request.review().is_none());
    assert!(request.pass_credential.is_none());

    let approved = engine
        .review(app.hall_admin, request.request_id, Decision::Approve)
        .await
        .expect("Failed to approve");
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.reviewer_id, Some(app.hall_admin));
    assert!(approved.reviewed_utc.is_some());
    let credential = approved.pass_credential.clone().expect("Missing pass credential");
    assert!(
        credential.starts_with(&format!("CEMS-{}-", request.request_id)),
        "unexpected credential {}",
        credential
    );

    let exited = verifier
        .mark_exited(app.security, request.request_id)
        .await
        .expect("Failed to mark exited");
    assert_eq!(exited.status, RequestStatus::Exited);
    assert!(exited.updated_utc >= approved.updated_utc);
    assert_eq!(exited.pass_credential, Some(credential.clone()));

    let err = verifier
        .mark_exited(app.security, request.request_id)
        .await
        .unwrap_err();
    assert_invalid_state(err, RequestStatus::Approved, RequestStatus::Exited);

    let returned = verifier
        .mark_returned(app.security, request.request_id)
        .await
        .expect("Failed to mark returned");
    assert_eq!(returned.status, RequestStatus::Returned);
    assert!(returned.returned_utc.is_some());

    // Everything after `returned` is rejected.
    let err = verifier
        .mark_returned(app.security, request.request_id)
        .await
        .unwrap_err();
    assert_invalid_state(err, RequestStatus::Exited, RequestStatus::Returned);

    let err = verifier
        .mark_exited(app.security, request.request_id)
        .await
        .unwrap_err();
    assert_invalid_state(err, RequestStatus::Approved, RequestStatus::Returned);

    let err = engine
        .review(app.hall_admin, request.request_id, Decision::Decline)
        .await
        .unwrap_err();
    assert_invalid_state(err, RequestStatus::Pending, RequestStatus::Returned);

    let err = engine
        .edit(app.student, request.request_id, draft())
        .await
        .unwrap_err();
    assert_invalid_state(err, RequestStatus::Pending, RequestStatus::Returned);

    let err = engine
        .withdraw(app.student, request.request_id)
        .await
        .unwrap_err();
    assert_invalid_state(err, RequestStatus::Pending, RequestStatus::Returned);
}

#[tokio::test]
async fn gate_steps_cannot_be_skipped() {
    let app = TestApp::spawn().await;
    let request = app.submit(app.student).await;

    let err = app
        .state
        .verifier
        .mark_exited(app.security, request.request_id)
        .await
        .unwrap_err();
    assert_invalid_state(err, RequestStatus::Approved, RequestStatus::Pending);

    let err = app
        .state
        .verifier
        .mark_returned(app.security, request.request_id)
        .await
        .unwrap_err();
    assert_invalid_state(err, RequestStatus::Exited, RequestStatus::Pending);
}

#[tokio::test]
async fn approved_request_blocks_new_submission_until_returned() {
    let app = TestApp::spawn().await;
    let request = app.approved(app.student).await;

    let err = app
        .state
        .engine
        .submit(app.student, draft())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::ActiveRequestExists));

    app.state
        .verifier
        .mark_exited(app.security, request.request_id)
        .await
        .unwrap();

    // Still out on campus leave: exited counts as active.
    let err = app
        .state
        .engine
        .submit(app.student, draft())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::ActiveRequestExists));

    app.state
        .verifier
        .mark_returned(app.security, request.request_id)
        .await
        .unwrap();

    let next = app.submit(app.student).await;
    assert_eq!(next.status, RequestStatus::Pending);
    assert_ne!(next.request_id, request.request_id);
}

#[tokio::test]
async fn declined_request_frees_the_requester() {
    let app = TestApp::spawn().await;
    let request = app.submit(app.student).await;

    let declined = app
        .state
        .engine
        .review(app.hall_admin, request.request_id, Decision::Decline)
        .await
        .unwrap();
    assert_eq!(declined.status, RequestStatus::Declined);
    assert_eq!(declined.reviewer_id, Some(app.hall_admin));
    assert!(declined.reviewed_utc.is_some());
    assert!(declined.pass_credential.is_none());

    app.submit(app.student).await;
}

#[tokio::test]
async fn declining_an_exited_request_is_invalid() {
    let app = TestApp::spawn().await;
    let request = app.exited(app.student).await;

    let err = app
        .state
        .engine
        .review(app.hall_admin, request.request_id, Decision::Decline)
        .await
        .unwrap_err();

    assert_invalid_state(err, RequestStatus::Pending, RequestStatus::Exited);
}

#[tokio::test]
async fn submit_requires_student_role() {
    let app = TestApp::spawn().await;

    for caller in [app.hall_admin, app.security, app.super_admin, app.unassigned] {
        let err = app.state.engine.submit(caller, draft()).await.unwrap_err();
        assert!(
            matches!(err, LifecycleError::Forbidden(_)),
            "caller {} got {:?}",
            caller,
            err
        );
    }
}

#[tokio::test]
async fn submit_requires_hall_affiliation() {
    let app = TestApp::spawn().await;
    let homeless = app.add_student("No Hall Yet", None).await;

    let err = app.state.engine.submit(homeless, draft()).await.unwrap_err();

    assert!(matches!(err, LifecycleError::HallNotSet));
}

#[tokio::test]
async fn submit_rejects_invalid_drafts() {
    let app = TestApp::spawn().await;

    let cases = [
        (
            ExitRequestDraft {
                reason: "Hi".to_string(),
                ..draft()
            },
            "reason",
        ),
        (
            ExitRequestDraft {
                reason: "r".repeat(201),
                ..draft()
            },
            "reason",
        ),
        (
            ExitRequestDraft {
                destination: "UK".to_string(),
                ..draft()
            },
            "destination",
        ),
        (
            ExitRequestDraft {
                expected_return_utc: None,
                ..draft()
            },
            "expected_return_utc",
        ),
        (
            ExitRequestDraft {
                expected_return_utc: Some(Utc::now() - Duration::hours(1)),
                ..draft()
            },
            "expected_return_utc",
        ),
        (
            ExitRequestDraft {
                comment: Some("c".repeat(501)),
                ..draft()
            },
            "comment",
        ),
    ];

    for (bad, expected_field) in cases {
        let err = app.state.engine.submit(app.student, bad).await.unwrap_err();
        match err {
            LifecycleError::Validation { field, .. } => assert_eq!(field, expected_field),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    // Nothing was stored for the rejected drafts.
    assert!(app.state.engine.my_requests(app.student).await.unwrap().is_empty());
}

#[tokio::test]
async fn boundary_lengths_are_accepted() {
    let app = TestApp::spawn().await;

    let request = app
        .state
        .engine
        .submit(
            app.student,
            ExitRequestDraft {
                reason: "r".repeat(200),
                destination: "Ife".to_string(),
                comment: Some("c".repeat(500)),
                ..draft()
            },
        )
        .await
        .expect("Boundary lengths should be valid");

    assert_eq!(request.reason.len(), 200);
    assert_eq!(request.comment.as_deref().map(str::len), Some(500));
}

#[tokio::test]
async fn edit_overwrites_details_only() {
    let app = TestApp::spawn().await;
    let request = app.submit(app.student).await;

    let new_return = Utc::now() + Duration::days(3);
    let edited = app
        .state
        .engine
        .edit(
            app.student,
            request.request_id,
            ExitRequestDraft {
                reason: "Job interview".to_string(),
                destination: "Victoria Island".to_string(),
                expected_return_utc: Some(new_return),
                comment: Some("   ".to_string()),
            },
        )
        .await
        .expect("Failed to edit request");

    assert_eq!(edited.request_id, request.request_id);
    assert_eq!(edited.reason, "Job interview");
    assert_eq!(edited.destination, "Victoria Island");
    assert_eq!(edited.expected_return_utc, new_return);
    assert_eq!(edited.comment, None);
    assert_eq!(edited.status, RequestStatus::Pending);
    assert_eq!(edited.reviewer_id, None);
    assert_eq!(edited.pass_credential, None);
    assert_eq!(edited.created_utc, request.created_utc);
}

#[tokio::test]
async fn edit_rechecks_return_time_only_when_it_changes() {
    let app = TestApp::spawn().await;
    let mut request = app.submit(app.student).await;
    let lapsed = Utc::now() - Duration::hours(1);
    request.expected_return_utc = lapsed;
    app.store.put_request(request.clone()).await;

    let edited = app
        .state
        .engine
        .edit(
            app.student,
            request.request_id,
            ExitRequestDraft {
                reason: "Clinic appointment".to_string(),
                expected_return_utc: Some(lapsed),
                ..draft()
            },
        )
        .await
        .expect("Unchanged return time should not be rechecked");
    assert_eq!(edited.reason, "Clinic appointment");
    assert_eq!(edited.expected_return_utc, lapsed);

    let err = app
        .state
        .engine
        .edit(
            app.student,
            request.request_id,
            ExitRequestDraft {
                expected_return_utc: Some(lapsed - Duration::minutes(30)),
                ..draft()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Validation { ref field, .. } if field == "expected_return_utc"
    ));
}

#[tokio::test]
async fn edit_is_limited_to_owner_and_pending() {
    let app = TestApp::spawn().await;
    let other = app.add_student("Other Student", Some(&app.hall)).await;
    let request = app.submit(app.student).await;

    let err = app
        .state
        .engine
        .edit(other, request.request_id, draft())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Forbidden(_)));

    app.state
        .engine
        .review(app.hall_admin, request.request_id, Decision::Approve)
        .await
        .unwrap();

    let err = app
        .state
        .engine
        .edit(app.student, request.request_id, draft())
        .await
        .unwrap_err();
    assert_invalid_state(err, RequestStatus::Pending, RequestStatus::Approved);
}

#[tokio::test]
async fn withdraw_deletes_pending_request() {
    let app = TestApp::spawn().await;
    let other = app.add_student("Other Student", Some(&app.hall)).await;
    let request = app.submit(app.student).await;

    let err = app
        .state
        .engine
        .withdraw(other, request.request_id)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Forbidden(_)));

    app.state
        .engine
        .withdraw(app.student, request.request_id)
        .await
        .expect("Failed to withdraw");

    let err = app
        .state
        .engine
        .withdraw(app.student, request.request_id)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound(_)));

    // Withdrawal frees the slot immediately.
    app.submit(app.student).await;
}

#[tokio::test]
async fn only_reviewers_may_review() {
    let app = TestApp::spawn().await;
    let request = app.submit(app.student).await;

    for caller in [app.student, app.security, app.unassigned] {
        let err = app
            .state
            .engine
            .review(caller, request.request_id, Decision::Approve)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden(_)));
    }

    let approved = app
        .state
        .engine
        .review(app.super_admin, request.request_id, Decision::Approve)
        .await
        .expect("Super admin review is allowed by default");
    assert_eq!(approved.reviewer_id, Some(app.super_admin));
}

#[tokio::test]
async fn super_admin_review_can_be_switched_off() {
    let app = TestApp::with_review(ReviewConfig {
        allow_super_admin: false,
        ..Default::default()
    })
    .await;
    let request = app.submit(app.student).await;

    let err = app
        .state
        .engine
        .review(app.super_admin, request.request_id, Decision::Approve)
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::Forbidden(_)));
}

#[tokio::test]
async fn review_of_unknown_request_is_not_found() {
    let app = TestApp::spawn().await;

    let err = app
        .state
        .engine
        .review(app.hall_admin, uuid::Uuid::new_v4(), Decision::Approve)
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::NotFound(_)));
}

#[tokio::test]
async fn hall_scoped_review_confines_hall_admins() {
    let app = TestApp::with_review(ReviewConfig {
        hall_scoped: true,
        ..Default::default()
    })
    .await;
    let outsider = app.add_student("Outside Student", Some(&app.other_hall)).await;
    let adminless = app
        .add_member(
            "Unplaced Warden",
            Some(exit_service::models::Role::HallAdmin),
            None,
        )
        .await;

    let own = app.submit(app.student).await;
    let foreign = app.submit(outsider).await;

    let queue = app
        .state
        .engine
        .review_queue(app.hall_admin, Some(RequestStatus::Pending), None)
        .await
        .unwrap();
    let ids: Vec<_> = queue.iter().map(|v| v.request.request_id).collect();
    assert_eq!(ids, vec![own.request_id]);

    let err = app
        .state
        .engine
        .review(app.hall_admin, foreign.request_id, Decision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Forbidden(_)));

    let err = app
        .state
        .engine
        .review(adminless, own.request_id, Decision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Forbidden(_)));
    assert!(app
        .state
        .engine
        .review_queue(adminless, None, None)
        .await
        .unwrap()
        .is_empty());

    // Super admins are never scoped.
    app.state
        .engine
        .review(app.super_admin, foreign.request_id, Decision::Approve)
        .await
        .expect("Super admin should review any hall");
}

#[tokio::test]
async fn unscoped_queue_lists_every_hall_newest_first() {
    let app = TestApp::spawn().await;
    let outsider = app.add_student("Outside Student", Some(&app.other_hall)).await;

    let first = app.submit(app.student).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = app.submit(outsider).await;

    let queue = app
        .state
        .engine
        .review_queue(app.hall_admin, None, None)
        .await
        .unwrap();

    let ids: Vec<_> = queue.iter().map(|v| v.request.request_id).collect();
    assert_eq!(ids, vec![second.request_id, first.request_id]);
    assert_eq!(queue[0].requester_name.as_deref(), Some("Outside Student"));
    assert_eq!(
        queue[0].requester_hall.as_ref().map(|h| h.name.as_str()),
        Some("Fagunwa Hall")
    );

    let page = app
        .state
        .engine
        .review_queue(app.hall_admin, None, Some(1))
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].request.request_id, second.request_id);
}

#[tokio::test]
async fn my_requests_lists_own_history_newest_first() {
    let app = TestApp::spawn().await;
    let other = app.add_student("Other Student", Some(&app.hall)).await;

    let first = app.submit(app.student).await;
    app.state
        .engine
        .review(app.hall_admin, first.request_id, Decision::Decline)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = app.submit(app.student).await;
    app.submit(other).await;

    let mine = app.state.engine.my_requests(app.student).await.unwrap();

    let ids: Vec<_> = mine.iter().map(|r| r.request_id).collect();
    assert_eq!(ids, vec![second.request_id, first.request_id]);
}

#[tokio::test]
async fn request_detail_hides_other_students_requests() {
    let app = TestApp::spawn().await;
    let other = app.add_student("Other Student", Some(&app.hall)).await;
    let request = app.submit(app.student).await;

    let err = app
        .state
        .engine
        .request_detail(other, request.request_id)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Forbidden(_)));

    for caller in [app.student, app.hall_admin, app.security, app.super_admin] {
        let view = app
            .state
            .engine
            .request_detail(caller, request.request_id)
            .await
            .expect("Caller should see the request");
        assert_eq!(view.request.request_id, request.request_id);
        assert_eq!(view.requester_name.as_deref(), Some("Amaka Eze"));
    }
}
