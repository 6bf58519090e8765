//! Specified-launch-mode protocol: flag resolution, reuse by flag,
//! fire-and-forget timeouts, and the specified-process variant.

mod common;

use abilityd_core::request::LaunchMode;
use abilityd_core::want::PARAM_SPECIFIED_PROCESS_FLAG;
use common::{
    AppEvent, FakeAppService, FakeScheduler, FakeSceneSession, make_manager, make_request,
    make_session_info,
};

#[tokio::test(flavor = "multi_thread")]
async fn test_specified_requests_with_same_flag_share_one_record() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();
    manager.set_root_scene_session(scene.token());

    let request = make_request("DocAbility", LaunchMode::Specified);
    manager
        .notify_scb_to_start_ui_ability(request.clone())
        .expect("first notify");
    assert_eq!(app.count(|e| matches!(e, AppEvent::StartSpecifiedAbility(0))), 1);

    // flag resolves with no instance registered yet: fresh start
    manager.on_accept_want_response(&request.want, "doc-a", 0);
    assert_eq!(scene.activation_count(), 1);

    let mut start_request = make_request("DocAbility", LaunchMode::Specified);
    let start_session = make_session_info(7, &scene, start_request.want.clone());
    let cold = manager
        .start_ui_ability(
            &mut start_request,
            start_session,
            0,
        )
        .expect("compositor-driven start");
    assert!(cold);
    let first = manager.get_ability_record_by_id(7).expect("tracked");
    assert_eq!(first.specified_flag(), "doc-a");
    assert_eq!(manager.specified_ability_count(), 1);

    // a second request resolving to the same flag reuses the instance
    manager
        .notify_scb_to_start_ui_ability(request.clone())
        .expect("second notify");
    manager.on_accept_want_response(&request.want, "doc-a", 1);
    assert!(first.is_new_want(), "reused instance is marked new-want");
    assert_eq!(scene.activation_count(), 2, "reuse re-activates the existing session");
    assert_eq!(manager.check_ability_number("com.example.notes", "DocAbility", "entry"), 1);
    assert_eq!(manager.specified_ability_count(), 1);

    // a different flag creates a distinct instance
    manager
        .notify_scb_to_start_ui_ability(request.clone())
        .expect("third notify");
    manager.on_accept_want_response(&request.want, "doc-b", 2);
    let mut second_start = make_request("DocAbility", LaunchMode::Specified);
    let second_session = make_session_info(8, &scene, second_start.want.clone());
    manager
        .start_ui_ability(
            &mut second_start,
            second_session,
            0,
        )
        .expect("second compositor-driven start");
    let second = manager.get_ability_record_by_id(8).expect("tracked");
    assert_eq!(second.specified_flag(), "doc-b");
    assert_ne!(second.record_id(), first.record_id());
    assert_eq!(manager.specified_ability_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_specified_timeout_drops_request_without_retry() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();
    manager.set_root_scene_session(scene.token());

    let request = make_request("DocAbility", LaunchMode::Specified);
    manager
        .notify_scb_to_start_ui_ability(request.clone())
        .expect("notify");
    manager.on_start_specified_ability_timeout_response(0);

    // a late response finds nothing to continue
    manager.on_accept_want_response(&request.want, "doc-a", 0);
    assert_eq!(scene.activation_count(), 0);
    assert_eq!(app.count(|e| matches!(e, AppEvent::StartSpecifiedAbility(_))), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_specified_process_response_stamps_flag_and_activates() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();
    manager.set_root_scene_session(scene.token());

    let mut request = make_request("IsolatedAbility", LaunchMode::Standard);
    request.ability_info.isolation_process = true;
    manager
        .notify_scb_to_start_ui_ability(request)
        .expect("notify");
    assert_eq!(app.count(|e| matches!(e, AppEvent::StartSpecifiedProcess(0))), 1);

    manager.on_start_specified_process_response("proc-1", 0);
    let activation = scene.last_activation().expect("activation");
    assert_eq!(
        activation.want.string_param(PARAM_SPECIFIED_PROCESS_FLAG),
        "proc-1"
    );

    // the pending entry was consumed
    manager.on_start_specified_process_timeout_response(0);
    assert_eq!(scene.activation_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_death_of_specified_instance_erases_reuse_entry() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();
    manager.set_root_scene_session(scene.token());

    let request = make_request("DocAbility", LaunchMode::Specified);
    manager
        .notify_scb_to_start_ui_ability(request.clone())
        .expect("notify");
    manager.on_accept_want_response(&request.want, "doc-a", 0);
    let mut start_request = make_request("DocAbility", LaunchMode::Specified);
    let start_session = make_session_info(7, &scene, start_request.want.clone());
    manager
        .start_ui_ability(
            &mut start_request,
            start_session,
            0,
        )
        .expect("start");
    let record = manager.get_ability_record_by_id(7).expect("tracked");
    manager
        .attach_ability_thread(FakeScheduler::new() as _, record.token())
        .expect("attach");
    assert_eq!(manager.specified_ability_count(), 1);

    manager.on_ability_died(&record);
    assert_eq!(manager.specified_ability_count(), 0, "stale reuse entries must not survive death");
    assert!(manager.get_ability_record_by_id(7).is_none());
}
