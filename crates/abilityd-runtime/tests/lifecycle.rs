//! End-to-end lifecycle coverage: start, attach, foreground/background
//! transitions, pending-intent coalescing, close, and result delivery.
//!
//! The tests play both remote roles themselves: the compositor (driving
//! `start_ui_ability` after an activation) and the application process
//! (attaching a scheduler and reporting transaction completions).

mod common;

use std::sync::Arc;

use abilityd_core::record::AbilityRecord;
use abilityd_core::request::LaunchMode;
use abilityd_core::state::{AbilityState, AppState, PendingState, TransactionState};
use abilityd_core::want::{PARAM_CALLER_TOKEN, Want, WantValue};
use abilityd_core::LifecycleError;
use abilityd_runtime::manager::UiLifecycleManager;
use common::{
    AppEvent, FakeAppService, FakeScheduler, FakeSceneSession, SchedulerEvent, make_manager,
    make_request, make_session_info, wait_until,
};

fn start_cold(
    manager: &Arc<UiLifecycleManager>,
    scene: &Arc<FakeSceneSession>,
    persistent_id: i32,
    name: &str,
    mode: LaunchMode,
) -> Arc<AbilityRecord> {
    let mut request = make_request(name, mode);
    let session_info = make_session_info(persistent_id, scene, request.want.clone());
    let cold = manager
        .start_ui_ability(&mut request, session_info, 0)
        .expect("start must be accepted");
    assert!(cold, "first start of a session must be cold");
    manager
        .get_ability_record_by_id(persistent_id)
        .expect("record must be tracked after start")
}

async fn drive_to_foreground(
    manager: &Arc<UiLifecycleManager>,
    record: &Arc<AbilityRecord>,
    scheduler: &Arc<FakeScheduler>,
) {
    manager
        .attach_ability_thread(Arc::clone(scheduler) as _, record.token())
        .expect("attach must succeed");
    manager.on_ability_request_done(record.token(), AppState::Foreground);
    assert!(record.is_ability_state(AbilityState::Foregrounding));
    manager
        .ability_transaction_done(record.token(), TransactionState::Foreground, None)
        .expect("foreground report must be accepted");
    let watched = Arc::clone(record);
    wait_until(move || watched.is_ability_state(AbilityState::Foreground)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cold_start_creates_single_tracked_record() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();

    let record = start_cold(&manager, &scene, 1, "MainAbility", LaunchMode::Standard);

    assert_eq!(record.ability_state(), AbilityState::Initial);
    assert_eq!(record.pending_state(), PendingState::Foreground);
    assert_eq!(manager.check_ability_number("com.example.notes", "MainAbility", "entry"), 1);
    assert_eq!(app.count(|e| matches!(e, AppEvent::Load(_))), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_warm_start_updates_want_without_second_record() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();

    let record = start_cold(&manager, &scene, 1, "MainAbility", LaunchMode::Standard);
    let scheduler = FakeScheduler::new();
    drive_to_foreground(&manager, &record, &scheduler).await;

    let mut request = make_request("MainAbility", LaunchMode::Standard);
    request.want.set_param("doc", WantValue::String("second".to_string()));
    let mut session_info = make_session_info(1, &scene, request.want.clone());
    session_info.is_new_want = true;
    let cold = manager
        .start_ui_ability(&mut request, session_info, 0)
        .expect("warm start must be accepted");

    assert!(!cold, "reusing a tracked session is a warm start");
    let reused = manager.get_ability_record_by_id(1).expect("still tracked");
    assert_eq!(reused.record_id(), record.record_id());
    assert_eq!(reused.want().string_param("doc"), "second");
    assert!(reused.is_new_want());
    assert_eq!(manager.check_ability_number("com.example.notes", "MainAbility", "entry"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_attach_for_untracked_token_is_rejected() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scheduler = FakeScheduler::new();

    let result =
        manager.attach_ability_thread(scheduler as _, abilityd_core::record::Token::new(99));
    assert!(matches!(result, Err(LifecycleError::TokenNotFound(99))));
    assert!(app.events().is_empty(), "a rejected attach must have no side effects");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_foreground_report_requires_foregrounding_state() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();

    let record = start_cold(&manager, &scene, 1, "MainAbility", LaunchMode::Standard);
    let scheduler = FakeScheduler::new();
    manager
        .attach_ability_thread(scheduler as _, record.token())
        .expect("attach must succeed");

    // the remote reports foreground before any transaction was scheduled
    let result = manager.ability_transaction_done(record.token(), TransactionState::Foreground, None);
    assert!(matches!(
        result,
        Err(LifecycleError::InvalidTransition {
            expected: AbilityState::Foregrounding,
            ..
        })
    ));
    assert_eq!(record.ability_state(), AbilityState::Initial, "state must be unchanged");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rapid_restart_coalesces_into_pending_state() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();

    let record = start_cold(&manager, &scene, 1, "MainAbility", LaunchMode::Standard);
    let scheduler = FakeScheduler::new();
    manager
        .attach_ability_thread(Arc::clone(&scheduler) as _, record.token())
        .expect("attach must succeed");
    manager.on_ability_request_done(record.token(), AppState::Foreground);
    assert!(record.is_ability_state(AbilityState::Foregrounding));

    // a second start while the first transition is still in flight
    let mut request = make_request("MainAbility", LaunchMode::Standard);
    let session_info = make_session_info(1, &scene, request.want.clone());
    let cold = manager
        .start_ui_ability(&mut request, session_info, 0)
        .expect("coalesced start must be accepted");
    assert!(!cold);
    assert_eq!(record.pending_state(), PendingState::Foreground);
    assert_eq!(
        scheduler.count(&SchedulerEvent::Foreground),
        1,
        "no second remote dispatch while one is in flight"
    );

    manager
        .ability_transaction_done(record.token(), TransactionState::Foreground, None)
        .expect("foreground report must be accepted");
    let watched = Arc::clone(&record);
    wait_until(move || watched.is_ability_state(AbilityState::Foreground)).await;
    assert_eq!(record.pending_state(), PendingState::Initial);
    assert_eq!(scheduler.count(&SchedulerEvent::Foreground), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_minimize_during_foregrounding_is_applied_after_completion() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();

    let record = start_cold(&manager, &scene, 1, "MainAbility", LaunchMode::Standard);
    let scheduler = FakeScheduler::new();
    manager
        .attach_ability_thread(Arc::clone(&scheduler) as _, record.token())
        .expect("attach must succeed");
    manager.on_ability_request_done(record.token(), AppState::Foreground);

    // queue the opposite intent while foregrounding is in flight
    manager
        .minimize_ui_ability(&record, true, 0)
        .expect("minimize must be accepted");
    assert_eq!(record.pending_state(), PendingState::Background);
    assert_eq!(scheduler.count(&SchedulerEvent::Background), 0);

    manager
        .ability_transaction_done(record.token(), TransactionState::Foreground, None)
        .expect("foreground report must be accepted");
    let watched = Arc::clone(&record);
    wait_until(move || watched.is_ability_state(AbilityState::Backgrounding)).await;
    assert_eq!(
        scheduler.count(&SchedulerEvent::Background),
        1,
        "queued background intent must be applied exactly once"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_minimize_foreground_record_backgrounds_it() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();

    let record = start_cold(&manager, &scene, 1, "MainAbility", LaunchMode::Standard);
    let scheduler = FakeScheduler::new();
    drive_to_foreground(&manager, &record, &scheduler).await;

    manager
        .minimize_ui_ability(&record, true, 0)
        .expect("minimize must be accepted");
    assert_eq!(record.ability_state(), AbilityState::Backgrounding);
    assert!(record.minimize_from_user());

    manager
        .ability_transaction_done(record.token(), TransactionState::Background, None)
        .expect("background report must be accepted");
    let watched = Arc::clone(&record);
    wait_until(move || watched.is_ability_state(AbilityState::Background)).await;
    wait_until(move || app.count(|e| matches!(e, AppEvent::MoveToBackground(_))) == 1).await;

    // minimizing a backgrounded record is a no-op, not an error
    manager
        .minimize_ui_ability(&record, false, 0)
        .expect("minimize of a background record is accepted");
    assert_eq!(record.ability_state(), AbilityState::Background);
    assert_eq!(scheduler.count(&SchedulerEvent::Background), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_background_record_terminates_and_cleans_up() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();

    let record = start_cold(&manager, &scene, 1, "MainAbility", LaunchMode::Standard);
    let scheduler = FakeScheduler::new();
    drive_to_foreground(&manager, &record, &scheduler).await;
    manager.minimize_ui_ability(&record, true, 0).expect("minimize");
    manager
        .ability_transaction_done(record.token(), TransactionState::Background, None)
        .expect("background report");
    let watched = Arc::clone(&record);
    wait_until(move || watched.is_ability_state(AbilityState::Background)).await;

    manager
        .close_ui_ability(&record, -1, None, false)
        .expect("close must be accepted");
    assert!(manager.get_ability_record_by_id(1).is_none(), "closed record leaves the map");
    assert_eq!(record.ability_state(), AbilityState::Terminating);
    assert_eq!(app.count(|e| matches!(e, AppEvent::PrepareTerminate(_, false))), 1);
    assert_eq!(scheduler.count(&SchedulerEvent::Terminate), 1);

    manager
        .ability_transaction_done(record.token(), TransactionState::Initial, None)
        .expect("terminate confirmation must be accepted");
    let app_done = Arc::clone(&app);
    wait_until(move || app_done.count(|e| matches!(e, AppEvent::Terminate(_))) == 1).await;
    let manager_done = Arc::clone(&manager);
    wait_until(move || manager_done.terminating_ability_count() == 0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_foreground_record_backgrounds_first() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();

    let record = start_cold(&manager, &scene, 1, "MainAbility", LaunchMode::Standard);
    let scheduler = FakeScheduler::new();
    drive_to_foreground(&manager, &record, &scheduler).await;

    manager
        .close_ui_ability(&record, 0, None, false)
        .expect("close must be accepted");
    assert_eq!(record.ability_state(), AbilityState::Backgrounding);
    assert!(record.is_terminating());
    assert!(manager.get_ability_record_by_id(1).is_none());

    // once backgrounded, the terminate-list sweep picks the record up
    manager
        .ability_transaction_done(record.token(), TransactionState::Background, None)
        .expect("background report");
    let sched = Arc::clone(&scheduler);
    wait_until(move || sched.count(&SchedulerEvent::Terminate) == 1).await;
    manager
        .ability_transaction_done(record.token(), TransactionState::Initial, None)
        .expect("terminate confirmation");
    let manager_done = Arc::clone(&manager);
    wait_until(move || manager_done.terminating_ability_count() == 0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_delivers_results_to_caller() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();

    // caller first
    let caller = start_cold(&manager, &scene, 1, "CallerAbility", LaunchMode::Standard);
    let caller_scheduler = FakeScheduler::new();
    drive_to_foreground(&manager, &caller, &caller_scheduler).await;

    // callee, started for a result by the caller
    let mut request = make_request("CalleeAbility", LaunchMode::Standard);
    let mut session_info = make_session_info(2, &scene, request.want.clone());
    session_info.caller_token = Some(caller.token());
    session_info.request_code = 7;
    manager
        .start_ui_ability(&mut request, session_info, 0)
        .expect("callee start");
    let callee = manager.get_ability_record_by_id(2).expect("callee tracked");
    let callee_scheduler = FakeScheduler::new();
    drive_to_foreground(&manager, &callee, &callee_scheduler).await;

    let mut result_want = Want::default();
    result_want.set_param(PARAM_CALLER_TOKEN, WantValue::Int(1));
    result_want.set_param("answer", WantValue::Int(42));
    manager
        .close_ui_ability(&callee, 9, Some(&result_want), false)
        .expect("close with result");

    assert_eq!(
        caller_scheduler.count(&SchedulerEvent::SendResult(7, 9)),
        1,
        "result must reach the caller's scheduler under its request code"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_back_to_caller_sets_transient_back_transition() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();

    let caller = start_cold(&manager, &scene, 1, "CallerAbility", LaunchMode::Standard);
    let current = make_session_info(2, &scene, Want::default());

    manager
        .back_to_caller_ability_with_result(&current, &caller)
        .expect("back to caller");

    let activation = scene.last_activation().expect("activation sent");
    assert!(activation.is_back_transition, "payload must be marked as back transition");
    let kept = caller.session_info().expect("caller session info");
    assert!(!kept.is_back_transition, "flag must not persist on the caller's session");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_singleton_notify_start_reuses_existing_session() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();
    manager.set_root_scene_session(scene.token());

    let request = make_request("MainAbility", LaunchMode::Singleton);
    manager
        .notify_scb_to_start_ui_ability(request.clone())
        .expect("first notify");
    let first = scene.last_activation().expect("first activation");
    assert_eq!(first.persistent_id, 0, "nothing to reuse yet");
    assert!(first.reuse, "singleton branch always reports reuse");

    // the compositor assigns session 5 and calls back
    let record = start_cold(&manager, &scene, 5, "MainAbility", LaunchMode::Singleton);

    manager
        .notify_scb_to_start_ui_ability(request)
        .expect("second notify");
    let second = scene.last_activation().expect("second activation");
    assert_eq!(second.persistent_id, 5, "existing singleton must be offered for reuse");

    let mut warm = make_request("MainAbility", LaunchMode::Singleton);
    let warm_session = make_session_info(5, &scene, warm.want.clone());
    let cold = manager
        .start_ui_ability(&mut warm, warm_session, 0)
        .expect("warm start");
    assert!(!cold);
    let reused = manager.get_ability_record_by_id(5).expect("tracked");
    assert_eq!(reused.record_id(), record.record_id(), "same record, never a second one");
    assert_eq!(manager.check_ability_number("com.example.notes", "MainAbility", "entry"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_update_session_info_closes_dropped_sessions() {
    let app = FakeAppService::new();
    let manager = make_manager(&app);
    let scene = FakeSceneSession::new();

    let kept = start_cold(&manager, &scene, 1, "KeptAbility", LaunchMode::Standard);
    let dropped = start_cold(&manager, &scene, 2, "DroppedAbility", LaunchMode::Standard);
    // attach both so no load watchdog interferes with the reconciliation
    manager
        .attach_ability_thread(FakeScheduler::new() as _, kept.token())
        .expect("attach kept");
    manager
        .attach_ability_thread(FakeScheduler::new() as _, dropped.token())
        .expect("attach dropped");

    let listed = make_session_info(1, &scene, Want::default());
    let unknown = manager.update_session_info_by_scb(vec![listed, make_session_info(9, &scene, Want::default())]);
    assert_eq!(unknown, vec![9], "ids the manager does not know are returned");

    let manager_done = Arc::clone(&manager);
    wait_until(move || manager_done.get_ability_record_by_id(2).is_none()).await;
    assert!(manager.get_ability_record_by_id(1).is_some());
    assert_eq!(kept.record_id(), 1);
    drop(dropped);
}
