//! Shared fakes for lifecycle manager integration tests.
//!
//! The fakes record every outbound call and never call back into the
//! manager; tests drive the corresponding completion entry points
//! themselves, playing the roles of the compositor and the application
//! process.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use abilityd_core::call::{CallConnection, Callee};
use abilityd_core::config::TimeoutConfig;
use abilityd_core::record::Token;
use abilityd_core::remote::AbilityScheduler;
use abilityd_core::request::{AbilityInfo, AbilityRequest, CallType, LaunchMode};
use abilityd_core::session::{
    PersistentId, SceneSession, SceneSessionError, SessionInfo, SessionToken,
};
use abilityd_core::want::{ElementName, Want};
use abilityd_runtime::manager::{RemoteServices, UiLifecycleManager};
use abilityd_runtime::remote::{AppService, AppServiceError, StaticPermissions};

/// Everything the manager asked the compositor to do.
#[derive(Default)]
pub struct FakeSceneSession {
    pub activations: Mutex<Vec<SessionInfo>>,
    pub exceptions: Mutex<Vec<SessionInfo>>,
    pub terminated: Mutex<Vec<SessionInfo>>,
    pub visibility_changes: Mutex<Vec<(PersistentId, bool)>>,
}

impl FakeSceneSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn token(self: &Arc<Self>) -> SessionToken {
        SessionToken::new(Arc::clone(self) as Arc<dyn SceneSession>)
    }

    pub fn activation_count(&self) -> usize {
        self.activations.lock().unwrap().len()
    }

    pub fn last_activation(&self) -> Option<SessionInfo> {
        self.activations.lock().unwrap().last().cloned()
    }
}

impl SceneSession for FakeSceneSession {
    fn pending_activation(&self, info: &SessionInfo) -> Result<(), SceneSessionError> {
        self.activations.lock().unwrap().push(info.clone());
        Ok(())
    }

    fn notify_exception(&self, info: &SessionInfo) -> Result<(), SceneSessionError> {
        self.exceptions.lock().unwrap().push(info.clone());
        Ok(())
    }

    fn terminate_session(&self, info: &SessionInfo) -> Result<(), SceneSessionError> {
        self.terminated.lock().unwrap().push(info.clone());
        Ok(())
    }

    fn change_visibility_with_status_bar(
        &self,
        info: &SessionInfo,
        is_show: bool,
    ) -> Result<(), SceneSessionError> {
        self.visibility_changes
            .lock()
            .unwrap()
            .push((info.persistent_id, is_show));
        Ok(())
    }
}

/// One outbound call to the process manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Load(Token),
    MoveToForeground(Token),
    MoveToBackground(Token),
    AttachTimeout(Token),
    PrepareTerminate(Token, bool),
    Terminate(Token),
    StartSpecifiedAbility(i32),
    StartSpecifiedProcess(i32),
    CleanByUserRequest(Token),
}

#[derive(Default)]
pub struct FakeAppService {
    pub events: Mutex<Vec<AppEvent>>,
}

impl FakeAppService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matcher: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| matcher(e)).count()
    }

    fn push(&self, event: AppEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl AppService for FakeAppService {
    fn load_ability(&self, token: Token, _info: &AbilityInfo, _want: &Want, _process_name: &str) {
        self.push(AppEvent::Load(token));
    }

    fn move_to_foreground(&self, token: Token) {
        self.push(AppEvent::MoveToForeground(token));
    }

    fn move_to_background(&self, token: Token) {
        self.push(AppEvent::MoveToBackground(token));
    }

    fn attach_timeout(&self, token: Token) {
        self.push(AppEvent::AttachTimeout(token));
    }

    fn prepare_terminate(&self, token: Token, clear_session: bool) {
        self.push(AppEvent::PrepareTerminate(token, clear_session));
    }

    fn terminate_ability(&self, token: Token) -> Result<(), AppServiceError> {
        self.push(AppEvent::Terminate(token));
        Ok(())
    }

    fn start_specified_ability(&self, _want: &Want, _info: &AbilityInfo, request_id: i32) {
        self.push(AppEvent::StartSpecifiedAbility(request_id));
    }

    fn start_specified_process(&self, _want: &Want, _info: &AbilityInfo, request_id: i32) {
        self.push(AppEvent::StartSpecifiedProcess(request_id));
    }

    fn clean_ability_by_user_request(&self, token: Token) -> bool {
        self.push(AppEvent::CleanByUserRequest(token));
        false
    }

    fn block_process_cache_by_pids(&self, _pids: &[i32]) {}

    fn ability_tokens_of_pid(&self, _pid: i32) -> Vec<Token> {
        Vec::new()
    }

    fn kill_processes_by_pids(&self, _pids: &[i32]) {}
}

/// One transaction scheduled onto the (fake) ability thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Foreground,
    Background,
    Terminate,
    CallRequest,
    SendResult(i32, i32),
}

#[derive(Default)]
pub struct FakeScheduler {
    pub transactions: Mutex<Vec<SchedulerEvent>>,
    pub prepare_answer: bool,
    pub prepare_delay: Option<Duration>,
}

impl FakeScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answering_prepare(answer: bool, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            prepare_answer: answer,
            prepare_delay: delay,
            ..Self::default()
        })
    }

    pub fn transactions(&self) -> Vec<SchedulerEvent> {
        self.transactions.lock().unwrap().clone()
    }

    pub fn count(&self, event: &SchedulerEvent) -> usize {
        self.transactions.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

impl AbilityScheduler for FakeScheduler {
    fn schedule_foreground(&self, _want: &Want, _scene_flag: u32) {
        self.transactions.lock().unwrap().push(SchedulerEvent::Foreground);
    }

    fn schedule_background(&self, _want: &Want) {
        self.transactions.lock().unwrap().push(SchedulerEvent::Background);
    }

    fn schedule_terminate(&self, _want: &Want) {
        self.transactions.lock().unwrap().push(SchedulerEvent::Terminate);
    }

    fn call_request(&self) {
        self.transactions.lock().unwrap().push(SchedulerEvent::CallRequest);
    }

    fn send_result(&self, request_code: i32, result_code: i32, _want: &Want) {
        self.transactions
            .lock()
            .unwrap()
            .push(SchedulerEvent::SendResult(request_code, result_code));
    }

    fn prepare_terminate(&self) -> bool {
        if let Some(delay) = self.prepare_delay {
            std::thread::sleep(delay);
        }
        self.prepare_answer
    }
}

/// Call connection that records delivered callees.
#[derive(Default)]
pub struct FakeConnection {
    pub deliveries: Mutex<usize>,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deliveries(&self) -> usize {
        *self.deliveries.lock().unwrap()
    }
}

impl CallConnection for FakeConnection {
    fn on_call_done(&self, _callee: Arc<dyn Callee>) {
        *self.deliveries.lock().unwrap() += 1;
    }
}

pub struct FakeCallee;
impl Callee for FakeCallee {}

/// Timeouts shrunk so watchdog paths complete within a test run.
pub fn test_config() -> TimeoutConfig {
    TimeoutConfig {
        app_start_timeout: Duration::from_millis(100),
        foreground_timeout: Duration::from_millis(100),
        background_timeout: Duration::from_millis(100),
    }
}

pub fn make_manager(app: &Arc<FakeAppService>) -> Arc<UiLifecycleManager> {
    let mut services = RemoteServices::new(Arc::clone(app) as Arc<dyn AppService>);
    services.permissions = Arc::new(StaticPermissions {
        prepare_terminate: true,
        ..Default::default()
    });
    UiLifecycleManager::new(0, test_config(), services)
}

pub fn make_request(name: &str, mode: LaunchMode) -> AbilityRequest {
    AbilityRequest {
        ability_info: AbilityInfo {
            name: name.to_string(),
            bundle_name: "com.example.notes".to_string(),
            module_name: "entry".to_string(),
            launch_mode: mode,
            visible: true,
            is_stage_based_model: true,
            ..Default::default()
        },
        want: Want::new(ElementName::new("com.example.notes", "entry", name)),
        ..Default::default()
    }
}

pub fn make_call_request(name: &str, connection: &Arc<FakeConnection>) -> AbilityRequest {
    let mut request = make_request(name, LaunchMode::Singleton);
    request.call_type = CallType::CallRequest;
    request.connection = Some(Arc::clone(connection) as Arc<dyn CallConnection>);
    request
}

pub fn make_session_info(
    persistent_id: PersistentId,
    scene: &Arc<FakeSceneSession>,
    want: Want,
) -> SessionInfo {
    SessionInfo {
        persistent_id,
        session_token: Some(scene.token()),
        want,
        ..SessionInfo::default()
    }
}

/// Polls `condition` until it holds or two seconds elapse.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within two seconds");
}
