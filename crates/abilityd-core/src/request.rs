//! Start requests and the static ability metadata they carry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::call::CallConnection;
use crate::record::Token;
use crate::remote::AbilityInfoCallback;
use crate::session::SessionInfo;
use crate::want::{ElementName, Want};

/// How instances of an ability are multiplexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaunchMode {
    /// At most one live instance per element.
    #[default]
    Singleton,
    /// A new instance per start, unless the caller asks for the most
    /// recent one.
    Standard,
    /// Multiple logical instances keyed by a runtime-resolved flag.
    Specified,
}

/// Kind of presentable unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbilityType {
    /// A page (UI) ability.
    #[default]
    Page,
    /// A background service ability.
    Service,
    /// An extension ability.
    Extension,
}

/// Bundle classification of the owning application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleType {
    /// A regular application.
    #[default]
    App,
    /// An installation-free atomic service.
    AtomicService,
}

/// Collaborator kind for broker-managed sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollaboratorType {
    /// Not collaborator-managed.
    #[default]
    Default,
    /// Managed by the reserve collaborator.
    Reserve,
    /// Managed by another collaborator.
    Others,
}

/// Process placement requested for a start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessMode {
    /// Host-default placement.
    #[default]
    Unspecified,
    /// New process, window attached to the parent.
    NewProcessAttachToParent,
    /// New process, window attached to a status-bar item.
    NewProcessAttachToStatusBarItem,
    /// Existing process, window attached to a status-bar item.
    AttachToStatusBarItem,
}

impl ProcessMode {
    /// Whether this mode forces a fresh process.
    #[must_use]
    pub const fn is_new_process_mode(self) -> bool {
        matches!(
            self,
            Self::NewProcessAttachToParent | Self::NewProcessAttachToStatusBarItem
        )
    }

    /// Whether this mode attaches the window to a status-bar item.
    #[must_use]
    pub const fn is_attach_to_status_bar_mode(self) -> bool {
        matches!(
            self,
            Self::NewProcessAttachToStatusBarItem | Self::AttachToStatusBarItem
        )
    }
}

/// Process options forwarded with a start request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Requested placement mode.
    pub process_mode: ProcessMode,
    /// Pre-generated process name, when the name was created in advance.
    pub process_name: String,
}

/// Window settings chosen by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSetting {
    /// Target display.
    pub display_id: i32,
    /// Requested window mode.
    pub window_mode: i32,
}

/// Kind of start request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallType {
    /// Ordinary start.
    #[default]
    Start,
    /// Call-binding request.
    CallRequest,
}

/// Static metadata of the target ability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityInfo {
    /// Ability name.
    pub name: String,
    /// Owning bundle.
    pub bundle_name: String,
    /// Owning module.
    pub module_name: String,
    /// Configured process name; empty means the bundle default.
    pub process: String,
    /// Launch mode.
    pub launch_mode: LaunchMode,
    /// Ability kind.
    pub ability_type: AbilityType,
    /// Whether the ability is exported (visible to other bundles).
    pub visible: bool,
    /// Whether the ability requests an isolated process.
    pub isolation_process: bool,
    /// Whether the ability uses the stage application model.
    pub is_stage_based_model: bool,
    /// Bundle classification of the owning application.
    pub bundle_type: BundleType,
    /// Access token of the owning application.
    pub access_token_id: u32,
    /// Uid of the owning application.
    pub uid: i32,
}

impl AbilityInfo {
    /// Returns the element name of this ability.
    #[must_use]
    pub fn element(&self) -> ElementName {
        ElementName::new(&self.bundle_name, &self.module_name, &self.name)
    }

    /// Whether this is a stage-model page ability.
    #[must_use]
    pub const fn is_ui_ability(&self) -> bool {
        matches!(self.ability_type, AbilityType::Page) && self.is_stage_based_model
    }
}

/// A fully resolved start request entering the lifecycle engine.
#[derive(Clone, Default)]
pub struct AbilityRequest {
    /// Target ability metadata.
    pub ability_info: AbilityInfo,
    /// The intent.
    pub want: Want,
    /// Token of the calling ability, when the caller is tracked.
    pub caller_token: Option<Token>,
    /// Request code for result delivery.
    pub request_code: i32,
    /// Window settings chosen by the caller.
    pub start_setting: Option<StartSetting>,
    /// Process placement options.
    pub process_options: Option<ProcessOptions>,
    /// Session descriptor, once one is associated.
    pub session_info: Option<SessionInfo>,
    /// Collaborator kind.
    pub collaborator_type: CollaboratorType,
    /// Specified-mode flag, once resolved.
    pub specified_flag: String,
    /// For STANDARD mode: reuse the most recently used matching instance.
    pub start_recent: bool,
    /// Token id the started ability should report as its specifier.
    pub specify_token_id: u32,
    /// Requesting user.
    pub user_id: i32,
    /// Whether this start is driven by app recovery.
    pub app_recovery: bool,
    /// Start vs call binding.
    pub call_type: CallType,
    /// Caller connection for call bindings.
    pub connection: Option<Arc<dyn CallConnection>>,
    /// Framework callback observing this request.
    pub ability_info_callback: Option<Arc<dyn AbilityInfoCallback>>,
}

impl AbilityRequest {
    /// Whether this request asks for a call binding.
    #[must_use]
    pub fn is_call_request(&self) -> bool {
        self.call_type == CallType::CallRequest
    }

    /// Application clone index from the request want.
    #[must_use]
    pub fn app_index(&self) -> i32 {
        self.want.app_index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_mode_predicates() {
        assert!(ProcessMode::NewProcessAttachToParent.is_new_process_mode());
        assert!(ProcessMode::NewProcessAttachToStatusBarItem.is_new_process_mode());
        assert!(!ProcessMode::AttachToStatusBarItem.is_new_process_mode());

        assert!(ProcessMode::AttachToStatusBarItem.is_attach_to_status_bar_mode());
        assert!(ProcessMode::NewProcessAttachToStatusBarItem.is_attach_to_status_bar_mode());
        assert!(!ProcessMode::NewProcessAttachToParent.is_attach_to_status_bar_mode());
    }

    #[test]
    fn test_ability_info_element() {
        let info = AbilityInfo {
            name: "MainAbility".to_string(),
            bundle_name: "com.example.notes".to_string(),
            module_name: "entry".to_string(),
            ..Default::default()
        };
        assert_eq!(info.element().uri(), "/com.example.notes/entry/MainAbility");
    }

    #[test]
    fn test_is_ui_ability_requires_stage_page() {
        let mut info = AbilityInfo {
            is_stage_based_model: true,
            ..Default::default()
        };
        assert!(info.is_ui_ability());
        info.ability_type = AbilityType::Service;
        assert!(!info.is_ui_ability());
    }
}
