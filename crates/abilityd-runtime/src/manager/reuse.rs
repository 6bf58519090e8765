//! Session reuse resolution.
//!
//! Decides, for a start request, whether an existing record should take
//! the activation instead of a new one being created. Resolution is pure:
//! it never mutates manager state, so callers can branch on the decision
//! before touching the maps.

use abilityd_core::record::check_properties;
use abilityd_core::request::{AbilityRequest, CollaboratorType, LaunchMode};
use abilityd_core::session::PersistentId;
use abilityd_core::want::PARAM_MISSION_AFFINITY;
use tracing::debug;

use super::ManagerState;

/// Result of reuse resolution.
///
/// `persistent_id` is authoritative: `None` always means "no existing
/// record", independent of `reuse` (which is forwarded to the compositor
/// to describe the branch taken, exactly as consumed downstream).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReuseDecision {
    /// Matched session, when one exists.
    pub persistent_id: Option<PersistentId>,
    /// Whether the launch-mode branch permits reuse at all.
    pub reuse: bool,
}

impl ReuseDecision {
    const NO_REUSE: Self = Self {
        persistent_id: None,
        reuse: false,
    };

    /// Wire form of the id, with `0` standing for "not assigned".
    #[must_use]
    pub fn persistent_id_or_zero(&self) -> PersistentId {
        self.persistent_id.unwrap_or(0)
    }
}

/// Resolves the session a request should land in.
pub(crate) fn resolve_persistent_id(
    state: &ManagerState,
    request: &AbilityRequest,
) -> ReuseDecision {
    if request.collaborator_type != CollaboratorType::Default {
        return resolve_collaborator(state, request);
    }
    match request.ability_info.launch_mode {
        LaunchMode::Specified => resolve_specified(state, request),
        LaunchMode::Standard => resolve_standard(state, request),
        LaunchMode::Singleton => resolve_singleton(state, request),
    }
}

/// Collaborator-managed sessions reuse by mission affinity, most recently
/// restarted instance first.
fn resolve_collaborator(state: &ManagerState, request: &AbilityRequest) -> ReuseDecision {
    let affinity = request.want.string_param(PARAM_MISSION_AFFINITY);
    let mut decision = ReuseDecision::NO_REUSE;
    let mut newest = 0_i64;
    for (session_id, record) in &state.session_ability_map {
        if record.collaborator_type() != CollaboratorType::Default
            && record.mission_affinity() == affinity
            && record.restart_time() >= newest
        {
            decision = ReuseDecision {
                persistent_id: Some(*session_id),
                reuse: true,
            };
            newest = record.restart_time();
        }
    }
    decision
}

/// SPECIFIED instances reuse only on a matching flag; entering this branch
/// always reports `reuse` to the compositor, even on a miss.
pub(crate) fn resolve_specified(state: &ManagerState, request: &AbilityRequest) -> ReuseDecision {
    if request.ability_info.launch_mode != LaunchMode::Specified {
        return ReuseDecision::NO_REUSE;
    }
    for (session_id, record) in &state.session_ability_map {
        if record.specified_flag() == request.specified_flag
            && check_properties(record, request, LaunchMode::Specified)
        {
            debug!(session_id, "specified reuse hit");
            return ReuseDecision {
                persistent_id: Some(*session_id),
                reuse: true,
            };
        }
    }
    ReuseDecision {
        persistent_id: None,
        reuse: true,
    }
}

/// STANDARD instances only reuse when the caller asked for the most
/// recent one.
fn resolve_standard(state: &ManagerState, request: &AbilityRequest) -> ReuseDecision {
    if !request.start_recent {
        return ReuseDecision::NO_REUSE;
    }
    let mut persistent_id = None;
    let mut newest = 0_i64;
    for (session_id, record) in &state.session_ability_map {
        if check_properties(record, request, LaunchMode::Standard) && record.restart_time() >= newest
        {
            persistent_id = Some(*session_id);
            newest = record.restart_time();
        }
    }
    ReuseDecision {
        persistent_id,
        reuse: true,
    }
}

/// SINGLETON reuses the one live instance when it exists.
fn resolve_singleton(state: &ManagerState, request: &AbilityRequest) -> ReuseDecision {
    for (session_id, record) in &state.session_ability_map {
        if check_properties(record, request, LaunchMode::Singleton) {
            debug!(session_id, "singleton reuse hit");
            return ReuseDecision {
                persistent_id: Some(*session_id),
                reuse: true,
            };
        }
    }
    debug!("no existing singleton instance");
    ReuseDecision {
        persistent_id: None,
        reuse: true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use abilityd_core::record::AbilityRecord;
    use abilityd_core::request::AbilityInfo;
    use abilityd_core::want::{ElementName, Want, WantValue};

    use super::*;

    fn make_request(name: &str, mode: LaunchMode) -> AbilityRequest {
        AbilityRequest {
            ability_info: AbilityInfo {
                name: name.to_string(),
                bundle_name: "com.example.notes".to_string(),
                module_name: "entry".to_string(),
                launch_mode: mode,
                ..Default::default()
            },
            want: Want::new(ElementName::new("com.example.notes", "entry", name)),
            ..Default::default()
        }
    }

    fn state_with(records: Vec<(PersistentId, Arc<AbilityRecord>)>) -> ManagerState {
        let mut state = ManagerState::new();
        for (id, record) in records {
            state.session_ability_map.insert(id, record);
        }
        state
    }

    #[test]
    fn test_singleton_reuses_existing_instance() {
        let request = make_request("MainAbility", LaunchMode::Singleton);
        let record = Arc::new(AbilityRecord::new(1, &request, 0));
        let state = state_with(vec![(11, record)]);

        let decision = resolve_persistent_id(&state, &request);
        assert_eq!(decision.persistent_id, Some(11));
        assert!(decision.reuse);
    }

    #[test]
    fn test_singleton_miss_still_reports_reuse_branch() {
        let request = make_request("MainAbility", LaunchMode::Singleton);
        let state = state_with(vec![]);

        let decision = resolve_persistent_id(&state, &request);
        assert_eq!(decision.persistent_id, None);
        assert!(decision.reuse);
        assert_eq!(decision.persistent_id_or_zero(), 0);
    }

    #[test]
    fn test_standard_without_start_recent_never_reuses() {
        let request = make_request("MainAbility", LaunchMode::Standard);
        let record = Arc::new(AbilityRecord::new(1, &request, 0));
        let state = state_with(vec![(11, record)]);

        let decision = resolve_persistent_id(&state, &request);
        assert_eq!(decision.persistent_id, None);
        assert!(!decision.reuse);
    }

    #[test]
    fn test_standard_start_recent_picks_most_recent() {
        let request = make_request("MainAbility", LaunchMode::Standard);
        let older = Arc::new(AbilityRecord::new(1, &request, 0));
        older.set_restart_time(100);
        let newer = Arc::new(AbilityRecord::new(2, &request, 0));
        newer.set_restart_time(200);
        let state = state_with(vec![(11, older), (12, newer)]);

        let mut recent = request;
        recent.start_recent = true;
        let decision = resolve_persistent_id(&state, &recent);
        assert_eq!(decision.persistent_id, Some(12));
        assert!(decision.reuse);
    }

    #[test]
    fn test_specified_matches_flag() {
        let mut creating = make_request("MainAbility", LaunchMode::Specified);
        creating.specified_flag = "doc-a".to_string();
        let record = Arc::new(AbilityRecord::new(1, &creating, 0));
        let state = state_with(vec![(11, record)]);

        let decision = resolve_persistent_id(&state, &creating);
        assert_eq!(decision.persistent_id, Some(11));

        let mut other_flag = make_request("MainAbility", LaunchMode::Specified);
        other_flag.specified_flag = "doc-b".to_string();
        let miss = resolve_persistent_id(&state, &other_flag);
        assert_eq!(miss.persistent_id, None);
        assert!(miss.reuse);
    }

    #[test]
    fn test_collaborator_reuses_by_affinity() {
        let mut creating = make_request("MainAbility", LaunchMode::Standard);
        creating.collaborator_type = CollaboratorType::Others;
        creating
            .want
            .set_param(PARAM_MISSION_AFFINITY, WantValue::String("mail".to_string()));
        let record = Arc::new(AbilityRecord::new(1, &creating, 0));
        let state = state_with(vec![(21, record)]);

        let decision = resolve_persistent_id(&state, &creating);
        assert_eq!(decision.persistent_id, Some(21));
        assert!(decision.reuse);

        let mut other = creating.clone();
        other
            .want
            .set_param(PARAM_MISSION_AFFINITY, WantValue::String("calendar".to_string()));
        let miss = resolve_persistent_id(&state, &other);
        assert_eq!(miss.persistent_id, None);
        assert!(!miss.reuse);
    }

    #[test]
    fn test_app_index_mismatch_blocks_reuse() {
        let request = make_request("MainAbility", LaunchMode::Singleton);
        let record = Arc::new(AbilityRecord::new(1, &request, 0));
        let state = state_with(vec![(11, record)]);

        let mut cloned = request;
        cloned
            .want
            .set_param(abilityd_core::want::PARAM_APP_CLONE_INDEX, WantValue::Int(1));
        let decision = resolve_persistent_id(&state, &cloned);
        assert_eq!(decision.persistent_id, None);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn arb_mode() -> impl Strategy<Value = LaunchMode> {
            prop_oneof![
                Just(LaunchMode::Singleton),
                Just(LaunchMode::Standard),
                Just(LaunchMode::Specified),
            ]
        }

        proptest! {
            /// Resolution never panics and a returned id always points at a
            /// record that satisfies the matching predicate for its branch.
            #[test]
            fn resolution_returns_tracked_matches(
                names in proptest::collection::vec("[a-c]{1}", 0..6),
                mode in arb_mode(),
                target in "[a-c]{1}",
            ) {
                let mut state = ManagerState::new();
                for (index, name) in names.iter().enumerate() {
                    let request = make_request(name, mode);
                    let record = Arc::new(AbilityRecord::new(index as i64 + 1, &request, 0));
                    record.set_restart_time(index as i64);
                    state.session_ability_map.insert(index as i32 + 1, record);
                }
                let mut request = make_request(&target, mode);
                request.start_recent = true;
                let decision = resolve_persistent_id(&state, &request);
                if let Some(id) = decision.persistent_id {
                    let record = state.session_ability_map.get(&id).expect("id must be tracked");
                    prop_assert!(check_properties(record, &request, mode));
                }
            }
        }
    }
}
