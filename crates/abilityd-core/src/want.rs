//! Intent descriptor consumed and produced by the lifecycle engine.
//!
//! A [`Want`] names a target ability ([`ElementName`]) and carries a
//! free-form parameter bag plus any file descriptors attached by the
//! caller. Descriptors are reference counted so cloned wants share them;
//! [`Want::close_all_fds`] releases this want's references, which closes
//! the underlying descriptors once no other clone holds them.

use std::collections::HashMap;
use std::fmt;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Marker set by a caller starting an ability for a result.
pub const PARAM_FOR_RESULT: &str = "ohos.aafwk.param.startAbilityForResult";
/// Requests that a call binding also bring the callee to foreground.
pub const PARAM_CALL_TO_FOREGROUND: &str = "ohos.aafwk.param.callAbilityToForeground";
/// Caller token injected by the binding layer; stripped from result wants.
pub const PARAM_CALLER_TOKEN: &str = "ohos.aafwk.param.callerToken";
/// Clone index of the target application.
pub const PARAM_APP_CLONE_INDEX: &str = "ohos.extra.param.key.appCloneIndex";
/// Mission affinity used for collaborator session reuse.
pub const PARAM_MISSION_AFFINITY: &str = "ohos.anco.param.missionAffinity";
/// Distributed-scheduling source network id; stripped before delivery.
pub const PARAM_DMS_SRC_NETWORK_ID: &str = "dmsSrcNetworkId";
/// Distributed-scheduling mission id; stripped before delivery.
pub const PARAM_DMS_MISSION_ID: &str = "dmsMissionId";
/// Persistent id requested by the distributed scheduler.
pub const PARAM_DMS_PERSISTENT_ID: &str = "ohos.dms.persistentId";
/// Process flag resolved through the specified-process protocol.
pub const PARAM_SPECIFIED_PROCESS_FLAG: &str = "ohoSpecifiedProcessFlag";
/// Process code returned by the ability-info callback.
pub const PARAM_REQUEST_PROC_CODE: &str = "ohos.extra.param.key.requestProcCode";
/// Token code returned by the ability-info callback.
pub const PARAM_REQUEST_TOKEN_CODE: &str = "ohos.extra.param.key.requestTokenCode";

/// Sentinel mission id when the distributed scheduler supplied none.
pub const DEFAULT_DMS_MISSION_ID: i64 = -1;

/// Want flag: this start continues an ability from another device.
pub const FLAG_ABILITY_CONTINUATION: u32 = 0x0000_0008;

/// Fully qualified name of an ability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementName {
    /// Device the ability lives on; empty for the local device.
    pub device_id: String,
    /// Owning bundle.
    pub bundle_name: String,
    /// Owning module; may be empty when the caller did not specify one.
    pub module_name: String,
    /// Ability name.
    pub ability_name: String,
}

impl ElementName {
    /// Creates a local element name.
    #[must_use]
    pub fn new(bundle_name: &str, module_name: &str, ability_name: &str) -> Self {
        Self {
            device_id: String::new(),
            bundle_name: bundle_name.to_string(),
            module_name: module_name.to_string(),
            ability_name: ability_name.to_string(),
        }
    }

    /// Returns this element with the module name cleared.
    ///
    /// Lookups accept both the full element and the module-less form, so
    /// callers that do not know the module can still address an ability.
    #[must_use]
    pub fn without_module(&self) -> Self {
        Self {
            module_name: String::new(),
            ..self.clone()
        }
    }

    /// Returns the `device/bundle/module/ability` URI form.
    #[must_use]
    pub fn uri(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.device_id, self.bundle_name, self.module_name, self.ability_name
        )
    }
}

impl fmt::Display for ElementName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// A value in the want parameter bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WantValue {
    /// Boolean parameter.
    Bool(bool),
    /// Integer parameter.
    Int(i64),
    /// String parameter.
    String(String),
}

/// An intent: target element, parameters, flags, and attached descriptors.
#[derive(Debug, Clone, Default)]
pub struct Want {
    element: ElementName,
    params: HashMap<String, WantValue>,
    flags: u32,
    fds: Vec<Arc<OwnedFd>>,
}

impl Want {
    /// Creates a want addressed to `element`.
    #[must_use]
    pub fn new(element: ElementName) -> Self {
        Self {
            element,
            params: HashMap::new(),
            flags: 0,
            fds: Vec::new(),
        }
    }

    /// Returns the target element.
    #[must_use]
    pub const fn element(&self) -> &ElementName {
        &self.element
    }

    /// Replaces the target element.
    pub fn set_element(&mut self, element: ElementName) {
        self.element = element;
    }

    /// Returns the want flags.
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags
    }

    /// Sets a want flag.
    pub fn add_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    /// Sets a parameter, replacing any previous value under the key.
    pub fn set_param(&mut self, key: &str, value: WantValue) {
        self.params.insert(key.to_string(), value);
    }

    /// Removes a parameter.
    pub fn remove_param(&mut self, key: &str) {
        self.params.remove(key);
    }

    /// Returns a boolean parameter, or `default` if absent or mistyped.
    #[must_use]
    pub fn bool_param(&self, key: &str, default: bool) -> bool {
        match self.params.get(key) {
            Some(WantValue::Bool(value)) => *value,
            _ => default,
        }
    }

    /// Returns an integer parameter, or `default` if absent or mistyped.
    #[must_use]
    pub fn int_param(&self, key: &str, default: i64) -> i64 {
        match self.params.get(key) {
            Some(WantValue::Int(value)) => *value,
            _ => default,
        }
    }

    /// Returns a string parameter, or empty if absent or mistyped.
    #[must_use]
    pub fn string_param(&self, key: &str) -> String {
        match self.params.get(key) {
            Some(WantValue::String(value)) => value.clone(),
            _ => String::new(),
        }
    }

    /// Returns the application clone index carried by this want.
    #[must_use]
    pub fn app_index(&self) -> i32 {
        i32::try_from(self.int_param(PARAM_APP_CLONE_INDEX, 0)).unwrap_or(0)
    }

    /// Attaches a file descriptor to this want.
    pub fn attach_fd(&mut self, fd: OwnedFd) {
        self.fds.push(Arc::new(fd));
    }

    /// Number of descriptors this want still references.
    #[must_use]
    pub fn fd_count(&self) -> usize {
        self.fds.len()
    }

    /// Drops this want's descriptor references.
    ///
    /// Warm session reuse must close descriptors on exactly one of the old
    /// and incoming wants, otherwise they leak across reuse.
    pub fn close_all_fds(&mut self) {
        self.fds.clear();
    }

    /// Builder-style parameter assignment.
    #[must_use]
    pub fn with_param(mut self, key: &str, value: WantValue) -> Self {
        self.set_param(key, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_roundtrip() {
        let mut want = Want::new(ElementName::new("com.example.notes", "entry", "MainAbility"));
        want.set_param("count", WantValue::Int(3));
        want.set_param("flag", WantValue::Bool(true));
        want.set_param("name", WantValue::String("doc".to_string()));

        assert_eq!(want.int_param("count", 0), 3);
        assert!(want.bool_param("flag", false));
        assert_eq!(want.string_param("name"), "doc");

        want.remove_param("count");
        assert_eq!(want.int_param("count", 7), 7);
    }

    #[test]
    fn test_mistyped_param_falls_back_to_default() {
        let want = Want::new(ElementName::default()).with_param("key", WantValue::String("x".into()));
        assert_eq!(want.int_param("key", 5), 5);
        assert!(!want.bool_param("key", false));
    }

    #[test]
    fn test_element_uri_and_module_less_form() {
        let element = ElementName::new("com.example.notes", "entry", "MainAbility");
        assert_eq!(element.uri(), "/com.example.notes/entry/MainAbility");
        assert_eq!(element.without_module().module_name, "");
        assert_eq!(element.without_module().bundle_name, "com.example.notes");
    }

    #[test]
    fn test_close_all_fds_drops_references() {
        let file = std::fs::File::open("/dev/null").expect("open /dev/null");
        let mut want = Want::new(ElementName::default());
        want.attach_fd(file.into());
        assert_eq!(want.fd_count(), 1);
        want.close_all_fds();
        assert_eq!(want.fd_count(), 0);
    }

    #[test]
    fn test_app_index_reads_clone_param() {
        let want =
            Want::new(ElementName::default()).with_param(PARAM_APP_CLONE_INDEX, WantValue::Int(2));
        assert_eq!(want.app_index(), 2);
    }
}
