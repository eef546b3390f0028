use crate::model::{ObjectPath, PropertyMap, PropertyValue};

/// One-shot completion for `init` and the control operations.
///
/// Context travels in the closure's captures; it is handed back to the
/// caller (dropped with the closure) the moment the completion runs.
pub type Completion = Box<dyn FnOnce(bool) + Send + 'static>;

/// Wrap a closure as a [`Completion`]
pub fn completion<F>(f: F) -> Completion
where
    F: FnOnce(bool) + Send + 'static,
{
    Box::new(f)
}

/// Request from the service layer to report a user-facing status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatusRequest {
    /// Bus name of the Wi-Fi service handle
    pub wifi_service: String,
    /// Bus name of the connection-manager service handle
    pub connection_manager_service: String,
    /// Opaque token the subscriber uses to address its reply
    pub reply_token: String,
}

/// The registered callback table.
///
/// Every entry has a no-op default, so subscribers implement only the events
/// they care about. Mirror updates are invoked from the backend's session
/// task, one at a time and in daemon order, with borrowed snapshots that
/// must be copied to be retained. `user_status_requested` instead runs on the
/// thread calling [`Backend::notify_user_status_request`], possibly alongside
/// an update.
///
/// [`Backend::notify_user_status_request`]: crate::Backend::notify_user_status_request
pub trait UpdateCallbacks: Send + Sync + 'static {
    /// Services added or updated, and services removed. At start this is
    /// called once with every service currently known.
    fn services_changed(&self, _added: &[(ObjectPath, PropertyMap)], _removed: &[ObjectPath]) {}

    fn service_property_changed(&self, _path: &ObjectPath, _name: &str, _value: &PropertyValue) {}

    /// Saved services added and removed. At start this is called once with
    /// every saved service currently known.
    fn saved_services_changed(
        &self,
        _added: &[(ObjectPath, PropertyMap)],
        _removed: &[ObjectPath],
    ) {
    }

    /// Called once per manager property at start, then on every change
    fn manager_property_changed(&self, _name: &str, _value: &PropertyValue) {}

    fn technology_added(&self, _path: &ObjectPath, _properties: &PropertyMap) {}

    fn technology_removed(&self, _path: &ObjectPath) {}

    fn technology_property_changed(&self, _path: &ObjectPath, _name: &str, _value: &PropertyValue) {
    }

    fn group_added(&self, _path: &ObjectPath, _properties: &PropertyMap) {}

    fn group_removed(&self, _path: &ObjectPath) {}

    fn group_property_changed(&self, _path: &ObjectPath, _name: &str, _value: &PropertyValue) {}

    fn user_status_requested(&self, _request: &UserStatusRequest) {}
}

/// Callback table that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl UpdateCallbacks for NoopCallbacks {}
