use std::sync::Arc;

use super::SessionCore;
use super::events::EventStream;
use crate::error::SessionError;
use crate::radio::{
    AclAction, AclEvent, BluetoothProfile, BroadcastCategory, ConnectionState,
    ConnectionStateEvent, ProfileEvent, RawBroadcast, ServiceState,
};

/// Profile proxy, ACL link and profile connection-state events.
#[derive(Debug, Clone)]
pub struct ProfileConnectionTracker {
    core: Arc<SessionCore>,
}

impl ProfileConnectionTracker {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        Self { core }
    }

    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] if the platform listener cannot
    /// be registered.
    pub fn observe_connection_state(
        &self,
    ) -> Result<EventStream<ConnectionStateEvent>, SessionError> {
        self.core
            .hub
            .subscribe(BroadcastCategory::ConnectionState, |raw| match raw {
                RawBroadcast::ConnectionState {
                    device,
                    code,
                    previous_code,
                } => Some(ConnectionStateEvent {
                    device,
                    state: ConnectionState::from_code(code)?,
                    previous: previous_code.and_then(ConnectionState::from_code),
                }),
                _ => None,
            })
    }

    /// Yields link-layer connect, disconnect-requested and disconnect events.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] if the platform listener cannot
    /// be registered.
    pub fn observe_acl(&self) -> Result<EventStream<AclEvent>, SessionError> {
        self.core
            .hub
            .subscribe(BroadcastCategory::Acl, |raw| match raw {
                RawBroadcast::Acl { device, action } => Some(AclEvent {
                    device,
                    action: AclAction::from_action(&action)?,
                }),
                _ => None,
            })
    }

    /// Yields proxy connect and disconnect events for one profile.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] if the platform cannot observe
    /// the profile.
    pub fn observe_profile(
        &self,
        profile: BluetoothProfile,
    ) -> Result<EventStream<ProfileEvent>, SessionError> {
        self.core
            .hub
            .subscribe(BroadcastCategory::Profile(profile), move |raw| match raw {
                RawBroadcast::Profile {
                    profile: code,
                    connected,
                    devices,
                } if code == profile.code() => Some(ProfileEvent {
                    profile,
                    state: if connected {
                        ServiceState::Connected
                    } else {
                        ServiceState::Disconnected
                    },
                    connected_devices: devices,
                }),
                _ => None,
            })
    }
}
