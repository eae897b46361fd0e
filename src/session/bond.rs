use std::sync::Arc;

use tracing::instrument;

use super::SessionCore;
use super::events::EventStream;
use crate::error::SessionError;
use crate::radio::{BondEvent, BondState, BroadcastCategory, Device, RawBroadcast};

/// Pairing state transitions and bond requests.
#[derive(Debug, Clone)]
pub struct BondController {
    core: Arc<SessionCore>,
}

impl BondController {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        Self { core }
    }

    /// Yields every bond-state transition, for any device.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] if the platform listener cannot
    /// be registered.
    pub fn observe_bond_state(&self) -> Result<EventStream<BondEvent>, SessionError> {
        self.core
            .hub
            .subscribe(BroadcastCategory::BondState, |raw| match raw {
                RawBroadcast::BondState {
                    device,
                    code,
                    previous_code,
                } => Some(BondEvent {
                    device,
                    state: BondState::from_code(code)?,
                    previous: previous_code.and_then(BondState::from_code),
                }),
                _ => None,
            })
    }

    /// Starts bonding with `device`. Returns `false` if the platform did not
    /// start it, for example because the device is already bonded.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AdapterDisabled`] when the adapter is off.
    #[instrument(skip(self, device), level = "debug", fields(address = %device.address()))]
    pub async fn create_bond(&self, device: &Device) -> Result<bool, SessionError> {
        self.core.ensure_enabled("create a bond").await?;
        self.core.driver.create_bond(device).await
    }
}
