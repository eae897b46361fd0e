use std::sync::Arc;

use tracing::{debug, instrument};

use super::SessionCore;
use super::events::EventStream;
use crate::error::SessionError;
use crate::radio::{BroadcastCategory, Device, DiscoveryPhase, RawBroadcast};

/// Starts, stops and observes device discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryController {
    core: Arc<SessionCore>,
}

impl DiscoveryController {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        Self { core }
    }

    /// Starts a scan. Returns `false` without error if one is already running.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PermissionDenied`] when the permission gate
    /// refuses, and [`SessionError::AdapterDisabled`] when the adapter is off.
    #[instrument(skip(self), level = "debug")]
    pub async fn start_discovery(&self) -> Result<bool, SessionError> {
        self.core.ensure_available()?;
        if !self.core.permission.is_granted() {
            return Err(SessionError::PermissionDenied);
        }
        self.core.ensure_enabled("start discovery").await?;

        if self.core.driver.is_discovering().await? {
            debug!("discovery already running");
            return Ok(false);
        }
        self.core.driver.start_discovery().await
    }

    /// Stops the active scan. Returns `false` without error if none is running.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio is unavailable.
    #[instrument(skip(self), level = "debug")]
    pub async fn cancel_discovery(&self) -> Result<bool, SessionError> {
        self.core.ensure_available()?;
        if !self.core.driver.is_discovering().await? {
            debug!("no discovery to cancel");
            return Ok(false);
        }
        self.core.driver.cancel_discovery().await
    }

    /// # Errors
    ///
    /// Returns an error if the radio is unavailable.
    pub async fn is_discovering(&self) -> Result<bool, SessionError> {
        self.core.ensure_available()?;
        self.core.driver.is_discovering().await
    }

    /// Yields one device per platform discovery callback, duplicates included.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] if the platform listener cannot
    /// be registered.
    pub fn observe_devices(&self) -> Result<EventStream<Device>, SessionError> {
        self.core
            .hub
            .subscribe(BroadcastCategory::DeviceFound, |raw| match raw {
                RawBroadcast::DeviceFound { device } => Some(device),
                _ => None,
            })
    }

    /// Yields `Started` and `Finished` phases.
    ///
    /// `Finished` is not reported if the adapter powers off mid-scan.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] if the platform listener cannot
    /// be registered.
    pub fn observe_discovery(&self) -> Result<EventStream<DiscoveryPhase>, SessionError> {
        self.core
            .hub
            .subscribe(BroadcastCategory::Discovery, |raw| match raw {
                RawBroadcast::Discovery { action } => DiscoveryPhase::from_action(&action),
                _ => None,
            })
    }
}
