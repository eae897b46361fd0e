use std::sync::Arc;

use tracing::{info, instrument};

use super::SessionCore;
use super::events::EventStream;
use crate::error::SessionError;
use crate::radio::{AdapterState, BroadcastCategory, EnableOutcome, RawBroadcast, ScanMode};

/// Adapter power state and scan mode.
#[derive(Debug, Clone)]
pub struct AdapterStateTracker {
    core: Arc<SessionCore>,
}

impl AdapterStateTracker {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        Self { core }
    }

    /// Returns whether Bluetooth hardware exists.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.core.driver.is_available()
    }

    /// # Errors
    ///
    /// Returns an error if the radio is unavailable.
    pub async fn is_enabled(&self) -> Result<bool, SessionError> {
        Ok(self.state().await? == AdapterState::On)
    }

    /// # Errors
    ///
    /// Returns an error if the radio is unavailable.
    pub async fn state(&self) -> Result<AdapterState, SessionError> {
        self.core.ensure_available()?;
        self.core.driver.adapter_state().await
    }

    /// Asks the user to turn the adapter on. An adapter that is already on
    /// reports `Enabled` without prompting.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio is unavailable.
    #[instrument(skip(self), level = "debug")]
    pub async fn request_enable(&self) -> Result<EnableOutcome, SessionError> {
        if self.is_enabled().await? {
            return Ok(EnableOutcome::Enabled);
        }
        let outcome = self.core.driver.request_enable().await?;
        info!(%outcome, "enable prompt answered");
        Ok(outcome)
    }

    /// Yields adapter power transitions as the platform reports them.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] if the platform listener cannot
    /// be registered.
    pub fn observe_state(&self) -> Result<EventStream<AdapterState>, SessionError> {
        self.core
            .hub
            .subscribe(BroadcastCategory::AdapterState, |raw| match raw {
                RawBroadcast::AdapterState { code } => AdapterState::from_code(code),
                _ => None,
            })
    }

    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] if the platform listener cannot
    /// be registered.
    pub fn observe_scan_mode(&self) -> Result<EventStream<ScanMode>, SessionError> {
        self.core
            .hub
            .subscribe(BroadcastCategory::ScanMode, |raw| match raw {
                RawBroadcast::ScanMode { code } => ScanMode::from_code(code),
                _ => None,
            })
    }
}
