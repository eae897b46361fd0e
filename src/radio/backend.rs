use std::sync::Arc;

use tracing::info;

use super::driver::RadioDriver;
use super::fake_backend::{FakeRadio, FakeRadioConfig};
use crate::error::SessionError;

/// Runtime radio backend selection.
#[derive(Debug)]
pub(crate) enum RadioBackend {
    BlueZ,
    Fake(FakeRadioConfig),
}

impl RadioBackend {
    /// Returns whether this backend can be built into the current binary.
    pub(crate) fn is_compiled_in(&self) -> bool {
        match self {
            Self::BlueZ => cfg!(feature = "bluez"),
            Self::Fake(_) => true,
        }
    }
}

/// Builds the injected radio driver for the selected runtime backend.
pub(crate) async fn driver_from_backend(
    backend: RadioBackend,
) -> Result<Arc<dyn RadioDriver>, SessionError> {
    let driver: Arc<dyn RadioDriver> = match backend {
        RadioBackend::BlueZ => bluez_driver().await?,
        RadioBackend::Fake(config) => {
            info!("using fake radio backend");
            Arc::new(FakeRadio::new(config))
        }
    };

    Ok(driver)
}

#[cfg(feature = "bluez")]
async fn bluez_driver() -> Result<Arc<dyn RadioDriver>, SessionError> {
    Ok(Arc::new(super::bluez_backend::BluezRadio::new().await?))
}

#[cfg(not(feature = "bluez"))]
async fn bluez_driver() -> Result<Arc<dyn RadioDriver>, SessionError> {
    Err(SessionError::Unsupported)
}
