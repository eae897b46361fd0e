use std::sync::Arc;

use tokio_stream::StreamExt;
use tracing::{debug, instrument};

use super::SessionCore;
use crate::error::SessionError;
use crate::radio::{BroadcastCategory, Device, RawBroadcast, ServiceUuids};

/// Fetches the service UUIDs a remote device advertises over SDP.
#[derive(Debug, Clone)]
pub struct UuidResolver {
    core: Arc<SessionCore>,
}

impl UuidResolver {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        Self { core }
    }

    /// Runs an SDP query and waits for the first report about `device`.
    ///
    /// Reports for other devices are ignored. A report without UUIDs is
    /// treated like no report at all.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] when no usable report arrives within
    /// the configured UUID timeout, and [`SessionError::AdapterDisabled`] when
    /// the query cannot be started.
    #[instrument(skip(self, device), level = "debug", fields(address = %device.address()))]
    pub async fn resolve_uuids(&self, device: &Device) -> Result<ServiceUuids, SessionError> {
        self.core.ensure_available()?;
        let target = *device.address();
        let mut reports = self
            .core
            .hub
            .subscribe(BroadcastCategory::ServiceUuids, move |raw| match raw {
                RawBroadcast::ServiceUuids { device, uuids } if *device.address() == target => {
                    Some(uuids.map(|uuids| ServiceUuids::new(device, uuids)))
                }
                _ => None,
            })?;

        if !self.core.driver.fetch_uuids(device).await? {
            return Err(SessionError::AdapterDisabled {
                operation: "fetch service UUIDs",
            });
        }

        let timeout = self.core.config.uuid_timeout();
        match tokio::time::timeout(timeout, reports.next()).await {
            Ok(Some(Some(uuids))) => {
                debug!(count = uuids.uuids().len(), "service UUIDs resolved");
                Ok(uuids)
            }
            Ok(Some(None)) => {
                debug!("SDP query reported no UUIDs");
                Err(SessionError::Timeout {
                    operation: "fetch service UUIDs",
                })
            }
            Ok(None) => Err(SessionError::SessionClosed),
            Err(_) => Err(SessionError::Timeout {
                operation: "fetch service UUIDs",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::*;
    use crate::config::SessionConfig;
    use crate::radio::{Address, FakeRadio, FakeRadioConfig, SPP_UUID};
    use crate::session::BluetoothSession;

    const PHONE: &str = "AA:BB:CC:DD:EE:01";
    const SPEAKER: &str = "AA:BB:CC:DD:EE:02";

    fn device(value: &str) -> Device {
        let address: Address = value.parse().expect("test address should parse");
        Device::new(address)
    }

    fn resolver(radio: &FakeRadio) -> UuidResolver {
        BluetoothSession::builder()
            .driver(Arc::new(radio.clone()))
            .config(
                SessionConfig::builder()
                    .uuid_timeout(Duration::from_millis(50))
                    .build(),
            )
            .build()
            .expect("session should build")
            .uuids()
    }

    #[tokio::test]
    async fn resolves_uuids_in_reported_order() {
        let audio = Uuid::from_u128(0x110b);
        let radio = FakeRadio::new(
            FakeRadioConfig::builder()
                .sdp(
                    format!("{PHONE}={SPP_UUID},{audio}")
                        .parse()
                        .expect("fixture should parse"),
                )
                .build(),
        );

        let uuids = resolver(&radio)
            .resolve_uuids(&device(PHONE))
            .await
            .expect("UUIDs should resolve");

        assert_eq!(&device(PHONE), uuids.device());
        assert_eq!(vec![SPP_UUID, audio], uuids.uuids());
        assert_eq!(Some(SPP_UUID), uuids.first());
    }

    #[tokio::test]
    async fn reports_for_other_devices_are_ignored() {
        let radio = FakeRadio::new(
            FakeRadioConfig::builder()
                .sdp(format!("{SPEAKER}={SPP_UUID}").parse().expect("fixture should parse"))
                .build(),
        );
        let resolver = resolver(&radio);
        let speaker = device(SPEAKER);
        let pending = tokio::spawn(async move { resolver.resolve_uuids(&device(PHONE)).await });
        tokio::task::yield_now().await;

        radio.emit(RawBroadcast::ServiceUuids {
            device: speaker,
            uuids: Some(vec![SPP_UUID]),
        });

        assert_matches!(
            pending.await.expect("resolver task should finish"),
            Err(SessionError::Timeout { .. })
        );
    }

    #[tokio::test]
    async fn failed_query_times_out() {
        let radio = FakeRadio::new(
            FakeRadioConfig::builder()
                .sdp(format!("{PHONE}=fail").parse().expect("fixture should parse"))
                .build(),
        );

        assert_matches!(
            resolver(&radio).resolve_uuids(&device(PHONE)).await,
            Err(SessionError::Timeout { .. })
        );
    }

    #[tokio::test]
    async fn adapter_off_cannot_query() {
        let radio = FakeRadio::new(FakeRadioConfig::builder().adapter_off(true).build());

        assert_matches!(
            resolver(&radio).resolve_uuids(&device(PHONE)).await,
            Err(SessionError::AdapterDisabled { .. })
        );
    }
}
