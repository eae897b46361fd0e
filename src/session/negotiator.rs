use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::Serialize;
use strum_macros::Display;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, debug_span, info, instrument};
use uuid::Uuid;

use super::{SessionCore, ensure_enabled};
use crate::error::SessionError;
use crate::radio::{Device, RadioDriver, ServerRequest, Socket};

/// Progress of one negotiation attempt.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NegotiationState {
    Idle,
    Listening,
    Dialing,
    Connected,
    Failed,
    Cancelled,
}

impl NegotiationState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Connected | Self::Failed | Self::Cancelled)
    }
}

/// Establishes RFCOMM sockets as a server or a client.
#[derive(Debug, Clone)]
pub struct SocketNegotiator {
    core: Arc<SessionCore>,
}

impl SocketNegotiator {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        Self { core }
    }

    /// Listens on `service_id` and yields the first peer that connects.
    ///
    /// The listening endpoint is closed once a peer is accepted, or when the
    /// negotiation fails or is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the radio is unavailable.
    /// Failures during the attempt are reported by awaiting the [`Negotiation`].
    #[instrument(skip(self, service_name), level = "debug")]
    pub fn connect_as_server(
        &self,
        service_name: impl Into<String>,
        service_id: Uuid,
        secure: bool,
    ) -> Result<Negotiation, SessionError> {
        self.core.ensure_available()?;
        let request = ServerRequest {
            service_name: service_name.into(),
            service_id,
            secure,
        };
        let driver = Arc::clone(&self.core.driver);
        let accept_timeout = self.core.config.accept_timeout();
        let span = debug_span!("serve", name = %request.service_name, %service_id);

        Ok(self.spawn(span, move |state| {
            accept_one(driver, request, accept_timeout, state)
        }))
    }

    /// Dials `service_id` on `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the radio is unavailable.
    /// Failures during the attempt are reported by awaiting the [`Negotiation`].
    #[instrument(skip(self, device), level = "debug", fields(address = %device.address()))]
    pub fn connect_as_client(
        &self,
        device: &Device,
        service_id: Uuid,
        secure: bool,
    ) -> Result<Negotiation, SessionError> {
        self.core.ensure_available()?;
        let driver = Arc::clone(&self.core.driver);
        let connect_timeout = self.core.config.connect_timeout();
        let device = device.clone();
        let span = debug_span!("dial", address = %device.address(), %service_id);

        Ok(self.spawn(span, move |state| {
            dial_one(driver, device, service_id, secure, connect_timeout, state)
        }))
    }

    fn spawn<A, F>(&self, span: tracing::Span, attempt: A) -> Negotiation
    where
        A: FnOnce(watch::Sender<NegotiationState>) -> F,
        F: Future<Output = Result<Socket, SessionError>> + Send + 'static,
    {
        let cancel = self.core.shutdown.child_token();
        let (state, receiver) = watch::channel(NegotiationState::Idle);
        let attempt = attempt(state.clone());
        let token = cancel.clone();

        let task = self.core.executors.io().spawn(
            async move {
                let outcome = tokio::select! {
                    biased;
                    () = token.cancelled() => Err(SessionError::Cancelled),
                    outcome = attempt => outcome,
                };
                let terminal = match &outcome {
                    Ok(_) => NegotiationState::Connected,
                    Err(SessionError::Cancelled) => NegotiationState::Cancelled,
                    Err(_) => NegotiationState::Failed,
                };
                state.send_replace(terminal);
                match &outcome {
                    Ok(socket) => info!(remote = %socket.remote_device().address(), "socket connected"),
                    Err(error) => debug!(%error, "negotiation ended"),
                }
                outcome
            }
            .instrument(span),
        );

        Negotiation {
            task,
            cancel: cancel.clone(),
            _drop_guard: cancel.drop_guard(),
            state: receiver,
        }
    }
}

async fn accept_one(
    driver: Arc<dyn RadioDriver>,
    request: ServerRequest,
    accept_timeout: Option<Duration>,
    state: watch::Sender<NegotiationState>,
) -> Result<Socket, SessionError> {
    ensure_enabled(driver.as_ref(), "listen for connections").await?;
    let mut endpoint = driver.listen(&request).await?;
    state.send_replace(NegotiationState::Listening);
    debug!("waiting for a peer");

    let accepted = match accept_timeout {
        Some(limit) => tokio::time::timeout(limit, endpoint.accept())
            .await
            .unwrap_or(Err(SessionError::Timeout { operation: "accept" })),
        None => endpoint.accept().await,
    };
    if let Err(error) = endpoint.close().await {
        debug!(%error, "listening endpoint did not close cleanly");
    }
    accepted
}

async fn dial_one(
    driver: Arc<dyn RadioDriver>,
    device: Device,
    service_id: Uuid,
    secure: bool,
    connect_timeout: Option<Duration>,
    state: watch::Sender<NegotiationState>,
) -> Result<Socket, SessionError> {
    ensure_enabled(driver.as_ref(), "connect").await?;
    state.send_replace(NegotiationState::Dialing);

    let dial = driver.dial(&device, service_id, secure);
    match connect_timeout {
        Some(limit) => tokio::time::timeout(limit, dial)
            .await
            .unwrap_or(Err(SessionError::Timeout {
                operation: "connect",
            })),
        None => dial.await,
    }
}

/// A running negotiation.
///
/// Await it for the socket. Dropping it before completion cancels the
/// attempt and releases the listening endpoint or in-flight dial.
#[derive(Debug)]
#[must_use = "dropping a negotiation cancels it"]
pub struct Negotiation {
    task: JoinHandle<Result<Socket, SessionError>>,
    cancel: CancellationToken,
    _drop_guard: DropGuard,
    state: watch::Receiver<NegotiationState>,
}

impl Negotiation {
    #[must_use]
    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    /// Yields the current state, then every later transition.
    #[must_use]
    pub fn state_changes(&self) -> WatchStream<NegotiationState> {
        WatchStream::new(self.state.clone())
    }

    /// Cancels the attempt. Awaiting afterwards yields
    /// [`SessionError::Cancelled`] unless the socket was already connected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Future for Negotiation {
    type Output = Result<Socket, SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(error) if error.is_cancelled() => Err(SessionError::Cancelled),
            Err(error) => Err(SessionError::Worker(error)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::config::SessionConfig;
    use crate::radio::{Address, FakeRadio, FakeRadioConfig, SPP_UUID};
    use crate::session::BluetoothSession;

    const PEER: &str = "AA:BB:CC:DD:EE:01";

    fn device() -> Device {
        let address: Address = PEER.parse().expect("test address should parse");
        Device::new(address)
    }

    fn negotiator(radio: &FakeRadio, config: SessionConfig) -> SocketNegotiator {
        BluetoothSession::builder()
            .driver(Arc::new(radio.clone()))
            .config(config)
            .build()
            .expect("session should build")
            .negotiator()
    }

    fn radio_with_peer(behaviour: &str) -> FakeRadio {
        FakeRadio::new(
            FakeRadioConfig::builder()
                .peers(vec![
                    format!("{PEER}={behaviour}").parse().expect("fixture should parse"),
                ])
                .build(),
        )
    }

    #[tokio::test]
    async fn client_socket_is_bound_to_the_dialled_device() {
        let radio = radio_with_peer("echo");
        let negotiation = negotiator(&radio, SessionConfig::default())
            .connect_as_client(&device(), SPP_UUID, true)
            .expect("negotiation should start");

        let socket = negotiation.await.expect("dial should connect");

        assert_eq!(&device(), socket.remote_device());
        assert_eq!(SPP_UUID, socket.service_id());
    }

    #[tokio::test]
    async fn refused_dial_fails_the_negotiation() {
        let radio = radio_with_peer("refuse");
        let negotiation = negotiator(&radio, SessionConfig::default())
            .connect_as_client(&device(), SPP_UUID, true)
            .expect("negotiation should start");
        let mut states = negotiation.state_changes();

        assert_matches!(negotiation.await, Err(SessionError::Refused { .. }));
        let mut seen = Vec::new();
        while let Some(state) = states.next().await {
            seen.push(state);
            if state.is_terminal() {
                break;
            }
        }
        assert_eq!(Some(&NegotiationState::Failed), seen.last());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_peer_times_out() {
        let radio = radio_with_peer("unreachable");
        let config = SessionConfig::builder()
            .connect_timeout(Duration::from_secs(5))
            .build();

        let result = negotiator(&radio, config)
            .connect_as_client(&device(), SPP_UUID, true)
            .expect("negotiation should start")
            .await;

        assert_matches!(result, Err(SessionError::Timeout { operation: "connect" }));
        assert_eq!(0, radio.pending_dials());
    }

    #[tokio::test]
    async fn dropping_a_negotiation_releases_the_dial() {
        let radio = radio_with_peer("unreachable");
        let negotiation = negotiator(&radio, SessionConfig::default())
            .connect_as_client(&device(), SPP_UUID, true)
            .expect("negotiation should start");
        let mut states = negotiation.state_changes();
        while let Some(state) = states.next().await {
            if state == NegotiationState::Dialing {
                break;
            }
        }
        tokio::task::yield_now().await;
        assert_eq!(1, radio.pending_dials());

        drop(negotiation);
        while let Some(state) = states.next().await {
            if state.is_terminal() {
                assert_eq!(NegotiationState::Cancelled, state);
                break;
            }
        }

        assert_eq!(0, radio.pending_dials());
    }

    #[tokio::test]
    async fn server_accepts_one_peer_and_closes_the_listener() {
        let radio = FakeRadio::new(FakeRadioConfig::builder().build());
        let negotiation = negotiator(&radio, SessionConfig::default())
            .connect_as_server("chat", SPP_UUID, true)
            .expect("negotiation should start");
        let mut states = negotiation.state_changes();
        while let Some(state) = states.next().await {
            if state == NegotiationState::Listening {
                break;
            }
        }
        assert_eq!(1, radio.open_listeners());

        let _peer = radio
            .simulate_incoming(&device(), SPP_UUID)
            .expect("listener should accept");
        let socket = negotiation.await.expect("server should accept");

        assert_eq!(&device(), socket.remote_device());
        assert_eq!(0, radio.open_listeners());
    }

    #[tokio::test]
    async fn cancelled_server_releases_the_listener() {
        let radio = FakeRadio::new(FakeRadioConfig::builder().build());
        let negotiation = negotiator(&radio, SessionConfig::default())
            .connect_as_server("chat", SPP_UUID, true)
            .expect("negotiation should start");
        let mut states = negotiation.state_changes();
        while let Some(state) = states.next().await {
            if state == NegotiationState::Listening {
                break;
            }
        }

        negotiation.cancel();

        assert_matches!(negotiation.await, Err(SessionError::Cancelled));
        assert_eq!(0, radio.open_listeners());
    }

    #[tokio::test]
    async fn negotiation_needs_the_adapter_on() {
        let radio = FakeRadio::new(FakeRadioConfig::builder().adapter_off(true).build());
        let negotiation = negotiator(&radio, SessionConfig::default())
            .connect_as_server("chat", SPP_UUID, true)
            .expect("negotiation should start");

        assert_matches!(
            negotiation.await,
            Err(SessionError::AdapterDisabled { .. })
        );
        assert_eq!(0, radio.open_listeners());
    }
}
