use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::radio::{
    AclAction, AdapterState, BondEvent, ConnectionStateEvent, Device, DiscoveryPhase, ScanMode,
};
use crate::utils::display_name;

use super::painter::Painter;

/// One event printed by `watch`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum WatchEvent {
    Adapter { state: AdapterState },
    ScanMode { mode: ScanMode },
    Discovery { phase: DiscoveryPhase },
    DeviceFound { device: Device },
    Bond(BondEvent),
    Acl { device: Device, action: AclAction },
    Connection(ConnectionStateEvent),
}

/// Renders a [`WatchEvent`] as one aligned text line.
pub(crate) struct EventLine<'a> {
    event: &'a WatchEvent,
    painter: &'a Painter,
}

impl<'a> EventLine<'a> {
    pub(crate) fn new(event: &'a WatchEvent, painter: &'a Painter) -> Self {
        Self { event, painter }
    }

    fn device(&self, device: &Device) -> String {
        format!(
            "{} {}",
            self.painter.address(device.address().to_string()),
            self.painter.muted(format!("({})", display_name(device)))
        )
    }
}

impl Display for EventLine<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (label, detail) = match self.event {
            WatchEvent::Adapter { state } => ("adapter", self.painter.adapter_state(*state)),
            WatchEvent::ScanMode { mode } => ("scan mode", mode.to_string()),
            WatchEvent::Discovery { phase } => ("discovery", phase.to_string()),
            WatchEvent::DeviceFound { device } => ("found", self.device(device)),
            WatchEvent::Bond(event) => {
                let previous = event
                    .previous
                    .map_or_else(|| "?".to_string(), |state| state.to_string());
                (
                    "bond",
                    format!(
                        "{} {} -> {}",
                        self.device(&event.device),
                        previous,
                        self.painter.bond_state(event.state)
                    ),
                )
            }
            WatchEvent::Acl { device, action } => {
                ("link", format!("{} {action}", self.device(device)))
            }
            WatchEvent::Connection(event) => (
                "profile",
                format!("{} {}", self.device(&event.device), event.state),
            ),
        };
        write!(f, "{} {detail}", self.painter.heading(format!("{label:<10}")))
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::radio::{Address, BondState};

    fn device() -> Device {
        let address: Address = "AA:BB:CC:DD:EE:01".parse().expect("test address should parse");
        Device::new(address).with_name("HC-05")
    }

    #[test]
    fn bond_events_show_the_transition() {
        let event = WatchEvent::Bond(BondEvent {
            device: device(),
            state: BondState::Bonded,
            previous: Some(BondState::Bonding),
        });
        let painter = Painter::new(false);

        assert_snapshot!(
            EventLine::new(&event, &painter).to_string(),
            @"bond       AA:BB:CC:DD:EE:01 (HC-05) bonding -> bonded"
        );
    }

    #[test]
    fn events_serialise_with_a_tag() {
        let event = WatchEvent::Discovery {
            phase: DiscoveryPhase::Started,
        };
        assert_eq!(
            r#"{"event":"discovery","phase":"started"}"#,
            serde_json::to_string(&event).expect("event should serialise")
        );
    }
}
