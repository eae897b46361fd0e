use std::fmt::{self, Display, Formatter};

use crate::radio::Device;
use crate::utils::display_name;

use super::painter::Painter;
use super::table;

/// Renders devices as an address, name and bond-state table.
pub(crate) struct DeviceTable<'a> {
    devices: &'a [Device],
    painter: &'a Painter,
}

impl<'a> DeviceTable<'a> {
    pub(crate) fn new(devices: &'a [Device], painter: &'a Painter) -> Self {
        Self { devices, painter }
    }
}

impl Display for DeviceTable<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rows = self
            .devices
            .iter()
            .map(|device| {
                let name = match device.name() {
                    Some(name) if !name.trim().is_empty() => name.to_string(),
                    _ => self.painter.muted(display_name(device)),
                };
                vec![
                    self.painter.address(device.address().to_string()),
                    name,
                    self.painter.bond_state(device.bond_state()),
                ]
            });
        write!(f, "{}", table::grid(["address", "name", "bond"], rows))
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;
    use crate::radio::{Address, BondState};

    fn device(address: &str) -> Device {
        let address: Address = address.parse().expect("test address should parse");
        Device::new(address)
    }

    #[test]
    fn missing_names_render_as_placeholder() {
        let devices = vec![
            device("AA:BB:CC:DD:EE:01")
                .with_name("HC-05")
                .with_bond_state(BondState::Bonded),
            device("AA:BB:CC:DD:EE:02"),
        ];
        let painter = Painter::new(false);

        assert_snapshot!(DeviceTable::new(&devices, &painter).to_string(), @r"
        ╭───────────────────┬─────────┬────────╮
        │ address           │ name    │ bond   │
        ├───────────────────┼─────────┼────────┤
        │ AA:BB:CC:DD:EE:01 │ HC-05   │ bonded │
        │ AA:BB:CC:DD:EE:02 │ NO NAME │ none   │
        ╰───────────────────┴─────────┴────────╯
        ");
    }
}
