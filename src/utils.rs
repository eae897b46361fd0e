use crate::radio::Device;

const NO_NAME: &str = "NO NAME";

/// Returns the advertised name, or a placeholder when it is absent or blank.
pub(crate) fn display_name(device: &Device) -> &str {
    match device.name() {
        Some(name) if !name.trim().is_empty() => name,
        _ => NO_NAME,
    }
}
