mod device_view;
mod event_view;
mod painter;
mod spinner;
mod table;

pub(crate) use self::device_view::DeviceTable;
pub(crate) use self::event_view::{EventLine, WatchEvent};
pub(crate) use self::painter::Painter;
pub(crate) use self::spinner::Spinner;
pub(crate) use self::table::key_value;
