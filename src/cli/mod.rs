pub(crate) mod adapter;
pub(crate) mod bonded;
pub(crate) mod command;
pub(crate) mod connect;
pub(crate) mod output;
pub(crate) mod scan;
pub(crate) mod serve;
pub(crate) mod transcript;
pub(crate) mod ui;
pub(crate) mod uuids;
pub(crate) mod watch;

use tracing::debug;

pub use self::adapter::AdapterArgs;
pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::connect::ConnectArgs;
pub use self::scan::ScanArgs;
pub use self::serve::ServeArgs;
pub use self::uuids::UuidsArgs;
pub use self::watch::WatchArgs;

/// Resolves on Ctrl+C. Never resolves if the signal cannot be watched.
pub(crate) async fn interrupted() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        debug!(%error, "Ctrl+C cannot be watched");
        std::future::pending::<()>().await;
    }
}
