//! Restricted git gateway and self-service SSH key enrollment for a shared
//! host account.

pub mod arch;
pub mod config;
pub mod escape;
pub mod gateway;
pub mod identity;
pub mod input;
pub mod keys;
pub mod login;
pub mod metadata;
pub mod process;
pub mod quote;
pub mod repos;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub use config::Config;
pub use gateway::CommandGateway;
pub use identity::Identity;
pub use keys::KeyManager;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "GJ_LOG";

/// Installs the stderr log subscriber. An explicit `level` takes precedence
/// over [`LOG_ENV`]; the fallback is `warn`.
///
/// Standard output is never used: for the gateway it carries the git
/// protocol.
pub fn init_tracing(level: Option<&str>) {
    let filter = level
        .and_then(|l| EnvFilter::try_new(l).ok())
        .or_else(|| EnvFilter::try_from_env(LOG_ENV).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}
