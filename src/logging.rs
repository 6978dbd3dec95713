//! Tracing initialization

use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static TRACING_INIT: Once = Once::new();

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` is used (for example
/// [`LedgerConfig::log_filter`](crate::config::LedgerConfig)). Safe to call
/// more than once; later calls are no-ops.
pub fn init_tracing(default_filter: &str) {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = fmt().with_env_filter(filter).with_target(true).try_init();
        tracing::info!("finance ledger tracing initialized");
    });
}
