//! Log output for binaries.
//!
//! The library only emits `tracing` events. A binary that wants them printed
//! calls [`init`] once at startup.

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Installs a formatting subscriber filtered by `RUST_LOG`, or by `info`
/// when it is unset.
pub fn init() {
    init_with_default("info");
}

/// Like [`init`], with `default` as the filter when `RUST_LOG` is unset.
///
/// Only the first call has an effect. A subscriber installed elsewhere is
/// left alone.
pub fn init_with_default(default: &str) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
