use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs the global fmt subscriber. `RUST_LOG` overrides the default `info` filter.
/// Later calls are no-ops, so every function entrypoint can call this.
pub fn init() {
  INIT.call_once(|| {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(false)
      .try_init();
  });
}
