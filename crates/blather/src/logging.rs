//! Shared `env_logger`/`log` init for both binaries. `RUST_LOG` controls
//! verbosity; default filter is `info`.

pub fn init() {
  let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
    .try_init();
}
