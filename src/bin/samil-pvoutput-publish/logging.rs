use env_logger::{Builder, Env};

/// Log level defaults to `info`; override with RUST_LOG.
pub fn init() {
    Builder::from_env(Env::default().default_filter_or("info")).init();
}
