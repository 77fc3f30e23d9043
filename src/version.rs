// Package identity baked in at build time.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// "perfwatch/0.2.0", used in logs.
pub fn agent_id() -> String {
    format!("{NAME}/{VERSION}")
}
