use tracing_subscriber::EnvFilter;

/// Target of the one-line-per-mutation audit trail written by the batch
/// executor. Route it separately with e.g. `RUST_LOG=directory_audit=info`.
pub const AUDIT_TARGET: &str = "directory_audit";

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Returns `false` when a global subscriber already exists.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_refused() {
        init_tracing("info");
        assert!(!init_tracing("debug"));
    }
}
