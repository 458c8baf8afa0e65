use std::sync::Once;

static INIT: Once = Once::new();

/// Installs an `env_logger` for the test binary once. `RUST_LOG=rwmap=trace`
/// shows the map's records.
pub fn init_test_logger() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .is_test(true)
            .try_init();
    });
}
