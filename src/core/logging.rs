use log::LevelFilter;

pub fn setup_logging() {
    let _ = env_logger::builder()
        .filter_module("packet-tracker", LevelFilter::Info)
        .format_module_path(false)
        .parse_default_env()
        .try_init();
}
