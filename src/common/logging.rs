/// Logs go to stderr. `--dev` turns on DEBUG with file, line and thread ids.
///
/// Only the first call installs a subscriber; later calls are no-ops.
pub fn setup_logging(dev_mode: bool) {
    let installed = if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .try_init()
    };

    if installed.is_err() {
        tracing::debug!("Logging already initialised");
    }
}
