// Sync and socket internals at debug; tungstenite's frame chatter stays at info.
const DEFAULT_DIRECTIVES: &str = "deskline_core=debug,tokio_tungstenite=info,info";

/// Installs the subscriber for the host the core is embedded in.
///
/// Mobile builds always use `DEFAULT_DIRECTIVES`: iOS sends them to os_log under
/// `com.deskline.app` and mirrors them to `<data_dir>/deskline.log`, Android to logcat
/// under the `deskline` tag. Desktop and test builds write to stderr and take `RUST_LOG`
/// instead when it is set, so `RUST_LOG=deskline_core::realtime=trace` narrows a run to
/// the pub/sub session.
///
/// Only the first call installs anything.
pub fn init_logging(#[allow(unused)] data_dir: &str) {
    #[cfg(target_os = "ios")]
    {
        use tracing_subscriber::prelude::*;

        let os_log = tracing_oslog::OsLogger::new("com.deskline.app", "default");
        let _ = std::fs::create_dir_all(data_dir);
        let file_layer = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(std::path::Path::new(data_dir).join("deskline.log"))
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
            });

        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(DEFAULT_DIRECTIVES))
            .with(os_log)
            .with(file_layer)
            .try_init();
    }

    #[cfg(target_os = "android")]
    {
        use tracing_subscriber::prelude::*;

        let _ = tracing_subscriber::registry()
            .with(
                paranoid_android::layer("deskline")
                    .with_filter(tracing_subscriber::EnvFilter::new(DEFAULT_DIRECTIVES)),
            )
            .try_init();
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| DEFAULT_DIRECTIVES.into()),
            )
            .with_writer(std::io::stderr)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_parse() {
        let filter = tracing_subscriber::EnvFilter::try_new(DEFAULT_DIRECTIVES).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("deskline_core=debug"), "filter was {rendered}");
        assert!(rendered.contains("tokio_tungstenite=info"), "filter was {rendered}");
    }

    #[test]
    fn repeated_init_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        init_logging(data_dir);
        init_logging(data_dir);
    }
}
