/// Filter used when `RUST_LOG` is unset or unreadable.
const DEFAULT_FILTER: &str = "chatwin_core=debug,reqwest=info,info";

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER))
}

/// Routes `tracing` output to the platform log: os_log on iOS, logcat on
/// Android, stderr elsewhere. Repeat calls are no-ops.
pub fn init_logging() {
    #[cfg(target_os = "ios")]
    {
        use tracing_subscriber::prelude::*;

        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_oslog::OsLogger::new("com.chatwin.app", "default"))
            .try_init();
    }

    #[cfg(target_os = "android")]
    {
        use tracing_subscriber::prelude::*;

        let _ = tracing_subscriber::registry()
            .with(paranoid_android::layer("chatwin").with_filter(env_filter()))
            .try_init();
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .try_init();
    }
}
