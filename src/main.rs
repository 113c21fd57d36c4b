use tracing_subscriber::EnvFilter;

use docdex::config::Config;
use docdex::daemon;
use docdex::state::DaemonState;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_env("DOCDEX_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let to_stderr = std::env::var("DOCDEX_LOG_STDERR").is_ok_and(|v| v == "1");
    if to_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return;
    }

    let _ = std::fs::create_dir_all(&config.cache_dir);
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_path())
    {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(&config);

    tracing::info!("cache directory: {}", config.cache_dir.display());
    let state = DaemonState::new(config)?;
    daemon::run(state).await
}
