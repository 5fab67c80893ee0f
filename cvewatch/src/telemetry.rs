use tracing::subscriber::set_global_default;
use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

/// Subscriber for ingestion runs: `RUST_LOG` wins over `default_env_filter`,
/// events from the `log` facade used by `domain_db` are bridged in.
fn get_subscriber(default_env_filter: &str) -> impl Subscriber + Sync + Send {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_env_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish()
}

pub fn init_tracer(default_env_filter: &str) -> anyhow::Result<()> {
    let subscriber = get_subscriber(default_env_filter);
    LogTracer::init()?;
    set_global_default(subscriber)?;
    Ok(())
}
