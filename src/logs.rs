use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::UtcTime;

// sqlx logs every statement at info; keep that at warn unless RUST_LOG says otherwise.
const DEFAULT_DIRECTIVES: &str = "info,sqlx::query=warn";

pub fn init_logs() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let subscriber = fmt::Subscriber::builder()
        .json()
        .flatten_event(true)
        .with_timer(UtcTime::rfc_3339())
        .with_env_filter(env_filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}
