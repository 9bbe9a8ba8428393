use std::{num::NonZeroU8, panic};

use time::format_description::well_known::{
    iso8601::{self, EncodedConfig},
    Iso8601,
};
use tracing::error;
use tracing_subscriber::{
    fmt::{
        self,
        format::{Compact, DefaultFields, Format},
        time::{FormatTime, LocalTime, SystemTime},
    },
    prelude::__tracing_subscriber_SubscriberExt,
    EnvFilter, Layer, Registry,
};

type ServerLayer<T> = fmt::Layer<Registry, DefaultFields, Format<Compact, T>>;

fn base_layer() -> ServerLayer<SystemTime> {
    const WITH_FILE_PATH: bool = cfg!(debug_assertions);
    fmt::layer()
        .compact()
        .with_file(WITH_FILE_PATH)
        .with_line_number(WITH_FILE_PATH)
        .with_target(!WITH_FILE_PATH)
}

/// `RUST_LOG` wins over the default `<crate>=info`.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(concat!(env!("CARGO_CRATE_NAME"), "=info")))
}

fn install<T: FormatTime + Send + Sync + 'static>(layer: ServerLayer<T>) {
    let reg = tracing_subscriber::registry().with(layer.with_filter(env_filter()));
    if let Err(err) = tracing::subscriber::set_global_default(reg) {
        eprintln!("tracing is already initialized: {}", err);
        return;
    }
    panic::set_hook(Box::new(|panic| error!("{}", panic)));
}

pub fn init_local_tracing() {
    const MY_CONFIG: EncodedConfig = iso8601::Config::DEFAULT
        .set_time_precision(iso8601::TimePrecision::Second {
            decimal_digits: NonZeroU8::new(3),
        })
        .encode();
    install(base_layer().with_timer(LocalTime::new(Iso8601::<MY_CONFIG>)));
}

/// CloudWatch stamps each line itself.
pub fn init_lambda_tracing() {
    install(base_layer().without_time().with_ansi(false));
}
