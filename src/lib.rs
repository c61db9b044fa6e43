pub mod api;
pub mod core;
pub mod schemas;
pub mod services;
pub mod tasks;

mod console;

#[cfg(test)]
mod test_support;

use crate::core::{config::Settings, telemetry};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let command = console::parse_args(std::env::args().skip(1))?;
    tracing::debug!(
        environment = %settings.runtime().environment.as_str(),
        base_url = %settings.api().base_url.as_str(),
        "exam client starting"
    );

    let result = console::run(&settings, command).await;

    if let Some(rendered) = core::metrics::render() {
        println!("{rendered}");
    }

    result
}
