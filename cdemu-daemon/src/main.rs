mod config;
mod control;
mod orchestrator;

use tracing_subscriber::EnvFilter;

use config::Config;
use control::run_stdin_loop;
use orchestrator::Orchestrator;

fn main() {
    let config = Config::default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone())))
        .init();

    tracing::info!(
        "starting cdemu daemon with {} drives, can_queue={}, audio_driver={}",
        config.drive_count,
        config.can_queue,
        config.audio_driver
    );

    let orchestrator = Orchestrator::new(&config);
    orchestrator.run();

    let stdin = std::io::stdin();
    run_stdin_loop(stdin.lock(), &orchestrator);

    tracing::info!("shutting down");
    orchestrator.shutdown();
}
