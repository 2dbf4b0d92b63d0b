use clap::Parser;
use zen_watcher::cli::Opts;
use zen_watcher::config::RuntimeConfig;
use zen_watcher::telemetry;

fn main() {
    let _opts = Opts::parse();
    telemetry::init_tracing();

    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "fatal configuration error at startup");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(zen_watcher::run(config)) {
        tracing::error!(error = %e, "zen-watcher exited with error");
        std::process::exit(1);
    }
}
