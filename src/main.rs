use clap::Parser;
use docroot_web::{Config, DocRoot, Server, ServerError};
use std::process;
use tracing::error;
use tracing_subscriber::FmtSubscriber;

fn main() {
    let config = Config::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_thread_names(true)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install log subscriber: {err}");
    }

    if let Err(err) = config.validate() {
        error!(cause = %err, "invalid configuration");
        process::exit(2);
    }

    if let Err(err) = run(&config) {
        error!(cause = %err, "server failed");
        process::exit(1);
    }
}

fn run(config: &Config) -> Result<(), ServerError> {
    let root = DocRoot::new(&config.dir).map_err(ServerError::Root)?;

    Server::builder()
        .bind(config.port)
        .root(root)
        .server_limits(config.server_limits())
        .request_limits(config.request_limits())
        .build()?
        .launch()
}
