//! Entrypoint of the shardq load generator
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    clippy::future_not_send
)]

use dotenvy::dotenv;
use trogging::{
    TroggingGuard,
    cli::LoggingConfigBuilderExt,
    tracing_subscriber::{Registry, prelude::*},
};

mod commands {
    pub(crate) mod layout;
    pub(crate) mod run;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "shardq_load_generator",
    about = "Drive and inspect sharded logical queues",
    long_about = r#"Drive and inspect sharded logical queues

Examples:
    # Publish 100k messages over 64 keys to 8 shards and drain them
    shardq_load_generator run --shard-count 8 --messages 100000 --keys 64

    # Consume while publishing, one pull for every two publishes
    shardq_load_generator run --consume-ratio 0.5

    # Show the physical queues of a logical queue and where two keys land
    shardq_load_generator layout --queue orders --key 42 --key customer-7
"#
)]
struct Config {
    /// logging options
    #[clap(flatten)]
    logging_config: trogging::cli::LoggingConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Publish and consume a generated workload through an in-memory broker
    Run(commands::run::Config),

    /// Print the physical queue layout of a logical queue
    Layout(commands::layout::Config),
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    tokio_runtime.block_on(async move {
        let _tracing_guard = match init_logs(&config.logging_config) {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Initializing logs failed: {e}");
                std::process::exit(ReturnCode::Failure as _);
            }
        };

        match config.command {
            None => println!("command required, -h/--help for help"),
            Some(Command::Run(config)) => {
                if let Err(e) = commands::run::command(config).await {
                    eprintln!("Run command failed: {e:#}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::Layout(config)) => {
                if let Err(e) = commands::layout::command(config) {
                    eprintln!("Layout command failed: {e:#}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // a missing env file is not an error
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(1);
        }
    };
}

fn init_logs(config: &trogging::cli::LoggingConfig) -> Result<TroggingGuard, trogging::Error> {
    let log_layer = trogging::Builder::new()
        .with_default_log_filter("warn")
        .with_logging_config(config)
        .build()?;

    let subscriber = Registry::default().with(log_layer);
    trogging::install_global(subscriber)
}
