//! assist-server: serves DUT requests on the assist board.

use assist_link::config::ServerConfig;
use assist_link::dispatcher::Dispatcher;
use assist_link::error::ErrorCode;
use assist_link::logging;
use assist_link::server::{self, Server};
use assist_link::services::{ConsoleLog, Executor};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return e.code().into();
        }
    };

    logging::init(&config.log_level, std::io::stdout);

    info!(
        host = %config.bind_host,
        port = config.port,
        console_log = %config.console_log.display(),
        extended_verbs = config.dispatch.extended_verbs,
        termination = ?config.link.termination,
        "Starting assist server"
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ErrorCode::GeneralError.into();
        }
    };

    runtime.block_on(run(config))
}

async fn run(config: ServerConfig) -> ExitCode {
    let console = ConsoleLog::new(&config.console_log);
    let executor = Executor::new(&config.shell, console.clone());
    let dispatcher = Dispatcher::new(console, executor, config.dispatch, config.link);

    let mut server = match server::resolve(&config.bind_host, config.port)
        .and_then(|addr| Server::bind(addr, dispatcher))
    {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to start listener");
            return e.code().into();
        }
    };

    server.run().await;
    ExitCode::SUCCESS
}
