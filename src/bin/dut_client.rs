//! dut-client: sends one request to the assist board and prints the reply.

use assist_link::client::{self, ClientError};
use assist_link::config::{ClientArgs, ClientConfig};
use assist_link::error::ErrorCode;
use assist_link::logging;
use assist_link::protocol;
use clap::Parser;
use std::process::ExitCode;
use tracing::error;

fn print_usage() {
    println!("Usage: dut-client [OPTIONS] <REQUEST>");
    println!();
    println!("REQUEST is a shell command line or one of:");
    for verb in [
        protocol::CONSOLE_LOGS_REQUEST,
        protocol::CONSOLE_LOGS_CLEAR,
        protocol::ASSIST_BOARD_HEALTH,
        protocol::ASSIST_BOARD_RESERVE_STATUS,
        protocol::ASSIST_BOARD_RESERVE,
        protocol::ASSIST_BOARD_UNRESERVE,
        protocol::ASSIST_BOARD_REBOOT,
    ] {
        println!("  {verb}");
    }
    for verb in [
        protocol::START_PROCESS,
        protocol::CHECK_PROCESS_RUNNING,
        protocol::KILL_RUNNING_PROCESS,
    ] {
        println!("  {verb} <argument>");
    }
    println!("A trailing '&' runs the command in the background.");
    println!();
    println!("Options:");
    println!("  -c, --config <FILE>          TOML settings file");
    println!("  -a, --address-file <FILE>    key=value address file");
    println!("  -p, --port <PORT>            server port");
    println!("      --log-level <LEVEL>      log level on stderr [default: warn]");
    println!("      --max-request-len <N>    longest request in bytes [default: 4096]");
    println!("  -h, --help                   print this help");
}

fn main() -> ExitCode {
    let args = ClientArgs::parse();

    let request = match (&args.request, args.help) {
        (Some(request), false) => request.clone(),
        _ => {
            print_usage();
            return ErrorCode::MissingArguments.into();
        }
    };

    if let Err(e) = client::check_request_len(&request, args.max_request_len) {
        eprintln!("{e}");
        return e.code().into();
    }

    logging::init(&args.log_level, std::io::stderr);

    match run(&args, &request) {
        Ok(reply) => {
            println!("{}", reply.trim_end());
            ErrorCode::Success.into()
        }
        Err(e) => {
            error!(error = %e, code = e.code().as_i32(), "Request failed");
            e.code().into()
        }
    }
}

fn run(args: &ClientArgs, request: &str) -> Result<String, ClientError> {
    let config = ClientConfig::from_args(args)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| ClientError::Connect {
            addr: format!("{}:{}", config.ip_address, config.port),
            source,
        })?;

    runtime.block_on(client::request(
        &config.ip_address,
        config.port,
        request,
        &config.link,
    ))
}
