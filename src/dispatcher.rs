//! Request dispatch.
//!
//! Reassembles one request from a connection, resolves its verb, runs the
//! matching handler and frames the sealed reply back to the DUT.

use crate::error::ErrorCode;
use crate::link::{self, LinkOptions, Session};
use crate::protocol::Request;
use crate::services::{ConsoleLog, ConsoleLogError, Executor, Reservation};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Default command used by the reboot verb.
pub const DEFAULT_REBOOT_COMMAND: &str = "reboot -h now";

/// Handler output: the reply text (without sentinel) and its result code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub code: ErrorCode,
}

impl Reply {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code: ErrorCode::Success,
        }
    }

    fn fail(code: ErrorCode, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code,
        }
    }
}

/// Dispatch behaviour switches.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Recognise reserve, reboot and process verbs.
    pub extended_verbs: bool,
    /// Command line run by the reboot verb.
    pub reboot_command: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            extended_verbs: false,
            reboot_command: DEFAULT_REBOOT_COMMAND.to_string(),
        }
    }
}

/// Per-process dispatch context.
pub struct Dispatcher {
    console: ConsoleLog,
    executor: Executor,
    settings: DispatchSettings,
    link: LinkOptions,
}

impl Dispatcher {
    pub fn new(
        console: ConsoleLog,
        executor: Executor,
        settings: DispatchSettings,
        link: LinkOptions,
    ) -> Self {
        Self {
            console,
            executor,
            settings,
            link,
        }
    }

    /// Serve the single exchange of one connection.
    ///
    /// Returns the result code of the exchange. A reply is always attempted,
    /// even when the request could not be read.
    pub async fn serve<S>(
        &self,
        stream: &mut S,
        session: &mut Session,
        reservation: &mut Reservation,
    ) -> ErrorCode
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let payload = match link::receive(stream, &self.link).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(peer = %session.peer, error = %e, "Failed to read request");
                session.start_sending();
                let text = link::seal(format!("Assist : Request read fail. {e}."));
                if let Err(send_err) = link::send(stream, text.as_bytes(), &self.link).await {
                    debug!(error = %send_err, "Could not report read failure");
                }
                session.close();
                return e.read_code();
            }
        };

        let text = String::from_utf8_lossy(&payload);
        let request = Request::parse(&text, self.settings.extended_verbs);
        info!(peer = %session.peer, verb = request.verb(), request = %text.trim(), "Request received");

        session.start_executing();
        let reply = self.handle(&request, reservation).await;
        if !reply.code.is_success() {
            warn!(verb = request.verb(), code = %reply.code, "Request failed");
        }

        session.start_sending();
        let response = link::seal(reply.text);
        let code = match link::send(stream, response.as_bytes(), &self.link).await {
            Ok(()) => reply.code,
            Err(e) => {
                error!(peer = %session.peer, error = %e, "Failed to send response");
                e.write_code()
            }
        };
        session.close();
        code
    }

    /// Run the handler for one request.
    pub async fn handle(&self, request: &Request, reservation: &mut Reservation) -> Reply {
        match request {
            Request::ConsoleLogs => self.console_logs().await,
            Request::ClearConsoleLogs => self.clear_console_logs().await,
            Request::Health => health_check(),
            Request::ReserveStatus => reserve_status(reservation),
            Request::Reserve => reserve(reservation),
            Request::Unreserve => unreserve(reservation),
            Request::Reboot => self.reboot().await,
            Request::StartProcess { command } => self.start_process(command).await,
            Request::CheckProcess { name } => self.check_process(name).await,
            Request::KillProcess { name } => self.kill_process(name).await,
            Request::MissingArgument { verb } => Reply::fail(
                ErrorCode::MissingArguments,
                format!("Assist : {verb} requires an argument."),
            ),
            Request::Execute {
                command,
                background,
            } => self.execute(command, *background).await,
        }
    }

    async fn console_logs(&self) -> Reply {
        match self.console.read().await {
            Ok(mut logs) => {
                if !logs.ends_with('\n') {
                    logs.push('\n');
                }
                Reply::ok(logs)
            }
            Err(e @ ConsoleLogError::Empty(_)) => Reply::fail(
                e.code(),
                "Assist : Console log collection fail. Log file has no logs. Return value is -1.",
            ),
            Err(e @ ConsoleLogError::Missing(_)) => Reply::fail(
                e.code(),
                "Assist : Console log collection fail. Log file does not exist. Return value is -1.",
            ),
            Err(e) => {
                warn!(error = %e, "Console log collection failed");
                Reply::fail(
                    e.code(),
                    "Assist : Console log collection fail. Log file cannot be read. Return value is -1.",
                )
            }
        }
    }

    async fn clear_console_logs(&self) -> Reply {
        match self.console.clear().await {
            Ok(()) => Reply::ok("ConsoleLogsClear pass. Return value is 0."),
            Err(e) => {
                warn!(error = %e, "Console log truncation failed");
                Reply::fail(
                    ErrorCode::FileOpenFail,
                    "Cannot open the console log file. Return value is -1.",
                )
            }
        }
    }

    async fn execute(&self, command: &str, background: bool) -> Reply {
        let result = if background {
            self.executor.spawn(command).map(|()| 0)
        } else {
            self.executor.run(command).await
        };

        match result {
            Ok(0) => Reply::ok(format!("Execution of \"{command}\" pass. Return value is 0.")),
            Ok(status) => Reply::fail(
                ErrorCode::GeneralError,
                format!("Execution of \"{command}\" fail. Return value is {status}."),
            ),
            Err(e) => {
                warn!(command, error = %e, "Command could not be started");
                Reply::fail(
                    ErrorCode::GeneralError,
                    format!("Execution of \"{command}\" fail. Return value is -1."),
                )
            }
        }
    }

    async fn reboot(&self) -> Reply {
        match self.executor.run_quiet(&self.settings.reboot_command).await {
            Ok(0) => Reply::ok("Assist : Board rebooting. Return value is 0."),
            result => Reply::fail(
                ErrorCode::BoardRebootFail,
                format!(
                    "Assist : Board reboot fail. Return value is {}.",
                    status_of(result)
                ),
            ),
        }
    }

    async fn start_process(&self, command: &str) -> Reply {
        match self.executor.run(command).await {
            Ok(0) => Reply::ok(format!(
                "Assist : Process {command} started successfully. Return value is 0."
            )),
            result => Reply::fail(
                ErrorCode::ProcessStartFail,
                format!(
                    "Assist : Process {command} failed to start. Return value is {}.",
                    status_of(result)
                ),
            ),
        }
    }

    async fn check_process(&self, name: &str) -> Reply {
        match self.executor.run_program("pidof", &["-x", name]).await {
            Ok(0) => Reply::ok(format!("Assist : Process \"{name}\" exist.")),
            _ => Reply::fail(
                ErrorCode::ProcessNotRunning,
                format!("Assist : Process \"{name}\" do not exist."),
            ),
        }
    }

    async fn kill_process(&self, name: &str) -> Reply {
        match self.executor.run_program("pkill", &[name]).await {
            Ok(0) => Reply::ok(format!(
                "Assist : Process \"{name}\" killed. Return value is 0."
            )),
            result => Reply::fail(
                ErrorCode::ProcessKillFail,
                format!(
                    "Assist : Process \"{name}\" do not exist or not killed. Return value is {}.",
                    status_of(result)
                ),
            ),
        }
    }
}

fn health_check() -> Reply {
    Reply::ok("Assist : Health check is OK.")
}

fn reserve_status(reservation: &Reservation) -> Reply {
    let lock = reservation.lock_value();
    if reservation.is_reserved() {
        Reply::ok(format!("Assist board is reserved. Lock value is {lock}."))
    } else {
        Reply::ok(format!("Assist board is not reserved. Lock value is {lock}."))
    }
}

fn reserve(reservation: &mut Reservation) -> Reply {
    if reservation.reserve() {
        Reply::ok(format!(
            "Assist board is reserved for you. Lock value is {}.",
            reservation.lock_value()
        ))
    } else {
        Reply::fail(
            ErrorCode::GeneralError,
            format!(
                "Assist board is already reserved. Lock value is {}.",
                reservation.lock_value()
            ),
        )
    }
}

fn unreserve(reservation: &mut Reservation) -> Reply {
    if reservation.release() {
        Reply::ok(format!(
            "Assist board is unreserved. Lock value is {}.",
            reservation.lock_value()
        ))
    } else {
        Reply::fail(
            ErrorCode::GeneralError,
            format!(
                "Assist board is not reserved. Lock value is {}.",
                reservation.lock_value()
            ),
        )
    }
}

/// Exit status for a reply, `-1` when the command did not run at all.
fn status_of(result: std::io::Result<i32>) -> i32 {
    result.unwrap_or(-1)
}
