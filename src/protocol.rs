//! Request verbs understood by the assist server.
//!
//! A request is a short text. It resolves, in order, to:
//! - an administrative verb (exact match): `ConsoleLogsRequest`,
//!   `ConsoleLogsClear`, `AssistBoardHealth`, and with extended verbs
//!   enabled `AssistBoardReserveStatus`, `AssistBoardReserve`,
//!   `AssistBoardUnreserve`, `AssistBoardReboot`
//! - a verb carrying an argument (extended verbs only):
//!   `StartProcess <command>`, `CheckProcessRunning <name>`,
//!   `KillRunningProcess <name>`
//! - otherwise, a shell command line. A trailing `&` runs it in the background.

pub const CONSOLE_LOGS_REQUEST: &str = "ConsoleLogsRequest";
pub const CONSOLE_LOGS_CLEAR: &str = "ConsoleLogsClear";
pub const ASSIST_BOARD_HEALTH: &str = "AssistBoardHealth";
pub const ASSIST_BOARD_RESERVE_STATUS: &str = "AssistBoardReserveStatus";
pub const ASSIST_BOARD_RESERVE: &str = "AssistBoardReserve";
pub const ASSIST_BOARD_UNRESERVE: &str = "AssistBoardUnreserve";
pub const ASSIST_BOARD_REBOOT: &str = "AssistBoardReboot";
pub const START_PROCESS: &str = "StartProcess";
pub const CHECK_PROCESS_RUNNING: &str = "CheckProcessRunning";
pub const KILL_RUNNING_PROCESS: &str = "KillRunningProcess";

/// Separates an argument verb from its argument.
pub const ARG_DELIMITER: char = ' ';

/// Marks a shell command to be run without waiting for it.
pub const BACKGROUND_MARKER: char = '&';

/// Parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Send the console log back.
    ConsoleLogs,
    /// Truncate the console log.
    ClearConsoleLogs,
    /// Liveness check.
    Health,
    /// Report whether the board is reserved.
    ReserveStatus,
    /// Reserve the board.
    Reserve,
    /// Release the board.
    Unreserve,
    /// Reboot the board.
    Reboot,
    /// Start a process and report whether it started.
    StartProcess { command: String },
    /// Report whether a process with this name runs.
    CheckProcess { name: String },
    /// Kill processes with this name.
    KillProcess { name: String },
    /// An argument verb arrived without its argument.
    MissingArgument { verb: &'static str },
    /// Run a shell command line.
    Execute { command: String, background: bool },
}

/// Argument verbs in match order.
const ARGUMENT_VERBS: [&str; 3] = [START_PROCESS, CHECK_PROCESS_RUNNING, KILL_RUNNING_PROCESS];

impl Request {
    /// Resolve a request text into a verb.
    ///
    /// With `extended` unset the reserve, reboot and process verbs are not
    /// recognised and fall through to shell execution.
    pub fn parse(text: &str, extended: bool) -> Request {
        let text = text.trim_end_matches('\0').trim();

        match text {
            CONSOLE_LOGS_REQUEST => return Request::ConsoleLogs,
            CONSOLE_LOGS_CLEAR => return Request::ClearConsoleLogs,
            ASSIST_BOARD_HEALTH => return Request::Health,
            _ => {}
        }

        if extended {
            match text {
                ASSIST_BOARD_RESERVE_STATUS => return Request::ReserveStatus,
                ASSIST_BOARD_RESERVE => return Request::Reserve,
                ASSIST_BOARD_UNRESERVE => return Request::Unreserve,
                ASSIST_BOARD_REBOOT => return Request::Reboot,
                _ => {}
            }

            for verb in ARGUMENT_VERBS {
                if let Some(argument) = split_argument(text, verb) {
                    return Self::with_argument(verb, argument);
                }
            }
        }

        Self::execute(text)
    }

    /// The verb name, for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Request::ConsoleLogs => CONSOLE_LOGS_REQUEST,
            Request::ClearConsoleLogs => CONSOLE_LOGS_CLEAR,
            Request::Health => ASSIST_BOARD_HEALTH,
            Request::ReserveStatus => ASSIST_BOARD_RESERVE_STATUS,
            Request::Reserve => ASSIST_BOARD_RESERVE,
            Request::Unreserve => ASSIST_BOARD_UNRESERVE,
            Request::Reboot => ASSIST_BOARD_REBOOT,
            Request::StartProcess { .. } => START_PROCESS,
            Request::CheckProcess { .. } => CHECK_PROCESS_RUNNING,
            Request::KillProcess { .. } => KILL_RUNNING_PROCESS,
            Request::MissingArgument { verb } => *verb,
            Request::Execute { .. } => "Execute",
        }
    }

    fn with_argument(verb: &'static str, argument: &str) -> Request {
        if argument.is_empty() {
            return Request::MissingArgument { verb };
        }
        let argument = argument.to_string();
        match verb {
            START_PROCESS => Request::StartProcess { command: argument },
            CHECK_PROCESS_RUNNING => Request::CheckProcess { name: argument },
            _ => Request::KillProcess { name: argument },
        }
    }

    fn execute(text: &str) -> Request {
        match text.strip_suffix(BACKGROUND_MARKER) {
            Some(rest) if !rest.ends_with(BACKGROUND_MARKER) => Request::Execute {
                command: rest.trim_end().to_string(),
                background: true,
            },
            _ => Request::Execute {
                command: text.to_string(),
                background: false,
            },
        }
    }
}

/// Split `<verb><delimiter><argument>`; a bare verb yields an empty argument.
fn split_argument<'a>(text: &'a str, verb: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(verb)?;
    if rest.is_empty() {
        return Some(rest);
    }
    rest.strip_prefix(ARG_DELIMITER).map(str::trim)
}
