//! Result and exit codes shared by the server and the client.
//!
//! The numeric values are part of the external interface: test harnesses
//! driving `dut-client` match on them, so the ordering is fixed.

use std::fmt;

/// Closed set of result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    GeneralError = -500,
    MissingArguments,
    ConfigFileNotFound,
    ConfigFileIpNotFound,
    ConfigFilePortNotFound,
    ConvertPortToIntFail,
    CreateSocketFail,
    AcceptFail,
    WriteSocketFail,
    ReadSocketFail,
    SocketCloseFail,
    SocketFail,
    BindFail,
    ListenFail,
    WriteFail1,
    WriteFail2,
    ConnectFail,
    CollectConsoleLogsFail,
    ConsoleLogsZeroSize,
    FileOpenFail,
    FileCloseFail,
    BoardRebootFail,
    ProcessStartFail,
    ProcessNotRunning,
    ProcessKillFail,
    RequestTooLong,
}

impl ErrorCode {
    /// Raw signed value of the code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }

    /// Process exit status for this code.
    ///
    /// Codes are reduced modulo 256; the negative range maps onto
    /// distinct non-zero statuses.
    pub fn exit_status(self) -> u8 {
        self.as_i32().rem_euclid(256) as u8
    }

    fn describe(self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::GeneralError => "general error",
            ErrorCode::MissingArguments => "missing arguments",
            ErrorCode::ConfigFileNotFound => "config file not found",
            ErrorCode::ConfigFileIpNotFound => "ip address not found in config file",
            ErrorCode::ConfigFilePortNotFound => "port not found in config file",
            ErrorCode::ConvertPortToIntFail => "port is not a valid number",
            ErrorCode::CreateSocketFail => "socket creation failed",
            ErrorCode::AcceptFail => "accept failed",
            ErrorCode::WriteSocketFail => "socket write failed",
            ErrorCode::ReadSocketFail => "socket read failed",
            ErrorCode::SocketCloseFail => "socket close failed",
            ErrorCode::SocketFail => "socket failure",
            ErrorCode::BindFail => "bind failed",
            ErrorCode::ListenFail => "listen failed",
            ErrorCode::WriteFail1 => "write call failed",
            ErrorCode::WriteFail2 => "write did not complete",
            ErrorCode::ConnectFail => "connect failed",
            ErrorCode::CollectConsoleLogsFail => "console log collection failed",
            ErrorCode::ConsoleLogsZeroSize => "console log is empty",
            ErrorCode::FileOpenFail => "file open failed",
            ErrorCode::FileCloseFail => "file close failed",
            ErrorCode::BoardRebootFail => "board reboot failed",
            ErrorCode::ProcessStartFail => "process start failed",
            ErrorCode::ProcessNotRunning => "process not running",
            ErrorCode::ProcessKillFail => "process kill failed",
            ErrorCode::RequestTooLong => "request too long",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.describe(), self.as_i32())
    }
}

impl From<ErrorCode> for std::process::ExitCode {
    fn from(code: ErrorCode) -> Self {
        std::process::ExitCode::from(code.exit_status())
    }
}
