//! Operations the assist board performs on behalf of the DUT.
//!
//! - `console_log`: the text file collecting command output
//! - `executor`: shell command execution
//! - `reservation`: board reservation state

pub mod console_log;
pub mod executor;
pub mod reservation;

pub use console_log::{ConsoleLog, ConsoleLogError};
pub use executor::Executor;
pub use reservation::Reservation;
