//! assist-link: framed TCP request/response link between a DUT test driver
//! and its assist board.
//!
//! The board runs `assist-server`, which executes shell commands, serves and
//! clears a console log, and answers health and reservation queries. The test
//! driver uses `dut-client` to send one request per connection.
//!
//! - [`link`]: frame codec, chunked sender and receiver
//! - [`protocol`]: request verbs
//! - [`dispatcher`]: verb handlers and the per-connection exchange
//! - [`server`] / [`client`]: the two ends of the link

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod link;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod services;
