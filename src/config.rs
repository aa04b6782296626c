//! Configuration for the assist server and the DUT client.
//!
//! Three layers, highest precedence first: command-line flags, an optional
//! TOML settings file, and built-in defaults. The board address itself comes
//! from the `key=value` address file shared with the test harness.

use crate::dispatcher::{DispatchSettings, DEFAULT_REBOOT_COMMAND};
use crate::error::ErrorCode;
use crate::link::{self, LinkOptions, Termination};
use crate::services::console_log::DEFAULT_CONSOLE_LOG;
use crate::services::executor::DEFAULT_SHELL;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Address file used when none is configured.
pub const DEFAULT_ADDRESS_FILE: &str = "/opt/ltp/testcases/bin/assist_address.conf";

/// Address file key holding the board IP address.
pub const IP_ADDRESS_KEY: &str = "ip_address";

/// Address file key holding the server port.
pub const PORT_KEY: &str = "port";

/// Longest request the client will send by default.
pub const DEFAULT_MAX_REQUEST_LEN: usize = link::frame::FRAME_DATA_CAPACITY;

/// Command-line arguments of `assist-server`
#[derive(Parser, Debug, Default)]
#[command(name = "assist-server")]
#[command(version)]
#[command(about = "Serves shell, console log and health requests from a DUT", long_about = None)]
pub struct ServerArgs {
    /// Path to TOML settings file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the key=value address file
    #[arg(short, long)]
    pub address_file: Option<PathBuf>,

    /// Port to listen on (overrides the address file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Console log file collecting command output
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Accept reserve, reboot and process verbs
    #[arg(long)]
    pub extended_verbs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments of `dut-client`
///
/// Help is handled by the binary so that it exits with the usage code.
#[derive(Parser, Debug)]
#[command(name = "dut-client")]
#[command(version)]
#[command(disable_help_flag = true)]
pub struct ClientArgs {
    /// Print usage
    #[arg(short, long)]
    pub help: bool,

    /// Request to send: a verb or a shell command line
    pub request: Option<String>,

    /// Path to TOML settings file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the key=value address file
    #[arg(short, long)]
    pub address_file: Option<PathBuf>,

    /// Server port (overrides the address file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level for messages on stderr
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Longest request accepted, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_REQUEST_LEN)]
    pub max_request_len: usize,
}

/// TOML settings file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub console: ConsoleSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TomlConfig {
    /// Read the settings file, or use defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
    }
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address file holding the board IP and port
    #[serde(default = "default_address_file")]
    pub address_file: PathBuf,
    /// Host the listener binds to
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            address_file: default_address_file(),
            bind_host: default_bind_host(),
        }
    }
}

/// Transfer settings shared by both ends
#[derive(Debug, Deserialize)]
pub struct LinkSection {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_zero_read_backoff_ms")]
    pub zero_read_backoff_ms: u64,
    #[serde(default = "default_max_zero_reads")]
    pub max_zero_reads: u32,
    #[serde(default)]
    pub termination: Termination,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            zero_read_backoff_ms: default_zero_read_backoff_ms(),
            max_zero_reads: default_max_zero_reads(),
            termination: Termination::default(),
        }
    }
}

impl LinkSection {
    pub fn options(&self) -> LinkOptions {
        LinkOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            zero_read_backoff: Duration::from_millis(self.zero_read_backoff_ms),
            max_zero_reads: self.max_zero_reads.max(1),
            termination: self.termination,
        }
    }
}

/// Command execution settings
#[derive(Debug, Deserialize)]
pub struct ConsoleSection {
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default = "default_shell")]
    pub shell: PathBuf,
}

impl Default for ConsoleSection {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
            shell: default_shell(),
        }
    }
}

/// Verb handling settings
#[derive(Debug, Deserialize)]
pub struct DispatchSection {
    #[serde(default)]
    pub extended_verbs: bool,
    #[serde(default = "default_reboot_command")]
    pub reboot_command: String,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            extended_verbs: false,
            reboot_command: default_reboot_command(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_address_file() -> PathBuf {
    PathBuf::from(DEFAULT_ADDRESS_FILE)
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_timeout_secs() -> u64 {
    link::DEFAULT_TIMEOUT.as_secs()
}

fn default_zero_read_backoff_ms() -> u64 {
    link::DEFAULT_ZERO_READ_BACKOFF.as_millis() as u64
}

fn default_max_zero_reads() -> u32 {
    link::DEFAULT_MAX_ZERO_READS
}

fn default_log_file() -> PathBuf {
    PathBuf::from(DEFAULT_CONSOLE_LOG)
}

fn default_shell() -> PathBuf {
    PathBuf::from(DEFAULT_SHELL)
}

fn default_reboot_command() -> String {
    DEFAULT_REBOOT_COMMAND.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    pub link: LinkOptions,
    pub console_log: PathBuf,
    pub shell: PathBuf,
    pub dispatch: DispatchSettings,
    pub log_level: String,
}

impl ServerConfig {
    /// Parse the command line and resolve the server configuration.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    /// Merge CLI args with the TOML file (CLI takes precedence).
    pub fn from_args(cli: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = TomlConfig::load(cli.config.as_deref())?;

        let port = match cli.port {
            Some(port) => port,
            None => {
                let path = cli
                    .address_file
                    .unwrap_or(toml_config.server.address_file);
                AddressFile::load(&path)?.port()?
            }
        };

        Ok(ServerConfig {
            bind_host: toml_config.server.bind_host,
            port,
            link: toml_config.link.options(),
            console_log: cli.log_file.unwrap_or(toml_config.console.log_file),
            shell: toml_config.console.shell,
            dispatch: DispatchSettings {
                extended_verbs: cli.extended_verbs || toml_config.dispatch.extended_verbs,
                reboot_command: toml_config.dispatch.reboot_command,
            },
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Final resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub ip_address: String,
    pub port: u16,
    pub link: LinkOptions,
}

impl ClientConfig {
    pub fn from_args(cli: &ClientArgs) -> Result<Self, ConfigError> {
        let toml_config = TomlConfig::load(cli.config.as_deref())?;
        let path = cli
            .address_file
            .clone()
            .unwrap_or(toml_config.server.address_file);
        let addresses = AddressFile::load(&path)?;

        let port = match cli.port {
            Some(port) => port,
            None => addresses.port()?,
        };

        Ok(ClientConfig {
            ip_address: addresses.ip_address()?.to_string(),
            port,
            link: toml_config.link.options(),
        })
    }
}

/// Parsed `key=value` address file.
#[derive(Debug, Clone)]
pub struct AddressFile {
    path: PathBuf,
    entries: Vec<(String, String)>,
}

impl AddressFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::AddressFileRead(path.to_path_buf(), e))?;
        Ok(Self::parse(path, &contents))
    }

    /// Parse file contents. Lines without `=` are ignored.
    pub fn parse(path: &Path, contents: &str) -> Self {
        let entries = contents
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    /// Value of the first line whose key is `key`, else of the first line
    /// whose key contains it.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .or_else(|| self.entries.iter().find(|(k, _)| k.contains(key)))
            .map(|(_, v)| v.as_str())
    }

    pub fn ip_address(&self) -> Result<&str, ConfigError> {
        self.lookup(IP_ADDRESS_KEY)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| ConfigError::IpNotFound(self.path.clone()))
    }

    pub fn port(&self) -> Result<u16, ConfigError> {
        let value = self
            .lookup(PORT_KEY)
            .filter(|port| !port.is_empty())
            .ok_or_else(|| ConfigError::PortNotFound(self.path.clone()))?;

        match value.parse::<u16>() {
            Ok(port) if port != 0 => Ok(port),
            _ => Err(ConfigError::InvalidPort(value.to_string())),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Failed to read address file '{}': {1}", .0.display())]
    AddressFileRead(PathBuf, #[source] std::io::Error),

    #[error("No ip_address entry in '{}'", .0.display())]
    IpNotFound(PathBuf),

    #[error("No port entry in '{}'", .0.display())]
    PortNotFound(PathBuf),

    #[error("Invalid port '{0}'")]
    InvalidPort(String),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConfigError::FileRead(..) | ConfigError::AddressFileRead(..) => {
                ErrorCode::ConfigFileNotFound
            }
            ConfigError::TomlParse(..) => ErrorCode::GeneralError,
            ConfigError::IpNotFound(_) => ErrorCode::ConfigFileIpNotFound,
            ConfigError::PortNotFound(_) => ErrorCode::ConfigFilePortNotFound,
            ConfigError::InvalidPort(_) => ErrorCode::ConvertPortToIntFail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn address_file(contents: &str) -> AddressFile {
        AddressFile::parse(Path::new("assist_address.conf"), contents)
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.address_file, PathBuf::from(DEFAULT_ADDRESS_FILE));
        assert_eq!(config.server.bind_host, "0.0.0.0");
        assert_eq!(config.link.options(), LinkOptions::default());
        assert_eq!(config.console.log_file, PathBuf::from("/tmp/cmd_console_logs"));
        assert!(!config.dispatch.extended_verbs);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            bind_host = "127.0.0.1"

            [link]
            timeout_secs = 30
            zero_read_backoff_ms = 100
            termination = "sentinel"

            [console]
            log_file = "/var/tmp/console"

            [dispatch]
            extended_verbs = true

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.bind_host, "127.0.0.1");
        assert_eq!(config.server.address_file, PathBuf::from(DEFAULT_ADDRESS_FILE));

        let options = config.link.options();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.zero_read_backoff, Duration::from_millis(100));
        assert_eq!(options.max_zero_reads, link::DEFAULT_MAX_ZERO_READS);
        assert_eq!(options.termination, Termination::Sentinel);

        assert_eq!(config.console.log_file, PathBuf::from("/var/tmp/console"));
        assert_eq!(config.console.shell, PathBuf::from(DEFAULT_SHELL));
        assert!(config.dispatch.extended_verbs);
        assert_eq!(config.dispatch.reboot_command, DEFAULT_REBOOT_COMMAND);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_address_lookup() {
        let file = address_file("ip_address = 10.0.0.2\nport=5555\n# comment\n");
        assert_eq!(file.lookup("ip_address"), Some("10.0.0.2"));
        assert_eq!(file.ip_address().unwrap(), "10.0.0.2");
        assert_eq!(file.port().unwrap(), 5555);
        assert_eq!(file.lookup("missing"), None);
    }

    #[test]
    fn test_address_lookup_prefers_exact_key() {
        let file = address_file("assist_port=1\nport=2\n");
        assert_eq!(file.lookup("port"), Some("2"));

        let file = address_file("assist_port=1\n");
        assert_eq!(file.lookup("port"), Some("1"));
    }

    #[test]
    fn test_port_validation() {
        let cases = [
            ("ip_address=1.2.3.4\n", ErrorCode::ConfigFilePortNotFound),
            ("port=\n", ErrorCode::ConfigFilePortNotFound),
            ("port=http\n", ErrorCode::ConvertPortToIntFail),
            ("port=0\n", ErrorCode::ConvertPortToIntFail),
            ("port=70000\n", ErrorCode::ConvertPortToIntFail),
        ];
        for (contents, code) in cases {
            let err = address_file(contents).port().unwrap_err();
            assert_eq!(err.code(), code, "{contents:?}");
        }

        let err = address_file("port=1\n").ip_address().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigFileIpNotFound);
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        let err = AddressFile::load(&missing).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigFileNotFound);

        let err = TomlConfig::load(Some(&missing)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigFileNotFound);
    }

    #[test]
    fn test_server_cli_overrides_toml() {
        let dir = tempfile::tempdir().unwrap();
        let addresses = dir.path().join("assist_address.conf");
        std::fs::write(&addresses, "ip_address=127.0.0.1\nport=6001\n").unwrap();

        let settings = dir.path().join("assist.toml");
        let mut file = std::fs::File::create(&settings).unwrap();
        writeln!(
            file,
            "[server]\naddress_file = {:?}\n[console]\nlog_file = \"/tmp/from-toml\"\n[logging]\nlevel = \"debug\"",
            addresses.display().to_string()
        )
        .unwrap();

        let config = ServerConfig::from_args(ServerArgs {
            config: Some(settings.clone()),
            ..ServerArgs::default()
        })
        .unwrap();
        assert_eq!(config.port, 6001);
        assert_eq!(config.console_log, PathBuf::from("/tmp/from-toml"));
        assert_eq!(config.log_level, "debug");
        assert!(!config.dispatch.extended_verbs);

        let config = ServerConfig::from_args(ServerArgs {
            config: Some(settings),
            port: Some(7002),
            log_file: Some(PathBuf::from("/tmp/from-cli")),
            extended_verbs: true,
            log_level: Some("trace".to_string()),
            ..ServerArgs::default()
        })
        .unwrap();
        assert_eq!(config.port, 7002);
        assert_eq!(config.console_log, PathBuf::from("/tmp/from-cli"));
        assert_eq!(config.log_level, "trace");
        assert!(config.dispatch.extended_verbs);
    }

    #[test]
    fn test_client_config_from_address_file() {
        let dir = tempfile::tempdir().unwrap();
        let addresses = dir.path().join("assist_address.conf");
        std::fs::write(&addresses, "ip_address=192.168.1.20\nport=5000\n").unwrap();

        let args = ClientArgs::try_parse_from([
            "dut-client",
            "--address-file",
            addresses.to_str().unwrap(),
            "AssistBoardHealth",
        ])
        .unwrap();
        assert_eq!(args.request.as_deref(), Some("AssistBoardHealth"));
        assert_eq!(args.max_request_len, DEFAULT_MAX_REQUEST_LEN);

        let config = ClientConfig::from_args(&args).unwrap();
        assert_eq!(config.ip_address, "192.168.1.20");
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn test_client_help_flag_is_not_intercepted() {
        let args = ClientArgs::try_parse_from(["dut-client", "--help"]).unwrap();
        assert!(args.help);
        assert!(args.request.is_none());
    }
}
