use std::sync::Arc;

use clap::Parser;
use url::Url;

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about, author)]
struct Args {
    /// Sets the address for the REST API server
    #[arg(long, default_value = "0.0.0.0:3001", env = "SPEEDTEST_MANAGER_REST_SERVER")]
    rest_server: String,

    /// Overrides the upstream control server base URL from the settings file
    #[arg(long, env = "SPEEDTEST_MANAGER_UPSTREAM")]
    upstream: Option<Url>,

    /// Sets the settings file path, a default location is used otherwise
    #[arg(long)]
    settings_file: Option<String>,

    /// Deletes settings file before starting
    #[arg(long)]
    reset: bool,

    /// Specifies the path in which the logs will be stored
    #[arg(long, default_value = "./logs")]
    log_path: String,

    /// Turns all log categories up to Debug, for more information check RUST_LOG env variable
    #[arg(short, long)]
    verbose: bool,

    /// Turns the file log level up to Trace
    #[arg(long)]
    enable_tracing_level_log_file: bool,
}

#[derive(Debug)]
struct Manager {
    args: Args,
}

lazy_static! {
    static ref MANAGER: Arc<Manager> = Arc::new(Manager::new());
}

impl Manager {
    fn new() -> Self {
        Self {
            args: Args::parse(),
        }
    }
}

// Construct our manager, should be done inside main
pub fn init() {
    MANAGER.as_ref();
}

// Check if the verbosity parameter was used
pub fn is_verbose() -> bool {
    MANAGER.args.verbose
}

pub fn is_tracing() -> bool {
    MANAGER.args.enable_tracing_level_log_file
}

pub fn is_reset() -> bool {
    MANAGER.args.reset
}

// Return the desired address for the REST API
pub fn server_address() -> String {
    MANAGER.args.rest_server.clone()
}

pub fn settings_file() -> Option<String> {
    MANAGER.args.settings_file.clone()
}

pub fn log_path() -> String {
    MANAGER.args.log_path.clone()
}

// Upstream base URL override, takes precedence over the settings file
pub fn upstream() -> Option<Url> {
    MANAGER.args.upstream.clone()
}

// Return the command line used to start this application
pub fn command_line_string() -> String {
    std::env::args().collect::<Vec<String>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_arguments() {
        assert!(!is_verbose());
        assert!(!is_reset());
        assert_eq!(server_address(), "0.0.0.0:3001");
        assert_eq!(upstream(), None);
    }
}
