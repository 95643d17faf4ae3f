use std::{path::PathBuf, time::Duration};

use clap::Parser;

/// Where the orchestrator looks for plugin sockets.
pub const SOCKET_PATH: &str = "/run/docker/plugins/vde.sock";
/// Directory holding the datastore.
pub const DATASTORE_DIR: &str = "/etc/docker";

#[derive(Parser, Debug, Clone)]
#[command(name = "vdenet")]
#[command(about = "vdenet connects containers to VDE switches as a remote network driver.")]
pub struct DaemonArgs {
    /// Enable debug logging.
    #[arg(short, long)]
    pub debug: bool,

    /// Discard the datastore before starting.
    #[arg(short, long)]
    pub clean: bool,

    /// Directory holding the datastore.
    #[arg(long, default_value = DATASTORE_DIR)]
    pub dir_path: PathBuf,

    /// Plugin socket to listen on.
    #[arg(long, default_value = SOCKET_PATH)]
    pub socket: PathBuf,

    /// Program used to plug links into a switch.
    #[arg(long, default_value = "vde_plug")]
    pub vde_plug: PathBuf,

    /// Upper bound on every link or switch operation, e.g. `10s`, `500ms`.
    #[arg(long, default_value = "10s", value_parser(parse_duration))]
    pub call_timeout: Duration,
}

fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim().to_lowercase();

    let (number, millis): (&str, u64) = if let Some(n) = input.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = input.strip_suffix('s') {
        (n, 1000)
    } else if let Some(n) = input.strip_suffix('m') {
        (n, 60 * 1000)
    } else if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        (input.as_str(), 1000) // default is seconds
    } else {
        return Err("Invalid duration".into());
    };

    let number: u64 = match number.parse() {
        Ok(n) => n,
        Err(e) => return Err(e.to_string()),
    };
    if number == 0 {
        return Err("Duration must be positive".into());
    }

    let millis = number
        .checked_mul(millis)
        .ok_or_else(|| "Duration too large".to_string())?;

    Ok(Duration::from_millis(millis))
}
