use std::process::exit;

use clap::Parser;
use env_logger::Env;
use log::error;

use vdenet::{daemon, DaemonArgs};

fn main() {
    let args = DaemonArgs::parse();

    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    if let Err(e) = daemon(args) {
        error!("Fatal: {:?}", e);
        exit(1);
    }
}
