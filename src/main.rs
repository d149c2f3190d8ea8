use anyhow::Context;
use clap::Parser;
use std::time::Duration;

mod api;
mod cli;
mod config;
mod error;
mod models;
mod registry;
mod services;

use api::{clean_processes, list_processes, process_status, show_logs, start_process, stop_process};
use cli::{CommandArgs, Commands};
use config::Paths;
use services::{expiry, Supervisor};

#[tokio::main]
async fn main() {
    // stdout 只留给 JSON，诊断信息走 stderr
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = CommandArgs::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: CommandArgs) -> anyhow::Result<()> {
    // __expire 不需要数据目录
    let supervisor = || -> anyhow::Result<Supervisor> {
        let paths = Paths::resolve(args.data_dir.clone()).context("cannot locate data directory")?;
        log::debug!("Using data directory {}", paths.data_dir().display());
        Ok(Supervisor::new(paths))
    };

    match args.command {
        Commands::Start(start) => start_process(&supervisor()?, start).await,
        Commands::Status(target) => process_status(&supervisor()?, target),
        Commands::Logs(logs) => show_logs(&supervisor()?, logs).await,
        Commands::Stop(stop) => stop_process(&supervisor()?, stop),
        Commands::List(list) => list_processes(&supervisor()?, list),
        Commands::Clean(clean) => clean_processes(&supervisor()?, clean),
        Commands::Expire(timer) => {
            expiry::run(&timer.name, timer.pid, Duration::from_secs(timer.after), timer.started).await;
            Ok(())
        }
    }
}
