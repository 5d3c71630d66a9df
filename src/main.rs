use anyhow::{Context, Result};
use clap::Parser;
use clubhouse_duedates::{NotifyConfig, job, set_up_logger};
use log::debug;

/// Emails the Clubhouse stories that are due soon.
#[derive(Debug, Parser)]
#[command(name = "clubhouse-duedates", version, author = "Jacob Luszcz")]
struct Args {
    /// Verbose mode. Outputs DEBUG and higher log messages.
    #[arg(short, long)]
    verbose: bool,

    /// Logs the digest instead of sending it.
    #[arg(short, long, visible_alias = "dryrun")]
    dry_run: bool,

    #[command(flatten)]
    config: NotifyConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    set_up_logger(module_path!(), args.verbose)?;
    debug!("{:?}", args);

    job::run(&args.config, args.dry_run)
        .await
        .context("Failed to send due date digest")?;

    Ok(())
}
