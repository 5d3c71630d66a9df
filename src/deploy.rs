use anyhow::{Context, Result};
use aws_config::ConfigLoader;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::config::Region;
use clap::Parser;
use clubhouse_duedates::package::{self, DEFAULT_TARGET};
use clubhouse_duedates::provision::{
    ARTIFACT_KEY, AwsInfrastructure, DeployConfig, DeploymentPlan, provision,
};
use clubhouse_duedates::set_up_logger;
use log::{debug, info};
use std::path::PathBuf;

/// Builds the Lambda, uploads it and provisions the role, function and daily
/// trigger that run it.
#[derive(Debug, Parser)]
#[command(name = "deploy", version, author = "Jacob Luszcz")]
struct Args {
    /// Verbose mode. Outputs DEBUG and higher log messages.
    #[arg(short, long)]
    verbose: bool,

    /// Deployment configuration file.
    #[arg(short, long, default_value = "deploy.json")]
    config: PathBuf,

    /// AWS region to deploy to.
    #[arg(short, long, env = "AWS_REGION")]
    region: Option<String>,

    /// Compilation target for the Lambda binary.
    #[arg(long, default_value = DEFAULT_TARGET)]
    target: String,

    /// Cargo target directory.
    #[arg(long, default_value = "target")]
    target_dir: PathBuf,

    /// Reuses an already built Lambda binary.
    #[arg(long)]
    skip_build: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    set_up_logger(module_path!(), args.verbose)?;
    debug!("{:?}", args);

    let config = DeployConfig::load(&args.config)?;
    let plan = DeploymentPlan::from_config(&config)
        .with_context(|| format!("Invalid deployment configuration {}", args.config.display()))?;

    if args.skip_build {
        info!("Skipping build of {}", package::LAMBDA_BIN);
    } else {
        package::build(&args.target, &args.target_dir).context("Error building code")?;
    }

    let binary = package::binary_path(&args.target_dir, &args.target);
    let zip_path = args.target_dir.join("lambda").join(ARTIFACT_KEY);
    package::zip_bootstrap(&binary, &zip_path).context("Error creating zipfile")?;
    let artifact = std::fs::read(&zip_path)
        .with_context(|| format!("Failed to read {}", zip_path.display()))?;

    let region = RegionProviderChain::first_try(args.region.map(Region::new))
        .or_default_provider()
        .or_else(Region::new(config.tags.region.clone()));
    let aws_config = ConfigLoader::default().region(region).load().await;

    let deployment = provision(&AwsInfrastructure::new(&aws_config), &plan, artifact).await?;
    info!("Deployed {}", deployment.function_arn);

    Ok(())
}
