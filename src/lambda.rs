use clubhouse_duedates::{APP_NAME, NotifyConfig, job, set_up_logger};
use lambda_runtime::{LambdaEvent, service_fn};
use log::debug;
use serde_json::{Value, json};
use std::error::Error;

type LambdaError = Box<dyn Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    let func = service_fn(function);
    lambda_runtime::run(func).await?;
    Ok(())
}

async fn function(event: LambdaEvent<Value>) -> Result<Value, LambdaError> {
    set_up_logger(module_path!(), false)?;
    debug!("Processing {APP_NAME} event: {:?}", event.payload);

    let config = NotifyConfig::from_env()?;
    let report = job::run(&config, false).await?;

    Ok(json!({
        "start": report.window.start.to_string(),
        "end": report.window.end.to_string(),
        "total": report.total,
        "rendered": report.rendered,
    }))
}
