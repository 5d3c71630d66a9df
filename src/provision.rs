use crate::error::{Error, Result};
use aws_config::SdkConfig;
use aws_sdk_eventbridge::types::{RuleState, Tag as RuleTag, Target};
use aws_sdk_iam::types::Tag as RoleTag;
use aws_sdk_lambda::client::Waiters;
use aws_sdk_lambda::types::{Architecture, Environment, FunctionCode, Runtime};
use aws_sdk_s3::primitives::ByteStream;
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

pub const ROLE_NAME: &str = "ClubhouseDuedatesRole";
pub const ROLE_DESCRIPTION: &str = "IAM Role for Clubhouse Duedates";
pub const ROLE_MAX_SESSION_SECS: i32 = 3600;
pub const ASSUME_ROLE_POLICY: &str = r#"{"Version": "2012-10-17","Statement": [{"Action": "sts:AssumeRole","Principal": {"Service": "lambda.amazonaws.com"},"Effect": "Allow","Sid": ""}]}"#;

pub const FUNCTION_NAME: &str = "GetStories";
pub const FUNCTION_DESCRIPTION: &str =
    "Get stories that near their due date from Clubhouse and send them to my email";
pub const FUNCTION_HANDLER: &str = "bootstrap";
pub const FUNCTION_MEMORY_MB: i32 = 256;
pub const FUNCTION_TIMEOUT_SECS: i32 = 180;
pub const ARTIFACT_KEY: &str = "getstories.zip";

pub const RULE_NAME: &str = "GetStoriesTrigger";
pub const RULE_DESCRIPTION: &str = "Trigger for Clubhouse Duedates - GetStories";
pub const RULE_SCHEDULE: &str = "cron(0 13 ? * * *)";
const RULE_TARGET_ID: &str = "GetStoriesEventTarget";
const RULE_PERMISSION_ID: &str = "GetStoriesEventRule";

const FUNCTION_UPDATE_TIMEOUT: Duration = Duration::from_secs(120);
const ROLE_PROPAGATION_DELAY: Duration = Duration::from_secs(10);

/// Tags applied to every provisioned resource so they can be found with the
/// Resource Groups service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Tags {
    pub author: String,
    pub feature: String,
    pub region: String,
    pub team: String,
    pub version: String,
}

impl Tags {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("author".to_string(), self.author.clone()),
            ("feature".to_string(), self.feature.clone()),
            ("region".to_string(), self.region.clone()),
            ("team".to_string(), self.team.clone()),
            ("version".to_string(), self.version.clone()),
        ])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeployConfig {
    pub s3_bucket: String,
    /// Policy ARNs attached to the execution role, in order.
    #[serde(default)]
    pub policies: Vec<String>,
    /// `KEY/VALUE` assignments for the function environment.
    #[serde(default)]
    pub env_vars: Vec<String>,
    pub tags: Tags,
}

impl DeployConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

/// Splits each `KEY/VALUE` entry on its first `/`, so values may contain `/`.
pub fn parse_env_vars(entries: &[String]) -> Result<BTreeMap<String, String>> {
    entries
        .iter()
        .map(|entry| match entry.split_once('/') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            Some(_) => Err(Error::Config(format!(
                "Environment variable {entry:?} has an empty name"
            ))),
            None => Err(Error::Config(format!(
                "Environment variable {entry:?} is not of the form KEY/VALUE"
            ))),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: String,
    pub description: String,
    pub assume_role_policy: String,
    pub max_session_secs: i32,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub handler: String,
    pub memory_mb: i32,
    pub timeout_secs: i32,
    pub s3_bucket: String,
    pub s3_key: String,
    pub environment: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub name: String,
    pub description: String,
    pub schedule_expression: String,
    pub tags: BTreeMap<String, String>,
}

/// A fully validated deployment, built before any resource is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub s3_bucket: String,
    pub artifact_key: String,
    pub role: RoleSpec,
    pub policies: Vec<String>,
    pub function: FunctionSpec,
    pub schedule: ScheduleSpec,
}

impl DeploymentPlan {
    pub fn from_config(config: &DeployConfig) -> Result<Self> {
        if config.s3_bucket.trim().is_empty() {
            return Err(Error::Config("s3_bucket must not be empty".to_string()));
        }

        let environment = parse_env_vars(&config.env_vars)?;
        let tags = config.tags.to_map();

        Ok(Self {
            s3_bucket: config.s3_bucket.clone(),
            artifact_key: ARTIFACT_KEY.to_string(),
            role: RoleSpec {
                name: ROLE_NAME.to_string(),
                description: ROLE_DESCRIPTION.to_string(),
                assume_role_policy: ASSUME_ROLE_POLICY.to_string(),
                max_session_secs: ROLE_MAX_SESSION_SECS,
                tags: tags.clone(),
            },
            policies: config.policies.clone(),
            function: FunctionSpec {
                name: FUNCTION_NAME.to_string(),
                description: FUNCTION_DESCRIPTION.to_string(),
                handler: FUNCTION_HANDLER.to_string(),
                memory_mb: FUNCTION_MEMORY_MB,
                timeout_secs: FUNCTION_TIMEOUT_SECS,
                s3_bucket: config.s3_bucket.clone(),
                s3_key: ARTIFACT_KEY.to_string(),
                environment,
                tags: tags.clone(),
            },
            schedule: ScheduleSpec {
                name: RULE_NAME.to_string(),
                description: RULE_DESCRIPTION.to_string(),
                schedule_expression: RULE_SCHEDULE.to_string(),
                tags,
            },
        })
    }
}

/// The cloud operations a deployment is made of. Each one is idempotent by
/// resource name.
pub trait Infrastructure {
    fn upload_artifact(
        &self,
        bucket: &str,
        key: &str,
        artifact: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Returns the role ARN.
    fn ensure_role(&self, role: &RoleSpec) -> impl Future<Output = Result<String>> + Send;

    fn attach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Returns the function ARN.
    fn ensure_function(
        &self,
        function: &FunctionSpec,
        role_arn: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Returns the rule ARN.
    fn ensure_schedule(
        &self,
        schedule: &ScheduleSpec,
        function_arn: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub role_arn: String,
    pub function_arn: String,
    pub rule_arn: String,
}

/// Runs every step of `plan` in order, stopping at the first failure. Nothing
/// already created is rolled back.
pub async fn provision(
    infra: &impl Infrastructure,
    plan: &DeploymentPlan,
    artifact: Vec<u8>,
) -> Result<Deployment> {
    info!(
        "Uploading {} bytes to s3://{}/{}",
        artifact.len(),
        plan.s3_bucket,
        plan.artifact_key
    );
    infra
        .upload_artifact(&plan.s3_bucket, &plan.artifact_key, artifact)
        .await?;

    let role_arn = infra.ensure_role(&plan.role).await?;
    info!("Using role {role_arn}");

    for policy in &plan.policies {
        debug!("Attaching {policy} to {}", plan.role.name);
        infra.attach_role_policy(&plan.role.name, policy).await?;
    }
    info!(
        "Attached {} policies to {}",
        plan.policies.len(),
        plan.role.name
    );

    let function_arn = infra.ensure_function(&plan.function, &role_arn).await?;
    info!("GetStoriesFunctionARN: {function_arn}");

    let rule_arn = infra.ensure_schedule(&plan.schedule, &function_arn).await?;
    info!(
        "Scheduled {} with {} ({rule_arn})",
        plan.function.name, plan.schedule.schedule_expression
    );

    Ok(Deployment {
        role_arn,
        function_arn,
        rule_arn,
    })
}

#[derive(Debug, Clone)]
pub struct AwsInfrastructure {
    s3: aws_sdk_s3::Client,
    iam: aws_sdk_iam::Client,
    lambda: aws_sdk_lambda::Client,
    events: aws_sdk_eventbridge::Client,
}

impl AwsInfrastructure {
    pub fn new(aws_config: &SdkConfig) -> Self {
        Self {
            s3: aws_sdk_s3::Client::new(aws_config),
            iam: aws_sdk_iam::Client::new(aws_config),
            lambda: aws_sdk_lambda::Client::new(aws_config),
            events: aws_sdk_eventbridge::Client::new(aws_config),
        }
    }

    async fn find_role_arn(&self, role_name: &str) -> Result<Option<String>> {
        match self.iam.get_role().role_name(role_name).send().await {
            Ok(output) => Ok(output.role().map(|role| role.arn().to_string())),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_no_such_entity_exception()) =>
            {
                Ok(None)
            }
            Err(err) => Err(Error::provisioning(
                "get role",
                aws_sdk_iam::error::DisplayErrorContext(&err),
            )),
        }
    }

    async fn function_exists(&self, function_name: &str) -> Result<bool> {
        match self
            .lambda
            .get_function()
            .function_name(function_name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(err) => Err(Error::provisioning(
                "get function",
                aws_sdk_lambda::error::DisplayErrorContext(&err),
            )),
        }
    }

    async fn wait_for_function_update(&self, function_name: &str) -> Result<()> {
        self.lambda
            .wait_until_function_updated_v2()
            .function_name(function_name)
            .wait(FUNCTION_UPDATE_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|e| Error::provisioning("wait for function update", e))
    }

    async fn create_function(&self, function: &FunctionSpec, role_arn: &str) -> Result<String> {
        let output = self
            .lambda
            .create_function()
            .function_name(&function.name)
            .description(&function.description)
            .runtime(Runtime::Providedal2023)
            .architectures(Architecture::X8664)
            .handler(&function.handler)
            .memory_size(function.memory_mb)
            .timeout(function.timeout_secs)
            .role(role_arn)
            .code(
                FunctionCode::builder()
                    .s3_bucket(&function.s3_bucket)
                    .s3_key(&function.s3_key)
                    .build(),
            )
            .environment(lambda_environment(function))
            .set_tags(Some(hash_map(&function.tags)))
            .send()
            .await
            .map_err(|e| {
                Error::provisioning(
                    "create function",
                    aws_sdk_lambda::error::DisplayErrorContext(&e),
                )
            })?;

        output
            .function_arn()
            .map(str::to_string)
            .ok_or_else(|| Error::provisioning("create function", "response is missing an ARN"))
    }

    async fn update_function(&self, function: &FunctionSpec, role_arn: &str) -> Result<String> {
        self.lambda
            .update_function_code()
            .function_name(&function.name)
            .s3_bucket(&function.s3_bucket)
            .s3_key(&function.s3_key)
            .send()
            .await
            .map_err(|e| {
                Error::provisioning(
                    "update function code",
                    aws_sdk_lambda::error::DisplayErrorContext(&e),
                )
            })?;

        self.wait_for_function_update(&function.name).await?;

        let output = self
            .lambda
            .update_function_configuration()
            .function_name(&function.name)
            .description(&function.description)
            .runtime(Runtime::Providedal2023)
            .handler(&function.handler)
            .memory_size(function.memory_mb)
            .timeout(function.timeout_secs)
            .role(role_arn)
            .environment(lambda_environment(function))
            .send()
            .await
            .map_err(|e| {
                Error::provisioning(
                    "update function configuration",
                    aws_sdk_lambda::error::DisplayErrorContext(&e),
                )
            })?;

        let function_arn = output.function_arn().map(str::to_string).ok_or_else(|| {
            Error::provisioning("update function configuration", "response is missing an ARN")
        })?;

        self.lambda
            .tag_resource()
            .resource(&function_arn)
            .set_tags(Some(hash_map(&function.tags)))
            .send()
            .await
            .map_err(|e| {
                Error::provisioning(
                    "tag function",
                    aws_sdk_lambda::error::DisplayErrorContext(&e),
                )
            })?;

        Ok(function_arn)
    }

    async fn allow_rule_to_invoke(&self, function_arn: &str, rule_arn: &str) -> Result<()> {
        let result = self
            .lambda
            .add_permission()
            .function_name(function_arn)
            .statement_id(RULE_PERMISSION_ID)
            .action("lambda:InvokeFunction")
            .principal("events.amazonaws.com")
            .source_arn(rule_arn)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_conflict_exception()) =>
            {
                debug!("{RULE_PERMISSION_ID} already allows {rule_arn} to invoke {function_arn}");
                Ok(())
            }
            Err(err) => Err(Error::provisioning(
                "add invoke permission",
                aws_sdk_lambda::error::DisplayErrorContext(&err),
            )),
        }
    }
}

fn hash_map(map: &BTreeMap<String, String>) -> HashMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn lambda_environment(function: &FunctionSpec) -> Environment {
    Environment::builder()
        .set_variables(Some(hash_map(&function.environment)))
        .build()
}

impl Infrastructure for AwsInfrastructure {
    async fn upload_artifact(&self, bucket: &str, key: &str, artifact: Vec<u8>) -> Result<()> {
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(artifact))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| {
                Error::provisioning("upload artifact", aws_sdk_s3::error::DisplayErrorContext(&e))
            })
    }

    async fn ensure_role(&self, role: &RoleSpec) -> Result<String> {
        if let Some(arn) = self.find_role_arn(&role.name).await? {
            debug!("Role {} already exists, updating its trust policy", role.name);
            self.iam
                .update_assume_role_policy()
                .role_name(&role.name)
                .policy_document(&role.assume_role_policy)
                .send()
                .await
                .map_err(|e| {
                    Error::provisioning(
                        "update role trust policy",
                        aws_sdk_iam::error::DisplayErrorContext(&e),
                    )
                })?;
            return Ok(arn);
        }

        let tags = role
            .tags
            .iter()
            .map(|(key, value)| RoleTag::builder().key(key).value(value).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::provisioning("create role", e))?;

        let output = self
            .iam
            .create_role()
            .role_name(&role.name)
            .description(&role.description)
            .assume_role_policy_document(&role.assume_role_policy)
            .max_session_duration(role.max_session_secs)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| {
                Error::provisioning("create role", aws_sdk_iam::error::DisplayErrorContext(&e))
            })?;

        let arn = output
            .role()
            .map(|r| r.arn().to_string())
            .ok_or_else(|| Error::provisioning("create role", "response is missing a role"))?;

        // IAM is eventually consistent, Lambda rejects roles it cannot assume yet
        warn!(
            "Created role {}, waiting {}s before using it",
            role.name,
            ROLE_PROPAGATION_DELAY.as_secs()
        );
        tokio::time::sleep(ROLE_PROPAGATION_DELAY).await;

        Ok(arn)
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.iam
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| {
                Error::provisioning(
                    "attach role policy",
                    aws_sdk_iam::error::DisplayErrorContext(&e),
                )
            })
    }

    async fn ensure_function(&self, function: &FunctionSpec, role_arn: &str) -> Result<String> {
        if self.function_exists(&function.name).await? {
            debug!("Function {} already exists, updating it", function.name);
            self.update_function(function, role_arn).await
        } else {
            debug!("Creating function {}", function.name);
            self.create_function(function, role_arn).await
        }
    }

    async fn ensure_schedule(
        &self,
        schedule: &ScheduleSpec,
        function_arn: &str,
    ) -> Result<String> {
        let tags = schedule
            .tags
            .iter()
            .map(|(key, value)| RuleTag::builder().key(key).value(value).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::provisioning("put rule", e))?;

        let output = self
            .events
            .put_rule()
            .name(&schedule.name)
            .description(&schedule.description)
            .schedule_expression(&schedule.schedule_expression)
            .state(RuleState::Enabled)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| {
                Error::provisioning("put rule", aws_sdk_eventbridge::error::DisplayErrorContext(&e))
            })?;

        let rule_arn = output
            .rule_arn()
            .map(str::to_string)
            .ok_or_else(|| Error::provisioning("put rule", "response is missing an ARN"))?;

        self.allow_rule_to_invoke(function_arn, &rule_arn).await?;

        let target = Target::builder()
            .id(RULE_TARGET_ID)
            .arn(function_arn)
            .build()
            .map_err(|e| Error::provisioning("put targets", e))?;

        let output = self
            .events
            .put_targets()
            .rule(&schedule.name)
            .targets(target)
            .send()
            .await
            .map_err(|e| {
                Error::provisioning(
                    "put targets",
                    aws_sdk_eventbridge::error::DisplayErrorContext(&e),
                )
            })?;

        if output.failed_entry_count() > 0 {
            return Err(Error::provisioning(
                "put targets",
                format!("{:?}", output.failed_entries()),
            ));
        }

        Ok(rule_arn)
    }
}
