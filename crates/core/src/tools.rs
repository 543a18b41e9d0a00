//! The `use_aws` tool: the call model the LLM fills in and the executor that
//! runs it through the AWS CLI.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{info, warn};

pub const USE_AWS_TOOL: &str = "use_aws";

/// Services the assistant is allowed to touch.
pub const SUPPORTED_SERVICES: &[&str] = &["ec2", "ssm", "backup"];

/// Longest tool output handed back to the model before it is cut.
pub const MAX_RESULT_CHARS: usize = 800;

/// A single AWS CLI invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AwsCall {
    pub service: String,
    pub operation: String,
    #[serde(default)]
    pub parameters: Value,
}

impl AwsCall {
    pub fn new(service: impl Into<String>, operation: impl Into<String>, parameters: Value) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            parameters,
        }
    }

    /// Parses the JSON arguments of a `use_aws` tool call.
    pub fn from_arguments(arguments: &str) -> Result<Self> {
        let mut call: Self =
            serde_json::from_str(arguments).context("Invalid use_aws arguments")?;
        call.service = call.service.trim().to_lowercase();
        call.operation = call.operation.trim().to_lowercase();
        Ok(call)
    }

    /// Checks the call stays within the supported surface.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_SERVICES.contains(&self.service.as_str()) {
            bail!("Service '{}' is not supported", self.service);
        }
        let well_formed = !self.operation.is_empty()
            && !self.operation.starts_with('-')
            && self
                .operation
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !well_formed {
            bail!("Operation '{}' is not a valid CLI operation", self.operation);
        }
        match &self.parameters {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err(anyhow!("use_aws parameters must be a JSON object")),
        }
    }
}

/// JSON schema advertised to the model for the `use_aws` tool.
pub fn use_aws_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "service": {
                "type": "string",
                "enum": SUPPORTED_SERVICES,
                "description": "AWS CLI service name"
            },
            "operation": {
                "type": "string",
                "description": "AWS CLI operation in kebab-case, e.g. describe-instances"
            },
            "parameters": {
                "type": "object",
                "description": "Operation parameters; keys become --kebab-case flags"
            }
        },
        "required": ["service", "operation"]
    })
}

/// Runs approved tool calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &AwsCall) -> Result<String>;
}

/// Executes calls with the locally installed `aws` binary.
pub struct AwsCli {
    binary: PathBuf,
    region: String,
    profile: Option<String>,
}

impl AwsCli {
    pub fn new(region: impl Into<String>, profile: Option<String>) -> Self {
        Self {
            binary: PathBuf::from("aws"),
            region: region.into(),
            profile,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Builds the argument vector for a call, without the binary itself.
    pub fn command_args(&self, call: &AwsCall) -> Result<Vec<String>> {
        call.validate()?;
        let mut args = vec![
            call.service.clone(),
            call.operation.clone(),
            "--region".to_string(),
            self.region.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }

        if let Value::Object(parameters) = &call.parameters {
            for (key, value) in parameters {
                let flag = format!("--{}", key.trim_start_matches('-').replace('_', "-"));
                match value {
                    Value::Null | Value::Bool(false) => {}
                    Value::Bool(true) => args.push(flag),
                    Value::Array(items) => {
                        args.push(flag);
                        args.extend(items.iter().map(scalar_arg));
                    }
                    other => {
                        args.push(flag);
                        args.push(scalar_arg(other));
                    }
                }
            }
        }
        Ok(args)
    }
}

fn scalar_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Shortens tool output so it stays speakable.
pub fn truncate_for_voice(text: &str) -> String {
    if text.chars().count() <= MAX_RESULT_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_RESULT_CHARS).collect();
    truncated.push_str("... (truncated for voice)");
    truncated
}

#[async_trait]
impl ToolExecutor for AwsCli {
    async fn execute(&self, call: &AwsCall) -> Result<String> {
        let args = self.command_args(call)?;
        info!(service = %call.service, operation = %call.operation, "Running AWS CLI");

        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to launch {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = ?output.status, "AWS CLI call failed");
            bail!(
                "aws {} {} failed: {}",
                call.service,
                call.operation,
                stderr.trim()
            );
        }
        Ok(truncate_for_voice(String::from_utf8_lossy(&output.stdout).trim()))
    }
}
