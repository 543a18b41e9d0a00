//! Consent policy for AWS operations.
//!
//! A static table marks destructive operations per service. The table drives
//! both the instructions embedded in the system prompt and `ConsentGate`, which
//! refuses to let a dangerous tool call through until the user has explicitly
//! agreed to it.

use crate::tools::AwsCall;
use std::fmt::Write;
use tracing::info;

/// Operations that must not run without explicit user consent, per service.
pub const DANGEROUS_OPERATIONS: &[(&str, &[&str])] = &[
    (
        "ec2",
        &[
            "terminate-instances",
            "stop-instances",
            "reboot-instances",
            "delete-security-group",
            "delete-volume",
            "delete-snapshot",
            "delete-key-pair",
        ],
    ),
    (
        "ssm",
        &[
            "send-command",
            "delete-document",
            "delete-parameter",
            "put-parameter",
            "delete-patch-baseline",
            "delete-maintenance-window",
        ],
    ),
    (
        "backup",
        &[
            "delete-backup-vault",
            "delete-backup-plan",
            "delete-recovery-point",
            "stop-backup-job",
        ],
    ),
];

const AFFIRMATIVE_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "sure", "proceed", "continue", "confirm", "confirmed", "approve",
    "approved", "ok", "okay",
];
const AFFIRMATIVE_PHRASES: &[&str] = &["go ahead", "do it"];
const NEGATIVE_WORDS: &[&str] = &[
    "no", "not", "don't", "dont", "cancel", "stop", "wait", "abort", "never", "nope",
];

/// Whether `operation` on `service` is classified as dangerous.
pub fn is_dangerous_operation(service: &str, operation: &str) -> bool {
    let service = service.to_lowercase();
    let operation = operation.to_lowercase();
    DANGEROUS_OPERATIONS
        .iter()
        .find(|(name, _)| *name == service)
        .is_some_and(|(_, ops)| ops.contains(&operation.as_str()))
}

/// Whether a user reply reads as an unambiguous "yes".
pub fn is_affirmative(reply: &str) -> bool {
    let normalized = reply.to_lowercase();
    let words: Vec<&str> = normalized
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .collect();

    if words.iter().any(|w| NEGATIVE_WORDS.contains(w)) {
        return false;
    }
    words.iter().any(|w| AFFIRMATIVE_WORDS.contains(w))
        || AFFIRMATIVE_PHRASES
            .iter()
            .any(|phrase| words.join(" ").contains(phrase))
}

/// Prompt text instructing the model to ask before destructive operations.
pub fn consent_instructions() -> String {
    let mut text = String::from(
        "SAFETY PROTOCOL FOR AWS OPERATIONS:\n\n\
         Before running any of the following operations you MUST explain what it will do \
         and ask the user for explicit consent.\n",
    );
    for (service, operations) in DANGEROUS_OPERATIONS {
        let _ = writeln!(text, "\nDangerous {} operations:", service.to_uppercase());
        for operation in *operations {
            let _ = writeln!(text, "- {operation}");
        }
    }
    text.push_str(
        "\nConsent protocol:\n\
         1. Do not call use_aws for a dangerous operation straight away.\n\
         2. Describe the operation and its impact.\n\
         3. Ask: \"Do you want me to proceed? Please say 'yes' to continue or 'no' to cancel.\"\n\
         4. Only call use_aws once the user clearly approves. Otherwise do nothing.\n\
         5. If use_aws answers CONFIRMATION_REQUIRED, ask the user and retry the same call \
         after they agree.\n\n\
         Read-only operations (describe-*, list-*, get-*) never need consent.\n",
    );
    text
}

/// Outcome of checking a tool call against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RequireConfirmation,
}

/// Holds a dangerous call back until the user approves it.
#[derive(Debug, Default)]
pub struct ConsentGate {
    pending: Option<AwsCall>,
    approved: Option<AwsCall>,
}

impl ConsentGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a user turn to the gate. An affirmative reply approves the pending
    /// call; anything else discards it. An approval lasts for the turn that
    /// granted it only.
    pub fn observe_user_turn(&mut self, text: &str) {
        let Some(pending) = self.pending.take() else {
            if let Some(unused) = self.approved.take() {
                info!(service = %unused.service, operation = %unused.operation, "Unused approval expired");
            }
            return;
        };
        if is_affirmative(text) {
            info!(service = %pending.service, operation = %pending.operation, "User approved dangerous operation");
            self.approved = Some(pending);
        } else {
            info!(service = %pending.service, operation = %pending.operation, "Pending dangerous operation discarded");
            self.approved = None;
        }
    }

    /// Checks a requested call. An approval is consumed by the first matching call.
    pub fn authorize(&mut self, call: &AwsCall) -> Decision {
        if !is_dangerous_operation(&call.service, &call.operation) {
            return Decision::Allow;
        }
        if self.approved.as_ref() == Some(call) {
            self.approved = None;
            return Decision::Allow;
        }
        self.pending = Some(call.clone());
        Decision::RequireConfirmation
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> Option<&AwsCall> {
        self.pending.as_ref()
    }
}
