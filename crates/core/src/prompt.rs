//! System prompt assembly and per-turn domain routing.

use crate::consent::consent_instructions;

/// The AWS area a user query is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Ec2,
    Ssm,
    Backup,
}

const SSM_KEYWORDS: &[&str] = &[
    "ssm",
    "systems manager",
    "patch",
    "command",
    "document",
    "run command",
    "session manager",
    "parameter store",
    "cloudwatch agent",
    "install",
    "configure",
];

const BACKUP_KEYWORDS: &[&str] = &[
    "backup",
    "restore",
    "vault",
    "backup plan",
    "backup job",
    "recovery",
    "snapshot",
];

impl Domain {
    /// Picks the domain for a query. SSM is checked first, then Backup, and
    /// everything else is treated as EC2.
    pub fn route(query: &str) -> Self {
        let query = query.to_lowercase();
        if SSM_KEYWORDS.iter().any(|k| query.contains(k)) {
            Domain::Ssm
        } else if BACKUP_KEYWORDS.iter().any(|k| query.contains(k)) {
            Domain::Backup
        } else {
            Domain::Ec2
        }
    }

    /// Short focus hint appended to the system prompt for the current turn.
    pub fn focus(&self) -> &'static str {
        match self {
            Domain::Ec2 => {
                "Current focus: Amazon EC2 (instances, AMIs, volumes, security groups). \
                 Use the ec2 service of use_aws."
            }
            Domain::Ssm => {
                "Current focus: AWS Systems Manager (run command, documents, parameters, \
                 patching). Use the ssm service of use_aws."
            }
            Domain::Backup => {
                "Current focus: AWS Backup (plans, jobs, vaults, recovery points). \
                 Use the backup service of use_aws."
            }
        }
    }
}

/// Builds the system prompt shared by every agent instance of the process.
pub fn system_prompt(region: &str) -> String {
    format!(
        "You are a voice assistant that helps operate AWS in region {region}. You only handle \
         EC2, Systems Manager and Backup. For anything unrelated, reply: \"I'm specialized in \
         AWS services only. Please ask about EC2, SSM, or Backup.\"\n\n\
         Answers are spoken aloud: keep them short, avoid tables and markdown, and summarize \
         long listings instead of reading them out.\n\n\
         Use the use_aws tool to call the AWS CLI. Pass the service, the operation in \
         kebab-case, and parameters as an object.\n\n{}",
        consent_instructions()
    )
}
