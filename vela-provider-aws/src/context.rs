//! AWS session context
//!
//! Built once per process and handed to `AwsProvider::new`; owns the SDK
//! configuration and the clients derived from it.

use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::Client as Ec2Client;
use vela_core::gateway::WaitPolicy;

/// Settings used to build an `AwsContext`
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    /// Region override; the SDK default chain applies when unset
    pub region: Option<String>,
    /// Named profile from the shared AWS config files
    pub profile: Option<String>,
    pub wait: WaitPolicy,
}

/// Authenticated AWS session shared by every resource handler
pub struct AwsContext {
    ec2: Ec2Client,
    region: Option<String>,
    wait: WaitPolicy,
}

impl AwsContext {
    /// Load credentials and region through the AWS SDK default chain
    pub async fn load(config: &ContextConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;

        let region = sdk_config.region().map(|r| r.to_string());
        log::debug!("AWS context loaded for region {:?}", region);

        Self {
            ec2: Ec2Client::new(&sdk_config),
            region,
            wait: config.wait,
        }
    }

    pub fn ec2(&self) -> &Ec2Client {
        &self.ec2
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn wait(&self) -> WaitPolicy {
        self.wait
    }
}
