//! Vela AWS Provider
//!
//! AWS Provider implementation.
//!
//! ## Module Structure
//!
//! - `context` - AWS session shared by all handlers
//! - `gateway` - EC2 operations the handlers depend on
//! - `ec2` - AWS SDK implementation of the gateway
//! - `instance` - EC2 instance validation and lifecycle
//! - `schemas` - Resource schemas and update policies

pub mod context;
pub mod ec2;
pub mod gateway;
pub mod instance;
pub mod schemas;

use std::fmt;
use std::sync::Arc;

use vela_core::gateway::WaitPolicy;
use vela_core::provider::{Provider, ProviderError, ProviderResult, ResourceProvider};
use vela_core::schema::ResourceSchema;

pub use context::{AwsContext, ContextConfig};
pub use ec2::SdkEc2Gateway;
pub use gateway::{Ec2Gateway, InstanceDescription, InstanceState};
pub use instance::{InstanceConfig, InstanceProvider};

/// Resource types served by the AWS provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwsResourceType {
    Instance,
}

impl AwsResourceType {
    pub const ALL: [AwsResourceType; 1] = [AwsResourceType::Instance];

    pub fn token(&self) -> &'static str {
        match self {
            AwsResourceType::Instance => schemas::instance::INSTANCE,
        }
    }

    pub fn from_token(token: &str) -> ProviderResult<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.token() == token)
            .ok_or_else(|| {
                ProviderError::invalid_request(format!("Unknown resource type: {}", token))
            })
    }
}

impl fmt::Display for AwsResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// AWS Provider
pub struct AwsProvider {
    instances: InstanceProvider,
}

impl AwsProvider {
    /// Create a provider talking to AWS through the given session
    pub fn new(ctx: &AwsContext) -> Self {
        let gateway = Arc::new(SdkEc2Gateway::new(ctx.ec2().clone()));
        Self::with_gateway(gateway, ctx.wait())
    }

    /// Create with a specific gateway (for testing)
    pub fn with_gateway(gateway: Arc<dyn Ec2Gateway>, wait: WaitPolicy) -> Self {
        Self {
            instances: InstanceProvider::new(gateway, wait),
        }
    }

    fn handler(&self, kind: AwsResourceType) -> &dyn ResourceProvider {
        match kind {
            AwsResourceType::Instance => &self.instances,
        }
    }
}

impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn schemas(&self) -> Vec<ResourceSchema> {
        AwsResourceType::ALL
            .into_iter()
            .map(|kind| self.handler(kind).schema())
            .collect()
    }

    fn resource(&self, resource_type: &str) -> ProviderResult<&dyn ResourceProvider> {
        AwsResourceType::from_token(resource_type).map(|kind| self.handler(kind))
    }
}
