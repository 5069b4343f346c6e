//! EC2 gateway - the slice of the EC2 API the instance provider uses
//!
//! The trait is the seam between lifecycle logic and the AWS SDK: the
//! production implementation lives in `ec2`, tests substitute an in-memory
//! double.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use vela_core::gateway::{Convergence, GatewayResult, WaitOutcome, WaitPolicy, poll_until};
use vela_core::resource::ResourceHandle;

use crate::instance::InstanceConfig;

/// Lifecycle state of an EC2 instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Unknown,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Unknown => "unknown",
        }
    }

    /// Interpret one describe result while waiting for `self` as the target
    pub fn observe(
        self,
        described: GatewayResult<Option<InstanceDescription>>,
    ) -> GatewayResult<Convergence> {
        let current = match described {
            Ok(Some(instance)) => Some(instance.state),
            Ok(None) => None,
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        Ok(match (self, current) {
            (InstanceState::Terminated, None | Some(InstanceState::Terminated)) => {
                Convergence::Reached
            }
            (InstanceState::Terminated, Some(_)) => Convergence::Pending,
            // A freshly launched instance may not be visible yet
            (_, None) => Convergence::Pending,
            (target, Some(state)) if state == target => Convergence::Reached,
            (
                InstanceState::Running,
                Some(
                    state @ (InstanceState::ShuttingDown
                    | InstanceState::Terminated
                    | InstanceState::Stopping
                    | InstanceState::Stopped),
                ),
            ) => Convergence::Unreachable(format!(
                "instance entered '{}' while waiting for 'running'",
                state
            )),
            _ => Convergence::Pending,
        })
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live view of an instance as reported by DescribeInstances
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub state: InstanceState,
    pub image_id: Option<String>,
    pub instance_type: Option<String>,
    pub key_name: Option<String>,
    pub subnet_id: Option<String>,
    pub security_groups: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

impl InstanceDescription {
    pub fn to_config(&self) -> InstanceConfig {
        InstanceConfig {
            image_id: self.image_id.clone().unwrap_or_default(),
            instance_type: self.instance_type.clone(),
            key_name: self.key_name.clone(),
            subnet_id: self.subnet_id.clone(),
            security_groups: (!self.security_groups.is_empty())
                .then(|| self.security_groups.clone()),
            tags: (!self.tags.is_empty()).then(|| self.tags.clone()),
        }
    }
}

/// Operations against the EC2 API
///
/// `run_instance` either allocates an instance and returns its handle or
/// fails with nothing allocated.
#[async_trait]
pub trait Ec2Gateway: Send + Sync {
    /// Whether the AMI exists and is visible to the caller
    async fn image_exists(&self, image_id: &str) -> GatewayResult<bool>;

    async fn run_instance(&self, config: &InstanceConfig) -> GatewayResult<ResourceHandle>;

    /// `Ok(None)` when the instance is unknown to EC2
    async fn describe_instance(
        &self,
        handle: &ResourceHandle,
    ) -> GatewayResult<Option<InstanceDescription>>;

    async fn terminate_instance(&self, handle: &ResourceHandle) -> GatewayResult<()>;

    async fn modify_security_groups(
        &self,
        handle: &ResourceHandle,
        groups: &[String],
    ) -> GatewayResult<()>;

    /// Add or overwrite tags
    async fn create_tags(
        &self,
        handle: &ResourceHandle,
        tags: &BTreeMap<String, String>,
    ) -> GatewayResult<()>;

    async fn delete_tags(&self, handle: &ResourceHandle, keys: &[String]) -> GatewayResult<()>;

    /// Block until the instance reaches `target`, the policy times out, or
    /// the instance can no longer reach it
    async fn wait_until(
        &self,
        handle: &ResourceHandle,
        target: InstanceState,
        policy: &WaitPolicy,
    ) -> WaitOutcome {
        let gateway = self;
        poll_until(policy, move || async move {
            target.observe(gateway.describe_instance(handle).await)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_core::gateway::GatewayError;

    fn described(state: InstanceState) -> GatewayResult<Option<InstanceDescription>> {
        Ok(Some(InstanceDescription {
            instance_id: "i-1".to_string(),
            state,
            image_id: Some("ami-123".to_string()),
            instance_type: None,
            key_name: None,
            subnet_id: None,
            security_groups: vec![],
            tags: BTreeMap::new(),
        }))
    }

    #[test]
    fn running_target() {
        let target = InstanceState::Running;
        assert_eq!(
            target.observe(described(InstanceState::Running)),
            Ok(Convergence::Reached)
        );
        assert_eq!(
            target.observe(described(InstanceState::Pending)),
            Ok(Convergence::Pending)
        );
        assert_eq!(target.observe(Ok(None)), Ok(Convergence::Pending));
        assert!(matches!(
            target.observe(described(InstanceState::Terminated)),
            Ok(Convergence::Unreachable(_))
        ));
    }

    #[test]
    fn terminated_target_accepts_vanished_instance() {
        let target = InstanceState::Terminated;
        assert_eq!(target.observe(Ok(None)), Ok(Convergence::Reached));
        assert_eq!(
            target.observe(Err(GatewayError::NotFound("i-1".to_string()))),
            Ok(Convergence::Reached)
        );
        assert_eq!(
            target.observe(described(InstanceState::ShuttingDown)),
            Ok(Convergence::Pending)
        );
    }

    #[test]
    fn api_errors_pass_through() {
        let err = GatewayError::api("UnauthorizedOperation", "denied");
        assert_eq!(InstanceState::Running.observe(Err(err.clone())), Err(err));
    }

    #[test]
    fn description_projects_to_config() {
        let mut tags = BTreeMap::new();
        tags.insert("env".to_string(), "dev".to_string());
        let description = InstanceDescription {
            instance_id: "i-1".to_string(),
            state: InstanceState::Running,
            image_id: Some("ami-123".to_string()),
            instance_type: Some("t3.micro".to_string()),
            key_name: None,
            subnet_id: Some("subnet-1".to_string()),
            security_groups: vec!["sg-1".to_string()],
            tags,
        };

        let config = description.to_config();
        assert_eq!(config.image_id, "ami-123");
        assert_eq!(config.instance_type.as_deref(), Some("t3.micro"));
        assert_eq!(config.security_groups, Some(vec!["sg-1".to_string()]));
        assert_eq!(config.key_name, None);
    }
}
