//! EC2 gateway backed by the AWS SDK

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{InstanceStateName, InstanceType, ResourceType, Tag, TagSpecification};
use vela_core::gateway::{GatewayError, GatewayResult};
use vela_core::resource::ResourceHandle;

use crate::gateway::{Ec2Gateway, InstanceDescription, InstanceState};
use crate::instance::InstanceConfig;

/// Error codes EC2 uses for throttling and temporary unavailability
const TRANSIENT_CODES: &[&str] = &[
    "RequestLimitExceeded",
    "Throttling",
    "ThrottlingException",
    "ServiceUnavailable",
    "Unavailable",
    "InternalError",
    "InsufficientInstanceCapacity",
];

/// Map an SDK error onto the gateway taxonomy
fn gateway_error<E, R>(err: SdkError<E, R>) -> GatewayError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    if matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)
    ) {
        return GatewayError::Transient(DisplayErrorContext(&err).to_string());
    }

    let code = err
        .as_service_error()
        .and_then(|e| e.code())
        .unwrap_or("Unknown")
        .to_string();
    let message = err
        .as_service_error()
        .and_then(|e| e.message())
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

    if code.ends_with(".NotFound") || code.ends_with("ID.Malformed") {
        GatewayError::NotFound(message)
    } else if TRANSIENT_CODES.contains(&code.as_str()) {
        GatewayError::Transient(format!("{}: {}", code, message))
    } else {
        GatewayError::Api { code, message }
    }
}

fn instance_state(name: Option<&InstanceStateName>) -> InstanceState {
    match name {
        Some(InstanceStateName::Pending) => InstanceState::Pending,
        Some(InstanceStateName::Running) => InstanceState::Running,
        Some(InstanceStateName::ShuttingDown) => InstanceState::ShuttingDown,
        Some(InstanceStateName::Terminated) => InstanceState::Terminated,
        Some(InstanceStateName::Stopping) => InstanceState::Stopping,
        Some(InstanceStateName::Stopped) => InstanceState::Stopped,
        _ => InstanceState::Unknown,
    }
}

fn build_tags(tags: &BTreeMap<String, String>) -> Vec<Tag> {
    tags.iter()
        .map(|(k, v)| Tag::builder().key(k).value(v).build())
        .collect()
}

/// EC2 gateway using the AWS SDK client from an `AwsContext`
pub struct SdkEc2Gateway {
    client: Ec2Client,
}

impl SdkEc2Gateway {
    pub fn new(client: Ec2Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Ec2Gateway for SdkEc2Gateway {
    async fn image_exists(&self, image_id: &str) -> GatewayResult<bool> {
        match self
            .client
            .describe_images()
            .image_ids(image_id)
            .send()
            .await
        {
            Ok(output) => Ok(output
                .images()
                .iter()
                .any(|image| image.image_id() == Some(image_id))),
            Err(err) => match gateway_error(err) {
                GatewayError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn run_instance(&self, config: &InstanceConfig) -> GatewayResult<ResourceHandle> {
        let mut req = self
            .client
            .run_instances()
            .image_id(&config.image_id)
            .min_count(1)
            .max_count(1)
            .set_instance_type(config.instance_type.as_deref().map(InstanceType::from))
            .set_key_name(config.key_name.clone())
            .set_subnet_id(config.subnet_id.clone())
            .set_security_group_ids(config.security_groups.clone());

        if let Some(tags) = &config.tags
            && !tags.is_empty()
        {
            req = req.tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .set_tags(Some(build_tags(tags)))
                    .build(),
            );
        }

        let output = req.send().await.map_err(gateway_error)?;

        output
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .map(ResourceHandle::new)
            .ok_or_else(|| {
                GatewayError::api("MissingInstanceId", "RunInstances returned no instance ID")
            })
    }

    async fn describe_instance(
        &self,
        handle: &ResourceHandle,
    ) -> GatewayResult<Option<InstanceDescription>> {
        let output = match self
            .client
            .describe_instances()
            .instance_ids(handle.as_str())
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                return match gateway_error(err) {
                    GatewayError::NotFound(_) => Ok(None),
                    other => Err(other),
                };
            }
        };

        let Some(instance) = output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find(|i| i.instance_id() == Some(handle.as_str()))
        else {
            return Ok(None);
        };

        let tags = instance
            .tags()
            .iter()
            .filter_map(|t| Some((t.key()?.to_string(), t.value()?.to_string())))
            .collect();

        Ok(Some(InstanceDescription {
            instance_id: handle.to_string(),
            state: instance_state(instance.state().and_then(|s| s.name())),
            image_id: instance.image_id().map(String::from),
            instance_type: instance.instance_type().map(|t| t.as_str().to_string()),
            key_name: instance.key_name().map(String::from),
            subnet_id: instance.subnet_id().map(String::from),
            security_groups: instance
                .security_groups()
                .iter()
                .filter_map(|g| g.group_id().map(String::from))
                .collect(),
            tags,
        }))
    }

    async fn terminate_instance(&self, handle: &ResourceHandle) -> GatewayResult<()> {
        self.client
            .terminate_instances()
            .instance_ids(handle.as_str())
            .send()
            .await
            .map_err(gateway_error)?;
        Ok(())
    }

    async fn modify_security_groups(
        &self,
        handle: &ResourceHandle,
        groups: &[String],
    ) -> GatewayResult<()> {
        self.client
            .modify_instance_attribute()
            .instance_id(handle.as_str())
            .set_groups(Some(groups.to_vec()))
            .send()
            .await
            .map_err(gateway_error)?;
        Ok(())
    }

    async fn create_tags(
        &self,
        handle: &ResourceHandle,
        tags: &BTreeMap<String, String>,
    ) -> GatewayResult<()> {
        self.client
            .create_tags()
            .resources(handle.as_str())
            .set_tags(Some(build_tags(tags)))
            .send()
            .await
            .map_err(gateway_error)?;
        Ok(())
    }

    async fn delete_tags(&self, handle: &ResourceHandle, keys: &[String]) -> GatewayResult<()> {
        self.client
            .delete_tags()
            .resources(handle.as_str())
            .set_tags(Some(
                keys.iter().map(|k| Tag::builder().key(k).build()).collect(),
            ))
            .send()
            .await
            .map_err(gateway_error)?;
        Ok(())
    }
}
