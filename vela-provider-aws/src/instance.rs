//! EC2 instance resource
//!
//! Validation of instance configurations and the lifecycle handler that maps
//! Check / Create / Read / Update / UpdateImpact / Delete onto EC2 calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use vela_core::gateway::{WaitOutcome, WaitPolicy};
use vela_core::provider::{
    BoxFuture, CheckResponse, CreateResponse, ProviderError, ProviderResult, ReadResponse,
    ResourceProvider, UpdateImpactResponse,
};
use vela_core::resource::{PropertyBag, ResourceHandle, Value};
use vela_core::schema::{CheckFailure, ResourceSchema, Validated, Validator};

use crate::gateway::{Ec2Gateway, InstanceState};
use crate::schemas::instance::{
    IMAGE_ID, INSTANCE, INSTANCE_TYPE, KEY_NAME, SECURITY_GROUPS, SUBNET_ID, TAGS, instance_schema,
};

/// Reserved tag prefix; EC2 rejects user tags starting with it
const RESERVED_TAG_PREFIX: &str = "aws:";

/// Validated configuration of an EC2 instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceConfig {
    pub image_id: String,
    pub instance_type: Option<String>,
    pub key_name: Option<String>,
    pub subnet_id: Option<String>,
    pub security_groups: Option<Vec<String>>,
    pub tags: Option<BTreeMap<String, String>>,
}

impl InstanceConfig {
    /// Project a property bag onto an instance configuration.
    ///
    /// With `require_all` unset a missing `imageId` is tolerated, which is
    /// how partially known state is read back. Every failure is reported.
    pub fn validate(bag: &PropertyBag, require_all: bool) -> Validated<Self> {
        let mut v = Validator::new(bag, require_all);

        let image_id = v.required_string(IMAGE_ID);
        let instance_type = v.optional_string(INSTANCE_TYPE);
        let key_name = v.optional_string(KEY_NAME);
        let subnet_id = v.optional_string(SUBNET_ID);
        let security_groups = v.optional_string_list(SECURITY_GROUPS);
        let tags = v.optional_string_map(TAGS);

        if bag.contains(IMAGE_ID) && image_id.is_empty() && !v.has_failure(IMAGE_ID) {
            v.fail(IMAGE_ID, "must not be empty");
        }
        for (name, value) in [
            (INSTANCE_TYPE, &instance_type),
            (KEY_NAME, &key_name),
            (SUBNET_ID, &subnet_id),
        ] {
            if value.as_deref() == Some("") {
                v.fail(name, "must not be empty");
            }
        }
        if let Some(groups) = &security_groups
            && groups.iter().any(String::is_empty)
        {
            v.fail(SECURITY_GROUPS, "security group IDs must not be empty");
        }
        if let Some(tags) = &tags {
            for key in tags.keys().filter(|k| k.starts_with(RESERVED_TAG_PREFIX)) {
                v.fail(
                    TAGS,
                    format!("tag key '{}' uses the reserved '{}' prefix", key, RESERVED_TAG_PREFIX),
                );
            }
        }

        v.finish(Self {
            image_id,
            instance_type,
            key_name,
            subnet_id,
            security_groups,
            tags,
        })
    }

    pub fn to_properties(&self) -> PropertyBag {
        let mut props: Vec<(String, Value)> = Vec::new();
        if !self.image_id.is_empty() {
            props.push((IMAGE_ID.to_string(), Value::from(self.image_id.clone())));
        }
        let optional = [
            (INSTANCE_TYPE, &self.instance_type),
            (KEY_NAME, &self.key_name),
            (SUBNET_ID, &self.subnet_id),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                props.push((name.to_string(), Value::from(value.clone())));
            }
        }
        if let Some(groups) = &self.security_groups {
            props.push((SECURITY_GROUPS.to_string(), Value::from(groups.clone())));
        }
        if let Some(tags) = &self.tags {
            props.push((TAGS.to_string(), Value::Map(PropertyBag::from(tags.clone()))));
        }
        props.into_iter().collect()
    }
}

/// Lifecycle handler for EC2 instances
pub struct InstanceProvider {
    gateway: Arc<dyn Ec2Gateway>,
    wait: WaitPolicy,
}

impl InstanceProvider {
    pub fn new(gateway: Arc<dyn Ec2Gateway>, wait: WaitPolicy) -> Self {
        Self { gateway, wait }
    }

    async fn check_instance(&self, properties: PropertyBag) -> ProviderResult<CheckResponse> {
        let validated = InstanceConfig::validate(&properties, true);
        let mut failures = validated.failures;
        let image_id = validated.value.image_id;

        // Catches misspelled AMIs, region mismatches and access problems early
        if !image_id.is_empty() && !failures.iter().any(|f| f.property == IMAGE_ID) {
            let exists = self
                .gateway
                .image_exists(&image_id)
                .await
                .map_err(|e| ProviderError::external("DescribeImages", e))?;
            if !exists {
                failures.push(CheckFailure::new(
                    IMAGE_ID,
                    format!("image '{}' does not exist or is not accessible", image_id),
                ));
            }
        }

        Ok(CheckResponse { failures })
    }

    async fn create_instance(&self, properties: PropertyBag) -> ProviderResult<CreateResponse> {
        let config = InstanceConfig::validate(&properties, true).into_result()?;

        log::info!("Creating new EC2 instance resource");
        let handle = self
            .gateway
            .run_instance(&config)
            .await
            .map_err(|e| ProviderError::external("RunInstances", e))?;

        log::info!(
            "EC2 instance '{}' created; now waiting for it to become 'running'",
            handle
        );
        match self
            .gateway
            .wait_until(&handle, InstanceState::Running, &self.wait)
            .await
        {
            WaitOutcome::Ready => Ok(CreateResponse { handle }),
            WaitOutcome::TimedOut => {
                log::warn!(
                    "EC2 instance '{}' was allocated but did not become 'running'",
                    handle
                );
                Err(ProviderError::ambiguous(
                    handle,
                    "create",
                    format!(
                        "instance did not reach 'running' within {}s",
                        self.wait.timeout.as_secs()
                    ),
                ))
            }
            WaitOutcome::Failed(err) => {
                log::warn!(
                    "EC2 instance '{}' was allocated but readiness could not be confirmed",
                    handle
                );
                Err(ProviderError::ambiguous(handle, "create", err.to_string()))
            }
        }
    }

    async fn read_instance(&self, handle: ResourceHandle) -> ProviderResult<ReadResponse> {
        match self.gateway.describe_instance(&handle).await {
            Ok(Some(instance)) if instance.state != InstanceState::Terminated => Ok(
                ReadResponse::Found(instance.to_config().to_properties()),
            ),
            Ok(_) => Ok(ReadResponse::NotFound),
            Err(err) if err.is_not_found() => Ok(ReadResponse::NotFound),
            Err(err) => Err(ProviderError::external("DescribeInstances", err)),
        }
    }

    /// Apply in-place changes: security groups first, then tags.
    ///
    /// EC2 has no transaction across these calls. When a later call fails,
    /// earlier changes stay applied on the instance and the error names the
    /// failing call; the caller should Read the instance before retrying.
    async fn update_instance(
        &self,
        handle: ResourceHandle,
        olds: PropertyBag,
        news: PropertyBag,
    ) -> ProviderResult<()> {
        let old_config = InstanceConfig::validate(&olds, false).into_result()?;
        let new_config = InstanceConfig::validate(&news, true).into_result()?;

        let diff = olds.diff(&news);
        if diff.is_empty() {
            log::info!("EC2 instance '{}' is up to date", handle);
            return Ok(());
        }

        let replaces = instance_schema().replacements(&diff, &olds, &news);
        if !replaces.is_empty() {
            return Err(ProviderError::not_implemented(format!(
                "no updatable properties: changing {} requires replacing the instance",
                replaces.join(", ")
            )));
        }

        log::info!("Updating EC2 instance '{}'", handle);
        if diff.changed(SECURITY_GROUPS) {
            let groups = new_config.security_groups.unwrap_or_default();
            self.gateway
                .modify_security_groups(&handle, &groups)
                .await
                .map_err(|e| ProviderError::external("ModifyInstanceAttribute", e))?;
        }
        if diff.changed(TAGS) {
            let old_tags = old_config.tags.unwrap_or_default();
            let new_tags = new_config.tags.unwrap_or_default();
            let set: BTreeMap<String, String> = new_tags
                .iter()
                .filter(|(k, v)| old_tags.get(*k) != Some(*v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let remove: Vec<String> = old_tags
                .keys()
                .filter(|k| !new_tags.contains_key(*k))
                .cloned()
                .collect();
            if !set.is_empty() {
                self.gateway
                    .create_tags(&handle, &set)
                    .await
                    .map_err(|e| ProviderError::external("CreateTags", e))?;
            }
            if !remove.is_empty() {
                self.gateway
                    .delete_tags(&handle, &remove)
                    .await
                    .map_err(|e| ProviderError::external("DeleteTags", e))?;
            }
        }

        Ok(())
    }

    async fn instance_update_impact(
        &self,
        olds: PropertyBag,
        news: PropertyBag,
    ) -> ProviderResult<UpdateImpactResponse> {
        InstanceConfig::validate(&olds, false).into_result()?;
        InstanceConfig::validate(&news, true).into_result()?;

        let diff = olds.diff(&news);
        Ok(UpdateImpactResponse {
            replaces: instance_schema().replacements(&diff, &olds, &news),
        })
    }

    async fn delete_instance(&self, handle: ResourceHandle) -> ProviderResult<()> {
        log::info!("Terminating EC2 instance '{}'", handle);
        match self.gateway.terminate_instance(&handle).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                log::info!("EC2 instance '{}' does not exist; nothing to terminate", handle);
                return Ok(());
            }
            Err(err) => return Err(ProviderError::external("TerminateInstances", err)),
        }

        log::info!("EC2 instance termination request submitted; waiting for it to terminate");
        match self
            .gateway
            .wait_until(&handle, InstanceState::Terminated, &self.wait)
            .await
        {
            WaitOutcome::Ready => Ok(()),
            WaitOutcome::TimedOut => Err(ProviderError::ambiguous(
                handle,
                "delete",
                format!(
                    "instance did not terminate within {}s",
                    self.wait.timeout.as_secs()
                ),
            )),
            WaitOutcome::Failed(err) => {
                Err(ProviderError::ambiguous(handle, "delete", err.to_string()))
            }
        }
    }
}

impl ResourceProvider for InstanceProvider {
    fn resource_type(&self) -> &'static str {
        INSTANCE
    }

    fn schema(&self) -> ResourceSchema {
        instance_schema()
    }

    fn check(&self, properties: PropertyBag) -> BoxFuture<'_, ProviderResult<CheckResponse>> {
        Box::pin(async move { self.check_instance(properties).await })
    }

    fn create(&self, properties: PropertyBag) -> BoxFuture<'_, ProviderResult<CreateResponse>> {
        Box::pin(async move { self.create_instance(properties).await })
    }

    fn read(&self, handle: ResourceHandle) -> BoxFuture<'_, ProviderResult<ReadResponse>> {
        Box::pin(async move { self.read_instance(handle).await })
    }

    fn update(
        &self,
        handle: ResourceHandle,
        olds: PropertyBag,
        news: PropertyBag,
    ) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move { self.update_instance(handle, olds, news).await })
    }

    fn update_impact(
        &self,
        olds: PropertyBag,
        news: PropertyBag,
    ) -> BoxFuture<'_, ProviderResult<UpdateImpactResponse>> {
        Box::pin(async move { self.instance_update_impact(olds, news).await })
    }

    fn delete(&self, handle: ResourceHandle) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move { self.delete_instance(handle).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_properties(validated: &Validated<InstanceConfig>) -> Vec<&str> {
        validated
            .failures
            .iter()
            .map(|f| f.property.as_str())
            .collect()
    }

    #[test]
    fn minimal_config_is_valid() {
        let bag = PropertyBag::new().with(IMAGE_ID, "ami-123");
        let validated = InstanceConfig::validate(&bag, true);

        assert!(validated.is_ok());
        assert_eq!(validated.value.image_id, "ami-123");
        assert_eq!(validated.value.instance_type, None);
    }

    #[test]
    fn missing_image_only_fails_when_required() {
        let bag = PropertyBag::new().with(INSTANCE_TYPE, "t3.micro");

        let strict = InstanceConfig::validate(&bag, true);
        assert_eq!(failed_properties(&strict), vec![IMAGE_ID]);

        let lenient = InstanceConfig::validate(&bag, false);
        assert!(lenient.is_ok());
    }

    #[test]
    fn reports_every_problem_at_once() {
        let bag = PropertyBag::new()
            .with(IMAGE_ID, true)
            .with(INSTANCE_TYPE, "")
            .with(KEY_NAME, 7.0)
            .with(SECURITY_GROUPS, "sg-1")
            .with(TAGS, PropertyBag::new().with("aws:owner", "me"));

        for require_all in [true, false] {
            let validated = InstanceConfig::validate(&bag, require_all);
            assert_eq!(
                failed_properties(&validated),
                vec![IMAGE_ID, KEY_NAME, SECURITY_GROUPS, INSTANCE_TYPE, TAGS]
            );
        }
    }

    #[test]
    fn properties_round_trip_through_config() {
        let bag = PropertyBag::new()
            .with(IMAGE_ID, "ami-123")
            .with(INSTANCE_TYPE, "t3.micro")
            .with(SUBNET_ID, "subnet-1")
            .with(SECURITY_GROUPS, vec!["sg-1".to_string(), "sg-2".to_string()])
            .with(TAGS, PropertyBag::new().with("env", "dev"));

        let config = InstanceConfig::validate(&bag, true).into_result().unwrap();
        assert_eq!(config.to_properties(), bag);
    }
}
