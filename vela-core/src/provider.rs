//! Provider - Lifecycle operations for externally provisioned resources
//!
//! An orchestration engine drives a provider through a fixed set of calls:
//! Check, Name, Create, Read, Update, UpdateImpact and Delete. A provider
//! serves one or more resource types; each type is handled by a
//! `ResourceProvider` that holds no state between calls.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::resource::{PropertyBag, ResourceHandle};
use crate::schema::{CheckFailure, ResourceSchema};

/// Error type for Provider operations
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Malformed call: unknown type token, missing or unexpected handle
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration rejected on a path that requires a valid configuration
    #[error("invalid configuration: {}", join_failures(.0))]
    CheckFailed(Vec<CheckFailure>),

    /// The remote API rejected or could not service a call
    #[error("{operation} failed: {source}")]
    ExternalApi {
        operation: String,
        #[source]
        source: GatewayError,
    },

    /// A call took effect remotely but its outcome could not be confirmed;
    /// the resource behind `handle` may exist in any state
    #[error("{operation} of '{handle}' did not converge: {reason}")]
    AmbiguousState {
        handle: ResourceHandle,
        operation: String,
        reason: String,
    },

    /// The resource type does not support the requested operation
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl ProviderError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        ProviderError::InvalidRequest(message.into())
    }

    pub fn external(operation: impl Into<String>, source: GatewayError) -> Self {
        ProviderError::ExternalApi {
            operation: operation.into(),
            source,
        }
    }

    pub fn ambiguous(
        handle: ResourceHandle,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ProviderError::AmbiguousState {
            handle,
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        ProviderError::NotImplemented(message.into())
    }

    /// Handle of a resource that may exist despite the error
    pub fn ambiguous_handle(&self) -> Option<&ResourceHandle> {
        match self {
            ProviderError::AmbiguousState { handle, .. } => Some(handle),
            _ => None,
        }
    }
}

fn join_failures(failures: &[CheckFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub resource_type: String,
    pub properties: PropertyBag,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub failures: Vec<CheckFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameRequest {
    pub resource_type: String,
    pub properties: PropertyBag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameResponse {
    Named(String),
    /// Let the engine pick its default name
    UseDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub resource_type: String,
    /// Must be empty; handles are assigned by the remote API
    #[serde(default)]
    pub handle: ResourceHandle,
    pub properties: PropertyBag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub handle: ResourceHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub resource_type: String,
    pub handle: ResourceHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadResponse {
    Found(PropertyBag),
    NotFound,
}

impl ReadResponse {
    pub fn is_found(&self) -> bool {
        matches!(self, ReadResponse::Found(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub resource_type: String,
    pub handle: ResourceHandle,
    pub olds: PropertyBag,
    pub news: PropertyBag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateImpactRequest {
    pub resource_type: String,
    pub olds: PropertyBag,
    pub news: PropertyBag,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateImpactResponse {
    /// Changed properties that force replacement; empty means in-place
    pub replaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub resource_type: String,
    pub handle: ResourceHandle,
}

/// Lifecycle handler for a single resource type
///
/// Implementations hold no per-resource state; calls for different handles
/// may run concurrently, calls for the same handle are serialized by the
/// caller.
pub trait ResourceProvider: Send + Sync {
    /// Type token served by this handler (e.g., "aws:ec2/instance:Instance")
    fn resource_type(&self) -> &'static str;

    /// Attribute schema and update policies of this resource type
    fn schema(&self) -> ResourceSchema;

    /// Validate a configuration; failures are data, not errors
    fn check(&self, properties: PropertyBag) -> BoxFuture<'_, ProviderResult<CheckResponse>>;

    fn name(&self, _properties: PropertyBag) -> BoxFuture<'_, ProviderResult<NameResponse>> {
        Box::pin(async { Ok(NameResponse::UseDefault) })
    }

    /// Allocate a new resource. On error no resource exists, unless the error
    /// is `AmbiguousState`
    fn create(&self, properties: PropertyBag) -> BoxFuture<'_, ProviderResult<CreateResponse>>;

    fn read(&self, handle: ResourceHandle) -> BoxFuture<'_, ProviderResult<ReadResponse>>;

    fn update(
        &self,
        handle: ResourceHandle,
        olds: PropertyBag,
        news: PropertyBag,
    ) -> BoxFuture<'_, ProviderResult<()>>;

    /// Advisory; must not touch the remote API
    fn update_impact(
        &self,
        olds: PropertyBag,
        news: PropertyBag,
    ) -> BoxFuture<'_, ProviderResult<UpdateImpactResponse>>;

    /// Tear down a resource. On error the resource is assumed to still exist
    fn delete(&self, handle: ResourceHandle) -> BoxFuture<'_, ProviderResult<()>>;
}

/// Main Provider trait
///
/// The call surface exposed to the orchestration engine. Every request names
/// its resource type; a provider resolves the type once and forwards the call
/// to the matching `ResourceProvider`.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "aws")
    fn name(&self) -> &'static str;

    /// Schemas of the resource types this Provider can handle
    fn schemas(&self) -> Vec<ResourceSchema>;

    /// Resolve a type token to its handler
    fn resource(&self, resource_type: &str) -> ProviderResult<&dyn ResourceProvider>;

    fn check(&self, req: CheckRequest) -> BoxFuture<'_, ProviderResult<CheckResponse>> {
        Box::pin(async move { self.resource(&req.resource_type)?.check(req.properties).await })
    }

    fn name_resource(&self, req: NameRequest) -> BoxFuture<'_, ProviderResult<NameResponse>> {
        Box::pin(async move { self.resource(&req.resource_type)?.name(req.properties).await })
    }

    fn create(&self, req: CreateRequest) -> BoxFuture<'_, ProviderResult<CreateResponse>> {
        Box::pin(async move {
            let resource = self.resource(&req.resource_type)?;
            if !req.handle.is_empty() {
                return Err(ProviderError::invalid_request(format!(
                    "create must not carry a handle, got '{}'",
                    req.handle
                )));
            }
            resource.create(req.properties).await
        })
    }

    fn read(&self, req: ReadRequest) -> BoxFuture<'_, ProviderResult<ReadResponse>> {
        Box::pin(async move {
            let resource = self.resource(&req.resource_type)?;
            require_handle(&req.handle, "read")?;
            resource.read(req.handle).await
        })
    }

    fn update(&self, req: UpdateRequest) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move {
            let resource = self.resource(&req.resource_type)?;
            require_handle(&req.handle, "update")?;
            resource.update(req.handle, req.olds, req.news).await
        })
    }

    fn update_impact(
        &self,
        req: UpdateImpactRequest,
    ) -> BoxFuture<'_, ProviderResult<UpdateImpactResponse>> {
        Box::pin(async move {
            self.resource(&req.resource_type)?
                .update_impact(req.olds, req.news)
                .await
        })
    }

    fn delete(&self, req: DeleteRequest) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move {
            let resource = self.resource(&req.resource_type)?;
            require_handle(&req.handle, "delete")?;
            resource.delete(req.handle).await
        })
    }
}

fn require_handle(handle: &ResourceHandle, operation: &str) -> ProviderResult<()> {
    if handle.is_empty() {
        Err(ProviderError::invalid_request(format!(
            "{} requires a resource handle",
            operation
        )))
    } else {
        Ok(())
    }
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn schemas(&self) -> Vec<ResourceSchema> {
        (**self).schemas()
    }

    fn resource(&self, resource_type: &str) -> ProviderResult<&dyn ResourceProvider> {
        (**self).resource(resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const MOCK_TYPE: &str = "mock:index:Thing";

    // Mock handler recording which operations reached it
    #[derive(Default)]
    struct MockResource {
        calls: Mutex<Vec<&'static str>>,
    }

    impl MockResource {
        fn record(&self, op: &'static str) {
            self.calls.lock().unwrap().push(op);
        }
    }

    impl ResourceProvider for MockResource {
        fn resource_type(&self) -> &'static str {
            MOCK_TYPE
        }

        fn schema(&self) -> ResourceSchema {
            ResourceSchema::new(MOCK_TYPE)
        }

        fn check(&self, _properties: PropertyBag) -> BoxFuture<'_, ProviderResult<CheckResponse>> {
            self.record("check");
            Box::pin(async { Ok(CheckResponse::default()) })
        }

        fn create(&self, _properties: PropertyBag) -> BoxFuture<'_, ProviderResult<CreateResponse>> {
            self.record("create");
            Box::pin(async {
                Ok(CreateResponse {
                    handle: ResourceHandle::new("mock-id-123"),
                })
            })
        }

        fn read(&self, _handle: ResourceHandle) -> BoxFuture<'_, ProviderResult<ReadResponse>> {
            self.record("read");
            Box::pin(async { Ok(ReadResponse::NotFound) })
        }

        fn update(
            &self,
            _handle: ResourceHandle,
            _olds: PropertyBag,
            _news: PropertyBag,
        ) -> BoxFuture<'_, ProviderResult<()>> {
            self.record("update");
            Box::pin(async { Ok(()) })
        }

        fn update_impact(
            &self,
            _olds: PropertyBag,
            _news: PropertyBag,
        ) -> BoxFuture<'_, ProviderResult<UpdateImpactResponse>> {
            self.record("update_impact");
            Box::pin(async { Ok(UpdateImpactResponse::default()) })
        }

        fn delete(&self, _handle: ResourceHandle) -> BoxFuture<'_, ProviderResult<()>> {
            self.record("delete");
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct MockProvider {
        thing: MockResource,
    }

    impl Provider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn schemas(&self) -> Vec<ResourceSchema> {
            vec![self.thing.schema()]
        }

        fn resource(&self, resource_type: &str) -> ProviderResult<&dyn ResourceProvider> {
            if resource_type == MOCK_TYPE {
                Ok(&self.thing)
            } else {
                Err(ProviderError::invalid_request(format!(
                    "unknown resource type: {}",
                    resource_type
                )))
            }
        }
    }

    #[tokio::test]
    async fn unknown_type_is_invalid_request() {
        let provider = MockProvider::default();
        let err = provider
            .check(CheckRequest {
                resource_type: "mock:index:Other".to_string(),
                properties: PropertyBag::new(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert!(provider.thing.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_with_handle_is_rejected_before_dispatch() {
        let provider = MockProvider::default();
        let err = provider
            .create(CreateRequest {
                resource_type: MOCK_TYPE.to_string(),
                handle: ResourceHandle::new("i-123"),
                properties: PropertyBag::new(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert!(provider.thing.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_without_handle_is_rejected() {
        let provider = MockProvider::default();
        let err = provider
            .delete(DeleteRequest {
                resource_type: MOCK_TYPE.to_string(),
                handle: ResourceHandle::default(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn boxed_provider_forwards_calls() {
        let provider: Box<dyn Provider> = Box::new(MockProvider::default());
        let created = provider
            .create(CreateRequest {
                resource_type: MOCK_TYPE.to_string(),
                handle: ResourceHandle::default(),
                properties: PropertyBag::new(),
            })
            .await
            .unwrap();
        assert_eq!(created.handle.as_str(), "mock-id-123");

        let name = provider
            .name_resource(NameRequest {
                resource_type: MOCK_TYPE.to_string(),
                properties: PropertyBag::new(),
            })
            .await
            .unwrap();
        assert_eq!(name, NameResponse::UseDefault);
    }

    #[test]
    fn check_failed_lists_every_failure() {
        let err = ProviderError::CheckFailed(vec![
            CheckFailure::new("imageId", "required property 'imageId' is missing"),
            CheckFailure::new("keyName", "must not be empty"),
        ]);
        assert_eq!(
            err.to_string(),
            "invalid configuration: imageId: required property 'imageId' is missing; keyName: must not be empty"
        );
    }

    #[test]
    fn ambiguous_state_exposes_handle() {
        let err = ProviderError::ambiguous(ResourceHandle::new("i-1"), "create", "timed out");
        assert_eq!(err.ambiguous_handle().map(|h| h.as_str()), Some("i-1"));
        assert!(
            ProviderError::not_implemented("update")
                .ambiguous_handle()
                .is_none()
        );
    }
}
