//! Vela Core
//!
//! Core library of the resource provider lifecycle: property bags, their
//! diff, schema validation, the provider traits an orchestration engine
//! drives, and the gateway contract for remote infrastructure APIs.

pub mod differ;
pub mod gateway;
pub mod provider;
pub mod resource;
pub mod schema;
