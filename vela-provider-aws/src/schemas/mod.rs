//! AWS resource schema definitions

pub mod instance;

use vela_core::schema::ResourceSchema;

/// Returns all AWS schemas
pub fn all_schemas() -> Vec<ResourceSchema> {
    vec![instance::instance_schema()]
}
