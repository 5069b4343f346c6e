//! EC2 instance schema definition

use vela_core::resource::PropertyBag;
use vela_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

/// Type token of the EC2 instance resource
pub const INSTANCE: &str = "aws:ec2/instance:Instance";

pub const IMAGE_ID: &str = "imageId";
pub const INSTANCE_TYPE: &str = "instanceType";
pub const KEY_NAME: &str = "keyName";
pub const SECURITY_GROUPS: &str = "securityGroups";
pub const SUBNET_ID: &str = "subnetId";
pub const TAGS: &str = "tags";

/// Security groups of an instance placed in a subnet can be swapped on the
/// live instance; outside a VPC (or when moving subnets) they cannot.
fn security_groups_force_replace(olds: &PropertyBag, news: &PropertyBag) -> bool {
    let same_subnet = match (olds.opt_string(SUBNET_ID), news.opt_string(SUBNET_ID)) {
        (Ok(Some(old)), Ok(Some(new))) => old == new,
        _ => false,
    };
    let groups_given = matches!(news.opt_string_list(SECURITY_GROUPS), Ok(Some(groups)) if !groups.is_empty());
    !(same_subnet && groups_given)
}

pub fn instance_schema() -> ResourceSchema {
    ResourceSchema::new(INSTANCE)
        .with_description("EC2 virtual machine instance")
        .attribute(
            AttributeSchema::new(IMAGE_ID, AttributeType::String)
                .required()
                .with_description("AMI to boot the instance from"),
        )
        .attribute(
            AttributeSchema::new(INSTANCE_TYPE, AttributeType::String)
                .with_description("Instance size, e.g. t3.micro; the AWS default applies when omitted"),
        )
        .attribute(
            AttributeSchema::new(KEY_NAME, AttributeType::String)
                .with_description("Name of the EC2 key pair installed on the instance"),
        )
        .attribute(
            AttributeSchema::new(SUBNET_ID, AttributeType::String)
                .with_description("VPC subnet to launch into"),
        )
        .attribute(
            AttributeSchema::new(SECURITY_GROUPS, AttributeType::StringList)
                .replace_when(security_groups_force_replace)
                .with_description(
                    "Security group IDs; updatable in place for instances in a VPC subnet",
                ),
        )
        .attribute(
            AttributeSchema::new(TAGS, AttributeType::StringMap)
                .updatable()
                .with_description("Instance tags"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn security_groups_in_place_within_same_subnet() {
        let olds = PropertyBag::new()
            .with(SUBNET_ID, "subnet-1")
            .with(SECURITY_GROUPS, groups(&["sg-1"]));
        let news = PropertyBag::new()
            .with(SUBNET_ID, "subnet-1")
            .with(SECURITY_GROUPS, groups(&["sg-2"]));

        assert!(!security_groups_force_replace(&olds, &news));
    }

    #[test]
    fn security_groups_replace_outside_vpc() {
        let olds = PropertyBag::new().with(SECURITY_GROUPS, groups(&["sg-1"]));
        let news = PropertyBag::new().with(SECURITY_GROUPS, groups(&["sg-2"]));

        assert!(security_groups_force_replace(&olds, &news));
    }

    #[test]
    fn security_groups_replace_when_removed() {
        let olds = PropertyBag::new()
            .with(SUBNET_ID, "subnet-1")
            .with(SECURITY_GROUPS, groups(&["sg-1"]));
        let news = PropertyBag::new().with(SUBNET_ID, "subnet-1");

        assert!(security_groups_force_replace(&olds, &news));
    }

    #[test]
    fn only_tags_are_unconditionally_updatable() {
        let schema = instance_schema();
        let olds = PropertyBag::new();
        let news = PropertyBag::new();
        let in_place: Vec<_> = schema
            .attributes
            .iter()
            .filter(|a| !a.update.forces_replace(&olds, &news))
            .map(|a| a.name.as_str())
            .collect();

        assert_eq!(in_place, vec![TAGS]);
        assert!(schema.get(IMAGE_ID).unwrap().required);
    }
}
