//! Built-in resource definitions.
//!
//! Project files can only declare resources whose type is listed here.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, LazyLock};

use super::{PropertyDefinition, ResourceDefinition, ResourceInstance, ValueType};

static CATALOG: LazyLock<BTreeMap<String, Arc<ResourceDefinition>>> = LazyLock::new(|| {
    [
        s3_bucket(),
        vpc(),
        subnet(),
        security_group(),
        iam_role(),
        sns_topic(),
        sqs_queue(),
        log_group(),
    ]
    .into_iter()
    .map(|def| (def.resource_type().to_string(), Arc::new(def)))
    .collect()
});

/// Looks up a definition by its type tag, e.g. `AWS::S3::Bucket`.
pub fn lookup(resource_type: &str) -> Option<Arc<ResourceDefinition>> {
    CATALOG.get(resource_type).cloned()
}

pub fn resource_types() -> impl Iterator<Item = &'static str> {
    CATALOG.keys().map(String::as_str)
}

fn s3_bucket() -> ResourceDefinition {
    ResourceDefinition::new("AWS::S3::Bucket")
        .with_property(
            "BucketName",
            PropertyDefinition::optional(ValueType::String)
                .with_validator(|res| check_bucket_name(literal_str(res, "BucketName")?)),
        )
        .with_property(
            "AccessControl",
            PropertyDefinition::optional(ValueType::one_of([
                "Private",
                "PublicRead",
                "PublicReadWrite",
                "AuthenticatedRead",
                "LogDeliveryWrite",
                "BucketOwnerRead",
                "BucketOwnerFullControl",
            ])),
        )
        .with_property(
            "VersioningConfiguration",
            PropertyDefinition::optional(ValueType::Json),
        )
        .with_property("Tags", PropertyDefinition::optional(ValueType::Tags))
}

fn vpc() -> ResourceDefinition {
    ResourceDefinition::new("AWS::EC2::VPC")
        .with_property(
            "CidrBlock",
            PropertyDefinition::required(ValueType::String)
                .with_validator(|res| check_cidr(literal_str(res, "CidrBlock")?)),
        )
        .with_property(
            "EnableDnsSupport",
            PropertyDefinition::optional(ValueType::Boolean),
        )
        .with_property(
            "EnableDnsHostnames",
            PropertyDefinition::optional(ValueType::Boolean),
        )
        .with_property(
            "InstanceTenancy",
            PropertyDefinition::optional(ValueType::one_of(["default", "dedicated"])),
        )
        .with_property("Tags", PropertyDefinition::optional(ValueType::Tags))
}

fn subnet() -> ResourceDefinition {
    ResourceDefinition::new("AWS::EC2::Subnet")
        .with_property("VpcId", PropertyDefinition::required(ValueType::String))
        .with_property(
            "CidrBlock",
            PropertyDefinition::required(ValueType::String)
                .with_validator(|res| check_cidr(literal_str(res, "CidrBlock")?)),
        )
        .with_property(
            "AvailabilityZone",
            PropertyDefinition::optional(ValueType::String),
        )
        .with_property(
            "MapPublicIpOnLaunch",
            PropertyDefinition::optional(ValueType::Boolean),
        )
        .with_property("Tags", PropertyDefinition::optional(ValueType::Tags))
}

fn security_group() -> ResourceDefinition {
    ResourceDefinition::new("AWS::EC2::SecurityGroup")
        .with_property(
            "GroupDescription",
            PropertyDefinition::required(ValueType::String),
        )
        .with_property("VpcId", PropertyDefinition::optional(ValueType::String))
        .with_property(
            "SecurityGroupIngress",
            PropertyDefinition::optional(ValueType::list(ValueType::Json)),
        )
        .with_property(
            "SecurityGroupEgress",
            PropertyDefinition::optional(ValueType::list(ValueType::Json)),
        )
        .with_property("Tags", PropertyDefinition::optional(ValueType::Tags))
}

fn iam_role() -> ResourceDefinition {
    ResourceDefinition::new("AWS::IAM::Role")
        .with_property(
            "AssumeRolePolicyDocument",
            PropertyDefinition::required(ValueType::Json),
        )
        .with_property("Path", PropertyDefinition::optional(ValueType::String))
        .with_property(
            "Policies",
            PropertyDefinition::optional(ValueType::list(ValueType::Json)),
        )
        .with_property(
            "ManagedPolicyArns",
            PropertyDefinition::optional(ValueType::list(ValueType::String)),
        )
        .with_property(
            "RoleName",
            PropertyDefinition::optional(ValueType::String).with_validator(|res| {
                let name = literal_str(res, "RoleName")?;
                check_name(name, 64, "+=,.@_-")
            }),
        )
}

fn sns_topic() -> ResourceDefinition {
    ResourceDefinition::new("AWS::SNS::Topic")
        .with_property("DisplayName", PropertyDefinition::optional(ValueType::String))
        .with_property(
            "TopicName",
            PropertyDefinition::optional(ValueType::String).with_validator(|res| {
                let name = literal_str(res, "TopicName")?;
                check_name(name, 256, "_-")
            }),
        )
        .with_property(
            "Subscription",
            PropertyDefinition::optional(ValueType::list(ValueType::Json)),
        )
}

fn sqs_queue() -> ResourceDefinition {
    ResourceDefinition::new("AWS::SQS::Queue")
        .with_property(
            "QueueName",
            PropertyDefinition::optional(ValueType::String).with_validator(|res| {
                let name = literal_str(res, "QueueName")?;
                let base = name.strip_suffix(".fifo").unwrap_or(name);
                check_name(base, 80, "_-")
            }),
        )
        .with_property(
            "VisibilityTimeout",
            PropertyDefinition::optional(ValueType::Integer)
                .with_validator(|res| check_range(literal_int(res, "VisibilityTimeout")?, 0, 43_200)),
        )
        .with_property(
            "MessageRetentionPeriod",
            PropertyDefinition::optional(ValueType::Integer).with_validator(|res| {
                check_range(literal_int(res, "MessageRetentionPeriod")?, 60, 1_209_600)
            }),
        )
        .with_property(
            "DelaySeconds",
            PropertyDefinition::optional(ValueType::Integer)
                .with_validator(|res| check_range(literal_int(res, "DelaySeconds")?, 0, 900)),
        )
        .with_property("FifoQueue", PropertyDefinition::optional(ValueType::Boolean))
}

const RETENTION_DAYS: [i64; 17] = [
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1827, 3653,
];

fn log_group() -> ResourceDefinition {
    ResourceDefinition::new("AWS::Logs::LogGroup")
        .with_property(
            "LogGroupName",
            PropertyDefinition::optional(ValueType::String),
        )
        .with_property(
            "RetentionInDays",
            PropertyDefinition::optional(ValueType::Integer).with_validator(|res| {
                let days = literal_int(res, "RetentionInDays")?;
                (!RETENTION_DAYS.contains(&days))
                    .then(|| format!("{days} is not a supported retention period"))
            }),
        )
}

// Validators skip intrinsic values: these helpers return None for them.

fn literal_str<'a>(res: &'a ResourceInstance, property: &str) -> Option<&'a str> {
    res.property(property)?.as_str()
}

fn literal_int(res: &ResourceInstance, property: &str) -> Option<i64> {
    let value = res.property(property)?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn check_range(value: i64, min: i64, max: i64) -> Option<String> {
    (value < min || value > max).then(|| format!("{value} is outside {min}..={max}"))
}

fn check_name(name: &str, max_len: usize, extra: &str) -> Option<String> {
    if name.is_empty() || name.len() > max_len {
        return Some(format!("'{name}' must be 1 to {max_len} characters"));
    }
    name.chars()
        .find(|c| !c.is_ascii_alphanumeric() && !extra.contains(*c))
        .map(|c| format!("'{name}' contains invalid character '{c}'"))
}

fn check_bucket_name(name: &str) -> Option<String> {
    if !(3..=63).contains(&name.len()) {
        return Some(format!("'{name}' must be 3 to 63 characters"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '.' || *c == '-'))
    {
        return Some(format!("'{name}' contains invalid character '{c}'"));
    }
    let starts_ok = name.starts_with(|c: char| c.is_ascii_alphanumeric());
    let ends_ok = name.ends_with(|c: char| c.is_ascii_alphanumeric());
    (!starts_ok || !ends_ok).then(|| format!("'{name}' must start and end with a letter or digit"))
}

fn check_cidr(cidr: &str) -> Option<String> {
    let invalid = || Some(format!("'{cidr}' is not a valid IPv4 CIDR block"));
    let Some((addr, prefix)) = cidr.split_once('/') else {
        return invalid();
    };
    if addr.parse::<Ipv4Addr>().is_err() {
        return invalid();
    }
    match prefix.parse::<u8>() {
        Ok(bits) if bits <= 32 => None,
        _ => invalid(),
    }
}
