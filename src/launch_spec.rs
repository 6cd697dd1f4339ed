//! Launch specification document.
//!
//! The document is a JSON object mixing launcher directives
//! (`INSTANCE_COUNT`, `MAX_SPOT_PRICE`, `USER_DATA_FILE_NAME`) with EC2 launch
//! specification fields. Well-known fields are validated; everything else is
//! kept verbatim and forwarded to the provider.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::ConfigError;
use crate::files;

const INSTANCE_COUNT: &str = "INSTANCE_COUNT";
const MAX_SPOT_PRICE: &str = "MAX_SPOT_PRICE";

/// Maximum bid price per instance hour, kept in its textual decimal form so
/// the provider receives exactly what the operator wrote.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BidPrice(String);

impl BidPrice {
    /// Parses a positive decimal such as `0.08`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the value is not a plain
    /// decimal or is not greater than zero.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        let is_decimal = !(whole.is_empty() && fraction.is_empty())
            && whole.chars().all(|ch| ch.is_ascii_digit())
            && fraction.chars().all(|ch| ch.is_ascii_digit());
        if !is_decimal {
            return Err(invalid(MAX_SPOT_PRICE, format!("'{trimmed}' is not a decimal")));
        }
        if !trimmed.chars().any(|ch| matches!(ch, '1'..='9')) {
            return Err(invalid(MAX_SPOT_PRICE, "must be greater than zero"));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the textual price.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BidPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Placement block of the launch specification.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Placement {
    /// Availability zone or bare region requested by the operator.
    pub availability_zone: Option<String>,
    /// Placement group name.
    pub group_name: Option<String>,
    /// Other placement fields, forwarded untouched.
    pub extra: Map<String, Value>,
}

/// Validated launch specification.
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchSpec {
    /// Number of instances requested; at least one.
    pub instance_count: u32,
    /// Maximum bid price; greater than zero.
    pub max_spot_price: BidPrice,
    /// Machine image identifier (`ImageId`).
    pub image_id: String,
    /// Instance type (`InstanceType`).
    pub instance_type: String,
    /// Key-pair name (`KeyName`).
    pub key_name: Option<String>,
    /// Placement zone and/or group.
    pub placement: Option<Placement>,
    /// Security group names.
    pub security_groups: Vec<String>,
    /// Optional path of a user-data file to hand to every instance.
    pub user_data_file: Option<Utf8PathBuf>,
    /// Remaining provider-specific fields.
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawPlacement {
    #[serde(rename = "AvailabilityZone")]
    availability_zone: Option<String>,
    #[serde(rename = "GroupName")]
    group_name: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawLaunchSpec {
    #[serde(rename = "INSTANCE_COUNT")]
    instance_count: Option<Value>,
    #[serde(rename = "MAX_SPOT_PRICE")]
    max_spot_price: Option<Value>,
    #[serde(rename = "USER_DATA_FILE_NAME")]
    user_data_file_name: Option<String>,
    #[serde(rename = "ImageId")]
    image_id: Option<String>,
    #[serde(rename = "InstanceType")]
    instance_type: Option<String>,
    #[serde(rename = "KeyName")]
    key_name: Option<String>,
    #[serde(rename = "Placement")]
    placement: Option<RawPlacement>,
    #[serde(rename = "SecurityGroups", default)]
    security_groups: Vec<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl LaunchSpec {
    /// Reads and validates a launch specification file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read and any error
    /// from [`LaunchSpec::from_json`].
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = files::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Self::from_json(&contents)
    }

    /// Parses and validates a launch specification document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON,
    /// [`ConfigError::MissingField`] when a required field is absent and
    /// [`ConfigError::InvalidField`] when a value breaks an invariant.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let raw: RawLaunchSpec = serde_json::from_str(document).map_err(|err| {
            ConfigError::Parse(format!("launch specification has a problem at {err}"))
        })?;

        let instance_count = parse_count(
            raw.instance_count
                .as_ref()
                .ok_or_else(|| missing(INSTANCE_COUNT))?,
        )?;
        let max_spot_price = parse_price(
            raw.max_spot_price
                .as_ref()
                .ok_or_else(|| missing(MAX_SPOT_PRICE))?,
        )?;
        let image_id = required_text(raw.image_id, "ImageId")?;
        let instance_type = required_text(raw.instance_type, "InstanceType")?;

        Ok(Self {
            instance_count,
            max_spot_price,
            image_id,
            instance_type,
            key_name: non_blank(raw.key_name),
            placement: raw.placement.map(|placement| Placement {
                availability_zone: non_blank(placement.availability_zone),
                group_name: non_blank(placement.group_name),
                extra: placement.extra,
            }),
            security_groups: raw.security_groups,
            user_data_file: non_blank(raw.user_data_file_name).map(Utf8PathBuf::from),
            extra: raw.extra,
        })
    }

    /// Returns the requested availability zone when one is set.
    #[must_use]
    pub fn availability_zone(&self) -> Option<&str> {
        self.placement
            .as_ref()
            .and_then(|placement| placement.availability_zone.as_deref())
    }
}

fn parse_count(value: &Value) -> Result<u32, ConfigError> {
    let count = match value {
        Value::String(text) => text.trim().parse::<u32>().ok(),
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    }
    .ok_or_else(|| invalid(INSTANCE_COUNT, format!("'{value}' is not a whole number")))?;

    if count == 0 {
        return Err(invalid(INSTANCE_COUNT, "must be at least 1"));
    }
    Ok(count)
}

fn parse_price(value: &Value) -> Result<BidPrice, ConfigError> {
    match value {
        Value::String(text) => BidPrice::parse(text),
        Value::Number(number) => BidPrice::parse(&number.to_string()),
        other => Err(invalid(MAX_SPOT_PRICE, format!("'{other}' is not a decimal"))),
    }
}

fn required_text(value: Option<String>, field: &str) -> Result<String, ConfigError> {
    non_blank(value).ok_or_else(|| missing(field))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
}

fn missing(field: &str) -> ConfigError {
    ConfigError::MissingField(format!("{field} missing from launch specification"))
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_owned(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    const EXAMPLE: &str = r#"{
        "INSTANCE_COUNT": "2",
        "MAX_SPOT_PRICE": "0.08",
        "USER_DATA_FILE_NAME": "ami_bootstrap",
        "ImageId": "ami-bba18dd2",
        "InstanceType": "t1.micro",
        "KeyName": "amazon-ssh-pub-key-tag",
        "Placement": { "AvailabilityZone": "us-east-1c", "GroupName": "" },
        "SecurityGroups": ["default"],
        "EbsOptimized": false
    }"#;

    #[rstest]
    fn parses_the_documented_example() {
        let spec = LaunchSpec::from_json(EXAMPLE).expect("example should parse");
        assert_eq!(spec.instance_count, 2);
        assert_eq!(spec.max_spot_price.as_str(), "0.08");
        assert_eq!(spec.image_id, "ami-bba18dd2");
        assert_eq!(spec.key_name.as_deref(), Some("amazon-ssh-pub-key-tag"));
        assert_eq!(spec.availability_zone(), Some("us-east-1c"));
        assert_eq!(
            spec.placement.as_ref().and_then(|p| p.group_name.clone()),
            None,
            "blank group names are dropped"
        );
        assert_eq!(spec.user_data_file, Some(Utf8PathBuf::from("ami_bootstrap")));
        assert_eq!(spec.extra.get("EbsOptimized"), Some(&json!(false)));
        assert!(!spec.extra.contains_key("INSTANCE_COUNT"));
    }

    #[rstest]
    fn accepts_numeric_count_and_price() {
        let spec = LaunchSpec::from_json(
            r#"{"INSTANCE_COUNT": 3, "MAX_SPOT_PRICE": 0.5, "ImageId": "ami-1", "InstanceType": "m5.large"}"#,
        )
        .expect("numbers should be accepted");
        assert_eq!(spec.instance_count, 3);
        assert_eq!(spec.max_spot_price.as_str(), "0.5");
        assert!(spec.placement.is_none());
    }

    #[rstest]
    #[case(r#"{"MAX_SPOT_PRICE": "0.1", "ImageId": "a", "InstanceType": "t"}"#, "INSTANCE_COUNT")]
    #[case(r#"{"INSTANCE_COUNT": "1", "ImageId": "a", "InstanceType": "t"}"#, "MAX_SPOT_PRICE")]
    #[case(r#"{"INSTANCE_COUNT": "1", "MAX_SPOT_PRICE": "0.1", "InstanceType": "t"}"#, "ImageId")]
    #[case(r#"{"INSTANCE_COUNT": "1", "MAX_SPOT_PRICE": "0.1", "ImageId": " "}"#, "ImageId")]
    fn reports_missing_fields(#[case] document: &str, #[case] field: &str) {
        let err = LaunchSpec::from_json(document).expect_err("field is required");
        let ConfigError::MissingField(message) = err else {
            panic!("expected MissingField, got {err:?}");
        };
        assert!(message.starts_with(field), "message: {message}");
    }

    #[rstest]
    #[case("0")]
    #[case("-1")]
    #[case("two")]
    fn rejects_invalid_counts(#[case] count: &str) {
        let document = format!(
            r#"{{"INSTANCE_COUNT": "{count}", "MAX_SPOT_PRICE": "0.1", "ImageId": "a", "InstanceType": "t"}}"#
        );
        assert!(matches!(
            LaunchSpec::from_json(&document),
            Err(ConfigError::InvalidField { ref field, .. }) if field == INSTANCE_COUNT
        ));
    }

    #[rstest]
    #[case("0")]
    #[case("0.000")]
    #[case(".")]
    #[case("-0.1")]
    #[case("1e3")]
    #[case("")]
    fn rejects_invalid_prices(#[case] price: &str) {
        assert!(BidPrice::parse(price).is_err(), "{price} should be rejected");
    }

    #[rstest]
    #[case("0.08")]
    #[case("1")]
    #[case(".5")]
    #[case(" 2.50 ")]
    fn accepts_positive_prices(#[case] price: &str) {
        let parsed = BidPrice::parse(price).expect("price should parse");
        assert_eq!(parsed.as_str(), price.trim());
    }

    #[rstest]
    fn malformed_json_reports_location() {
        let err = LaunchSpec::from_json("{\"INSTANCE_COUNT\": ").expect_err("should fail");
        let ConfigError::Parse(message) = err else {
            panic!("expected Parse, got {err:?}");
        };
        assert!(message.contains("line 1"), "message: {message}");
    }
}
