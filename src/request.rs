//! Provider request payload assembly.
//!
//! Launcher directives are stripped from the launch spec, the placement is
//! reconciled with the resolved region/zone, and user data is attached in
//! its encoded form. The result is the `LaunchSpecification` object EC2
//! expects, with keys in sorted order.

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::launch_spec::{BidPrice, LaunchSpec, Placement};
use crate::region::RegionZoneDecision;
use crate::user_data::UserData;

/// One batch spot request, ready for submission.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpotSubmission {
    /// Number of instances requested in the batch.
    pub instance_count: u32,
    /// Maximum bid price.
    #[serde(serialize_with = "serialize_price")]
    pub spot_price: BidPrice,
    /// EC2 launch specification object.
    pub launch_specification: Map<String, Value>,
    /// Idempotency token so a retried CLI call cannot double-submit.
    pub client_token: String,
}

fn serialize_price<S: serde::Serializer>(price: &BidPrice, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(price.as_str())
}

impl SpotSubmission {
    /// Assembles the submission for `spec` targeted at `decision`.
    #[must_use]
    pub fn build(
        spec: &LaunchSpec,
        decision: &RegionZoneDecision,
        user_data: Option<&UserData>,
    ) -> Self {
        Self {
            instance_count: spec.instance_count,
            spot_price: spec.max_spot_price.clone(),
            launch_specification: launch_specification(spec, decision, user_data),
            client_token: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Replaces the generated client token.
    #[must_use]
    pub fn with_client_token(mut self, token: impl Into<String>) -> Self {
        self.client_token = token.into();
        self
    }

    /// Renders the submission and its target as the document printed by
    /// `spotlaunch plan`.
    ///
    /// # Errors
    ///
    /// Returns the serialisation error if the submission cannot be
    /// represented as JSON.
    pub fn plan_document(&self, decision: &RegionZoneDecision) -> Result<Value, serde_json::Error> {
        let mut document = Map::new();
        document.insert(String::from("Region"), Value::from(decision.region.clone()));
        document.insert(String::from("RegionSource"), Value::from(decision.source.to_string()));
        document.insert(String::from("Request"), serde_json::to_value(self)?);
        Ok(Value::Object(document))
    }
}

/// Builds the EC2 `LaunchSpecification` object.
#[must_use]
pub fn launch_specification(
    spec: &LaunchSpec,
    decision: &RegionZoneDecision,
    user_data: Option<&UserData>,
) -> Map<String, Value> {
    let mut payload = spec.extra.clone();
    payload.insert(String::from("ImageId"), Value::from(spec.image_id.clone()));
    payload.insert(
        String::from("InstanceType"),
        Value::from(spec.instance_type.clone()),
    );
    if let Some(key_name) = &spec.key_name {
        payload.insert(String::from("KeyName"), Value::from(key_name.clone()));
    }
    if !spec.security_groups.is_empty() {
        payload.insert(
            String::from("SecurityGroups"),
            Value::from(spec.security_groups.clone()),
        );
    }
    if let Some(placement) = placement(spec.placement.as_ref(), decision) {
        payload.insert(String::from("Placement"), Value::Object(placement));
    }
    if let Some(data) = user_data {
        payload.insert(String::from("UserData"), Value::from(data.encoded()));
    }
    payload
}

/// Placement keeps the zone only when the decision pins one; a bare region
/// drops `AvailabilityZone` so the provider chooses.
fn placement(
    placement: Option<&Placement>,
    decision: &RegionZoneDecision,
) -> Option<Map<String, Value>> {
    let mut block = placement.map(|p| p.extra.clone()).unwrap_or_default();
    if let Some(zone) = &decision.zone {
        block.insert(String::from("AvailabilityZone"), Value::from(zone.clone()));
    }
    if let Some(group) = placement.and_then(|p| p.group_name.as_ref()) {
        block.insert(String::from("GroupName"), Value::from(group.clone()));
    }
    (!block.is_empty()).then_some(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionSource;
    use rstest::{fixture, rstest};
    use serde_json::json;

    #[fixture]
    fn spec() -> LaunchSpec {
        LaunchSpec::from_json(
            r#"{
                "INSTANCE_COUNT": "2",
                "MAX_SPOT_PRICE": "0.08",
                "ImageId": "ami-bba18dd2",
                "InstanceType": "t1.micro",
                "KeyName": "key",
                "Placement": { "AvailabilityZone": "us-east-1c", "GroupName": "" },
                "SecurityGroups": ["default"],
                "Monitoring": { "Enabled": true }
            }"#,
        )
        .unwrap_or_else(|err| panic!("fixture spec should parse: {err}"))
    }

    fn decision(zone: Option<&str>) -> RegionZoneDecision {
        RegionZoneDecision {
            region: String::from("us-east-1"),
            zone: zone.map(str::to_owned),
            source: RegionSource::AvailabilityZone,
        }
    }

    #[rstest]
    fn payload_strips_directives_and_keeps_passthrough_fields(spec: LaunchSpec) {
        let payload = launch_specification(&spec, &decision(Some("us-east-1c")), None);
        assert_eq!(
            Value::Object(payload),
            json!({
                "ImageId": "ami-bba18dd2",
                "InstanceType": "t1.micro",
                "KeyName": "key",
                "Monitoring": { "Enabled": true },
                "Placement": { "AvailabilityZone": "us-east-1c" },
                "SecurityGroups": ["default"]
            })
        );
    }

    #[rstest]
    fn bare_region_drops_placement(spec: LaunchSpec) {
        let payload = launch_specification(&spec, &decision(None), None);
        assert!(!payload.contains_key("Placement"));
    }

    #[rstest]
    fn bare_region_keeps_group_name(mut spec: LaunchSpec) {
        if let Some(placement) = spec.placement.as_mut() {
            placement.group_name = Some(String::from("cluster-a"));
        }
        let payload = launch_specification(&spec, &decision(None), None);
        assert_eq!(payload.get("Placement"), Some(&json!({ "GroupName": "cluster-a" })));
    }

    #[rstest]
    fn attaches_encoded_user_data(spec: LaunchSpec) {
        let data = UserData::from_bytes("inline", b"hello").expect("text");
        let payload = launch_specification(&spec, &decision(None), Some(&data));
        assert_eq!(payload.get("UserData"), Some(&json!("aGVsbG8=")));
    }

    #[rstest]
    fn submission_carries_count_price_and_token(spec: LaunchSpec) {
        let submission =
            SpotSubmission::build(&spec, &decision(Some("us-east-1c")), None).with_client_token("tok");
        assert_eq!(submission.instance_count, 2);
        assert_eq!(submission.spot_price.as_str(), "0.08");
        assert_eq!(submission.client_token, "tok");

        let plan = submission
            .plan_document(&decision(Some("us-east-1c")))
            .expect("plan renders");
        assert_eq!(plan["Region"], json!("us-east-1"));
        assert_eq!(plan["Request"]["SpotPrice"], json!("0.08"));
        assert_eq!(plan["Request"]["InstanceCount"], json!(2));
    }

    #[rstest]
    fn generated_tokens_differ(spec: LaunchSpec) {
        let first = SpotSubmission::build(&spec, &decision(None), None);
        let second = SpotSubmission::build(&spec, &decision(None), None);
        assert_ne!(first.client_token, second.client_token);
    }
}
