//! Launch region and zone resolution.
//!
//! Three sources are ranked: the launch spec's `Placement.AvailabilityZone`,
//! then the `[default]` profile region in the AWS config file, then the
//! region environment variable. Resolution is a pure function of those
//! inputs.

use std::fmt;

use crate::config::ConfigError;

/// Which input produced a [`RegionZoneDecision`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegionSource {
    /// `Placement.AvailabilityZone` in the launch spec.
    AvailabilityZone,
    /// Region configured for the default profile in the AWS config file.
    ConfigFile,
    /// Region environment variable.
    Environment,
}

impl fmt::Display for RegionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AvailabilityZone => "launch spec availability zone",
            Self::ConfigFile => "AWS config file",
            Self::Environment => "environment",
        };
        f.write_str(label)
    }
}

/// The three ranked inputs to region resolution.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RegionSources<'a> {
    /// Value of `Placement.AvailabilityZone`, if any.
    pub availability_zone: Option<&'a str>,
    /// Region from the default profile of the AWS config file, if any.
    pub config_file_region: Option<&'a str>,
    /// Region from the environment, if any.
    pub env_region: Option<&'a str>,
}

/// Effective launch target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegionZoneDecision {
    /// Region every provider call is addressed to.
    pub region: String,
    /// Availability zone; `None` lets the provider choose.
    pub zone: Option<String>,
    /// Input that won.
    pub source: RegionSource,
}

/// Resolves the launch region and zone.
///
/// # Errors
///
/// Returns [`ConfigError::NoRegionResolved`] when every source is absent or
/// blank.
pub fn resolve(sources: RegionSources<'_>) -> Result<RegionZoneDecision, ConfigError> {
    if let Some(value) = present(sources.availability_zone) {
        return Ok(from_availability_zone(value));
    }
    if let Some(region) = present(sources.config_file_region) {
        return Ok(RegionZoneDecision {
            region: region.to_owned(),
            zone: None,
            source: RegionSource::ConfigFile,
        });
    }
    if let Some(region) = present(sources.env_region) {
        return Ok(RegionZoneDecision {
            region: region.to_owned(),
            zone: None,
            source: RegionSource::Environment,
        });
    }
    Err(ConfigError::NoRegionResolved)
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

fn from_availability_zone(value: &str) -> RegionZoneDecision {
    match split_zone(value) {
        Some(region) => RegionZoneDecision {
            region: region.to_owned(),
            zone: Some(value.to_owned()),
            source: RegionSource::AvailabilityZone,
        },
        None => RegionZoneDecision {
            region: value.to_owned(),
            zone: None,
            source: RegionSource::AvailabilityZone,
        },
    }
}

/// Returns the region prefix of a full zone name (`us-east-1c` →
/// `us-east-1`), or `None` when the value is a bare region.
fn split_zone(value: &str) -> Option<&str> {
    let mut chars = value.chars().rev();
    let suffix = chars.next()?;
    let before = chars.next()?;
    if suffix.is_ascii_lowercase() && before.is_ascii_digit() {
        value.strip_suffix(suffix)
    } else {
        None
    }
}
