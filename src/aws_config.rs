//! Read-only view of the AWS credential and default-region configuration.
//!
//! Values come from environment variables and the `[default]` profile of the
//! shared AWS config and credentials files. They are read once per run and
//! never written.

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::ConfigError;
use crate::files;
use crate::region::RegionSources;

/// Primary region environment variable.
pub const REGION_ENV: &str = "AWS_DEFAULT_REGION";
/// Region environment variable consulted when [`REGION_ENV`] is unset.
pub const REGION_ENV_FALLBACK: &str = "AWS_REGION";
/// Overrides the location of the AWS config file.
pub const CONFIG_FILE_ENV: &str = "AWS_CONFIG_FILE";
/// Overrides the location of the AWS credentials file.
pub const CREDENTIALS_FILE_ENV: &str = "AWS_SHARED_CREDENTIALS_FILE";

const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
const ACCESS_KEY_FIELD: &str = "aws_access_key_id";
const REGION_FIELD: &str = "region";

/// Snapshot of the credential and region configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CredentialRegionConfig {
    /// Region taken from the environment.
    pub env_region: Option<String>,
    /// Region configured under the default profile of the config file.
    pub config_file_region: Option<String>,
    /// Config file that was consulted, when a home directory was known.
    pub config_path: Option<Utf8PathBuf>,
    /// Whether an access key was found in the environment or either file.
    pub has_credentials: bool,
}

impl CredentialRegionConfig {
    /// Reads the configuration from the process environment and the
    /// filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when an existing file cannot be read.
    pub fn from_environment() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration using `lookup` for environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when an existing file cannot be read.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_region = non_blank(lookup(REGION_ENV)).or_else(|| non_blank(lookup(REGION_ENV_FALLBACK)));
        let home = non_blank(lookup("HOME")).or_else(|| non_blank(lookup("USERPROFILE")));

        let config_path = non_blank(lookup(CONFIG_FILE_ENV))
            .map(Utf8PathBuf::from)
            .or_else(|| home.as_deref().map(|dir| aws_dir(dir).join("config")));
        let credentials_path = non_blank(lookup(CREDENTIALS_FILE_ENV))
            .map(Utf8PathBuf::from)
            .or_else(|| home.as_deref().map(|dir| aws_dir(dir).join("credentials")));

        let config_contents = read_if_present(config_path.as_deref())?;
        let credentials_contents = read_if_present(credentials_path.as_deref())?;

        let config_file_region = config_contents
            .as_deref()
            .and_then(|contents| default_profile_value(contents, REGION_FIELD));
        let has_credentials = non_blank(lookup(ACCESS_KEY_ENV)).is_some()
            || [config_contents.as_deref(), credentials_contents.as_deref()]
                .into_iter()
                .flatten()
                .any(|contents| default_profile_value(contents, ACCESS_KEY_FIELD).is_some());

        Ok(Self {
            env_region,
            config_file_region,
            config_path,
            has_credentials,
        })
    }

    /// Builds the region resolution inputs, pairing this configuration with
    /// the launch spec's availability zone.
    #[must_use]
    pub fn sources<'a>(&'a self, availability_zone: Option<&'a str>) -> RegionSources<'a> {
        RegionSources {
            availability_zone,
            config_file_region: self.config_file_region.as_deref(),
            env_region: self.env_region.as_deref(),
        }
    }
}

fn aws_dir(home: &str) -> Utf8PathBuf {
    Utf8Path::new(home).join(".aws")
}

fn read_if_present(path: Option<&Utf8Path>) -> Result<Option<String>, ConfigError> {
    let Some(file) = path else {
        return Ok(None);
    };
    files::read_optional(file).map_err(|err| ConfigError::Io {
        path: file.to_string(),
        message: err.to_string(),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
}

/// Looks up `key` in the default profile of an INI-style AWS file.
///
/// Both `[default]` and `[profile default]` headers are recognised; comments
/// start with `#` or `;`.
#[must_use]
pub fn default_profile_value(contents: &str, key: &str) -> Option<String> {
    let mut in_default = false;
    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            let name = header.split_whitespace().collect::<Vec<_>>();
            in_default = matches!(name.as_slice(), ["default"] | ["profile", "default"]);
            continue;
        }
        if !in_default {
            continue;
        }
        if let Some((name, value)) = line.split_once('=')
            && name.trim() == key
        {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn home_with_config(config: &str) -> (TempDir, String) {
        let tmp = TempDir::new().expect("tempdir");
        let aws = tmp.path().join(".aws");
        std::fs::create_dir_all(&aws).expect("create .aws");
        std::fs::write(aws.join("config"), config).expect("write config");
        let home = tmp.path().to_str().expect("utf8 tempdir").to_owned();
        (tmp, home)
    }

    fn lookup(vars: HashMap<&'static str, String>) -> impl Fn(&str) -> Option<String> {
        move |key| vars.get(key).cloned()
    }

    #[rstest]
    #[case("[default]\nregion = us-east-1\n", Some("us-east-1"))]
    #[case("[profile default]\nregion=eu-west-1", Some("eu-west-1"))]
    #[case("[work]\nregion = ap-south-1\n[default]\noutput = json\n", None)]
    #[case("# comment\n[default]\n; region = nope\nregion = sa-east-1\n", Some("sa-east-1"))]
    #[case("[default]\nregion =   \n", None)]
    #[case("", None)]
    fn reads_region_from_default_profile(#[case] contents: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            default_profile_value(contents, "region").as_deref(),
            expected
        );
    }

    #[rstest]
    fn env_region_prefers_default_region_variable() {
        let config = CredentialRegionConfig::from_lookup(lookup(HashMap::from([
            (REGION_ENV, String::from("us-east-2")),
            (REGION_ENV_FALLBACK, String::from("us-west-1")),
        ])))
        .expect("no files to read");
        assert_eq!(config.env_region.as_deref(), Some("us-east-2"));
        assert_eq!(config.config_file_region, None);
        assert!(!config.has_credentials);
    }

    #[rstest]
    fn reads_config_file_under_home() {
        let (_tmp, home) =
            home_with_config("[default]\nregion = eu-north-1\naws_access_key_id = AKIA\n");
        let config = CredentialRegionConfig::from_lookup(lookup(HashMap::from([(
            "HOME",
            home,
        )])))
        .expect("config should load");
        assert_eq!(config.config_file_region.as_deref(), Some("eu-north-1"));
        assert!(config.has_credentials);
    }

    #[rstest]
    fn missing_files_are_not_errors() {
        let tmp = TempDir::new().expect("tempdir");
        let home = tmp.path().to_str().expect("utf8 tempdir").to_owned();
        let config = CredentialRegionConfig::from_lookup(lookup(HashMap::from([("HOME", home)])))
            .expect("absent files are fine");
        assert_eq!(config.config_file_region, None);
    }

    #[rstest]
    fn sources_pairs_availability_zone_with_configured_regions() {
        let config = CredentialRegionConfig {
            env_region: Some(String::from("us-west-2")),
            config_file_region: Some(String::from("us-east-1")),
            ..CredentialRegionConfig::default()
        };
        let sources = config.sources(Some("eu-west-1a"));
        assert_eq!(sources.availability_zone, Some("eu-west-1a"));
        assert_eq!(sources.config_file_region, Some("us-east-1"));
        assert_eq!(sources.env_region, Some("us-west-2"));
    }
}
