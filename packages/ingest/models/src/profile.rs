//! TOML batch profiles.
//!
//! A profile stores everything about a batch except the rows, so the same
//! source can be re-ingested with one file:
//!
//! ```toml
//! city = "Saint Petersburg"
//! service_type = "school"
//! address_prefixes = ["Россия, Санкт-Петербург", "Санкт-Петербург"]
//! new_prefix = "Санкт-Петербург, "
//! commit_every = 1000
//!
//! [mapping]
//! name = "name"
//! address = "addr"
//! geometry = "geometry"
//!
//! [properties.floors]
//! column = "building:levels"
//! type = "integer"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    BatchRequest, InputMapping, MappingError, PropertyBinding, RunMode,
    mapping::validate_properties, request::DEFAULT_LOG_EVERY,
};

/// Errors loading a [`BatchProfile`].
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// The file could not be read.
    #[error("Failed to read profile: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a valid profile.
    #[error("Failed to parse profile: {0}")]
    Parse(#[from] toml::de::Error),

    /// The profile's mapping is unusable.
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

const fn default_log_every() -> usize {
    DEFAULT_LOG_EVERY
}

/// Serialized form of a [`BatchRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProfile {
    /// City name or code.
    pub city: String,
    /// Service type name or code.
    pub service_type: String,
    /// Role bindings.
    #[serde(default)]
    pub mapping: InputMapping,
    /// Extra `properties` keys.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyBinding>,
    /// Address prefixes to strip.
    #[serde(default)]
    pub address_prefixes: Vec<String>,
    /// Prefix for new building addresses.
    #[serde(default)]
    pub new_prefix: String,
    /// Roll back at the end instead of committing.
    #[serde(default)]
    pub dry_run: bool,
    /// Rows between commits.
    #[serde(default)]
    pub commit_every: Option<usize>,
    /// Rows between progress log lines.
    #[serde(default = "default_log_every")]
    pub log_every: usize,
}

impl BatchProfile {
    /// Parses and validates a profile.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] if the text is not a valid profile or its
    /// mapping cannot resolve a location.
    pub fn from_toml_str(text: &str) -> Result<Self, ProfileError> {
        let profile: Self = toml::from_str(text)?;
        profile.mapping.validate()?;
        validate_properties(&profile.properties)?;
        Ok(profile)
    }

    /// Reads, parses and validates a profile file.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] if the file cannot be read or is invalid.
    pub fn from_path(path: &Path) -> Result<Self, ProfileError> {
        let text = std::fs::read_to_string(path)?;
        log::debug!("Loaded batch profile from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Converts the profile into a request.
    #[must_use]
    pub fn into_request(self) -> BatchRequest {
        BatchRequest {
            city: self.city,
            service_type: self.service_type,
            mapping: self.mapping,
            properties: self.properties,
            address_prefixes: self.address_prefixes,
            new_prefix: self.new_prefix,
            mode: if self.dry_run {
                RunMode::DryRun
            } else {
                RunMode::Commit
            },
            commit_every: self.commit_every,
            log_every: self.log_every,
        }
    }
}

#[cfg(test)]
mod tests {
    use city_inventory_coercion::SqlType;

    use super::*;

    const PROFILE: &str = r#"
city = "Saint Petersburg"
service_type = "school"
address_prefixes = ["Россия, Санкт-Петербург", "Санкт-Петербург"]
new_prefix = "Санкт-Петербург, "
dry_run = true
commit_every = 1000

[mapping]
name = "name"
phone = "-"
latitude = "lat"
longitude = "lon"

[properties.floors]
column = "building:levels"
type = "integer"
"#;

    #[test]
    fn parses_profile_into_request() {
        let request = BatchProfile::from_toml_str(PROFILE).unwrap().into_request();

        assert_eq!(request.city, "Saint Petersburg");
        assert_eq!(request.mode, RunMode::DryRun);
        assert_eq!(request.commit_every, Some(1000));
        assert_eq!(request.log_every, DEFAULT_LOG_EVERY);
        assert_eq!(request.mapping.phone, None);
        assert_eq!(request.mapping.latitude.as_deref(), Some("lat"));
        assert_eq!(request.properties["floors"].sql_type, SqlType::Int);
        assert_eq!(request.address_prefixes.len(), 2);
    }

    #[test]
    fn rejects_profile_without_location() {
        let err = BatchProfile::from_toml_str(
            "city = \"Saint Petersburg\"\nservice_type = \"school\"\n[mapping]\nname = \"name\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ProfileError::Mapping(MappingError::MissingLocation)));
    }

    #[test]
    fn rejects_unknown_property_type() {
        let text = format!("{PROFILE}\n[properties.opened]\ncolumn = \"opened\"\ntype = \"geometry\"\n");
        assert!(matches!(
            BatchProfile::from_toml_str(&text),
            Err(ProfileError::Parse(_))
        ));
    }
}
