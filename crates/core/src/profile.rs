//! Per-provider mapping profiles.
//!
//! A profile tells the [`crate::mapper`] which header aliases feed which
//! target field, how each field is typed, and which fields are protected
//! (a difference on a protected field is a conflict rather than an update).
//! Profiles are configuration data: a default set is embedded in the
//! binary and a deployment may replace it with its own JSON file.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const BUILTIN_PROFILES: &str = include_str!("../profiles/default_profiles.json");

/// How a mapped cell is typed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Decimal,
    Integer,
    Boolean,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Decimal => "decimal",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
        }
    }
}

/// One target field and the headers that may supply it, most specific first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field: String,
    pub aliases: Vec<String>,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingProfile {
    /// Provider id as sent by clients (`marketman`, `toast`, ...).
    pub provider: String,
    #[serde(default)]
    pub label: String,
    /// Target entity type written to the system of record.
    pub entity_type: String,
    /// Mandatory field; a file with no column for it is rejected.
    pub identity_field: String,
    /// Field holding the legacy system's own primary key, if it exports one.
    #[serde(default)]
    pub id_field: Option<String>,
    /// Fields tried in order for an external id when no primary key exists.
    #[serde(default)]
    pub code_fields: Vec<String>,
    pub fields: Vec<FieldSpec>,
}

impl MappingProfile {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.field == name)
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.field(name).is_some_and(|f| f.protected)
    }

    pub fn kind_of(&self, name: &str) -> FieldKind {
        self.field(name).map(|f| f.kind).unwrap_or_default()
    }

    /// Check internal consistency: every referenced field is declared, no
    /// field is declared twice, and every field has at least one alias.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |msg: String| CoreError::Validation(format!("profile '{}': {msg}", self.provider));

        if self.provider.trim().is_empty() {
            return Err(CoreError::Validation("profile provider must not be empty".into()));
        }
        if self.entity_type.trim().is_empty() {
            return Err(invalid("entity_type must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for spec in &self.fields {
            if !seen.insert(spec.field.as_str()) {
                return Err(invalid(format!("field '{}' is declared twice", spec.field)));
            }
            if spec.aliases.iter().all(|a| a.trim().is_empty()) {
                return Err(invalid(format!("field '{}' has no aliases", spec.field)));
            }
        }

        let referenced = std::iter::once(&self.identity_field)
            .chain(self.id_field.iter())
            .chain(self.code_fields.iter());
        for name in referenced {
            if !seen.contains(name.as_str()) {
                return Err(invalid(format!("references undeclared field '{name}'")));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProfileDocument {
    List(Vec<MappingProfile>),
    Wrapped { profiles: Vec<MappingProfile> },
}

/// Immutable set of profiles keyed by provider id.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, MappingProfile>,
}

impl ProfileRegistry {
    /// Load profiles from a JSON document: either an array of profiles or
    /// `{ "profiles": [...] }`. Every profile is validated.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let document: ProfileDocument = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("invalid mapping profiles: {e}")))?;
        let list = match document {
            ProfileDocument::List(list) | ProfileDocument::Wrapped { profiles: list } => list,
        };

        let mut profiles = BTreeMap::new();
        for profile in list {
            profile.validate()?;
            let key = profile.provider.to_ascii_lowercase();
            if profiles.insert(key, profile).is_some() {
                return Err(CoreError::Validation(
                    "mapping profiles declare the same provider twice".into(),
                ));
            }
        }
        if profiles.is_empty() {
            return Err(CoreError::Validation("no mapping profiles configured".into()));
        }
        Ok(Self { profiles })
    }

    /// The profiles shipped with the binary.
    pub fn builtin() -> Self {
        Self::from_json(BUILTIN_PROFILES).expect("embedded mapping profiles are valid")
    }

    /// Look up a provider (case-insensitive).
    pub fn get(&self, provider: &str) -> Result<&MappingProfile, CoreError> {
        self.profiles
            .get(&provider.trim().to_ascii_lowercase())
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "unknown source '{provider}'; expected one of: {}",
                    self.providers().collect::<Vec<_>>().join(", ")
                ))
            })
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.profiles.values().map(|p| p.provider.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingProfile> {
        self.profiles.values()
    }
}
