//! Classification System - Rule/Outcome Separation
//!
//! Rules each inspect the property bag for one category of violation and
//! report it as a single grouped `Defect`. The classifier turns the collected
//! defects, or their absence, into a `ValidationOutcome`. Classification is
//! pure: it never fails and never looks at anything but its arguments.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::PropertyBag;
use crate::schema::{Constraint, Schema};

/// Namespaced keys whose raw value was not a string. Never in the bag itself.
pub type MistypedKeys = BTreeSet<String>;

/// Recognized keys of the image property vocabulary.
pub mod keys {
    pub const OS_KERNEL: &str = "unikorn:os:kernel";
    pub const OS_FAMILY: &str = "unikorn:os:family";
    pub const OS_DISTRO: &str = "unikorn:os:distro";
    pub const OS_VARIANT: &str = "unikorn:os:variant";
    pub const OS_CODENAME: &str = "unikorn:os:codename";
    pub const OS_VERSION: &str = "unikorn:os:version";
    pub const PACKAGE_KUBERNETES: &str = "unikorn:package:kubernetes";
    pub const PACKAGE_SLURMD: &str = "unikorn:package:slurmd";
    pub const GPU_VENDOR: &str = "unikorn:gpu_vendor";
    pub const GPU_MODELS: &str = "unikorn:gpu_models";
    pub const GPU_DRIVER: &str = "unikorn:gpu_driver";
    pub const VIRTUALIZATION: &str = "unikorn:virtualization";
    pub const DIGEST: &str = "unikorn:digest";

    /// Every key with a slot in the grouped fields.
    pub const GROUPED: [&str; 13] = [
        OS_KERNEL, OS_FAMILY, OS_DISTRO, OS_VARIANT, OS_CODENAME, OS_VERSION,
        PACKAGE_KUBERNETES, PACKAGE_SLURMD,
        GPU_VENDOR, GPU_MODELS, GPU_DRIVER,
        VIRTUALIZATION, DIGEST,
    ];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DefectCategory {
    MissingRequired,
    InvalidValue,
}

impl DefectCategory {
    pub fn message(&self) -> &'static str {
        match self {
            DefectCategory::MissingRequired => "Required object properties do not exist",
            DefectCategory::InvalidValue => "Object properties failed validation",
        }
    }
}

/// One violation category and every key that tripped it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Defect {
    pub category: DefectCategory,
    pub message: String,
    pub properties: Vec<String>,
    /// Accepted values for enumerated keys among `properties`, keyed the same.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<AllowedValues>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowedValues {
    pub property: String,
    pub values: Vec<String>,
}

impl Defect {
    fn new(category: DefectCategory, properties: Vec<String>) -> Self {
        Self {
            category,
            message: category.message().to_string(),
            properties,
            allowed: vec![],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OsFields {
    pub kernel: Option<String>,
    pub family: Option<String>,
    pub distro: Option<String>,
    pub variant: Option<String>,
    pub codename: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageFields {
    pub kubernetes: Option<String>,
    pub slurmd: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GpuFields {
    pub vendor: Option<String>,
    pub models: Option<String>,
    pub driver: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformFields {
    pub virtualization: Option<String>,
    pub digest: Option<String>,
}

/// Grouped projection of a conforming bag. `None` means the key was absent
/// or the schema does not recognize it; present values are copied verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedFields {
    pub os: OsFields,
    pub package: PackageFields,
    pub gpu: GpuFields,
    pub platform: PlatformFields,
    /// Keys the schema recognizes that have no grouped slot.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub other: BTreeMap<String, Option<String>>,
}

impl ExtractedFields {
    /// Only keys `schema` recognizes are copied out.
    pub fn extract(bag: &PropertyBag, schema: &Schema) -> Self {
        let get = |key: &str| {
            if schema.is_recognized(key) {
                bag.get(key).cloned()
            } else {
                None
            }
        };
        let other = schema
            .recognized_keys()
            .filter(|key| !keys::GROUPED.contains(key))
            .map(|key| (key.to_string(), bag.get(key).cloned()))
            .collect();

        Self {
            os: OsFields {
                kernel: get(keys::OS_KERNEL),
                family: get(keys::OS_FAMILY),
                distro: get(keys::OS_DISTRO),
                variant: get(keys::OS_VARIANT),
                codename: get(keys::OS_CODENAME),
                version: get(keys::OS_VERSION),
            },
            package: PackageFields {
                kubernetes: get(keys::PACKAGE_KUBERNETES),
                slurmd: get(keys::PACKAGE_SLURMD),
            },
            gpu: GpuFields {
                vendor: get(keys::GPU_VENDOR),
                models: get(keys::GPU_MODELS),
                driver: get(keys::GPU_DRIVER),
            },
            platform: PlatformFields {
                virtualization: get(keys::VIRTUALIZATION),
                digest: get(keys::DIGEST),
            },
            other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Conforming { fields: ExtractedFields },
    NonConforming { defects: Vec<Defect> },
}

impl ValidationOutcome {
    pub fn is_conforming(&self) -> bool {
        matches!(self, ValidationOutcome::Conforming { .. })
    }

    pub fn defects(&self) -> &[Defect] {
        match self {
            ValidationOutcome::Conforming { .. } => &[],
            ValidationOutcome::NonConforming { defects } => defects,
        }
    }

    pub fn fields(&self) -> Option<&ExtractedFields> {
        match self {
            ValidationOutcome::Conforming { fields } => Some(fields),
            ValidationOutcome::NonConforming { .. } => None,
        }
    }
}

/// Property rule trait - yields at most one grouped defect
pub trait PropertyRule {
    fn name(&self) -> &'static str;
    fn check(&self, bag: &PropertyBag, mistyped: &MistypedKeys, schema: &Schema) -> Option<Defect>;
}

// --- Concrete Rules ---

/// Every required key must be present. An empty or mistyped value still
/// counts as present.
pub struct RequiredPropertiesRule;

impl PropertyRule for RequiredPropertiesRule {
    fn name(&self) -> &'static str { "required" }

    fn check(&self, bag: &PropertyBag, mistyped: &MistypedKeys, schema: &Schema) -> Option<Defect> {
        let missing: Vec<String> = schema
            .required_keys()
            .iter()
            .filter(|key| !bag.contains_key(key.as_str()) && !mistyped.contains(key.as_str()))
            .cloned()
            .collect();

        if missing.is_empty() {
            None
        } else {
            Some(Defect::new(DefectCategory::MissingRequired, missing))
        }
    }
}

/// Every present, recognized key must hold a string satisfying its
/// constraint. Unknown keys pass whatever their value.
pub struct PropertyConstraintRule;

impl PropertyRule for PropertyConstraintRule {
    fn name(&self) -> &'static str { "properties" }

    fn check(&self, bag: &PropertyBag, mistyped: &MistypedKeys, schema: &Schema) -> Option<Defect> {
        let mut offending: BTreeSet<&str> = bag
            .iter()
            .filter(|(key, value)| schema.constraint(key).map_or(false, |c| !c.admits(value)))
            .map(|(key, _)| key.as_str())
            .collect();
        offending.extend(
            mistyped
                .iter()
                .map(String::as_str)
                .filter(|key| schema.is_recognized(key)),
        );

        if offending.is_empty() {
            return None;
        }

        let mut defect = Defect::new(
            DefectCategory::InvalidValue,
            offending.iter().map(|key| key.to_string()).collect(),
        );
        for key in offending {
            if let Some(values) = schema.constraint(key).and_then(Constraint::allowed_values) {
                defect.allowed.push(AllowedValues {
                    property: key.to_string(),
                    values: values.to_vec(),
                });
            }
        }
        Some(defect)
    }
}

/// Classifier orchestrates rules against one schema
pub struct Classifier<'s> {
    schema: &'s Schema,
    rules: Vec<Box<dyn PropertyRule>>,
}

impl<'s> Classifier<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            rules: vec![
                Box::new(RequiredPropertiesRule),
                Box::new(PropertyConstraintRule),
            ],
        }
    }

    pub fn schema(&self) -> &Schema {
        self.schema
    }

    pub fn classify(&self, bag: &PropertyBag) -> ValidationOutcome {
        self.classify_with(bag, &MistypedKeys::new())
    }

    /// Classify a bag whose source also carried non-string namespaced values.
    pub fn classify_with(&self, bag: &PropertyBag, mistyped: &MistypedKeys) -> ValidationOutcome {
        let defects: Vec<Defect> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let defect = rule.check(bag, mistyped, self.schema)?;
                tracing::trace!(rule = rule.name(), properties = ?defect.properties, "rule failed");
                Some(defect)
            })
            .collect();

        if defects.is_empty() {
            ValidationOutcome::Conforming { fields: ExtractedFields::extract(bag, self.schema) }
        } else {
            ValidationOutcome::NonConforming { defects }
        }
    }
}

/// Classify one bag against a schema.
pub fn classify(bag: &PropertyBag, schema: &Schema) -> ValidationOutcome {
    Classifier::new(schema).classify(bag)
}
