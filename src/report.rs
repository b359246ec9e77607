//! Report Rendering
//!
//! Per-image report model plus the two ways it is written out: a YAML-shaped
//! text stream for operators and one JSON object per line for machines.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::catalog::ImageRecord;
use crate::schema::Schema;
use crate::validation::{Defect, ExtractedFields, ValidationOutcome};

/// Bytes to whole gibibytes, truncating.
pub fn size_gib(size_bytes: u64) -> u64 {
    size_bytes >> 30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageReport {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "sizeGiB")]
    pub size_gib: u64,
    pub outcome: ValidationOutcome,
}

impl ImageReport {
    pub fn new(image: &ImageRecord, outcome: ValidationOutcome) -> Self {
        Self {
            id: image.id.clone(),
            name: image.name.clone(),
            created_at: image.created_at,
            size_gib: size_gib(image.size_bytes),
            outcome,
        }
    }
}

/// JSON-lines record: the report tagged with the schema that produced it.
#[derive(Debug, Serialize)]
struct JsonRecord<'a> {
    schema: &'a str,
    #[serde(rename = "schemaDigest")]
    schema_digest: &'a str,
    #[serde(flatten)]
    report: &'a ImageReport,
}

pub fn render_json(report: &ImageReport, schema: &Schema) -> Result<String, serde_json::Error> {
    serde_json::to_string(&JsonRecord {
        schema: schema.version(),
        schema_digest: schema.digest(),
        report,
    })
}

/// Text renderer for the operator-facing report stream
#[derive(Debug, Clone, Copy)]
pub struct TextRenderer {
    color: bool,
}

impl TextRenderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn render(&self, report: &ImageReport, schema: &Schema) -> String {
        let mut out = String::new();
        out.push_str("---\n");
        field(&mut out, 0, "id", &report.id);
        field(&mut out, 0, "name", &report.name);
        field(&mut out, 0, "createdAt", &report.created_at.to_rfc3339());
        field(&mut out, 0, "sizeGiB", &report.size_gib.to_string());

        match &report.outcome {
            ValidationOutcome::Conforming { fields } => render_fields(&mut out, fields),
            ValidationOutcome::NonConforming { defects } => self.render_defects(&mut out, defects, schema),
        }

        out
    }

    fn render_defects(&self, out: &mut String, defects: &[Defect], schema: &Schema) {
        let headline = format!("Image does not match {}", schema.title());
        let headline = if self.color {
            headline.red().bold().to_string()
        } else {
            headline
        };

        out.push_str("error:\n");
        field(out, 1, "message", &headline);
        if let Some(url) = schema.documentation() {
            field(out, 1, "documentation", &format!("See {}", url));
        }
        out.push_str("  detail:\n");

        for defect in defects {
            let _ = writeln!(out, "  - message: {}", defect.message);
            field(out, 2, "properties", &format!("[{}]", defect.properties.join(", ")));
            if !defect.allowed.is_empty() {
                out.push_str("    allowed:\n");
                for allowed in &defect.allowed {
                    field(out, 3, &allowed.property, &format!("[{}]", allowed.values.join(", ")));
                }
            }
        }
    }
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self::new(true)
    }
}

fn render_fields(out: &mut String, fields: &ExtractedFields) {
    out.push_str("os:\n");
    optional(out, 1, "kernel", &fields.os.kernel);
    optional(out, 1, "family", &fields.os.family);
    optional(out, 1, "distro", &fields.os.distro);
    optional(out, 1, "variant", &fields.os.variant);
    optional(out, 1, "codename", &fields.os.codename);
    optional(out, 1, "version", &fields.os.version);

    out.push_str("package:\n");
    optional(out, 1, "kubernetes", &fields.package.kubernetes);
    optional(out, 1, "slurmd", &fields.package.slurmd);

    out.push_str("gpu:\n");
    optional(out, 1, "vendor", &fields.gpu.vendor);
    optional(out, 1, "models", &fields.gpu.models);
    optional(out, 1, "driver", &fields.gpu.driver);

    optional(out, 0, "virtualization", &fields.platform.virtualization);
    optional(out, 0, "digest", &fields.platform.digest);

    if !fields.other.is_empty() {
        out.push_str("other:\n");
        for (key, value) in &fields.other {
            optional(out, 1, key, value);
        }
    }
}

// Absent prints with no value; present-but-empty is quoted so the two differ.
fn optional(out: &mut String, depth: usize, key: &str, value: &Option<String>) {
    match value.as_deref() {
        None => field(out, depth, key, ""),
        Some("") => field(out, depth, key, "\"\""),
        Some(v) => field(out, depth, key, v),
    }
}

fn field(out: &mut String, depth: usize, key: &str, value: &str) {
    let indent = "  ".repeat(depth);
    if value.is_empty() {
        let _ = writeln!(out, "{}{}:", indent, key);
    } else {
        let _ = writeln!(out, "{}{}: {}", indent, key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PropertyBag;
    use crate::validation::{classify, keys};
    use chrono::TimeZone;

    fn image(properties: &[(&str, &str)]) -> ImageRecord {
        ImageRecord {
            id: "1a2b".into(),
            name: "ubuntu-22.04-gpu".into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            size_bytes: 3_400_000_000,
            visibility: Some("public".into()),
            properties: properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<PropertyBag>(),
            mistyped: Default::default(),
        }
    }

    #[test]
    fn test_size_gib_truncates() {
        assert_eq!(size_gib(3_221_225_472), 3);
        assert_eq!(size_gib(3_400_000_000), 3);
        assert_eq!(size_gib((1 << 30) - 1), 0);
        assert_eq!(size_gib(0), 0);
    }

    #[test]
    fn test_render_conforming() {
        let schema = Schema::builtin_v2().unwrap();
        let img = image(&[
            (keys::OS_KERNEL, "linux"),
            (keys::OS_FAMILY, "debian"),
            (keys::OS_DISTRO, "ubuntu"),
            (keys::OS_VERSION, "22.04"),
            (keys::OS_CODENAME, ""),
            (keys::VIRTUALIZATION, "any"),
        ]);
        let report = ImageReport::new(&img, classify(&img.properties, &schema));

        let text = TextRenderer::new(false).render(&report, &schema);
        let expected = "\
---
id: 1a2b
name: ubuntu-22.04-gpu
createdAt: 2024-05-01T12:00:00+00:00
sizeGiB: 3
os:
  kernel: linux
  family: debian
  distro: ubuntu
  variant:
  codename: \"\"
  version: 22.04
package:
  kubernetes:
  slurmd:
gpu:
  vendor:
  models:
  driver:
virtualization: any
digest:
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_non_conforming() {
        let schema = Schema::builtin_v2().unwrap();
        let img = image(&[(keys::OS_KERNEL, "windows")]);
        let report = ImageReport::new(&img, classify(&img.properties, &schema));

        let text = TextRenderer::new(false).render(&report, &schema);
        assert!(text.contains("  message: Image does not match Unikorn Schema V2\n"));
        assert!(text.contains("  documentation: See https://github.com/unikorn-cloud/"));
        assert!(text.contains(
            "  - message: Required object properties do not exist\n    properties: [unikorn:os:family, unikorn:os:distro, unikorn:os:version, unikorn:virtualization]\n"
        ));
        assert!(text.contains("    properties: [unikorn:os:kernel]\n    allowed:\n      unikorn:os:kernel: [linux]\n"));
        assert!(!text.contains("os:\n"));
    }

    #[test]
    fn test_render_json_line() {
        let schema = Schema::builtin_v2().unwrap();
        let img = image(&[(keys::OS_KERNEL, "linux")]);
        let report = ImageReport::new(&img, classify(&img.properties, &schema));

        let line = render_json(&report, &schema).unwrap();
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["schema"], "v2");
        assert_eq!(value["schemaDigest"], schema.digest());
        assert_eq!(value["sizeGiB"], 3);
        assert_eq!(value["outcome"]["status"], "non_conforming");
        assert_eq!(value["outcome"]["defects"][0]["properties"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_render_other_fields_for_non_v2_schema() {
        let schema = Schema::compile(
            r#"{"version":"v3","type":"object","properties":{
                "unikorn:os:kernel":{"type":"string"},
                "unikorn:arch":{"type":"string"}}}"#,
        )
        .unwrap();
        let img = image(&[(keys::OS_KERNEL, "linux"), (keys::DIGEST, "ignored")]);
        let report = ImageReport::new(&img, classify(&img.properties, &schema));

        let text = TextRenderer::new(false).render(&report, &schema);
        assert!(text.ends_with("virtualization:\ndigest:\nother:\n  unikorn:arch:\n"));
        assert!(!text.contains("ignored"));
    }
}
