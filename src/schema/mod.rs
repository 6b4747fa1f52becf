//! Per-category interview schemas.
//!
//! Each emergency category declares the structured content a valid report
//! must contain as an ordered list of field definitions. The slot-filling
//! engine is generic over these definitions; adding a category is a data
//! change, not a code change. Schemas can be overridden from YAML files the
//! same way built-in defaults are declared here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Category;

/// A validated field value as stored in a session or case record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

impl FieldValue {
    /// Render the value for prompts and notification payloads.
    pub fn display(&self) -> String {
        match self {
            FieldValue::Integer(n) => n.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

/// A completed (or in-progress) field mapping, keyed by field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Raised when an extracted value fails its field validator.
///
/// Always recoverable: the field stays outstanding and is re-requested on a
/// later turn. Invalid values are never stored.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid value for '{field}': {reason}")]
pub struct ValidationFailure {
    pub field: String,
    pub reason: String,
}

/// Validation rule attached to a field definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FieldValidator {
    /// Any non-empty string after trimming
    NonEmpty,

    /// Integer within an inclusive range (e.g. an age)
    Integer { min: i64, max: i64 },

    /// Phone-number shaped: digits with optional +, spaces, dashes, parens
    Phone,

    /// One of a fixed set of labels, matched case-insensitively
    OneOf { options: Vec<String> },
}

impl FieldValidator {
    /// Validate a raw extracted value, producing the typed value to store.
    pub fn validate(
        &self,
        field: &str,
        raw: &serde_json::Value,
    ) -> Result<FieldValue, ValidationFailure> {
        let fail = |reason: &str| ValidationFailure {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        match self {
            FieldValidator::NonEmpty => {
                let text = raw.as_str().map(str::trim).unwrap_or_default();
                if text.is_empty() {
                    return Err(fail("expected a non-empty answer"));
                }
                Ok(FieldValue::Text(text.to_string()))
            }
            FieldValidator::Integer { min, max } => {
                // Models sometimes return numbers as strings; accept both.
                let value = match raw {
                    serde_json::Value::Number(n) => n.as_i64(),
                    serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                let value = value.ok_or_else(|| fail("expected a whole number"))?;
                if value < *min || value > *max {
                    return Err(fail(&format!("expected a number between {min} and {max}")));
                }
                Ok(FieldValue::Integer(value))
            }
            FieldValidator::Phone => {
                let text = raw.as_str().map(str::trim).unwrap_or_default();
                let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
                let shape_ok = text
                    .chars()
                    .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'));
                if digits < 7 || !shape_ok {
                    return Err(fail("expected a phone number"));
                }
                Ok(FieldValue::Text(text.to_string()))
            }
            FieldValidator::OneOf { options } => {
                let text = raw.as_str().map(str::trim).unwrap_or_default();
                options
                    .iter()
                    .find(|o| o.eq_ignore_ascii_case(text))
                    .map(|o| FieldValue::Text(o.clone()))
                    .ok_or_else(|| fail(&format!("expected one of: {}", options.join(", "))))
            }
        }
    }
}

/// One field of a category's interview schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name (unique within the schema)
    pub name: String,

    /// Shown to the citizen when the field is requested
    pub description: String,

    /// Required fields gate completion; optional fields are asked once
    #[serde(default)]
    pub required: bool,

    /// Validation rule; invalid answers are discarded, never stored
    #[serde(default = "default_validator")]
    pub validator: FieldValidator,
}

fn default_validator() -> FieldValidator {
    FieldValidator::NonEmpty
}

/// The full interview schema for one emergency category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencySchema {
    pub category: Category,
    pub fields: Vec<FieldDef>,
}

impl EmergencySchema {
    /// Parse a schema from YAML content.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let schema: Self = serde_yaml::from_str(content)?;
        schema.validate_definition()?;
        Ok(schema)
    }

    /// Check the definition itself: names unique and non-empty, at least
    /// one required field.
    pub fn validate_definition(&self) -> anyhow::Result<()> {
        if !self.fields.iter().any(|f| f.required) {
            anyhow::bail!(
                "schema for '{}' must declare at least one required field",
                self.category
            );
        }
        for (i, field) in self.fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                anyhow::bail!("schema for '{}': field {} has an empty name", self.category, i);
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                anyhow::bail!(
                    "schema for '{}': duplicate field '{}'",
                    self.category,
                    field.name
                );
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// True if `name` belongs to this schema.
    pub fn declares(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Required fields not yet present in `collected`, in schema order.
    pub fn missing_required<'a>(&'a self, collected: &FieldMap) -> Vec<&'a FieldDef> {
        self.fields
            .iter()
            .filter(|f| f.required && !collected.contains_key(&f.name))
            .collect()
    }

    /// Optional fields not yet collected, in schema order.
    pub fn missing_optional<'a>(&'a self, collected: &FieldMap) -> Vec<&'a FieldDef> {
        self.fields
            .iter()
            .filter(|f| !f.required && !collected.contains_key(&f.name))
            .collect()
    }

    /// A report is complete when every required field is present.
    pub fn is_complete(&self, collected: &FieldMap) -> bool {
        self.missing_required(collected).is_empty()
    }
}

/// Immutable registry of schemas, one per category. Built once at startup.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: Vec<EmergencySchema>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SchemaRegistry {
    /// The built-in schemas for the four stock categories.
    pub fn builtin() -> Self {
        Self {
            schemas: vec![
                medical_schema(),
                police_schema(),
                electricity_schema(),
                fire_schema(),
            ],
        }
    }

    /// Replace one category's schema (e.g. loaded from a YAML override).
    pub fn with_override(mut self, schema: EmergencySchema) -> Self {
        self.schemas.retain(|s| s.category != schema.category);
        self.schemas.push(schema);
        self
    }

    pub fn get(&self, category: Category) -> &EmergencySchema {
        // builtin() covers every category, and with_override only replaces
        self.schemas
            .iter()
            .find(|s| s.category == category)
            .unwrap_or_else(|| panic!("no schema registered for category {category}"))
    }
}

fn text(name: &str, description: &str, required: bool) -> FieldDef {
    FieldDef {
        name: name.to_string(),
        description: description.to_string(),
        required,
        validator: FieldValidator::NonEmpty,
    }
}

fn medical_schema() -> EmergencySchema {
    let mut fields = vec![
        text("patient_name", "the patient's name", true),
        FieldDef {
            name: "patient_age".to_string(),
            description: "the patient's age".to_string(),
            required: true,
            validator: FieldValidator::Integer { min: 0, max: 130 },
        },
        text("symptoms", "what symptoms the patient is showing", true),
        text("location_address", "the address where the patient is", true),
    ];
    fields.extend([
        FieldDef {
            name: "patient_phone".to_string(),
            description: "a phone number to reach the patient".to_string(),
            required: false,
            validator: FieldValidator::Phone,
        },
        text("allergies", "any known allergies", false),
        text("medications", "medications the patient is taking", false),
        text("contact_person", "an emergency contact person", false),
        FieldDef {
            name: "urgency_level".to_string(),
            description: "how urgent the situation is (severe, moderate, minor)".to_string(),
            required: false,
            validator: FieldValidator::OneOf {
                options: vec!["severe".into(), "moderate".into(), "minor".into()],
            },
        },
    ]);
    EmergencySchema {
        category: Category::Medical,
        fields,
    }
}

fn police_schema() -> EmergencySchema {
    EmergencySchema {
        category: Category::Police,
        fields: vec![
            text("incident_type", "what kind of incident occurred", true),
            text("incident_time", "when the incident occurred", true),
            text("incident_location", "where the incident occurred", true),
            text("description", "a description of what happened", true),
            text("reporter_name", "your name", false),
            FieldDef {
                name: "reporter_phone".to_string(),
                description: "a phone number to reach you".to_string(),
                required: false,
                validator: FieldValidator::Phone,
            },
            text("suspect_details", "any details about the suspect", false),
        ],
    }
}

fn electricity_schema() -> EmergencySchema {
    EmergencySchema {
        category: Category::Electricity,
        fields: vec![
            text("location", "the address of the electrical issue", true),
            text("hazard_type", "the kind of hazard (downed line, sparking, outage)", true),
            text(
                "outage_scope",
                "how widespread the issue is (one building, street, neighborhood)",
                true,
            ),
            text("reporter_name", "your name", false),
            FieldDef {
                name: "reporter_phone".to_string(),
                description: "a phone number to reach you".to_string(),
                required: false,
                validator: FieldValidator::Phone,
            },
            text("time_started", "when the issue started", false),
            text("description", "anything else we should know", false),
        ],
    }
}

fn fire_schema() -> EmergencySchema {
    EmergencySchema {
        category: Category::Fire,
        fields: vec![
            text("location", "the address of the fire", true),
            text("hazard", "what is burning and whether anyone is in danger", true),
            text("people_at_risk", "how many people are at risk", false),
            FieldDef {
                name: "reporter_phone".to_string(),
                description: "a phone number to reach you".to_string(),
                required: false,
                validator: FieldValidator::Phone,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_schemas_are_valid() {
        for schema in SchemaRegistry::builtin().schemas {
            schema.validate_definition().unwrap();
        }
    }

    #[test]
    fn test_every_category_has_a_schema() {
        let registry = SchemaRegistry::builtin();
        for cat in Category::ALL {
            assert_eq!(registry.get(cat).category, cat);
        }
    }

    #[test]
    fn test_integer_validator_rejects_non_numeric() {
        let v = FieldValidator::Integer { min: 0, max: 130 };
        assert!(v.validate("patient_age", &json!("forty-ish")).is_err());
        assert!(v.validate("patient_age", &json!(200)).is_err());
        assert_eq!(
            v.validate("patient_age", &json!("42")).unwrap(),
            FieldValue::Integer(42)
        );
        assert_eq!(
            v.validate("patient_age", &json!(7)).unwrap(),
            FieldValue::Integer(7)
        );
    }

    #[test]
    fn test_phone_validator() {
        let v = FieldValidator::Phone;
        assert!(v.validate("phone", &json!("+1 (555) 123-4567")).is_ok());
        assert!(v.validate("phone", &json!("call me maybe")).is_err());
        assert!(v.validate("phone", &json!("12345")).is_err());
    }

    #[test]
    fn test_one_of_is_case_insensitive() {
        let v = FieldValidator::OneOf {
            options: vec!["severe".into(), "moderate".into(), "minor".into()],
        };
        assert_eq!(
            v.validate("urgency_level", &json!("Severe")).unwrap(),
            FieldValue::Text("severe".into())
        );
        assert!(v.validate("urgency_level", &json!("catastrophic")).is_err());
    }

    #[test]
    fn test_missing_required_in_schema_order() {
        let schema = medical_schema();
        let mut collected = FieldMap::new();
        collected.insert("symptoms".into(), FieldValue::Text("chest pain".into()));

        let missing: Vec<&str> = schema
            .missing_required(&collected)
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(missing, ["patient_name", "patient_age", "location_address"]);
        assert!(!schema.is_complete(&collected));
    }

    #[test]
    fn test_schema_from_yaml() {
        let yaml = r#"
category: fire
fields:
  - name: location
    description: the address of the fire
    required: true
  - name: hazard
    description: what is burning
    required: true
    validator:
      kind: non_empty
"#;
        let schema = EmergencySchema::from_yaml(yaml).unwrap();
        assert_eq!(schema.category, Category::Fire);
        assert_eq!(schema.fields.len(), 2);
        assert!(schema.fields.iter().all(|f| f.required));
    }

    #[test]
    fn test_registry_override_replaces_category() {
        let slim = EmergencySchema {
            category: Category::Fire,
            fields: vec![FieldDef {
                name: "location".into(),
                description: "the address of the fire".into(),
                required: true,
                validator: FieldValidator::NonEmpty,
            }],
        };
        let registry = SchemaRegistry::builtin().with_override(slim);

        assert_eq!(registry.get(Category::Fire).fields.len(), 1);
        // Other categories untouched.
        assert!(registry.get(Category::Medical).fields.len() > 1);
    }

    #[test]
    fn test_schema_rejects_duplicate_fields() {
        let yaml = r#"
category: fire
fields:
  - name: location
    description: a
    required: true
  - name: location
    description: b
"#;
        assert!(EmergencySchema::from_yaml(yaml).is_err());
    }
}
