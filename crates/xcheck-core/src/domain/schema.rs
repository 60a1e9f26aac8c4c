//! Extraction schema: the ordered list of fields every agent is asked for.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::{ConfigResult, ConfigurationError};

/// Declared type of a schema field; selects the normalization and matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum DataType {
    Text,
    Number,
    Date,
    Boolean,
    List,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Text,
        DataType::Number,
        DataType::Date,
        DataType::Boolean,
        DataType::List,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Number => "number",
            DataType::Date => "date",
            DataType::Boolean => "boolean",
            DataType::List => "list",
        }
    }

    /// Parse a data-type label as written in schema sheets.
    ///
    /// Accepts the English names (case-insensitive, plus `bool` / `string`
    /// aliases) and the Korean labels (`텍스트`, `숫자`, `날짜`, `불린`, `리스트`).
    pub fn from_label(label: &str) -> Option<Self> {
        let trimmed = label.trim();
        let lowered = trimmed.to_lowercase();
        match lowered.as_str() {
            "text" | "string" | "텍스트" => Some(DataType::Text),
            "number" | "numeric" | "숫자" => Some(DataType::Number),
            "date" | "날짜" => Some(DataType::Date),
            "boolean" | "bool" | "불린" => Some(DataType::Boolean),
            "list" | "array" | "리스트" => Some(DataType::List),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        DataType::from_label(s).ok_or_else(|| ConfigurationError::UnknownDataType {
            label: s.to_string(),
        })
    }
}

impl TryFrom<String> for DataType {
    type Error = ConfigurationError;

    fn try_from(value: String) -> ConfigResult<Self> {
        value.parse()
    }
}

/// One field to extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub data_type: DataType,
    /// Free-text hint forwarded to agents; never enforced by the engine.
    #[serde(default, alias = "validation", skip_serializing_if = "Option::is_none")]
    pub validation_rule: Option<String>,
    /// Report section the field belongs to, used to group prompt instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            data_type,
            validation_rule: None,
            category: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_validation_rule(mut self, rule: impl Into<String>) -> Self {
        self.validation_rule = Some(rule.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Validated, ordered field list.
///
/// # Invariants
///
/// At least one field; every name non-empty and unique. Construction goes
/// through [`Schema::new`] (or deserialization, which calls it), so a `Schema`
/// value handed to the engine is always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SchemaField>", into = "Vec<SchemaField>")]
pub struct Schema {
    fields: Vec<SchemaField>,
}

impl Schema {
    pub fn new(fields: Vec<SchemaField>) -> ConfigResult<Self> {
        if fields.is_empty() {
            return Err(ConfigurationError::EmptySchema);
        }

        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if field.name.trim().is_empty() {
                return Err(ConfigurationError::EmptyFieldName);
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ConfigurationError::DuplicateField(field.name.clone()));
            }
        }

        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl TryFrom<Vec<SchemaField>> for Schema {
    type Error = ConfigurationError;

    fn try_from(fields: Vec<SchemaField>) -> ConfigResult<Self> {
        Schema::new(fields)
    }
}

impl From<Schema> for Vec<SchemaField> {
    fn from(schema: Schema) -> Self {
        schema.fields
    }
}
