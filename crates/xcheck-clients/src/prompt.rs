//! Extraction prompt construction.
//!
//! Every provider receives the same prompt: the schema fields grouped by
//! category, the (truncated) report text, extraction rules and a JSON
//! skeleton of the expected answer.

use std::fmt::Write as _;

use xcheck_core::{DataType, Document, Schema, SchemaField};

/// Report characters sent to the model; the remainder is dropped.
pub const DEFAULT_MAX_DOCUMENT_CHARS: usize = 15_000;

pub const SYSTEM_PROMPT: &str = "You are an expert at extracting data accurately from \
business reports. Always answer with a single JSON object and nothing else.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBuilder {
    max_document_chars: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DOCUMENT_CHARS)
    }
}

impl PromptBuilder {
    pub fn new(max_document_chars: usize) -> Self {
        Self { max_document_chars }
    }

    pub fn max_document_chars(&self) -> usize {
        self.max_document_chars
    }

    pub fn build(&self, schema: &Schema, document: &Document) -> String {
        let mut prompt = String::new();
        prompt.push_str("# Report data extraction\n\n");
        prompt.push_str("Extract the data for the fields defined below from the report.\n\n");
        prompt.push_str("## Fields to extract\n");
        prompt.push_str(&field_definitions(schema));
        prompt.push_str("\n\n## Report\n\n");
        prompt.push_str(truncate_chars(document.as_str(), self.max_document_chars));
        prompt.push_str("\n\n");
        prompt.push_str(INSTRUCTIONS);
        prompt.push_str("\n## Output format\n\n");
        prompt.push_str(
            "Answer with JSON shaped exactly like this. Every field is an object with \
             `value` and `source`, and `source` names the page:\n\n",
        );
        prompt.push_str(&json_example(schema));
        prompt.push_str("\n\nOutput pure JSON only, without explanations or comments.\n");
        prompt
    }
}

const INSTRUCTIONS: &str = "## Instructions

1. Find the information for each field in the report and extract it exactly.
2. Use null when the report does not state the information.
3. For every field return both the value (`value`) and its evidence (`source`).
   - `value`: the data value itself
   - `source`: the sentence, section or page where the value was found. Use the
     `[PAGE n]` markers in the text and always include the page number.
4. Convert values to the field's data type:
   - text: a string
   - number: a JSON number without thousands separators
   - date: \"YYYY-MM-DD\"
   - boolean: true or false
   - list: a JSON array
5. Follow the validation rule whenever a field has one.
6. Do not guess. Extract only what the report states.
";

fn field_definitions(schema: &Schema) -> String {
    let groups = group_by_category(schema.fields());
    let multiple = groups.len() > 1;
    let mut out = String::new();

    for (category, fields) in &groups {
        match category {
            Some(category) => {
                let _ = write!(
                    out,
                    "\n### Context: {category}\n\
                     First locate the section of the report about '{category}'. \
                     The following fields must be read from within that context:\n"
                );
            }
            None if multiple => out.push_str("\n### General fields (search the whole report)\n"),
            None => {}
        }
        for field in fields {
            let _ = write!(
                out,
                "\n- **{}**\n  - description: {}\n  - data type: {}",
                field.name, field.description, field.data_type
            );
            if let Some(rule) = &field.validation_rule {
                let _ = write!(out, "\n  - validation rule: {rule}");
            }
        }
        out.push('\n');
    }
    out
}

/// Groups in order of first appearance; uncategorized fields share one group.
fn group_by_category(fields: &[SchemaField]) -> Vec<(Option<&str>, Vec<&SchemaField>)> {
    let mut groups: Vec<(Option<&str>, Vec<&SchemaField>)> = Vec::new();
    for field in fields {
        let category = field.category.as_deref().filter(|c| !c.trim().is_empty());
        match groups.iter_mut().find(|(c, _)| *c == category) {
            Some((_, members)) => members.push(field),
            None => groups.push((category, vec![field])),
        }
    }
    groups
}

fn json_example(schema: &Schema) -> String {
    let entries: Vec<String> = schema
        .fields()
        .iter()
        .map(|field| {
            let value = match field.data_type {
                DataType::Number => "0",
                DataType::Boolean => "true",
                DataType::List => r#"["item1", "item2"]"#,
                DataType::Text | DataType::Date => r#""extracted value""#,
            };
            format!(
                "  {}: {{\n    \"value\": {value},\n    \"source\": \"page and sentence where the value was found\"\n  }}",
                serde_json::Value::String(field.name.clone())
            )
        })
        .collect();
    format!("{{\n{}\n}}", entries.join(",\n"))
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            SchemaField::new("revenue", DataType::Number)
                .with_description("Annual revenue")
                .with_category("Financials")
                .with_validation_rule("KRW, millions"),
            SchemaField::new("ceo", DataType::Text).with_description("Chief executive"),
            SchemaField::new("net_income", DataType::Number).with_category("Financials"),
            SchemaField::new("listed", DataType::Boolean),
            SchemaField::new("auditors", DataType::List),
        ])
        .unwrap()
    }

    #[test]
    fn test_fields_grouped_by_first_seen_category() {
        let prompt = PromptBuilder::default().build(&schema(), &Document::from("body"));
        let financials = prompt.find("### Context: Financials").unwrap();
        let general = prompt.find("### General fields").unwrap();
        let revenue = prompt.find("- **revenue**").unwrap();
        let net_income = prompt.find("- **net_income**").unwrap();
        let ceo = prompt.find("- **ceo**").unwrap();

        assert!(financials < revenue && revenue < net_income);
        assert!(net_income < general && general < ceo);
        assert!(prompt.contains("  - validation rule: KRW, millions"));
    }

    #[test]
    fn test_single_uncategorized_group_has_no_heading() {
        let schema = Schema::new(vec![SchemaField::new("ceo", DataType::Text)]).unwrap();
        let prompt = PromptBuilder::default().build(&schema, &Document::from("body"));
        assert!(!prompt.contains("### General fields"));
        assert!(!prompt.contains("### Context"));
    }

    #[test]
    fn test_json_example_uses_type_specific_values() {
        let example = json_example(&schema());
        let parsed: serde_json::Value = serde_json::from_str(&example).unwrap();
        assert_eq!(parsed["revenue"]["value"], 0);
        assert_eq!(parsed["listed"]["value"], true);
        assert_eq!(parsed["auditors"]["value"][1], "item2");
        assert_eq!(parsed["ceo"]["value"], "extracted value");
    }

    #[test]
    fn test_document_truncated_on_char_boundary() {
        let builder = PromptBuilder::new(4);
        let prompt = builder.build(&schema(), &Document::from("매출액은 120억원"));
        assert!(prompt.contains("\n매출액은\n"));
        assert!(!prompt.contains("120억원"));
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
