use csv::{ReaderBuilder, Terminator, WriterBuilder};
use serde_json::Value;

pub const DELIMITER: u8 = b';';
pub const MISSING_VALUE: &str = "N/A";

/// Cell text for one prediction value. Nested values are written as compact
/// JSON with double quotes turned into single quotes.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string().replace('"', "'"),
    }
}

/// Reader for `;`-delimited tables with a header row. Rows may be ragged.
pub fn table_reader() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.delimiter(DELIMITER).has_headers(true).flexible(true);
    builder
}

pub fn table_writer() -> WriterBuilder {
    let mut builder = WriterBuilder::new();
    builder
        .delimiter(DELIMITER)
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'));
    builder
}
