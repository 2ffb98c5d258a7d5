use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// What a model client hands back: free text, or a value some client already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum RawModelResponse {
    Text(String),
    Structured(Value),
}

impl From<String> for RawModelResponse {
    fn from(text: String) -> Self {
        RawModelResponse::Text(text)
    }
}

impl From<&str> for RawModelResponse {
    fn from(text: &str) -> Self {
        RawModelResponse::Text(text.to_string())
    }
}

impl From<Value> for RawModelResponse {
    fn from(value: Value) -> Self {
        RawModelResponse::Structured(value)
    }
}

/// Decodes the span from the first `{` to the last `}`. No repair is attempted:
/// `None` means the caller should ask again.
pub fn extract_prediction(raw: &RawModelResponse) -> Option<Map<String, Value>> {
    static JSON_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

    match raw {
        RawModelResponse::Structured(Value::Object(map)) => Some(map.clone()),
        RawModelResponse::Structured(_) => None,
        RawModelResponse::Text(text) => {
            let span = JSON_SPAN.find(text)?;
            match serde_json::from_str::<Value>(span.as_str()) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_object_wrapped_in_prose() {
        let raw = RawModelResponse::from(r#"Sure! {"gram_staining": "positive", "motility": "motile"} Hope this helps."#);
        let parsed = extract_prediction(&raw).unwrap();
        let direct: Value = serde_json::from_str(r#"{"gram_staining": "positive", "motility": "motile"}"#).unwrap();
        assert_eq!(Value::Object(parsed), direct);
    }

    #[test]
    fn extracts_from_code_fence_across_lines() {
        let raw = RawModelResponse::from("```json\n{\n  \"cell_shape\": \"rod\",\n  \"traits\": {\"spore\": true}\n}\n```");
        let parsed = extract_prediction(&raw).unwrap();
        assert_eq!(parsed["cell_shape"], json!("rod"));
        assert_eq!(parsed["traits"], json!({"spore": true}));
    }

    #[test]
    fn keeps_decoded_key_order() {
        let raw = RawModelResponse::from(r#"{"z": 1, "a": 2, "m": 3}"#);
        let keys: Vec<String> = extract_prediction(&raw).unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn unparsable_text_yields_none() {
        for text in [
            "no json here",
            "{not json}",
            r#"{"a": 1} and then {"b": 2}"#,
            "} backwards {",
            "",
        ] {
            assert!(extract_prediction(&RawModelResponse::from(text)).is_none(), "{text:?}");
        }
    }

    #[test]
    fn structured_objects_pass_through() {
        let value = json!({"motility": "motile"});
        let parsed = extract_prediction(&RawModelResponse::from(value.clone())).unwrap();
        assert_eq!(Value::Object(parsed), value);
        assert!(extract_prediction(&RawModelResponse::from(json!([1, 2]))).is_none());
    }
}
