//! HTTP-variant tool backend.
//!
//! URL, headers, and body support `{{input.field}}` placeholder
//! templating, resolved against the tool call's own input map.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{EngineError, Result};
use crate::tools::ToolBackend;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*input\.([a-zA-Z0-9_]+)\s*\}\}").expect("valid regex"));

/// Replace every `{{input.field}}` occurrence in `template` with the
/// stringified value of `input[field]` (missing fields become an empty
/// string, matching the tolerant style of the grounding crate's own
/// placeholder resolver).
pub fn resolve_placeholders(template: &str, input: &HashMap<String, serde_json::Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            let field = &caps[1];
            match input.get(field) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            }
        })
        .into_owned()
}

/// Issues one HTTP request per invocation with a templated body.
pub struct HttpTool {
    client: reqwest::Client,
    method: reqwest::Method,
    url: String,
    headers: HashMap<String, String>,
    body_template: Option<String>,
}

impl HttpTool {
    pub fn new(
        client: reqwest::Client,
        method: reqwest::Method,
        url: impl Into<String>,
        headers: HashMap<String, String>,
        body_template: Option<String>,
    ) -> Self {
        Self {
            client,
            method,
            url: url.into(),
            headers,
            body_template,
        }
    }
}

#[async_trait]
impl ToolBackend for HttpTool {
    async fn invoke(&self, input: &HashMap<String, serde_json::Value>) -> Result<String> {
        let url = resolve_placeholders(&self.url, input);
        let mut request = self.client.request(self.method.clone(), url);

        for (key, value) in &self.headers {
            request = request.header(key, resolve_placeholders(value, input));
        }
        if let Some(template) = &self.body_template {
            request = request.body(resolve_placeholders(template, input));
        }

        let response = request.send().await.map_err(|e| EngineError::ToolDispatchFailed {
            tool_name: self.url.clone(),
            reason: format!("request failed: {e}"),
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(EngineError::ToolDispatchFailed {
                tool_name: self.url.clone(),
                reason: format!("HTTP {}: {}", status.as_u16(), text),
            });
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_field() {
        let mut input = HashMap::new();
        input.insert("city".to_owned(), serde_json::json!("Boston"));
        let resolved = resolve_placeholders("https://api.example.com/weather/{{input.city}}", &input);
        assert_eq!(resolved, "https://api.example.com/weather/Boston");
    }

    #[test]
    fn missing_field_resolves_to_empty_string() {
        let input = HashMap::new();
        let resolved = resolve_placeholders("prefix-{{input.missing}}-suffix", &input);
        assert_eq!(resolved, "prefix--suffix");
    }

    #[test]
    fn non_string_values_are_stringified() {
        let mut input = HashMap::new();
        input.insert("count".to_owned(), serde_json::json!(42));
        let resolved = resolve_placeholders("n={{input.count}}", &input);
        assert_eq!(resolved, "n=42");
    }
}
