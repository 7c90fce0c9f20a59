use serde::Serialize;
use serde_json::Value;

use crate::store::GeneratedCodes;

/// Model keys downstream consumers can rely on.
pub const MODEL_KEYS: [&str; 3] = ["gemini", "chatgpt", "claude"];

/// Older agent builds label the gemini answer `original`.
const LEGACY_GEMINI_KEY: &str = "original";

/// Body of the analyze RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzeRequest {
    pub question: String,
    pub language: String,
    pub user_code: String,
    pub gemini_code: String,
    pub chatgpt_code: String,
    pub claude_code: String,
}

impl AnalyzeRequest {
    pub fn new(question: &str, language: &str, user_code: &str, codes: &GeneratedCodes) -> Self {
        let code_for = |key: &str| codes.get(key).cloned().unwrap_or_default();

        Self {
            question: question.to_string(),
            language: language.to_string(),
            user_code: user_code.to_string(),
            gemini_code: codes
                .get("gemini")
                .or_else(|| codes.get(LEGACY_GEMINI_KEY))
                .cloned()
                .unwrap_or_default(),
            chatgpt_code: code_for("chatgpt"),
            claude_code: code_for("claude"),
        }
    }
}

/// Map provider naming drift onto [`MODEL_KEYS`] in an analysis report.
pub fn normalize_analysis(report: &mut Value) {
    if let Some(codes) = report.get_mut("generated_codes").and_then(Value::as_object_mut) {
        if !codes.contains_key("gemini") {
            if let Some(original) = codes.get(LEGACY_GEMINI_KEY).cloned() {
                codes.insert("gemini".to_string(), original);
            }
        }
    }

    if let Some(lines) = report.get_mut("similar_lines").and_then(Value::as_object_mut) {
        if !lines.contains_key("gemini_vs_user") {
            if let Some(original) = lines.get("original_vs_user").cloned() {
                lines.insert("gemini_vs_user".to_string(), original);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_prefers_gemini_then_original() {
        let mut codes = GeneratedCodes::new();
        codes.insert("original".into(), "legacy".into());
        codes.insert("claude".into(), "claude answer".into());

        let request = AnalyzeRequest::new("q", "python", "mine", &codes);
        assert_eq!(request.gemini_code, "legacy");
        assert_eq!(request.claude_code, "claude answer");
        assert_eq!(request.chatgpt_code, "");

        codes.insert("gemini".into(), "modern".into());
        let request = AnalyzeRequest::new("q", "python", "mine", &codes);
        assert_eq!(request.gemini_code, "modern");
    }

    #[test]
    fn test_normalize_maps_original_keys() {
        let mut report = json!({
            "generated_codes": { "original": "a", "chatgpt": "b" },
            "similar_lines": { "original_vs_user": [1, 2] }
        });

        normalize_analysis(&mut report);

        assert_eq!(report["generated_codes"]["gemini"], "a");
        assert_eq!(report["similar_lines"]["gemini_vs_user"], json!([1, 2]));
    }

    #[test]
    fn test_normalize_keeps_existing_gemini() {
        let mut report = json!({
            "generated_codes": { "original": "old", "gemini": "new" },
            "similar_lines": { "original_vs_user": [1], "gemini_vs_user": [9] }
        });

        normalize_analysis(&mut report);

        assert_eq!(report["generated_codes"]["gemini"], "new");
        assert_eq!(report["similar_lines"]["gemini_vs_user"], json!([9]));
    }

    #[test]
    fn test_normalize_tolerates_missing_sections() {
        let mut report = json!({ "verdict": "original" });
        normalize_analysis(&mut report);
        assert_eq!(report, json!({ "verdict": "original" }));
    }
}
