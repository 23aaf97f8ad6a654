// All LLM prompt text for review analysis lives here.
// Reuses the JSON-only fragment from llm_client::prompts.

use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::models::review::ReviewRecord;

const ANALYSIS_ROLE: &str = "You are a product quality engineer reading customer reviews. \
    Your job is to find concrete product problems, above all hardware defects, \
    and report each one as a structured finding.";

/// Analysis prompt template. Replace `{review_count}` and `{reviews}` before sending.
pub const ANALYSIS_PROMPT_TEMPLATE: &str = r#"Analyze the {review_count} customer review(s) below and extract every concrete product finding.

Return a JSON array. Each element MUST have this EXACT schema (no extra fields):
[
  {
    "source_row": 3,
    "category": "hardware-fault",
    "component": "battery",
    "summary": "Battery drains from full to empty overnight while idle",
    "confidence": 0.9
  }
]

Rules:
- "source_row" is the row number of the <review> the finding comes from. Copy it exactly.
- "category" is one of: "hardware-fault", "software-bug", "performance", "usability",
  "packaging-shipping", "customer-service", "praise", "other".
- "component" names the affected part or feature in a few words (e.g. "battery", "hinge", "charging port", "app").
- "summary" is one factual sentence in English, even when the review is in another language.
- "confidence" is a number between 0.0 and 1.0 saying how clearly the review supports the finding.
- A review may produce several findings or none. Do NOT invent problems the text does not mention.
- If no review contains a finding, return [].

REVIEWS:
{reviews}"#;

/// System instruction sent with every analysis request.
pub fn analysis_system() -> String {
    format!("{ANALYSIS_ROLE} {JSON_ONLY_SYSTEM}")
}

/// Builds the user prompt for one batch of reviews. Pure transform.
pub fn build_prompt(batch: &[ReviewRecord]) -> String {
    let reviews = batch
        .iter()
        .map(format_review)
        .collect::<Vec<_>>()
        .join("\n\n");

    ANALYSIS_PROMPT_TEMPLATE
        .replace("{review_count}", &batch.len().to_string())
        .replace("{reviews}", &reviews)
}

fn format_review(record: &ReviewRecord) -> String {
    format!(
        "<review row=\"{}\">\n{}\n</review>",
        record.row_index, record.raw_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(row_index: u64, text: &str) -> ReviewRecord {
        ReviewRecord {
            row_index,
            raw_text: text.to_string(),
        }
    }

    #[test]
    fn test_prompt_embeds_each_review_with_row_number() {
        let batch = vec![
            review(1, "The hinge cracked after two weeks"),
            review(4, "Fan is very loud under load"),
        ];
        let prompt = build_prompt(&batch);
        assert!(prompt.contains("<review row=\"1\">\nThe hinge cracked after two weeks\n</review>"));
        assert!(prompt.contains("<review row=\"4\">\nFan is very loud under load\n</review>"));
        assert!(prompt.contains("Analyze the 2 customer review(s)"));
    }

    #[test]
    fn test_prompt_has_no_unfilled_placeholders() {
        let prompt = build_prompt(&[review(1, "ok")]);
        assert!(!prompt.contains("{reviews}"));
        assert!(!prompt.contains("{review_count}"));
    }

    #[test]
    fn test_prompt_names_every_schema_field() {
        let prompt = build_prompt(&[review(1, "ok")]);
        for field in ["source_row", "category", "component", "summary", "confidence"] {
            assert!(prompt.contains(field), "missing field {field}");
        }
    }

    #[test]
    fn test_reviews_keep_input_order() {
        let prompt = build_prompt(&[review(2, "second"), review(7, "seventh")]);
        let second = prompt.find("row=\"2\"").unwrap();
        let seventh = prompt.find("row=\"7\"").unwrap();
        assert!(second < seventh);
    }

    #[test]
    fn test_build_prompt_is_deterministic() {
        let batch = vec![review(1, "Screen flickers")];
        assert_eq!(build_prompt(&batch), build_prompt(&batch));
    }

    #[test]
    fn test_system_instruction_demands_json() {
        let system = analysis_system();
        assert!(system.contains("valid JSON only"));
        assert!(system.contains("hardware defects"));
    }
}
