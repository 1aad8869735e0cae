//! Prompt template for table-to-JSON normalisation.
//!
//! Centralising the prompt here keeps [`crate::pipeline::llm`] free of prompt
//! text and lets unit tests inspect the exact string sent to the model.

/// Shape the model is asked to imitate. Arm keys are placeholders; the real
/// keys are built from treatment, frequency and n-count in the table header.
pub const SCHEMA_HINT: &str = r#"{
  "output": [
    {
      "<arm_key_like_ABBV154_150mg_Q2W_n94>": "<value string>",
      "<arm_key>_significance": "<optional significance e.g. P < 0.01>",
      "PBO_n96": "<placebo value>",
      "assessment": "<row assessment>",
      "outcome_type": "<row group context>"
    }
  ]
}"#;

const REQUIREMENTS: &str = r#"Requirements:
1. Return ONLY valid JSON, no markdown, no commentary.
2. Keep values as strings exactly as present.
3. Build dynamic arm keys using treatment, frequency and n-count.
   Example: ABBV154_150mg_Q2W_n94
4. Include *_significance keys when footnote markers indicate significance.
5. Preserve one JSON object per assessment row.
6. Include fields: assessment, outcome_type, placebo arm key if present.
7. If uncertain, keep best effort and do not invent impossible values."#;

/// Build the completion prompt from both OCR views of the table.
///
/// The markdown approximation carries the recovered grid structure; the raw
/// text is the whole-image fallback for cells the grid detector missed.
pub fn build_prompt(markdown_table: &str, raw_text: &str, title_hint: Option<&str>) -> String {
    let title = title_hint
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("N/A");
    format!(
        "You are a precise table-to-JSON parser.\n\
         \n\
         Goal:\n\
         Convert OCR'ed clinical table content to a JSON array similar to this schema:\n\
         {SCHEMA_HINT}\n\
         \n\
         {REQUIREMENTS}\n\
         \n\
         Table title hint: {title}\n\
         \n\
         OCR table (markdown approximation):\n\
         {markdown_table}\n\
         \n\
         Raw OCR text:\n\
         {raw_text}"
    )
    .trim()
    .to_string()
}
