//! Prompt construction and response parsing for chunk classification.

use serde::Deserialize;

use crate::chunk::Chunk;
use crate::error::{ClassifyError, Result};
use crate::models::{DomainGroup, Taxonomy};

/// Anchor domains listed in a prompt are capped to keep prompts bounded.
const MAX_ANCHOR_DOMAINS: usize = 60;
const MAX_ANCHOR_FEATURES: usize = 12;

pub const SYSTEM_PROMPT: &str = r#"You are a test-suite analyst. You group automated tests into a business taxonomy: DOMAINS (top-level business areas such as "Authentication" or "Billing") containing FEATURES (specific capabilities such as "Login" or "Invoice Export") containing tests.

## Rules

1. Every test is identified by its numeric index in square brackets.
2. Assign EVERY listed index to exactly ONE feature. Do not skip indices and do not invent indices.
3. Name domains after business capabilities, not technical layers ("Checkout", not "Controllers").
4. When existing domains are provided, reuse their exact names for matching tests instead of inventing synonyms.
5. Never use catch-all names such as "General", "Misc" or "Uncategorized".

## Response Format

Return ONLY a JSON object (no markdown, no explanation):
{
  "domains": [
    {
      "name": "Authentication",
      "description": "User identity and session management",
      "confidence": 0.92,
      "features": [
        {
          "name": "Login",
          "description": "Credential-based sign in",
          "confidence": 0.9,
          "testIndices": [0, 1, 4]
        }
      ]
    }
  ]
}

Confidence is a number between 0 and 1."#;

/// Build the user prompt for one reindexed chunk.
pub fn build_chunk_prompt(chunk: &Chunk, language: &str, anchors: &[DomainGroup]) -> String {
    let total = chunk.test_count();
    let mut prompt = format!("Language: {}\n\n", language);

    if !anchors.is_empty() {
        prompt.push_str("Existing domains (reuse these names where they fit):\n");
        for domain in anchors.iter().take(MAX_ANCHOR_DOMAINS) {
            let features: Vec<&str> = domain
                .features
                .iter()
                .take(MAX_ANCHOR_FEATURES)
                .map(|f| f.name.as_str())
                .collect();
            if features.is_empty() {
                prompt.push_str(&format!("- {}\n", domain.name));
            } else {
                prompt.push_str(&format!("- {}: {}\n", domain.name, features.join(", ")));
            }
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("Classify these {} tests:\n\n", total));
    for file in &chunk.files {
        prompt.push_str(&format!("File: {}\n", file.path));
        for test in &file.tests {
            if test.suite_path.is_empty() {
                prompt.push_str(&format!("  [{}] {}\n", test.index, test.name));
            } else {
                prompt.push_str(&format!(
                    "  [{}] {} > {}\n",
                    test.index, test.suite_path, test.name
                ));
            }
        }
        prompt.push('\n');
    }

    if total > 0 {
        prompt.push_str(&format!(
            "Return JSON covering every index from 0 to {} exactly once.",
            total - 1
        ));
    }
    prompt
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaxonomyShape {
    Object(Taxonomy),
    Bare(Vec<DomainGroup>),
}

/// Parse the provider's text into a [`Taxonomy`].
///
/// Accepts a `{"domains": [...]}` object or a bare array of domains, with or
/// without markdown code fences. Confidence values are clamped to `[0, 1]`.
pub fn parse_taxonomy(raw: &str) -> Result<Taxonomy> {
    let cleaned = strip_markdown_json(raw);
    if cleaned.is_empty() {
        return Err(ClassifyError::MalformedResponse(
            "empty response body".to_string(),
        ));
    }

    let shape: TaxonomyShape = serde_json::from_str(&cleaned)
        .map_err(|e| ClassifyError::MalformedResponse(format!("JSON parse failed: {}", e)))?;

    let mut taxonomy = match shape {
        TaxonomyShape::Object(t) => t,
        TaxonomyShape::Bare(domains) => Taxonomy::new(domains),
    };

    for domain in &mut taxonomy.domains {
        domain.name = domain.name.trim().to_string();
        domain.confidence = clamp_confidence(domain.confidence);
        for feature in &mut domain.features {
            feature.name = feature.name.trim().to_string();
            feature.confidence = clamp_confidence(feature.confidence);
        }
    }
    Ok(taxonomy)
}

fn clamp_confidence(c: f64) -> f64 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

/// Strip markdown code block fences from a string containing JSON.
fn strip_markdown_json(s: &str) -> String {
    let trimmed = s.trim();

    // Strip ```json ... ``` or ``` ... ```
    if trimmed.starts_with("```") {
        let start = match trimmed.find('\n') {
            Some(pos) => pos + 1,
            None => return trimmed.to_string(),
        };
        let end = trimmed.rfind("```").unwrap_or(trimmed.len());
        if end > start {
            return trimmed[start..end].trim().to_string();
        }
    }

    trimmed.to_string()
}
