// All prompt text for plan generation.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::llm_client::prompts::{GROUNDING_INSTRUCTION, JSON_ONLY_INSTRUCTION};
use crate::planning::models::GenerationContext;

/// Second safety bound applied to each document inside the prompt, whatever
/// ceiling was used at extraction time.
pub const PROMPT_SECTION_MAX_CHARS: usize = 200_000;

const BOOK_SECTION_LABEL: &str = "=== TEXTBOOK CONTENT ===";
const JUSTIFICATION_SECTION_LABEL: &str = "=== PUBLISHER CURRICULUM JUSTIFICATION ===";

/// Fixed, provider-independent system instructions for plan generation.
pub const PLAN_SYSTEM_BODY: &str = r#"You are an expert in curriculum planning for primary and secondary education under the LOMLOE framework.

Your task is to produce the complete plan of one teaching unit (learning situation) from:
1. The content of the teacher's textbook
2. The curriculum justification supplied by the publisher

You MUST return ONE JSON object with this EXACT schema (no extra fields):
{
  "metadata": {
    "academic_year": "2025-2026",
    "level": "3º",
    "stage": "PRIMARIA",
    "group": "A-B-C",
    "unit_title": "SA4 Title of the learning situation",
    "justification": "Long justification text of the learning situation..."
  },
  "rows": [
    {
      "key_competences": "CCL\nSTEM\nCD\nCPSAA",
      "same_area_criterion": "1. Specific competence of the same area...",
      "related_area_criterion": "Specific competence of a related area (empty string if none)",
      "foundational_knowledge": "BLOCK 1\nBlock name\nFoundational knowledge contents...",
      "specific_knowledge": "Specific knowledge worked in this session",
      "evaluation_criteria": "1.1. Evaluation criterion...",
      "achievement_indicators": "Observable achievement indicator...",
      "percentage": 0.04,
      "evaluation_instruments": "Observation and participation",
      "timing": "Session 1",
      "activities": "Detailed description of the activities...",
      "resources": "Textbook pp. 64 to 66",
      "space": "Classroom"
    }
  ],
  "universal_design_notes": "1. Formative feedback highlighting achievements...\n2. Multiple means of representation..."
}

FIELD SEMANTICS:
- key_competences: key competences developed in the row, one abbreviation per line.
- same_area_criterion: specific competence of the unit's own subject area.
- related_area_criterion: specific competence of another related area, or "".
- foundational_knowledge: the foundational knowledge block (block number, name, contents).
- specific_knowledge: the concrete piece of knowledge worked in the row.
- evaluation_criteria: evaluation criteria of the learning situation that apply to the row.
- achievement_indicators: observable indicator of achievement for the row.
- percentage: weight of the row in the unit grade as a decimal (0.04 = 4%).
- evaluation_instruments: instrument used to evaluate the row.
- timing: the session the row belongs to.
- activities: what the students do, in detail.
- resources: materials, with textbook page references when available.
- space: where the session happens.

STRICT RULES:
- Each element of "rows" is one session or sub-block of the plan, in teaching order.
- Consecutive rows that share a competence, criterion or knowledge block repeat the SAME text verbatim.
- Percentages are decimals and their total MUST be between 0.95 and 1.0.
- Produce between 8 and 20 rows depending on the complexity of the unit.
- Key competences use the LOMLOE abbreviations: CCL, STEM, CD, CPSAA, CC, CE, CCEC, CP.
- Timing follows the format "Session 1", "Session 2", etc.
- Evaluation instruments are chosen from: Observation and participation, Notebook work, Cooperative work, Worksheet, Unit evaluation sheet, Rubric.
- universal_design_notes lists Universal Design for Learning accessibility principles applied to the unit.
- Write the content in the language of the documents provided.
- The JSON must be valid and parseable. No markdown, only raw JSON."#;

/// Full system instructions: plan schema and rules plus the grounding rule.
pub fn plan_system_instructions() -> String {
    format!("{PLAN_SYSTEM_BODY}\n\n{GROUNDING_INSTRUCTION}")
}

/// Builds the per-unit user prompt. Pure: same inputs, same prompt.
pub fn build_prompt(
    book_text: &str,
    justification_text: &str,
    unit_name: &str,
    context: Option<&GenerationContext>,
) -> String {
    let mut prompt = format!("Generate the LOMLOE plan for the unit \"{unit_name}\".");

    if let Some(ctx) = context {
        for (label, value) in [
            ("Level", &ctx.level),
            ("Subject", &ctx.subject),
            ("Group", &ctx.group),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                prompt.push_str(&format!("\n{label}: {value}"));
            }
        }
    }

    prompt.push_str(&format!(
        "\n\n{BOOK_SECTION_LABEL}\n{}",
        prefix_chars(book_text, PROMPT_SECTION_MAX_CHARS)
    ));
    prompt.push_str(&format!(
        "\n\n{JUSTIFICATION_SECTION_LABEL}\n{}",
        prefix_chars(justification_text, PROMPT_SECTION_MAX_CHARS)
    ));
    prompt.push_str("\n\n");
    prompt.push_str(JSON_ONLY_INSTRUCTION);

    prompt
}

/// The first `max_chars` characters of `text`.
fn prefix_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_section_order() {
        let prompt = build_prompt("BOOK", "JUST", "SA4", None);
        let unit = prompt.find("\"SA4\"").unwrap();
        let book = prompt.find(BOOK_SECTION_LABEL).unwrap();
        let just = prompt.find(JUSTIFICATION_SECTION_LABEL).unwrap();
        let closing = prompt.find(JSON_ONLY_INSTRUCTION).unwrap();
        assert!(unit < book && book < just && just < closing);
        assert!(prompt.contains(&format!("{BOOK_SECTION_LABEL}\nBOOK")));
        assert!(prompt.ends_with(JSON_ONLY_INSTRUCTION));
    }

    #[test]
    fn test_context_lines_only_when_present() {
        let ctx = GenerationContext {
            level: Some("3º".to_string()),
            subject: Some(String::new()),
            group: Some("A-B-C".to_string()),
        };
        let prompt = build_prompt("b", "j", "SA4", Some(&ctx));
        assert!(prompt.contains("\nLevel: 3º"));
        assert!(!prompt.contains("Subject:"));
        assert!(prompt.contains("\nGroup: A-B-C"));

        let bare = build_prompt("b", "j", "SA4", Some(&GenerationContext::default()));
        assert!(!bare.contains("Level:"));
        assert_eq!(bare, build_prompt("b", "j", "SA4", None));
    }

    #[test]
    fn test_sections_are_rebounded() {
        let book = "§".repeat(PROMPT_SECTION_MAX_CHARS + 500);
        let just = "¤".repeat(PROMPT_SECTION_MAX_CHARS + 1);
        let prompt = build_prompt(&book, &just, "SA1", None);
        assert_eq!(prompt.matches('§').count(), PROMPT_SECTION_MAX_CHARS);
        assert_eq!(prompt.matches('¤').count(), PROMPT_SECTION_MAX_CHARS);
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let ctx = GenerationContext {
            level: Some("5º".to_string()),
            subject: Some("Ciencias".to_string()),
            group: None,
        };
        assert_eq!(
            build_prompt("libro", "justificación", "SA2", Some(&ctx)),
            build_prompt("libro", "justificación", "SA2", Some(&ctx))
        );
    }

    #[test]
    fn test_system_instructions_carry_contract() {
        let system = plan_system_instructions();
        assert!(system.contains("\"metadata\""));
        assert!(system.contains("\"universal_design_notes\""));
        assert!(system.contains("between 0.95 and 1.0"));
        assert!(system.contains("between 8 and 20 rows"));
        assert!(system.contains("CPSAA"));
        assert!(system.ends_with(GROUNDING_INSTRUCTION));
    }
}
