// Cross-cutting prompt fragments shared by every provider and every plan prompt.
// Plan-specific instructions live in planning::prompts.

/// Minimal prompt used to probe a credential/model pair.
pub const PING_PROMPT: &str = "Reply with the single word OK.";

/// Closing instruction of every generation prompt.
pub const JSON_ONLY_INSTRUCTION: &str = "Respond ONLY with the JSON object. \
    No markdown, no code fences, no explanations: just the raw JSON.";

/// Grounding rule appended to the plan system instructions.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Base the WHOLE plan on the content of the documents provided. \
    Every criterion, knowledge block, activity and resource must be traceable to the \
    textbook or to the curriculum justification. Do NOT invent content that is not \
    present in the documents.";
