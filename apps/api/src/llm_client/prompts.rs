// Shared prompt fragments. Each service that calls the model keeps its own
// prompts.rs alongside it and appends these where needed.

/// System prompt suffix that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";
