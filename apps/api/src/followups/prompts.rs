// Prompt constants for follow-up generation.

/// System prompt for follow-up generation. `JSON_ONLY_SYSTEM` is appended at call time.
pub const FOLLOWUP_SYSTEM: &str = "You craft concise follow-up messages and assess urgency. \
    Consider the time difference: a reply that comes too early might not be a good idea, \
    while a friendly follow-up after a long silence can make sense. \
    Ignore timezones entirely; the user handles them. \
    Return JSON matching the provided schema.";

/// Follow-up prompt template. Replace every `{placeholder}` before sending.
pub const FOLLOWUP_PROMPT_TEMPLATE: &str = "Current UTC time: {now}
User: {user}
Target person: {contact}
Conversation history (most recent last):
{history}

Produce a short proposed message to the person, an urgency score \
(integer {urgency_min}-{urgency_max}, where {urgency_max} is most urgent), and a brief rationale.

Return a JSON object with this EXACT schema (no extra fields):
{\"message\": \"...\", \"urgency\": 5, \"rationale\": \"...\"}";

/// Stand-in for the history block when nothing usable has been logged.
pub const EMPTY_HISTORY: &str = "No previous conversation summaries are available.";
