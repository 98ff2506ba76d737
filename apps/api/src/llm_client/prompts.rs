// Shared prompt fragments.
// Task-specific templates live in ranking/prompts.rs alongside their parser.

/// Separator between a field name and its value in every delimited reply.
pub const FIELD_DELIMITER: char = '|';

/// System prompt fragment that enforces delimited plain-text output.
pub const PLAIN_TEXT_ONLY: &str = "You MUST respond with plain text only, \
    using exactly the line format you are given. \
    Do NOT use markdown, code fences, bullet characters or numbering. \
    Do NOT include explanations, greetings or apologies.";
