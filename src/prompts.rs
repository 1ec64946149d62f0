//! Prompt builders for the oracle calls
//!
//! Each chat turn makes up to four oracle calls (naming, extraction,
//! conflict check, response); the exact wording of those prompts lives here
//! so the components stay free of string assembly.

use crate::types::{ChatTurn, Fact, FactCandidate};

/// Instructs the oracle to return a JSON array of fact objects.
pub fn extraction(user_message: &str) -> String {
    format!(
        r#"Given the following user message:
"""{user_message}"""

Identify any user facts, preferences, habits, or personal details expressed. For each fact, return:
- fact_type (name, age, preference, habit, location, expertise, hobby, etc.)
- fact_content (the specific information or value)
- source_message (the relevant span from the message)

If no facts are found, return an empty list.

Format your response as a JSON array like this:
[
    {{
        "fact_type": "...",
        "fact_content": "...",
        "source_message": "..."
    }},
    ...
]"#
    )
}

/// Instructs the oracle to judge new facts against stored ones and answer
/// in the fixed two-line shape the conflict parser accepts.
pub fn conflict_check(new_facts: &[FactCandidate], old_facts: &[Fact]) -> String {
    let new_block = new_facts
        .iter()
        .map(|f| {
            format!(
                "- [{}] {}",
                f.fact_type.as_deref().unwrap_or("unknown"),
                f.fact_content.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let old_block = old_facts
        .iter()
        .map(|f| format!("- [{}] {}", f.fact_type, f.fact_content))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a conflict analyzer for a user preference system. Detect contradictions between
new user input and their historical facts.

NEW INFORMATION:
{new_block}

HISTORICAL FACTS:
{old_block}

TASK:
Identify statements that directly contradict each other on the same topic. Ignore:
- Different ways of saying the same thing
- Clarifications or specifications
- Progressive learning ("I used to think X, now I know Y")

CONFLICT CRITERIA:
Must be direct opposites on the SAME TOPIC:
- Conflict: "I like coffee" vs "I hate coffee"
- Conflict: "I'm vegetarian" vs "I eat meat"
- Not conflict: "I like coffee" vs "I like strong coffee"
- Not conflict: "I'm from Delhi" vs "I work in Delhi"

Return ONLY this format (nothing else):

yes
- conflicting fact 1
- conflicting fact 2

OR:

no
[]"#
    )
}

/// Asks for a short title for a new session, based on its opening message.
pub fn session_name(first_message: &str) -> String {
    format!(
        r#"Generate a very short (2-5 words) title for a chat conversation that starts with this message: "{first_message}"

Rules:
- Maximum 5 words
- Descriptive and concise
- No quotes or special characters
- Capitalize first letter of each word

Examples:
- "Help me plan a trip" -> "Trip Planning"
- "What's the weather like?" -> "Weather Inquiry"
- "I need coding help" -> "Coding Assistance"

Title:"#
    )
}

/// Composes the final response prompt from stored facts, similarity context,
/// and the bounded session history (which already includes the new user turn).
pub fn response(
    facts: &[Fact],
    similar_interactions: &[String],
    history: &[ChatTurn],
    prioritize_new_info: bool,
) -> String {
    let mut sections = Vec::new();

    if !facts.is_empty() {
        let listed = facts
            .iter()
            .map(|f| f.fact_content.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        sections.push(format!("USER DETAILS: {listed}"));
    }

    if !similar_interactions.is_empty() {
        sections.push(format!(
            "ADDITIONAL INFORMATION: {}",
            similar_interactions.join(". ")
        ));
    }

    if prioritize_new_info {
        sections.push(
            "NOTE: The user has just corrected earlier information about themselves. \
             Prioritize the newest statements over anything older."
                .to_string(),
        );
    }

    let transcript = history
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n");
    sections.push(format!("PAST MESSAGES:\n{transcript}"));

    sections.join("\n")
}
