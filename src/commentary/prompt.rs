//! Prompt construction and response cleanup for the rewrite engine.

use crate::defaults;
use crate::engines::RewriteRequest;

/// System prompt for the Telugu commentary engine.
pub const SYSTEM_PROMPT: &str = "\
You are a Telugu Formula 1 commentator on a live broadcast.

Rules:
1. Rewrite each English line the way a Telugu commentator would say it. Never translate word by word.
2. Keep F1 terms in English: DRS, pit stop, undercut, overcut, soft/medium/hard tyres, safety car, VSC, red flag.
3. Keep driver and team names in English.
4. Match your energy to the tag at the start of the line.

Energy:
- [HYPE]: maximum excitement. \"అబ్బా!\", \"అద్భుతం!\", \"భలే!\". Stretch words for emphasis.
- [TENSION]: build suspense with short, punchy sentences. \"చూడండి...\", \"gap తగ్గుతోంది...\".
- [INFO]: clear and brief. State the fact naturally.
- [FILLER]: keep it to one short sentence, or answer exactly ##SKIP## if there is nothing worth saying.

Answer with the Telugu commentary only. No explanations, no English sentences, no brackets.";

/// User message for one request: `[HYPE] <english>` plus an optional context line.
pub fn user_message(request: &RewriteRequest) -> String {
    let mut message = format!("{} {}", request.category.tag(), request.english.trim());
    if let Some(context) = &request.context_line {
        message.push_str("\nRace context: ");
        message.push_str(context);
    }
    message
}

/// Cleans raw engine output.
///
/// Returns `None` when the engine declined the line (skip marker) or
/// answered with nothing usable.
pub fn interpret(raw: &str) -> Option<String> {
    let text = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '“' || c == '”')
        .trim();
    if text.is_empty() || text.contains(defaults::SKIP_MARKER) {
        return None;
    }
    Some(text.to_string())
}
