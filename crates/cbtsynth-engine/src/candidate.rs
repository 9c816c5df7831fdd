//! Lenient decoding of generator output. Anything that parses as a JSON
//! object becomes a `Candidate`, however malformed its fields, so every
//! rule can report against it.

use serde_json::{Map, Value};

use cbtsynth_core::session::{DialogueTurn, Role};

pub const REQUIRED_KEYS: [&str; 5] = ["session_id", "stage", "stage_objective", "artifact", "dialogue"];

/// A turn as written by the generator. `role` is kept verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CandidateTurn {
    pub role: String,
    pub content: String,
}

impl CandidateTurn {
    /// Strict role: exactly "Counselor" or "Client".
    pub fn role(&self) -> Option<Role> {
        self.role.parse().ok()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Candidate {
    /// Output was wrapped in markdown fences.
    pub fenced: bool,
    /// Text surrounded the JSON object.
    pub extra_text: bool,
    pub object: Map<String, Value>,
    pub session_id: Option<String>,
    pub stage: Option<String>,
    pub stage_objective: Option<String>,
    pub artifact_type: Option<String>,
    pub artifact_content: Option<String>,
    pub turns: Vec<CandidateTurn>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("no JSON object could be parsed: {0}")]
pub struct ParseFailure(pub String);

impl Candidate {
    pub fn parse(text: &str) -> Result<Self, ParseFailure> {
        let (body, fenced) = strip_fences(text);
        let (object, extra_text) = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(obj)) => (obj, false),
            Ok(other) => {
                return Err(ParseFailure(format!("top-level value is {}", type_name(&other))));
            }
            Err(e) => match embedded_object(body) {
                Some(obj) => (obj, true),
                None => return Err(ParseFailure(e.to_string())),
            },
        };
        Ok(Self::from_object(object, fenced, extra_text))
    }

    fn from_object(object: Map<String, Value>, fenced: bool, extra_text: bool) -> Self {
        let artifact = object.get("artifact").and_then(Value::as_object);
        let turns = object
            .get("dialogue")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(decode_turn).collect())
            .unwrap_or_default();

        Self {
            fenced,
            extra_text,
            session_id: string_field(object.get("session_id")),
            stage: string_field(object.get("stage")),
            stage_objective: string_field(object.get("stage_objective")),
            artifact_type: string_field(artifact.and_then(|a| a.get("type"))),
            artifact_content: string_field(artifact.and_then(|a| a.get("content"))),
            turns,
            object,
        }
    }

    pub fn artifact_text(&self) -> &str {
        self.artifact_content.as_deref().unwrap_or("")
    }

    pub fn turns_by(&self, role: Role) -> impl Iterator<Item = &CandidateTurn> {
        self.turns.iter().filter(move |t| t.role() == Some(role))
    }

    /// Turns with a recognized role, for fact extraction.
    pub fn dialogue_turns(&self) -> Vec<DialogueTurn> {
        self.turns
            .iter()
            .filter_map(|t| {
                t.role().map(|role| DialogueTurn {
                    role,
                    content: t.content.clone(),
                })
            })
            .collect()
    }

    /// Fields missing from the output contract, as dotted paths.
    pub fn missing_keys(&self) -> Vec<String> {
        let mut missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|k| !self.object.contains_key(**k))
            .map(|k| k.to_string())
            .collect();
        if let Some(artifact) = self.object.get("artifact") {
            match artifact.as_object() {
                Some(a) => {
                    for key in ["type", "content"] {
                        if !a.contains_key(key) {
                            missing.push(format!("artifact.{key}"));
                        }
                    }
                }
                None => missing.push("artifact{type,content}".to_string()),
            }
        }
        if self.object.get("dialogue").is_some_and(|d| !d.is_array()) {
            missing.push("dialogue[]".to_string());
        }
        missing
    }
}

/// Remove a surrounding markdown fence (```json ... ```).
pub fn strip_fences(text: &str) -> (&str, bool) {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return (trimmed, false);
    };
    // Drop the info string on the opening line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    let rest = rest.trim_end();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    let rest = rest.trim();
    let rest = match rest.strip_prefix("json") {
        Some(after) if after.starts_with(char::is_whitespace) => after.trim_start(),
        _ => rest,
    };
    (rest, true)
}

fn embedded_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

fn decode_turn(value: &Value) -> CandidateTurn {
    let Some(obj) = value.as_object() else {
        return CandidateTurn {
            role: String::new(),
            content: value.as_str().unwrap_or_default().to_string(),
        };
    };
    CandidateTurn {
        role: string_field(obj.get("role")).unwrap_or_default(),
        content: string_field(obj.get("content")).unwrap_or_default(),
    }
}

fn string_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{"session_id":"S1","stage":"Build Trust & Assessment","stage_objective":"o",
        "artifact":{"type":"Trigger/Thought Log","content":"Trigger: shift"},
        "dialogue":[{"role":"Counselor","content":"Hi."},{"role":"Client","content":"Hello."}]}"#;

    #[test]
    fn bare_object() {
        let c = Candidate::parse(MINIMAL).unwrap();
        assert!(!c.fenced && !c.extra_text);
        assert_eq!(c.session_id.as_deref(), Some("S1"));
        assert_eq!(c.artifact_type.as_deref(), Some("Trigger/Thought Log"));
        assert_eq!(c.turns.len(), 2);
        assert_eq!(c.turns[0].role(), Some(Role::Counselor));
        assert!(c.missing_keys().is_empty());
    }

    #[test]
    fn fenced_object_is_flagged_but_parsed() {
        let c = Candidate::parse(&format!("```json\n{MINIMAL}\n```")).unwrap();
        assert!(c.fenced);
        assert_eq!(c.turns.len(), 2);

        let (body, fenced) = strip_fences("```\njson\n{}\n```");
        assert!(fenced);
        assert_eq!(body, "{}");
    }

    #[test]
    fn surrounding_prose_is_flagged() {
        let c = Candidate::parse(&format!("Here is the session:\n{MINIMAL}\nHope this helps!")).unwrap();
        assert!(c.extra_text);
        assert_eq!(c.stage.as_deref(), Some("Build Trust & Assessment"));
    }

    #[test]
    fn unparseable_text_fails() {
        assert!(Candidate::parse("I can't write that session.").is_err());
        let err = Candidate::parse("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("an array"));
        assert!(Candidate::parse("{\"session_id\": ").is_err());
    }

    #[test]
    fn loose_fields_are_kept() {
        let c = Candidate::parse(
            r#"{"session_id":"S2","artifact":"just text","dialogue":[{"role":"Therapist","content":"Hi"},"stray"]}"#,
        )
        .unwrap();
        assert_eq!(c.turns[0].role, "Therapist");
        assert_eq!(c.turns[0].role(), None);
        assert_eq!(c.turns[1].content, "stray");
        assert!(c.dialogue_turns().is_empty());
        let missing = c.missing_keys();
        assert!(missing.contains(&"stage".to_string()));
        assert!(missing.contains(&"artifact{type,content}".to_string()));
    }

    #[test]
    fn list_artifact_content_is_joined() {
        let c = Candidate::parse(r#"{"artifact":{"type":"CBT Map","content":["a","b"]}}"#).unwrap();
        assert_eq!(c.artifact_text(), "a\nb");
    }
}
