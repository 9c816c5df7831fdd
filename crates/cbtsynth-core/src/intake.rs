//! Import of raw CACTUS records (free-text intake form, plan and dialogue)
//! into structured case profiles.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::case::{CaseProfile, ClientInfo, IntakeForm};
use crate::ids::CaseId;
use crate::session::{DialogueTurn, Role};

static NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.\s*(.+)$").expect("valid regex"));

static SPEAKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z \-_/]+):\s*(.*)$").expect("valid regex"));

static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid regex"));

/// One line of the raw dataset. Text fields may already be structured.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawCactusRecord {
    pub thought: String,
    pub patterns: Vec<String>,
    pub intake_form: serde_json::Value,
    pub cbt_technique: String,
    pub cbt_plan: serde_json::Value,
    pub attitude: String,
    pub dialogue: serde_json::Value,
}

impl RawCactusRecord {
    pub fn into_case(self, id: CaseId) -> CaseProfile {
        let intake_form = match &self.intake_form {
            serde_json::Value::String(text) => parse_intake_form(text),
            other => serde_json::from_value(other.clone()).unwrap_or_default(),
        };
        let cbt_plan = match &self.cbt_plan {
            serde_json::Value::String(text) => parse_cbt_plan(text),
            other => serde_json::from_value(other.clone()).unwrap_or_default(),
        };
        let dialogue = match &self.dialogue {
            serde_json::Value::String(text) => parse_dialogue(text),
            // Arrays go through CaseProfile's lenient turn parsing.
            serde_json::Value::Array(_) => {
                serde_json::from_value::<CaseProfile>(serde_json::json!({ "dialogue": self.dialogue }))
                    .map(|c| c.dialogue)
                    .unwrap_or_default()
            }
            _ => Vec::new(),
        };

        CaseProfile {
            id,
            intake_form,
            thought: self.thought,
            patterns: self.patterns,
            cbt_technique: self.cbt_technique,
            cbt_plan,
            attitude: self.attitude,
            dialogue,
        }
    }
}

/// File name used for the n-th imported case, e.g. `case_00042`.
pub fn case_file_stem(index: usize, zero_pad: usize) -> String {
    format!("case_{index:0zero_pad$}")
}

fn clean(s: &str) -> String {
    SPACES.replace_all(s.trim(), " ").into_owned()
}

fn clean_lines(s: &str) -> Vec<String> {
    s.lines().map(clean).filter(|l| !l.is_empty()).collect()
}

/// `Key:` on its own line followed by the value, or `Key: value`.
fn parse_key_values(lines: &[String]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        if let Some(key) = line.strip_suffix(':').filter(|k| !k.is_empty()) {
            let mut value = String::new();
            if let Some(next) = lines.get(i + 1).filter(|n| !n.ends_with(':')) {
                value = next.clone();
                i += 1;
            }
            out.insert(key.trim().to_lowercase(), value);
        } else if let Some((key, value)) = line.split_once(':') {
            out.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
        i += 1;
    }
    out
}

/// Split the intake text into its preamble (client info) and numbered sections 2-6.
pub fn parse_intake_form(text: &str) -> IntakeForm {
    let mut preamble = Vec::new();
    let mut sections: Vec<(u32, Vec<String>)> = Vec::new();

    for line in clean_lines(text) {
        if let Some(caps) = NUMBERED.captures(&line) {
            let num = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            sections.push((num, Vec::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push(line);
        } else {
            preamble.push(line);
        }
    }

    let kv = parse_key_values(&preamble);
    let field = |key: &str| kv.get(key).cloned().unwrap_or_default();
    let client_info = ClientInfo {
        name: field("name"),
        age: field("age").trim().parse().ok(),
        gender: field("gender"),
        occupation: field("occupation"),
        education: field("education"),
        marital_status: kv
            .get("marital status")
            .or_else(|| kv.get("marital_status"))
            .cloned()
            .unwrap_or_default(),
        family_details: kv
            .get("family details")
            .or_else(|| kv.get("family_details"))
            .cloned()
            .unwrap_or_default(),
    };

    let mut form = IntakeForm {
        client_info,
        ..Default::default()
    };
    for (num, body) in sections {
        match num {
            2 => form.presenting_problem = body,
            3 => form.reason_for_seeking_counseling = body.join(" "),
            4 => form.past_history = body,
            5 => form.academic_occupational_functioning_level = body,
            6 => form.social_support_system = body.join(" "),
            _ => {}
        }
    }
    form
}

/// Numbered plan items become `{"1": ..., "2": ...}`. Lines before the first
/// item (technique title, "Counseling plan:" header) are dropped.
pub fn parse_cbt_plan(text: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut current: Option<(String, Vec<String>)> = None;

    for line in clean_lines(text) {
        if let Some(caps) = NUMBERED.captures(&line) {
            if let Some((key, parts)) = current.take() {
                out.insert(key, clean(&parts.join(" ")));
            }
            let key = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            let first = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
            current = Some((key, vec![first]));
        } else if let Some((_, parts)) = current.as_mut() {
            parts.push(line);
        }
    }
    if let Some((key, parts)) = current {
        out.insert(key, clean(&parts.join(" ")));
    }
    out
}

/// `Role: content` lines; continuation lines are folded into the previous turn.
/// Turns by unrecognized speakers are dropped.
pub fn parse_dialogue(text: &str) -> Vec<DialogueTurn> {
    let mut out = Vec::new();
    let mut current: Option<(Option<Role>, Vec<String>)> = None;

    let flush = |current: Option<(Option<Role>, Vec<String>)>, out: &mut Vec<DialogueTurn>| {
        if let Some((Some(role), parts)) = current {
            let content = clean(&parts.join(" "));
            if !content.is_empty() {
                out.push(DialogueTurn { role, content });
            }
        }
    };

    for line in clean_lines(text) {
        match SPEAKER.captures(&line) {
            Some(caps) => {
                flush(current.take(), &mut out);
                let role = caps.get(1).and_then(|m| Role::from_alias(m.as_str()));
                let first = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
                let parts = if first.is_empty() { Vec::new() } else { vec![first] };
                current = Some((role, parts));
            }
            None => match current.as_mut() {
                Some((_, parts)) => parts.push(line),
                None => current = Some((None, vec![line])),
            },
        }
    }
    flush(current, &mut out);
    out
}
