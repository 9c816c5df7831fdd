use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordinal of a session within a case, rendered as `S<n>`.
/// S0 is the intake conversation; generated sessions start at S1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionNumber(u32);

impl SessionNumber {
    pub const INTAKE: SessionNumber = SessionNumber(0);

    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn is_intake(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SessionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid session id {0:?}: expected S<n>")]
pub struct ParseSessionNumberError(pub String);

impl FromStr for SessionNumber {
    type Err = ParseSessionNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('S')
            .or_else(|| trimmed.strip_prefix('s'))
            .ok_or_else(|| ParseSessionNumberError(s.to_string()))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseSessionNumberError(s.to_string()));
        }
        digits
            .parse()
            .map(Self)
            .map_err(|_| ParseSessionNumberError(s.to_string()))
    }
}

impl Serialize for SessionNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Speaker of a dialogue turn. Exactly two roles exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Counselor,
    Client,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counselor => "Counselor",
            Self::Client => "Client",
        }
    }

    /// Lenient mapping used when importing third-party transcripts.
    pub fn from_alias(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "counselor" | "counsellor" | "therapist" => Some(Self::Counselor),
            "client" | "patient" => Some(Self::Client),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Counselor" => Ok(Self::Counselor),
            "Client" => Ok(Self::Client),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub role: Role,
    pub content: String,
}

impl DialogueTurn {
    pub fn counselor(content: impl Into<String>) -> Self {
        Self {
            role: Role::Counselor,
            content: content.into(),
        }
    }

    pub fn client(content: impl Into<String>) -> Self {
        Self {
            role: Role::Client,
            content: content.into(),
        }
    }
}

/// The session's written deliverable (thought log, CBT map, plan...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

/// One committed session. Serializes to exactly the generator's output contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionNumber,
    pub stage: String,
    pub stage_objective: String,
    pub artifact: Artifact,
    pub dialogue: Vec<DialogueTurn>,
}

impl SessionRecord {
    pub fn turns_by(&self, role: Role) -> impl Iterator<Item = &DialogueTurn> {
        self.dialogue.iter().filter(move |t| t.role == role)
    }

    pub fn is_intake(&self) -> bool {
        self.session_id.is_intake()
    }
}
