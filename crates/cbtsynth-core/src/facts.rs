//! Persona fact extraction. Pulls name, age, occupation and relation claims
//! out of dialogue so they can be compared against the case profile and
//! against what earlier sessions established.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::case::{CaseProfile, ClientInfo};
use crate::session::{DialogueTurn, Role, SessionRecord};
use crate::text::{normalize, stem};

const OCCUPATIONS: &[&str] = &[
    "accountant", "actor", "actress", "administrator", "analyst", "architect", "artist",
    "attorney", "baker", "banker", "barber", "barista", "bartender", "carpenter", "cashier",
    "chef", "cleaner", "clerk", "consultant", "cook", "dentist", "designer", "developer",
    "doctor", "driver", "economist", "editor", "educator", "electrician", "engineer", "farmer",
    "firefighter", "freelancer", "hairdresser", "homemaker", "janitor", "journalist", "lawyer",
    "lecturer", "librarian", "machinist", "mechanic", "musician", "nurse", "paralegal",
    "paramedic", "pharmacist", "photographer", "physician", "pilot", "plumber", "professor",
    "programmer", "psychologist", "receptionist", "researcher", "retiree", "salesman",
    "salesperson", "saleswoman", "scientist", "secretary", "singer", "soldier", "student",
    "surgeon", "tailor", "teacher", "technician", "translator", "tutor", "veterinarian",
    "waiter", "waitress", "writer",
];

const SYNONYMS: &[&[&str]] = &[
    &["doctor", "physician", "surgeon"],
    &["lawyer", "attorney"],
    &["programmer", "developer", "engineer"],
    &["waiter", "waitress"],
    &["cook", "chef"],
    &["professor", "lecturer"],
    &["teacher", "educator"],
    &["salesperson", "salesman", "saleswoman"],
    &["actor", "actress"],
];

// A claim like "I'm a former teacher" says nothing about the current job.
const NON_CURRENT: &[&str] = &["former", "retired", "ex", "aspiring", "future", "wannabe", "trainee"];

const NOT_NAMES: &[&str] = &[
    "And", "But", "So", "The", "This", "That", "She", "He", "They", "It", "We", "You", "Yes",
    "No", "Okay", "Ok", "Well", "Again", "Everyone", "There", "Today", "Monday", "Tuesday",
    "Wednesday", "Thursday", "Friday", "Saturday", "Sunday", "Counselor", "Client",
];

// First person only. A clause-initial "as a ..." still reads as the speaker.
static CLIENT_OCCUPATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:\b(?:i'm|i am|i work as|i've been working as|i have been working as|i worked as|my job as|my work as)|(?:^|[.!?;:]\s+)as)\s+(?:a|an)\s+([a-z][a-z-]*(?:\s+[a-z][a-z-]*){0,3})",
    )
    .expect("valid regex")
});

static COUNSELOR_OCCUPATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:you're|you are|your (?:job|work|role) as|you work as)\s+(?:a|an)\s+([a-z][a-z-]*(?:\s+[a-z][a-z-]*){0,3})",
    )
    .expect("valid regex")
});

static CLIENT_AGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?:i'm|i am)\s+(\d{1,3})\s*(?:years?\s*old|-year-old)|i\s+(?:just\s+)?turned\s+(\d{1,3})\b|(?:i'm|i am)\s+(?:a|an)\s+(\d{1,3})-year-old)")
        .expect("valid regex")
});

static COUNSELOR_AGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\byou(?:'re| are)\s+(\d{1,3})\s*(?:years?\s*old|-year-old)").expect("valid regex")
});

static CLIENT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i:\bmy name is|\bcall me)\s+([A-Z][a-z]+)\b").expect("valid regex")
});

static COUNSELOR_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:\b(?:hi|hello|hey|welcome back|welcome|good morning|good afternoon|good evening|good to see you|nice to see you)),?\s+([A-Z][a-z]+)\b",
    )
    .expect("valid regex")
});

static CLIENT_RELATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:\bmy\s+(wife|husband|partner|boss|manager|supervisor|mother|mom|father|dad|fianc[eé]e?|girlfriend|boyfriend))\s*,?\s+([A-Z][a-z]+)\b",
    )
    .expect("valid regex")
});

static COUNSELOR_RELATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:\byour\s+(wife|husband|partner|boss|manager|supervisor|mother|mom|father|dad|fianc[eé]e?|girlfriend|boyfriend))\s*,?\s+([A-Z][a-z]+)\b",
    )
    .expect("valid regex")
});

static THIRD_PERSON_RELATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:\b(?:her|his|their|my)\s+(wife|husband|partner|boss|manager|supervisor|mother|mom|father|dad|fianc[eé]e?|girlfriend|boyfriend))\s*,?\s+([A-Z][a-z]+)\b",
    )
    .expect("valid regex")
});

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Name,
    Age,
    Occupation,
    Relation(String),
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => f.write_str("name"),
            Self::Age => f.write_str("age"),
            Self::Occupation => f.write_str("occupation"),
            Self::Relation(rel) => write!(f, "{rel}'s name"),
        }
    }
}

/// A statement about the client found in text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactClaim {
    pub kind: FactKind,
    pub value: String,
    pub speaker: Role,
    pub excerpt: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contradiction {
    pub kind: FactKind,
    pub expected: String,
    pub found: String,
    pub excerpt: String,
}

impl fmt::Display for Contradiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is {:?} but the text says {:?} (\"{}\")",
            self.kind, self.expected, self.found, self.excerpt
        )
    }
}

pub fn extract_claims(turns: &[DialogueTurn]) -> Vec<FactClaim> {
    turns
        .iter()
        .flat_map(|t| extract_text_claims(&t.content, t.role))
        .collect()
}

/// Claims in one piece of text. Client text is read as first person,
/// counselor text as addressing the client.
pub fn extract_text_claims(text: &str, speaker: Role) -> Vec<FactClaim> {
    let text = text.replace('\u{2019}', "'");
    let lower = text.to_lowercase();
    let mut claims = Vec::new();

    let (occupation_re, age_re, name_re, relation_re) = match speaker {
        Role::Client => (&*CLIENT_OCCUPATION, &*CLIENT_AGE, &*CLIENT_NAME, &*CLIENT_RELATION),
        Role::Counselor => (
            &*COUNSELOR_OCCUPATION,
            &*COUNSELOR_AGE,
            &*COUNSELOR_NAME,
            &*COUNSELOR_RELATION,
        ),
    };

    for caps in occupation_re.captures_iter(&lower) {
        let (Some(whole), Some(words)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if let Some(occupation) = first_occupation(words.as_str()) {
            claims.push(FactClaim {
                kind: FactKind::Occupation,
                value: occupation,
                speaker,
                excerpt: whole.as_str().to_string(),
            });
        }
    }

    for caps in age_re.captures_iter(&lower) {
        let Some(whole) = caps.get(0) else { continue };
        let age = (1..caps.len())
            .filter_map(|i| caps.get(i))
            .find_map(|m| m.as_str().parse::<u32>().ok());
        if let Some(age) = age.filter(|a| (5..=110).contains(a)) {
            claims.push(FactClaim {
                kind: FactKind::Age,
                value: age.to_string(),
                speaker,
                excerpt: whole.as_str().to_string(),
            });
        }
    }

    for caps in name_re.captures_iter(&text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if NOT_NAMES.contains(&name.as_str()) {
            continue;
        }
        claims.push(FactClaim {
            kind: FactKind::Name,
            value: name.as_str().to_string(),
            speaker,
            excerpt: whole.as_str().to_string(),
        });
    }

    claims.extend(relation_claims(relation_re, &text, speaker));
    claims
}

fn relation_claims(re: &Regex, text: &str, speaker: Role) -> Vec<FactClaim> {
    re.captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let relation = canonical_relation(caps.get(1)?.as_str());
            let name = caps.get(2)?.as_str();
            if NOT_NAMES.contains(&name) {
                return None;
            }
            Some(FactClaim {
                kind: FactKind::Relation(relation),
                value: name.to_string(),
                speaker,
                excerpt: whole.as_str().to_string(),
            })
        })
        .collect()
}

fn canonical_relation(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "mom" => "mother".to_string(),
        "dad" => "father".to_string(),
        r if r.starts_with("fianc") => "fiance".to_string(),
        r => r.to_string(),
    }
}

fn first_occupation(words: &str) -> Option<String> {
    for word in words.split_whitespace() {
        if NON_CURRENT.contains(&word) {
            return None;
        }
        if OCCUPATIONS.contains(&word) {
            return Some(word.to_string());
        }
    }
    None
}

/// Whether a claimed occupation is compatible with the profile's wording.
pub fn occupation_consistent(profile_occupation: &str, claimed: &str) -> bool {
    let profile_words: Vec<String> = normalize(profile_occupation)
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(stem)
        .collect();
    if profile_words.is_empty() {
        return true;
    }
    let claimed = stem(&claimed.to_lowercase());
    if profile_words.iter().any(|w| *w == claimed) {
        return true;
    }
    SYNONYMS.iter().any(|group| {
        group.iter().any(|g| stem(g) == claimed)
            && group.iter().any(|g| profile_words.contains(&stem(g)))
    })
}

/// Compare claims with the profile's demographic facts.
pub fn check_profile(info: &ClientInfo, claims: &[FactClaim]) -> Vec<Contradiction> {
    let name_tokens: Vec<String> = normalize(&info.name).split(' ').map(str::to_string).collect();
    let mut found = Vec::new();

    for claim in claims {
        let contradiction = match &claim.kind {
            FactKind::Occupation => !occupation_consistent(&info.occupation, &claim.value),
            FactKind::Age => match (info.age, claim.value.parse::<u32>()) {
                (Some(expected), Ok(got)) => expected.abs_diff(got) > 1,
                _ => false,
            },
            FactKind::Name => {
                !info.name.trim().is_empty() && !name_tokens.contains(&claim.value.to_lowercase())
            }
            FactKind::Relation(_) => false,
        };
        if contradiction {
            let expected = match &claim.kind {
                FactKind::Occupation => info.occupation.clone(),
                FactKind::Age => info.age.map(|a| a.to_string()).unwrap_or_default(),
                _ => info.name.clone(),
            };
            found.push(Contradiction {
                kind: claim.kind.clone(),
                expected,
                found: claim.value.clone(),
                excerpt: claim.excerpt.clone(),
            });
        }
    }
    found
}

/// Facts established so far for a case: the profile's family details, the
/// intake conversation and every committed session.
#[derive(Clone, Debug, Default)]
pub struct KnownFacts {
    relations: BTreeMap<String, (String, String)>,
    occupation: Option<(String, String)>,
    age: Option<(u32, String)>,
}

impl KnownFacts {
    pub fn from_history(profile: &CaseProfile, history: &[SessionRecord]) -> Self {
        let mut known = Self::default();
        let family = &profile.client().family_details;
        for claim in relation_claims(&THIRD_PERSON_RELATION, family, Role::Client) {
            known.absorb(&claim);
        }
        for claim in extract_claims(&profile.dialogue) {
            known.absorb(&claim);
        }
        for record in history {
            for claim in extract_claims(&record.dialogue) {
                known.absorb(&claim);
            }
        }
        known
    }

    /// Record a claim if nothing is known yet for its slot.
    pub fn absorb(&mut self, claim: &FactClaim) {
        match &claim.kind {
            FactKind::Relation(rel) => {
                self.relations
                    .entry(rel.clone())
                    .or_insert_with(|| (claim.value.clone(), claim.excerpt.clone()));
            }
            FactKind::Occupation => {
                self.occupation
                    .get_or_insert_with(|| (claim.value.clone(), claim.excerpt.clone()));
            }
            FactKind::Age => {
                if let Ok(age) = claim.value.parse() {
                    self.age.get_or_insert_with(|| (age, claim.excerpt.clone()));
                }
            }
            FactKind::Name => {}
        }
    }

    pub fn relation(&self, relation: &str) -> Option<&str> {
        self.relations.get(relation).map(|(name, _)| name.as_str())
    }

    /// Check new claims against established facts. Claims are absorbed as
    /// they are checked, so a text that contradicts itself is caught too.
    pub fn check(&self, claims: &[FactClaim]) -> Vec<Contradiction> {
        let mut known = self.clone();
        let mut found = Vec::new();
        for claim in claims {
            let prior = match &claim.kind {
                FactKind::Relation(rel) => known
                    .relations
                    .get(rel)
                    .filter(|(name, _)| !name.eq_ignore_ascii_case(&claim.value))
                    .map(|(name, _)| name.clone()),
                FactKind::Occupation => known
                    .occupation
                    .as_ref()
                    .filter(|(occ, _)| !occupation_consistent(occ, &claim.value))
                    .map(|(occ, _)| occ.clone()),
                FactKind::Age => known
                    .age
                    .as_ref()
                    .filter(|(age, _)| {
                        claim.value.parse::<u32>().is_ok_and(|got| age.abs_diff(got) > 1)
                    })
                    .map(|(age, _)| age.to_string()),
                FactKind::Name => None,
            };
            if let Some(expected) = prior {
                found.push(Contradiction {
                    kind: claim.kind.clone(),
                    expected,
                    found: claim.value.clone(),
                    excerpt: claim.excerpt.clone(),
                });
            } else {
                known.absorb(claim);
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nurse() -> ClientInfo {
        ClientInfo {
            name: "Maya Thompson".into(),
            age: Some(34),
            occupation: "Registered Nurse".into(),
            family_details: "Lives alone; close to her sister Dana and her mother, Ruth".into(),
            ..Default::default()
        }
    }

    #[test]
    fn extracts_client_occupation() {
        let claims = extract_text_claims("Honestly, I'm a teacher and it's exhausting.", Role::Client);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].kind, FactKind::Occupation);
        assert_eq!(claims[0].value, "teacher");
    }

    #[test]
    fn skips_adjectives_and_non_occupations() {
        let claims = extract_text_claims("I am a registered nurse. As a kid I was shy.", Role::Client);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].value, "nurse");
        assert!(extract_text_claims("I'm a former teacher", Role::Client).is_empty());
        assert!(extract_text_claims("I'm not a teacher", Role::Client).is_empty());
    }

    #[test]
    fn counselor_first_person_is_not_a_client_claim() {
        assert!(extract_text_claims("I'm a counselor and I work as a therapist", Role::Counselor).is_empty());
        let claims = extract_text_claims("You're a nurse, so nights are hard.", Role::Counselor);
        assert_eq!(claims[0].value, "nurse");
    }

    #[test]
    fn extracts_age_only_with_years_old() {
        let claims = extract_text_claims("I'm 5 minutes late, sorry. I just turned 35.", Role::Client);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].kind, FactKind::Age);
        assert_eq!(claims[0].value, "35");
    }

    #[test]
    fn extracts_names_and_relations() {
        let claims = extract_text_claims("My name is Maya. My mom, Ruth, called.", Role::Client);
        assert!(claims.iter().any(|c| c.kind == FactKind::Name && c.value == "Maya"));
        assert!(claims
            .iter()
            .any(|c| c.kind == FactKind::Relation("mother".into()) && c.value == "Ruth"));

        let greeting = extract_text_claims("Welcome back, Maya. How was the week?", Role::Counselor);
        assert_eq!(greeting[0].kind, FactKind::Name);
    }

    #[test]
    fn claims_about_others_are_ignored() {
        assert!(extract_text_claims("Daniel works as an engineer, so he gets weekends off.", Role::Client).is_empty());
        assert!(extract_text_claims("My sister started as a teacher last fall.", Role::Client).is_empty());
        assert!(extract_text_claims("I also have an 8-year-old at home.", Role::Client).is_empty());

        let claims = extract_text_claims("I'm a 34-year-old nurse. As a nurse, I worry.", Role::Client);
        assert!(claims.iter().any(|c| c.kind == FactKind::Age && c.value == "34"));
        assert!(claims.iter().any(|c| c.kind == FactKind::Occupation && c.value == "nurse"));
    }

    #[test]
    fn profile_contradictions() {
        let info = nurse();
        let ok = extract_text_claims("As a nurse I'm 34 years old and tired.", Role::Client);
        assert!(check_profile(&info, &ok).is_empty());

        let bad = extract_text_claims("I'm a teacher, and my name is Laura.", Role::Client);
        let found = check_profile(&info, &bad);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].kind, FactKind::Occupation);
        assert_eq!(found[0].found, "teacher");
        assert!(found[0].to_string().contains("Registered Nurse"));
    }

    #[test]
    fn synonyms_are_consistent() {
        assert!(occupation_consistent("Software Engineer", "developer"));
        assert!(occupation_consistent("Family Physician", "doctor"));
        assert!(occupation_consistent("", "pilot"));
        assert!(!occupation_consistent("Nurse", "teacher"));
    }

    #[test]
    fn history_relations_must_stay_stable() {
        let profile = CaseProfile {
            id: crate::ids::CaseId::from_raw("c"),
            intake_form: crate::case::IntakeForm {
                client_info: nurse(),
                ..Default::default()
            },
            thought: String::new(),
            patterns: vec![],
            cbt_technique: String::new(),
            cbt_plan: Default::default(),
            attitude: String::new(),
            dialogue: vec![DialogueTurn::client("My boss, Karen, yelled at me again.")],
        };
        let known = KnownFacts::from_history(&profile, &[]);
        assert_eq!(known.relation("mother"), Some("Ruth"));
        assert_eq!(known.relation("boss"), Some("Karen"));

        let consistent = extract_text_claims("My boss, Karen, apologized.", Role::Client);
        assert!(known.check(&consistent).is_empty());

        let drifted = extract_text_claims("My boss Linda is tough. My mom, Ruth, helps.", Role::Client);
        let found = known.check(&drifted);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].expected, "Karen");
        assert_eq!(found[0].found, "Linda");
    }

    #[test]
    fn self_contradiction_within_new_text() {
        let known = KnownFacts::default();
        let claims = extract_text_claims("My wife, Anna, is away. Later my wife, Beth, called.", Role::Client);
        assert_eq!(known.check(&claims).len(), 1);
    }
}
