//! Shared test material: one persona and one session that satisfies every rule.

use serde_json::{json, Value};

use cbtsynth_core::case::{CaseProfile, ClientInfo, IntakeForm};
use cbtsynth_core::ids::CaseId;
use cbtsynth_core::session::{DialogueTurn, SessionNumber};
use cbtsynth_core::stage::{StagePlan, StageTargets};

pub const ARTIFACT: &str = "Trigger: charting errors at the end of a night shift\n\
Thought: I am going to hurt a patient and lose my license\n\
Feeling: anxiety 8/10\n\
Response: recheck every chart three times";

pub fn profile(id: &str) -> CaseProfile {
    CaseProfile {
        id: CaseId::from_raw(id),
        intake_form: IntakeForm {
            client_info: ClientInfo {
                name: "Maya Thompson".into(),
                age: Some(34),
                gender: "female".into(),
                occupation: "Nurse".into(),
                family_details: "Lives with her husband Daniel".into(),
                ..Default::default()
            },
            presenting_problem: vec!["Constant worry about making mistakes at work".into()],
            reason_for_seeking_counseling: "Anxiety is affecting her sleep".into(),
            ..Default::default()
        },
        thought: "I'm going to hurt a patient and lose my license".into(),
        patterns: vec!["catastrophizing".into()],
        cbt_technique: "Decatastrophizing".into(),
        cbt_plan: [("1".to_string(), "Identify catastrophic predictions".to_string())].into(),
        attitude: "neutral".into(),
        dialogue: vec![
            DialogueTurn::counselor("Hi Maya, what brings you in today?"),
            DialogueTurn::client(
                "I'm a nurse, and I keep worrying that I'll make a mistake on shift. My husband Daniel says I bring it home every night.",
            ),
            DialogueTurn::counselor("That sounds heavy. We'll work on it together."),
        ],
    }
}

pub fn s1_plan() -> StagePlan {
    StagePlan::new(
        SessionNumber::new(1),
        "Build Trust & Assessment",
        "Build rapport, clarify goals, assess the problem, and agree on a simple tracking task.",
        "Trigger/Thought Log",
    )
}

pub fn psychoeducation_plan() -> StagePlan {
    StagePlan::new(
        SessionNumber::new(1),
        "psychoeducation",
        "introduce cognitive distortions",
        "thought_record",
    )
    .with_targets(StageTargets {
        introduces_concept: true,
        ..Default::default()
    })
}

const VENT: &str = "It was Thursday, near the end of my shift, and the unit had been slammed all night. \
I noticed a couple of charting errors at the end of a night shift that had already felt endless, and my stomach just dropped. \
I kept thinking that I am going to hurt a patient and lose my license, and I could not shake it no matter what I told myself. \
So I started to recheck every chart three times before I handed off to the day team, and I stayed almost an hour late. \
My husband Daniel picked me up and I barely said a word on the way home.";

const EDUCATION: &str = "What you are describing is something we call an automatic thought. \
It pops up on its own, it feels completely true, and it drives both the feeling and what you do next. \
Noticing the trigger, the thought, the feeling and your response is the first step, because once we can see the chain \
we can start to question it together instead of just obeying it.";

const CLOSING: &str = "Great. To sum up, your log for today reads: Trigger: charting errors at the end of a night shift. \
Thought: I am going to hurt a patient and lose my license. Feeling: anxiety 8/10. \
Response: recheck every chart three times. Please add two more entries this week.";

pub fn dialogue() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Counselor", "Hi Maya, welcome back. Last time you mentioned that night shifts leave you worried about mistakes. How has this week been?"),
        ("Client", "Honestly, it's been rough. I keep thinking about the charts."),
        ("Counselor", "Tell me about the hardest moment this week."),
        ("Client", VENT),
        ("Counselor", "That sounds exhausting. What did you feel in your body right then?"),
        ("Client", "Tight chest, shaky hands. I'd say the anxiety was an 8 out of 10."),
        ("Counselor", EDUCATION),
        ("Client", "Yes, but the thought feels true when it happens. Nurses really can hurt people."),
        ("Counselor", "That's fair, and the stakes in your work are real. Let's just write down what happened, without judging it yet."),
        ("Client", "Okay. Where do I start?"),
        ("Counselor", "Start with the trigger. What set it off?"),
        ("Client", "Finding the charting errors right before handoff."),
        ("Counselor", "And the thought that came with it?"),
        ("Client", "That I'm going to hurt someone and lose my license."),
        ("Counselor", "How strong was the feeling, from zero to ten?"),
        ("Client", "Anxiety, an 8 out of 10. Maybe higher."),
        ("Counselor", "And what did you do in response?"),
        ("Client", "I rechecked everything three times and stayed late."),
        ("Counselor", "Could you log two more moments like this before we meet again?"),
        ("Client", "I can try. I'll keep it in my notes app."),
        ("Counselor", CLOSING),
    ]
}

/// A session object for `plan` that passes every standard rule.
pub fn session_value(plan: &StagePlan) -> Value {
    let turns: Vec<Value> = dialogue()
        .into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect();
    json!({
        "session_id": plan.session_id.to_string(),
        "stage": plan.stage,
        "stage_objective": plan.stage_objective,
        "artifact": {"type": plan.artifact_type, "content": ARTIFACT},
        "dialogue": turns,
    })
}

pub fn session_json(plan: &StagePlan) -> String {
    session_value(plan).to_string()
}
