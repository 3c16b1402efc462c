//! Plan contract enforcement.
//!
//! Providers return *almost* the right JSON. This module is the repair pass
//! that coerces any near-miss output into a fully valid [`ActionPlan`]
//! rather than failing the request: cardinality limits are clamped, missing
//! sub-objects are synthesized, and the mandatory first-action constraints
//! are applied.
//!
//! [`enforce`] is idempotent: cached plans are re-run through it on every
//! read so entries written under an older, looser contract still come out
//! valid.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Immediate actions are clamped to this many items.
pub const MAX_IMMEDIATE_ACTIONS: usize = 3;

/// Risks are clamped to this many items.
pub const MAX_RISKS: usize = 2;

/// A plan always carries exactly this many module steps.
pub const MODULE_STEP_COUNT: usize = 3;

/// Ownership tag stamped into plan metadata when the provider omits one.
const DEFAULT_SOURCE_TAG: &str = "uplift-gateway";

const DEFAULT_HEADLINE: &str = "Your next moves";

/// Appended to the first action when its text does not already imply a
/// short time box. Contains "15 minutes" so re-enforcement sees the time
/// box and does not append again.
const ACTIONABILITY_SUFFIX: &str = "Start within the next 15 minutes.";

/// Channel-specific call-to-action templates appended to the first action,
/// pipe-delimited.
const CTA_TEMPLATES: [&str; 3] = [
    "message:Send a two-line progress note to your accountability partner",
    "calendar:Block a 15-minute focus slot on today's calendar",
    "task:Pin this as the top item in your task list",
];

const PLACEHOLDER_STEP: &str = "Review progress against the plan and adjust.";

const GENERIC_ACTION_TITLE: &str = "Write down the single most important outcome for today";
const GENERIC_ACTION_DETAIL: &str =
    "Capture it somewhere visible and commit to one concrete step toward it.";

const GENERIC_RISK_DESCRIPTION: &str = "Momentum fades once the initial push is over.";
const GENERIC_RISK_MITIGATION: &str = "Name a single owner and a fixed daily check-in time.";

static SHORT_TIMEBOX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(now|immediately|right away|today|within the hour|15\s?min(ute)?s?)\b")
        .unwrap()
});

// ---------------------------------------------------------------------------
// Strict (enforced) shape
// ---------------------------------------------------------------------------

/// How quickly an action is expected to show an effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeToImpact {
    /// The shortest bucket, mandatory for the first action.
    #[serde(rename = "under_15_min")]
    Under15Min,
    #[serde(rename = "today")]
    #[default]
    Today,
    #[serde(rename = "this_week")]
    ThisWeek,
}

/// One immediately actionable step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImmediateAction {
    pub title: String,
    pub detail: String,
    pub time_to_impact: TimeToImpact,
    /// Pipe-delimited channel call-to-action segments.
    pub cta: String,
}

/// Structured deeper analysis attached to every risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepDive {
    pub root_cause: String,
    pub early_signal: String,
    pub countermeasure: String,
}

/// A risk the plan calls out, with its mandatory deeper analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub description: String,
    pub mitigation: String,
    pub deep_dive: DeepDive,
}

/// Plan provenance metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMeta {
    /// Ownership tag identifying what produced the plan.
    pub source: String,
    /// Whether the plan was served from cache when it was stamped.
    pub from_cache: bool,
    pub generated_at: DateTime<Utc>,
    /// The request signature the plan answers.
    pub signature: String,
}

/// The strictly shaped advice plan. Every instance in the system, fresh or
/// cached, satisfies the cardinality and shape invariants because it only
/// comes into existence through [`enforce`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub headline: String,
    /// 1 to [`MAX_IMMEDIATE_ACTIONS`] items.
    pub immediate_actions: Vec<ImmediateAction>,
    /// 1 to [`MAX_RISKS`] items.
    pub risks: Vec<Risk>,
    /// Exactly [`MODULE_STEP_COUNT`] ordered steps.
    pub module_steps: Vec<String>,
    pub meta: PlanMeta,
}

// ---------------------------------------------------------------------------
// Lenient (pre-repair) shape
// ---------------------------------------------------------------------------

/// Lenient parse target for raw provider output. Every field is optional or
/// defaulted; known singular/plural field-name drift is absorbed via serde
/// aliases so repair never has to guess at key names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawPlan {
    pub headline: Option<String>,
    #[serde(alias = "immediate_action", alias = "immediateActions")]
    pub immediate_actions: Vec<RawAction>,
    #[serde(alias = "risk")]
    pub risks: Vec<RawRisk>,
    #[serde(alias = "module_step", alias = "moduleSteps")]
    pub module_steps: Vec<String>,
    pub meta: Option<RawMeta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawAction {
    pub title: Option<String>,
    pub detail: Option<String>,
    pub time_to_impact: Option<TimeToImpact>,
    pub cta: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRisk {
    pub description: Option<String>,
    pub mitigation: Option<String>,
    #[serde(alias = "deeper_analysis", alias = "deepDive")]
    pub deep_dive: Option<RawDeepDive>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawDeepDive {
    pub root_cause: Option<String>,
    pub early_signal: Option<String>,
    pub countermeasure: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawMeta {
    pub source: Option<String>,
    pub from_cache: Option<bool>,
    pub generated_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
}

/// Re-enforcement path: an already strict plan loses nothing when lowered
/// back into the lenient shape.
impl From<ActionPlan> for RawPlan {
    fn from(plan: ActionPlan) -> Self {
        RawPlan {
            headline: Some(plan.headline),
            immediate_actions: plan
                .immediate_actions
                .into_iter()
                .map(|a| RawAction {
                    title: Some(a.title),
                    detail: Some(a.detail),
                    time_to_impact: Some(a.time_to_impact),
                    cta: Some(a.cta),
                })
                .collect(),
            risks: plan
                .risks
                .into_iter()
                .map(|r| RawRisk {
                    description: Some(r.description),
                    mitigation: Some(r.mitigation),
                    deep_dive: Some(RawDeepDive {
                        root_cause: Some(r.deep_dive.root_cause),
                        early_signal: Some(r.deep_dive.early_signal),
                        countermeasure: Some(r.deep_dive.countermeasure),
                    }),
                })
                .collect(),
            module_steps: plan.module_steps,
            meta: Some(RawMeta {
                source: Some(plan.meta.source),
                from_cache: Some(plan.meta.from_cache),
                generated_at: Some(plan.meta.generated_at),
                signature: Some(plan.meta.signature),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Strip a surrounding markdown code fence, if any.
///
/// Providers habitually wrap JSON in ```` ```json ```` fences even when
/// asked not to.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence's language tag line, then the closing fence.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse raw provider text into the lenient plan shape.
///
/// This is the coarse schema gate: anything that is not a JSON object fails
/// here, and the caller surfaces it as an upstream error. Everything that
/// passes is repairable by [`enforce`].
pub fn parse_plan(text: &str) -> Result<RawPlan, serde_json::Error> {
    serde_json::from_str(strip_code_fences(text))
}

// ---------------------------------------------------------------------------
// Enforcement
// ---------------------------------------------------------------------------

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn repair_action(raw: RawAction) -> ImmediateAction {
    ImmediateAction {
        title: non_empty(raw.title).unwrap_or_else(|| GENERIC_ACTION_TITLE.to_string()),
        detail: raw.detail.unwrap_or_default(),
        time_to_impact: raw.time_to_impact.unwrap_or_default(),
        cta: raw.cta.unwrap_or_default(),
    }
}

fn generic_action() -> ImmediateAction {
    ImmediateAction {
        title: GENERIC_ACTION_TITLE.to_string(),
        detail: GENERIC_ACTION_DETAIL.to_string(),
        time_to_impact: TimeToImpact::Today,
        cta: String::new(),
    }
}

/// Repair one risk, synthesizing each missing deep-dive leaf from the
/// risk's own mitigation text so older, looser entries upgrade cleanly.
fn repair_risk(raw: RawRisk) -> Risk {
    let description =
        non_empty(raw.description).unwrap_or_else(|| GENERIC_RISK_DESCRIPTION.to_string());
    let mitigation =
        non_empty(raw.mitigation).unwrap_or_else(|| GENERIC_RISK_MITIGATION.to_string());
    let seed = mitigation.clone();
    let dive = raw.deep_dive.unwrap_or_default();
    Risk {
        description,
        deep_dive: DeepDive {
            root_cause: non_empty(dive.root_cause)
                .unwrap_or_else(|| format!("Likely driver: the inverse of \"{seed}\"")),
            early_signal: non_empty(dive.early_signal)
                .unwrap_or_else(|| format!("First sign: \"{seed}\" starts getting skipped")),
            countermeasure: non_empty(dive.countermeasure).unwrap_or_else(|| seed.clone()),
        },
        mitigation,
    }
}

/// Mandatory first-action constraints: shortest time-to-impact bucket, an
/// actionability suffix when no short time box is implied, and the fixed
/// channel CTA templates as pipe-delimited segments.
fn apply_first_action_constraints(action: &mut ImmediateAction) {
    action.time_to_impact = TimeToImpact::Under15Min;

    let implies_timebox =
        SHORT_TIMEBOX_RE.is_match(&action.detail) || SHORT_TIMEBOX_RE.is_match(&action.title);
    if !implies_timebox {
        if action.detail.is_empty() {
            action.detail = ACTIONABILITY_SUFFIX.to_string();
        } else {
            action.detail = format!("{} {}", action.detail.trim_end(), ACTIONABILITY_SUFFIX);
        }
    }

    let mut segments: Vec<String> = action
        .cta
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    for template in CTA_TEMPLATES {
        if !segments.iter().any(|s| s == template) {
            segments.push(template.to_string());
        }
    }
    action.cta = segments.join("|");
}

/// Repair a lenient plan into the strict contract shape.
///
/// Never fails: in the worst case (an empty object) the result is wholly
/// synthetic but valid. Applying `enforce` to its own output is a no-op.
pub fn enforce(raw: RawPlan, fallback_signature: &str) -> ActionPlan {
    let raw_meta = raw.meta.unwrap_or_default();
    let meta = PlanMeta {
        source: non_empty(raw_meta.source).unwrap_or_else(|| DEFAULT_SOURCE_TAG.to_string()),
        from_cache: raw_meta.from_cache.unwrap_or(false),
        generated_at: raw_meta.generated_at.unwrap_or_else(Utc::now),
        signature: non_empty(raw_meta.signature).unwrap_or_else(|| fallback_signature.to_string()),
    };

    let mut immediate_actions: Vec<ImmediateAction> = raw
        .immediate_actions
        .into_iter()
        .take(MAX_IMMEDIATE_ACTIONS)
        .map(repair_action)
        .collect();
    if immediate_actions.is_empty() {
        immediate_actions.push(generic_action());
    }
    apply_first_action_constraints(&mut immediate_actions[0]);

    let mut risks: Vec<Risk> = raw.risks.into_iter().take(MAX_RISKS).map(repair_risk).collect();
    if risks.is_empty() {
        risks.push(repair_risk(RawRisk::default()));
    }

    let mut module_steps = raw.module_steps;
    module_steps.truncate(MODULE_STEP_COUNT);
    while module_steps.len() < MODULE_STEP_COUNT {
        module_steps.push(PLACEHOLDER_STEP.to_string());
    }

    ActionPlan {
        headline: non_empty(raw.headline).unwrap_or_else(|| DEFAULT_HEADLINE.to_string()),
        immediate_actions,
        risks,
        module_steps,
        meta,
    }
}
