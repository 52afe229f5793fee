//! Conversational strategy selection — a pure decision over the agent, the
//! recent transcript tail, and the trigger kind. All randomness flows
//! through the caller's RNG so tests can seed it.

use std::fmt;

use rand::Rng;
use serde::Serialize;

use parley_core::{ContextMessage, SenderKind};

use crate::registry::{AgentRecord, AgentRegistry};

/// Agent messages in the tail at or beyond this count push the selector
/// toward redirect/question strategies.
const CROWDED_TAIL_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    AgreeExpand,
    Challenge,
    Redirect,
    Question,
    Direct,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::AgreeExpand => "agree-expand",
            Strategy::Challenge => "challenge",
            Strategy::Redirect => "redirect",
            Strategy::Question => "question",
            Strategy::Direct => "direct",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who an injected mention should address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MentionTarget {
    /// Another agent, by id. Guaranteed resolvable at plan time.
    Agent(String),
    /// The human user, by display name.
    User(String),
}

#[derive(Debug, Clone)]
pub struct StrategyPlan {
    pub strategy: Strategy,
    pub should_mention: bool,
    pub target: Option<MentionTarget>,
    /// The last transcript message mentions this agent directly.
    pub mentions_current_agent: bool,
}

/// Decide how one agent should approach its next reply.
pub fn plan_strategy<R: Rng>(
    agent: &AgentRecord,
    recent: &[ContextMessage],
    is_user_response: bool,
    registry: &AgentRegistry,
    potential_mention_targets: usize,
    random_mention_probability: f64,
    rng: &mut R,
) -> StrategyPlan {
    let last = recent.last();
    let mentions_current = last
        .map(|l| l.message.mentions_alias(&agent.normalized_alias))
        .unwrap_or(false);

    let strategy = if mentions_current {
        Strategy::Direct
    } else {
        weighted_pick(&adjusted_weights(recent, is_user_response), rng)
    };

    let target = pick_mention_target(
        agent,
        recent,
        is_user_response,
        mentions_current,
        registry,
        potential_mention_targets,
        random_mention_probability,
        rng,
    );

    StrategyPlan {
        strategy,
        should_mention: target.is_some(),
        target,
        mentions_current_agent: mentions_current,
    }
}

/// Base weights with context adjustments applied in order.
fn adjusted_weights(recent: &[ContextMessage], is_user_response: bool) -> [(Strategy, f64); 5] {
    let mut weights = [
        (Strategy::AgreeExpand, 0.30),
        (Strategy::Challenge, 0.25),
        (Strategy::Redirect, 0.15),
        (Strategy::Question, 0.20),
        (Strategy::Direct, 0.10),
    ];

    let last_is_agent = recent
        .last()
        .map(|l| l.message.sender_kind == SenderKind::Agent)
        .unwrap_or(false);
    if last_is_agent && !is_user_response {
        // Background rounds answering another agent lean argumentative.
        weights[1].1 += 0.20;
        weights[0].1 += 0.15;
    }

    let agent_messages = recent
        .iter()
        .filter(|m| m.message.sender_kind == SenderKind::Agent)
        .count();
    if agent_messages >= CROWDED_TAIL_THRESHOLD {
        weights[2].1 += 0.10;
        weights[3].1 += 0.10;
    }

    weights
}

fn weighted_pick<R: Rng>(weights: &[(Strategy, f64)], rng: &mut R) -> Strategy {
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen_range(0.0..total);
    for (strategy, w) in weights {
        if roll < *w {
            return *strategy;
        }
        roll -= w;
    }
    // Floating-point residue can leave roll at the very end of the table.
    weights[weights.len() - 1].0
}

#[allow(clippy::too_many_arguments)]
fn pick_mention_target<R: Rng>(
    agent: &AgentRecord,
    recent: &[ContextMessage],
    is_user_response: bool,
    mentions_current: bool,
    registry: &AgentRegistry,
    potential_mention_targets: usize,
    random_mention_probability: f64,
    rng: &mut R,
) -> Option<MentionTarget> {
    let last = recent.last()?;

    if is_user_response
        && last.message.sender_kind == SenderKind::User
        && !last.message.sender.trim().is_empty()
    {
        return Some(MentionTarget::User(last.message.sender.clone()));
    }

    if mentions_current && last.message.sender_kind == SenderKind::Agent {
        if let Some(mentioner) = registry.find_from_message(&last.message) {
            if mentioner.id != agent.id {
                return Some(MentionTarget::Agent(mentioner.id.clone()));
            }
        }
    }

    if rng.gen_bool(random_mention_probability.clamp(0.0, 1.0)) {
        let candidates = recent_distinct_agents(agent, recent, registry, potential_mention_targets);
        if !candidates.is_empty() {
            let idx = rng.gen_range(0..candidates.len());
            return Some(MentionTarget::Agent(candidates[idx].clone()));
        }
    }

    None
}

/// Walk the tail newest-first collecting up to `limit` distinct agents other
/// than the one generating.
fn recent_distinct_agents(
    agent: &AgentRecord,
    recent: &[ContextMessage],
    registry: &AgentRegistry,
    limit: usize,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for entry in recent.iter().rev() {
        if entry.message.sender_kind != SenderKind::Agent {
            continue;
        }
        let Some(record) = registry.find_from_message(&entry.message) else {
            continue;
        };
        if record.id == agent.id || out.contains(&record.id) {
            continue;
        }
        out.push(record.id.clone());
        if out.len() >= limit {
            break;
        }
    }
    out
}

/// The system instruction injected ahead of generation, keyed on the plan,
/// whether the agent was mentioned, and who spoke last.
pub fn instruction_snippet(
    plan: &StrategyPlan,
    last_sender_kind: Option<SenderKind>,
    mentioner_token: Option<&str>,
) -> String {
    if plan.mentions_current_agent {
        return match (last_sender_kind, mentioner_token) {
            (Some(SenderKind::Agent), Some(token)) => format!(
                "You were directly mentioned by {}. Respond specifically to their message.",
                token
            ),
            _ => "You were directly mentioned by the user. Respond to their message.".to_string(),
        };
    }

    match plan.strategy {
        Strategy::AgreeExpand => {
            "Agree with the previous point and build on it with one new detail or example."
        }
        Strategy::Challenge => {
            "Respectfully challenge the previous point with a concrete counterargument."
        }
        Strategy::Redirect => "Steer the conversation toward a related but fresh angle.",
        Strategy::Question => "Ask one thoughtful question about the previous message.",
        Strategy::Direct => "Reply directly and plainly to the previous message.",
    }
    .to_string()
}
