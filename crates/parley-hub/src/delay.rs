//! Pure delay math for scheduled agent replies. All randomness comes from
//! the caller's RNG so the schedule is testable with a seeded source.

use std::time::Duration;

use rand::Rng;

use parley_core::config::HubConfig;

/// The timing knobs the delay computation needs, lifted out of [`HubConfig`]
/// so tests can tune them directly.
#[derive(Debug, Clone)]
pub struct DelayTuning {
    pub min_user_ms: u64,
    pub max_user_ms: u64,
    pub min_background_ms: u64,
    pub max_background_ms: u64,
    pub min_between_ms: u64,
    pub max_between_ms: u64,
    pub min_first_ms: u64,
    pub max_first_ms: u64,
    pub min_mentioned_ms: u64,
    pub mentioned_multiplier: f64,
    pub typing_awareness_delay_ms: u64,
    pub typing_awareness_max_mult: f64,
}

impl From<&HubConfig> for DelayTuning {
    fn from(cfg: &HubConfig) -> Self {
        Self {
            min_user_ms: cfg.min_user_delay_ms,
            max_user_ms: cfg.max_user_delay_ms,
            min_background_ms: cfg.min_background_delay_ms,
            max_background_ms: cfg.max_background_delay_ms,
            min_between_ms: cfg.min_between_ms,
            max_between_ms: cfg.max_between_ms,
            min_first_ms: cfg.min_first_ms,
            max_first_ms: cfg.max_first_ms,
            min_mentioned_ms: cfg.min_mentioned_ms,
            mentioned_multiplier: cfg.mentioned_multiplier,
            typing_awareness_delay_ms: cfg.typing_awareness_delay_ms,
            typing_awareness_max_mult: cfg.typing_awareness_max_mult,
        }
    }
}

/// Delay before the `index`-th responder of a scheduled batch fires.
///
/// The first responder gets a breathing-room floor; later responders are
/// spaced out per index. Mentioned agents answer much faster (but never
/// under the mentioned floor), and delays stretch while other agents are
/// already typing. The result is clamped to twice the user-response maximum
/// so scheduling can never run away.
pub fn response_delay<R: Rng>(
    index: usize,
    is_user_response: bool,
    is_mentioned: bool,
    typing_count: usize,
    t: &DelayTuning,
    rng: &mut R,
) -> Duration {
    let (lo, hi) = if is_user_response {
        (t.min_user_ms, t.max_user_ms)
    } else {
        (t.min_background_ms, t.max_background_ms)
    };
    let mut delay = rng.gen_range(lo..=hi) as f64;

    if index == 0 {
        let floor = rng.gen_range(t.min_first_ms..=t.max_first_ms) as f64;
        delay = delay.max(floor);
    } else {
        delay += index as f64 * rng.gen_range(t.min_between_ms..=t.max_between_ms) as f64;
    }

    if is_mentioned {
        delay = (delay * t.mentioned_multiplier).max(t.min_mentioned_ms as f64);
    }

    if typing_count > 0 {
        let bump = t.typing_awareness_delay_ms as f64;
        let mult =
            (1.0 + typing_count as f64 * (bump / delay.max(1.0))).min(t.typing_awareness_max_mult);
        delay = delay * mult + typing_count as f64 * bump;
    }

    let cap = (t.max_user_ms * 2) as f64;
    Duration::from_millis(delay.clamp(0.0, cap) as u64)
}
