//! Difficulty scoring.
//!
//! Two deliberately independent views over overlapping inputs:
//! - [`difficulty_score`]: 0-100 integer score and its [`DifficultyLevel`]
//! - [`difficulty_multiplier`]: product of four modifiers used to scale rewards

mod history;


pub use history::KillHistory;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Participant count the baseline difficulty is tuned for.
pub const BASELINE_PARTICIPANTS: i64 = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Inputs / Level
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DifficultyInputs {
    pub participant_count: usize,
    pub avg_power: f64,
    pub recommended_power: f64,
    pub total_kills: u32,
    /// Kills of the same boss kind within the last hour
    pub recent_kills: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DifficultyLevel {
    Easy,
    Normal,
    Hard,
    Hell,
    Desperate,
}

impl DifficultyLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=20 => DifficultyLevel::Easy,
            21..=40 => DifficultyLevel::Normal,
            41..=60 => DifficultyLevel::Hard,
            61..=80 => DifficultyLevel::Hell,
            _ => DifficultyLevel::Desperate,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DifficultyLevel::Easy => "EASY",
            DifficultyLevel::Normal => "NORMAL",
            DifficultyLevel::Hard => "HARD",
            DifficultyLevel::Hell => "HELL",
            DifficultyLevel::Desperate => "DESPERATE",
        }
    }
}

impl std::fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Score
// ─────────────────────────────────────────────────────────────────────────────

fn participant_adjustment(participants: usize) -> i64 {
    let participants = i64::try_from(participants).unwrap_or(i64::MAX / 10);
    ((BASELINE_PARTICIPANTS - participants).saturating_mul(10)).clamp(-30, 30)
}

fn power_adjustment(avg_power: f64, recommended_power: f64) -> i64 {
    if recommended_power <= 0.0 || !avg_power.is_finite() {
        return 0;
    }
    let ratio = (avg_power - recommended_power) / recommended_power;
    ((ratio * 40.0) as i64).clamp(-40, 40)
}

fn history_adjustment(total_kills: u32) -> i64 {
    ((total_kills as f64 * 0.6) as i64).clamp(0, 30)
}

fn time_adjustment(recent_kills: u32) -> i64 {
    (i64::from(recent_kills) * 2).clamp(0, 10)
}

/// `50 + participant + power + history + time`, each term clamped, result in 0..=100.
pub fn difficulty_score(inputs: &DifficultyInputs) -> u8 {
    let score = 50
        + participant_adjustment(inputs.participant_count)
        + power_adjustment(inputs.avg_power, inputs.recommended_power)
        + history_adjustment(inputs.total_kills)
        + time_adjustment(inputs.recent_kills);
    score.clamp(0, 100) as u8
}

// ─────────────────────────────────────────────────────────────────────────────
// Multiplier
// ─────────────────────────────────────────────────────────────────────────────

/// Fewer players than the baseline makes the fight harder, more makes it easier.
pub fn participant_modifier(participants: usize) -> f64 {
    (1.0 + (BASELINE_PARTICIPANTS as f64 - participants as f64) * 0.1).clamp(0.3, 1.5)
}

pub fn power_modifier(avg_power: f64, recommended_power: f64) -> f64 {
    if recommended_power <= 0.0 || !avg_power.is_finite() {
        return 1.0;
    }
    let diff = (avg_power - recommended_power) / recommended_power;
    if diff < -0.5 {
        2.0
    } else if diff > 0.5 {
        0.5
    } else {
        1.0 + diff
    }
}

pub fn history_modifier(total_kills: u32) -> f64 {
    (1.0 + total_kills as f64 * 0.02).min(2.0)
}

pub fn time_modifier(recent_kills: u32) -> f64 {
    (1.0 + recent_kills as f64 * 0.05).min(1.2)
}

/// Reward-scaling multiplier. History and time only contribute half and
/// three tenths of their excess over 1.0 respectively.
pub fn difficulty_multiplier(inputs: &DifficultyInputs) -> f64 {
    let participant = participant_modifier(inputs.participant_count);
    let power = power_modifier(inputs.avg_power, inputs.recommended_power);
    let history = history_modifier(inputs.total_kills);
    let time = time_modifier(inputs.recent_kills);
    participant * power * (1.0 + (history - 1.0) * 0.5) * (1.0 + (time - 1.0) * 0.3)
}

// ─────────────────────────────────────────────────────────────────────────────
// Throttled Calculator
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyState {
    pub score: u8,
    pub level: DifficultyLevel,
    pub multiplier: f64,
    pub computed_at: Option<DateTime<Utc>>,
}

impl Default for DifficultyState {
    fn default() -> Self {
        Self {
            score: 50,
            level: DifficultyLevel::from_score(50),
            multiplier: 1.0,
            computed_at: None,
        }
    }
}

/// Per-encounter difficulty, recomputed at most once per `update_interval`.
#[derive(Debug, Clone)]
pub struct DifficultyCalculator {
    state: DifficultyState,
    inputs: DifficultyInputs,
    update_interval: Duration,
}

impl DifficultyCalculator {
    pub fn new(update_interval: Duration) -> Self {
        Self {
            state: DifficultyState::default(),
            inputs: DifficultyInputs::default(),
            update_interval,
        }
    }

    /// Recompute unless the last computation is younger than the update
    /// interval, in which case the cached state is returned unchanged.
    pub fn update(&mut self, inputs: DifficultyInputs, now: DateTime<Utc>) -> DifficultyState {
        if let Some(last) = self.state.computed_at
            && now - last < self.update_interval
        {
            return self.state;
        }
        self.force_update(inputs, now)
    }

    pub fn force_update(&mut self, inputs: DifficultyInputs, now: DateTime<Utc>) -> DifficultyState {
        let score = difficulty_score(&inputs);
        self.inputs = inputs;
        self.state = DifficultyState {
            score,
            level: DifficultyLevel::from_score(score),
            multiplier: difficulty_multiplier(&inputs),
            computed_at: Some(now),
        };
        self.state
    }

    pub fn state(&self) -> DifficultyState {
        self.state
    }

    pub fn inputs(&self) -> DifficultyInputs {
        self.inputs
    }

    pub fn set_update_interval(&mut self, interval: Duration) {
        self.update_interval = interval;
    }

    pub fn reset(&mut self) {
        self.state = DifficultyState::default();
        self.inputs = DifficultyInputs::default();
    }
}
