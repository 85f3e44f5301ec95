//! Post-kill quality rating.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::progression::BossTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityGrade {
    S,
    A,
    B,
    C,
    D,
}

impl QualityGrade {
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => QualityGrade::S,
            75..=89 => QualityGrade::A,
            50..=74 => QualityGrade::B,
            25..=49 => QualityGrade::C,
            _ => QualityGrade::D,
        }
    }

    pub fn experience_multiplier(self) -> f64 {
        match self {
            QualityGrade::S => 2.0,
            QualityGrade::A => 1.5,
            QualityGrade::B => 1.0,
            QualityGrade::C => 0.8,
            QualityGrade::D => 0.5,
        }
    }

    pub fn drop_multiplier(self) -> f64 {
        match self {
            QualityGrade::S => 3.0,
            QualityGrade::A => 2.0,
            QualityGrade::B => 1.0,
            QualityGrade::C => 0.8,
            QualityGrade::D => 0.5,
        }
    }
}

impl std::fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QualityGrade::S => "S",
            QualityGrade::A => "A",
            QualityGrade::B => "B",
            QualityGrade::C => "C",
            QualityGrade::D => "D",
        };
        f.write_str(s)
    }
}

/// Everything known about a fight once the boss is down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KillContext {
    pub participants: usize,
    pub tier: BossTier,
    pub difficulty_score: u8,
    pub duration: Duration,
    pub deaths: u32,
    /// Boss was softened by an exploit-mitigation rule
    pub weakened: bool,
    /// Same boss kind was killed shortly before
    pub recent_kill: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityRating {
    pub score: u8,
    pub grade: QualityGrade,
    pub experience_multiplier: f64,
    pub drop_multiplier: f64,
}

impl QualityRating {
    pub fn from_score(score: u8) -> Self {
        let grade = QualityGrade::from_score(score);
        Self {
            score,
            grade,
            experience_multiplier: grade.experience_multiplier(),
            drop_multiplier: grade.drop_multiplier(),
        }
    }
}

fn base_score(ctx: &KillContext) -> f64 {
    let participants = ctx.participants as f64;
    let tier = f64::from(ctx.tier.level()) * 20.0;
    let difficulty = f64::from(ctx.difficulty_score) / 100.0 * 30.0;
    ((participants + tier + difficulty) / 3.0).clamp(0.0, 100.0)
}

fn bonuses(ctx: &KillContext) -> f64 {
    let mut bonus = 0.0;
    if ctx.deaths == 0 {
        bonus += 10.0;
    }
    if ctx.duration < Duration::minutes(10) {
        bonus += 5.0;
    }
    if ctx.deaths == 0 && ctx.participants >= 3 {
        bonus += 15.0;
    }
    if ctx.difficulty_score > 70 && ctx.deaths == 0 {
        bonus += 15.0;
    }
    bonus
}

fn penalties(ctx: &KillContext) -> f64 {
    let mut penalty = 0.0;
    if ctx.duration > Duration::minutes(40) {
        penalty += 10.0;
    }
    penalty += f64::from(ctx.deaths) * 5.0;
    if ctx.weakened {
        penalty += 20.0;
    }
    if ctx.recent_kill {
        penalty += 15.0;
    }
    penalty
}

/// Rate a finished fight. Computed once, at kill time.
pub fn rate(ctx: &KillContext) -> QualityRating {
    let score = (base_score(ctx) + bonuses(ctx) - penalties(ctx)).clamp(0.0, 100.0);
    QualityRating::from_score(score as u8)
}
