//! Evaluation and significance annotations attached to individual plies.
//!
//! Evaluations come from `[%eval ...]` comment commands. Significance markers
//! come from NAGs and author keywords; detection runs every rule of a fixed
//! table and accumulates all matches.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

/// Engine or author evaluation of the position after a move
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluation {
    /// Advantage in pawns from White's perspective
    Pawns(f32),
    /// Mate in N (negative = Black mates)
    Mate(i32),
}

impl Evaluation {
    /// Pawn-equivalent value used to measure evaluation swings
    pub fn as_pawns(&self) -> f32 {
        match self {
            Evaluation::Pawns(p) => *p,
            Evaluation::Mate(n) if *n >= 0 => 100.0,
            Evaluation::Mate(_) => -100.0,
        }
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evaluation::Pawns(p) => write!(f, "{:+.2}", p),
            Evaluation::Mate(n) => write!(f, "#{}", n),
        }
    }
}

fn eval_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[%eval\s+(#?)([+-]?\d+(?:\.\d+)?)(?:,\d+)?\s*\]").expect("valid eval regex")
    })
}

fn command_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[%(?:eval|clk|emt|csl|cal)\b[^\]]*\]").expect("valid command regex"))
}

/// Extract the last `[%eval]` command of a comment
pub fn parse_eval(comment: &str) -> Option<Evaluation> {
    let captures = eval_regex().captures_iter(comment).last()?;
    let mate = !captures[1].is_empty();
    let value = &captures[2];
    if mate {
        value.parse::<i32>().ok().map(Evaluation::Mate)
    } else {
        value.parse::<f32>().ok().map(Evaluation::Pawns)
    }
}

/// Remove machine commands (`[%eval]`, `[%clk]`, arrows) and collapse whitespace
pub fn strip_commands(comment: &str) -> String {
    let stripped = command_regex().replace_all(comment, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Author-supplied importance of a move
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    Brilliant,
    Critical,
    Novelty,
    OnlyMove,
    TurningPoint,
    Good,
    Interesting,
    Dubious,
    Mistake,
    Blunder,
}

impl Significance {
    /// Weight used when prioritising branches
    pub fn weight(&self) -> u32 {
        match self {
            Significance::Brilliant | Significance::Critical => 5,
            Significance::Novelty | Significance::OnlyMove | Significance::TurningPoint => 4,
            Significance::Blunder | Significance::Mistake => 3,
            Significance::Good | Significance::Interesting => 2,
            Significance::Dubious => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Significance::Brilliant => "brilliant",
            Significance::Critical => "critical",
            Significance::Novelty => "novelty",
            Significance::OnlyMove => "only move",
            Significance::TurningPoint => "turning point",
            Significance::Good => "good",
            Significance::Interesting => "interesting",
            Significance::Dubious => "dubious",
            Significance::Mistake => "mistake",
            Significance::Blunder => "blunder",
        }
    }
}

/// NAG code to significance
const NAG_RULES: &[(u8, Significance)] = &[
    (1, Significance::Good),
    (2, Significance::Mistake),
    (3, Significance::Brilliant),
    (4, Significance::Blunder),
    (5, Significance::Interesting),
    (6, Significance::Dubious),
    (7, Significance::OnlyMove),
    (8, Significance::OnlyMove),
    (18, Significance::TurningPoint),
    (19, Significance::TurningPoint),
    (146, Significance::Novelty),
];

/// Lower-case comment keyword to significance
const KEYWORD_RULES: &[(&str, Significance)] = &[
    ("critical", Significance::Critical),
    ("key move", Significance::Critical),
    ("brilliant", Significance::Brilliant),
    ("novelty", Significance::Novelty),
    ("only move", Significance::OnlyMove),
    ("turning point", Significance::TurningPoint),
    ("blunder", Significance::Blunder),
];

/// Collect every significance marker implied by NAGs and comment text
pub fn detect_significance<'a, I>(nags: &[u8], comments: I) -> BTreeSet<Significance>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut found = BTreeSet::new();

    for (code, marker) in NAG_RULES {
        if nags.contains(code) {
            found.insert(*marker);
        }
    }

    for comment in comments {
        let lower = comment.to_lowercase();
        for (keyword, marker) in KEYWORD_RULES {
            if lower.contains(keyword) {
                found.insert(*marker);
            }
        }
    }

    found
}

/// PGN glyph for the common move-assessment NAGs, `$n` otherwise
pub fn nag_glyph(nag: u8) -> String {
    match nag {
        1 => "!".to_string(),
        2 => "?".to_string(),
        3 => "!!".to_string(),
        4 => "??".to_string(),
        5 => "!?".to_string(),
        6 => "?!".to_string(),
        n => format!("${}", n),
    }
}
