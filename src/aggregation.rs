//! Embedded-game detection.
//!
//! Annotated collections often bundle several complete games into one PGN
//! record: a "model game" quoted inside the notes, or a numbered example
//! given as a variation. The detector scans every node's comments against a
//! fixed marker rule table and lifts each marked subtree out into its own
//! [`RawGame`], so it is chunked as an independent game rather than as a
//! variation of its host.
//!
//! Detection accumulates every rule that matches a comment. A node is only
//! extracted when its markers agree and the node actually starts a line (the
//! first move of the record or an alternative); anything else stays in place
//! and produces an [`ChunkWarning::AmbiguousMarker`].

use crate::errors::ChunkWarning;
use crate::pgn_loader::{RawGame, RawNode, RawNodeId};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Kind of cue that announced an embedded game
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerKind {
    ModelGame,
    IllustrativeGame,
    Example(u32),
    /// `[%game White "..." Black "..."]` command
    Explicit,
}

/// One marker found in a comment, with the headers it implies
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub kind: MarkerKind,
    pub headers: Vec<(String, String)>,
}

/// Every marker and problem found in a piece of comment text
#[derive(Debug, Clone, Default)]
pub struct MarkerScan {
    pub markers: Vec<Marker>,
    pub problems: Vec<String>,
}

impl MarkerScan {
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty() && self.problems.is_empty()
    }

    fn example_numbers(&self) -> BTreeSet<u32> {
        self.markers
            .iter()
            .filter_map(|m| match m.kind {
                MarkerKind::Example(n) => Some(n),
                _ => None,
            })
            .collect()
    }
}

type MarkerRule = fn(&str, &mut MarkerScan);

/// Applied in order; every rule sees the whole text
const MARKER_RULES: &[MarkerRule] = &[
    model_game_rule,
    illustrative_game_rule,
    example_rule,
    explicit_game_rule,
];

fn model_game_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bmodel\s+game\b(?:\s+\d+)?\s*[:.\-–]?").expect("valid regex"))
}

fn illustrative_game_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\billustrative\s+game\b(?:\s+\d+)?\s*[:.\-–]?").expect("valid regex")
    })
}

fn example_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bexample\s+(\d+)\b\s*[:.\-–]?").expect("valid regex"))
}

/// Start of any marker; ends the description of the previous one
fn any_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:model\s+game|illustrative\s+game|example\s+\d+)\b|[\[\]{}\n]")
            .expect("valid regex")
    })
}

fn explicit_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[%game\b([^\]\[]*)\]").expect("valid regex"))
}

fn explicit_pair_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(\w+)\s*=?\s*"([^"]*)""#).expect("valid regex"))
}

fn players_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([^,;.]+?)\s+[-–]\s+([^,;.]+)(?:,\s*([^.;]+))?").expect("valid regex")
    })
}

fn event_year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*?)[\s,]*\b((?:1[5-9]|20)\d{2})$").expect("valid regex"))
}

fn model_game_rule(text: &str, scan: &mut MarkerScan) {
    for head in model_game_regex().find_iter(text) {
        scan.markers.push(Marker {
            kind: MarkerKind::ModelGame,
            headers: describe_players(description_after(text, head.end())),
        });
    }
}

fn illustrative_game_rule(text: &str, scan: &mut MarkerScan) {
    for head in illustrative_game_regex().find_iter(text) {
        scan.markers.push(Marker {
            kind: MarkerKind::IllustrativeGame,
            headers: describe_players(description_after(text, head.end())),
        });
    }
}

fn example_rule(text: &str, scan: &mut MarkerScan) {
    for captures in example_regex().captures_iter(text) {
        let Ok(number) = captures[1].parse::<u32>() else {
            scan.problems.push(format!("unreadable example number '{}'", &captures[1]));
            continue;
        };
        let end = captures.get(0).map(|m| m.end()).unwrap_or(text.len());
        scan.markers.push(Marker {
            kind: MarkerKind::Example(number),
            headers: describe_players(description_after(text, end)),
        });
    }
}

/// Text following a marker, up to the next marker or bracket
fn description_after(text: &str, end: usize) -> &str {
    let rest = &text[end..];
    match any_marker_regex().find(rest) {
        Some(next) => &rest[..next.start()],
        None => rest,
    }
}

fn explicit_game_rule(text: &str, scan: &mut MarkerScan) {
    let opened = text.matches("[%game").count();
    let mut closed = 0;
    for captures in explicit_block_regex().captures_iter(text) {
        closed += 1;
        let body = &captures[1];
        let headers: Vec<(String, String)> = explicit_pair_regex()
            .captures_iter(body)
            .map(|c| (c[1].to_string(), c[2].trim().to_string()))
            .collect();
        let leftover = explicit_pair_regex().replace_all(body, "");
        if headers.is_empty() || !leftover.trim().is_empty() {
            scan.problems.push(format!("malformed [%game] block '{}'", body.trim()));
            continue;
        }
        scan.markers.push(Marker {
            kind: MarkerKind::Explicit,
            headers,
        });
    }
    if opened > closed {
        scan.problems.push("unterminated [%game] block".to_string());
    }
}

/// Headers from a "White - Black, Event Year" description
fn describe_players(description: &str) -> Vec<(String, String)> {
    let Some(captures) = players_regex().captures(description) else {
        return Vec::new();
    };
    let mut headers = vec![
        ("White".to_string(), captures[1].trim().to_string()),
        ("Black".to_string(), captures[2].trim().to_string()),
    ];
    if let Some(event) = captures.get(3).map(|m| m.as_str().trim()).filter(|e| !e.is_empty()) {
        match event_year_regex().captures(event) {
            Some(parts) => {
                let name = parts[1].trim();
                if !name.is_empty() {
                    headers.push(("Event".to_string(), name.to_string()));
                }
                headers.push(("Date".to_string(), format!("{}.??.??", &parts[2])));
            }
            None => headers.push(("Event".to_string(), event.to_string())),
        }
    }
    headers
}

/// Run every marker rule over `text`
pub fn scan_markers(text: &str) -> MarkerScan {
    let mut scan = MarkerScan::default();
    for rule in MARKER_RULES {
        rule(text, &mut scan);
    }
    if scan.example_numbers().len() > 1 {
        let numbers: Vec<String> = scan.example_numbers().iter().map(u32::to_string).collect();
        scan.problems
            .push(format!("conflicting example numbers {}", numbers.join(", ")));
    }
    scan
}

/// A game produced by the detector
#[derive(Debug, Clone)]
pub struct DetectedGame {
    pub raw: RawGame,
    /// Position of the enclosing game in [`Aggregation::games`]
    pub embedded_from: Option<usize>,
    pub warnings: Vec<ChunkWarning>,
}

/// Independent games found in one raw record, in emission order
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub games: Vec<DetectedGame>,
}

impl Aggregation {
    pub fn warning_count(&self) -> usize {
        self.games.iter().map(|g| g.warnings.len()).sum()
    }
}

/// Headers an extracted game inherits from its host
const INHERITED_HEADERS: &[&str] = &[
    "Event",
    "Site",
    "Annotator",
    "Collection",
    "Chapter",
    "Section",
    "StudyName",
    "ChapterName",
    "SetUp",
    "FEN",
];

/// Split a raw record into its independent games.
///
/// The host comes first, followed by the games extracted from it in
/// pre-order, each immediately followed by the games nested inside it. A host
/// left without moves is dropped and its opening comment moves to its first
/// extracted game.
pub fn detect_embedded_games(raw: RawGame) -> Aggregation {
    let mut aggregation = Aggregation::default();
    collect(raw, None, None, &mut aggregation.games);
    aggregation
}

fn collect(
    mut game: RawGame,
    consumed: Option<RawNodeId>,
    enclosing: Option<usize>,
    out: &mut Vec<DetectedGame>,
) {
    let mut warnings = Vec::new();
    let mut marked: Vec<(RawNodeId, Vec<(String, String)>)> = Vec::new();

    let mut stack = vec![0];
    while let Some(id) = stack.pop() {
        if id != 0 && Some(id) != consumed {
            let text = marker_text(&game, id);
            let scan = scan_markers(&text);
            if !scan.is_empty() {
                match classify(&game, id, &scan) {
                    Ok(()) => {
                        marked.push((id, merged_headers(&scan)));
                        // Nested markers are handled inside the extracted game
                        continue;
                    }
                    Err(reason) => {
                        let path = game.moves_to(id).join(" ");
                        warn!(path = %path, "Leaving embedded-game marker in place: {}", reason);
                        warnings.push(ChunkWarning::AmbiguousMarker { path, reason });
                    }
                }
            }
        }
        for child in game.nodes[id].children.iter().rev() {
            stack.push(*child);
        }
    }

    let mut extracted: Vec<(RawGame, RawNodeId)> = marked
        .iter()
        .map(|(id, headers)| extract_subtree(&game, *id, headers))
        .collect();
    for (id, _) in &marked {
        if let Some(parent) = game.nodes[*id].parent {
            game.nodes[parent].children.retain(|c| c != id);
        }
    }

    let host_index = if game.move_count() > 0 || extracted.is_empty() {
        out.push(DetectedGame {
            raw: game,
            embedded_from: enclosing,
            warnings,
        });
        Some(out.len() - 1)
    } else {
        if let Some((first, _)) = extracted.first_mut() {
            let carried = game.nodes[0].comment.take();
            let own = first.nodes[0].comment.take();
            first.nodes[0].comment = join_comments(carried, own);
        }
        debug!(extracted = extracted.len(), "Dropping host record without own moves");
        enclosing
    };

    if !extracted.is_empty() {
        debug!(count = extracted.len(), "Extracted embedded games");
    }
    for (sub, first_move) in extracted {
        collect(sub, Some(first_move), host_index, out);
    }
}

/// Comment text that can carry a marker for `id`
fn marker_text(game: &RawGame, id: RawNodeId) -> String {
    let node = &game.nodes[id];
    let mut parts: Vec<&str> = Vec::new();
    // A comment before the first move of the record belongs to that move
    if node.parent == Some(0) && game.nodes[0].children.first() == Some(&id) {
        parts.extend(game.nodes[0].comment.as_deref());
    }
    parts.extend(node.pre_comment.as_deref());
    parts.extend(node.comment.as_deref());
    parts.join(" ")
}

/// Whether markers at `id` can be acted on
fn classify(game: &RawGame, id: RawNodeId, scan: &MarkerScan) -> std::result::Result<(), String> {
    if !scan.problems.is_empty() {
        return Err(scan.problems.join("; "));
    }
    let node = &game.nodes[id];
    let parent = node.parent.unwrap_or(0);
    let starts_line = parent == 0 || game.nodes[parent].children.first() != Some(&id);
    if !starts_line {
        return Err("marker on a main-line continuation".to_string());
    }
    Ok(())
}

/// Headers implied by all markers; explicit pairs win over descriptions
fn merged_headers(scan: &MarkerScan) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    let ordered = scan
        .markers
        .iter()
        .filter(|m| m.kind != MarkerKind::Explicit)
        .chain(scan.markers.iter().filter(|m| m.kind == MarkerKind::Explicit));
    for marker in ordered {
        for (key, value) in &marker.headers {
            match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
                Some(entry) => entry.1 = value.clone(),
                None => headers.push((key.clone(), value.clone())),
            }
        }
    }
    headers
}

/// Copy the subtree at `id` into a new game; returns it with the id of its first move
fn extract_subtree(
    host: &RawGame,
    id: RawNodeId,
    marker_headers: &[(String, String)],
) -> (RawGame, RawNodeId) {
    let mut game = RawGame::new();

    let whole_line = host.nodes[id].parent == Some(0) && host.nodes[0].children.first() == Some(&id);
    if whole_line {
        game.headers = host.headers.clone();
    } else {
        for key in INHERITED_HEADERS {
            if let Some(value) = host.header(key) {
                game.set_header(key, value);
            }
        }
        game.set_header("Result", "*");
    }
    for (key, value) in marker_headers {
        game.set_header(key, value.clone());
    }
    for key in ["White", "Black"] {
        if game.header(key).is_none() {
            game.set_header(key, "?");
        }
    }

    let parent = host.nodes[id].parent.unwrap_or(0);
    game.setup_moves = host.setup_moves.clone();
    game.setup_moves.extend(host.moves_to(parent));

    let mut remap: HashMap<RawNodeId, RawNodeId> = HashMap::new();
    remap.insert(parent, 0);
    for old in host.preorder_from(id) {
        let source = &host.nodes[old];
        let new_parent = source.parent.and_then(|p| remap.get(&p).copied()).unwrap_or(0);
        let new_id = game.add_child(new_parent, source.san.clone());
        game.nodes[new_id] = RawNode {
            parent: Some(new_parent),
            children: Vec::new(),
            ..source.clone()
        };
        remap.insert(old, new_id);
    }

    // The marker itself introduces the new game
    let first = 1;
    game.nodes[0].comment = game.nodes[first].pre_comment.take();

    (game, first)
}

fn join_comments(first: Option<String>, second: Option<String>) -> Option<String> {
    match (first, second) {
        (Some(a), Some(b)) => Some(format!("{} {}", a, b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgn_loader::read_games;

    fn detect(pgn: &str) -> Aggregation {
        detect_embedded_games(read_games(pgn).unwrap().remove(0))
    }

    #[test]
    fn test_rules_accumulate() {
        let scan = scan_markers(
            r#"Model game: Smith - Jones, Open 1999 [%game White "Smith" Black "Jones" Round "3"]"#,
        );
        assert_eq!(scan.markers.len(), 2);
        assert!(scan.problems.is_empty());
        let merged = merged_headers(&scan);
        assert!(merged.contains(&("Round".to_string(), "3".to_string())));
        assert!(merged.contains(&("Date".to_string(), "1999.??.??".to_string())));
        assert!(merged.contains(&("Event".to_string(), "Open".to_string())));
    }

    #[test]
    fn test_conflicting_examples_are_a_problem() {
        let scan = scan_markers("Example 3, compare example 4");
        assert_eq!(scan.markers.len(), 2);
        assert_eq!(scan.problems.len(), 1);

        let scan = scan_markers(r#"[%game White "A" Black "B""#);
        assert_eq!(scan.problems, vec!["unterminated [%game] block".to_string()]);
    }

    #[test]
    fn test_alternative_marker_is_extracted() {
        let aggregation = detect(
            "[Event \"Course\"]\n[Annotator \"GM X\"]\n\n1. e4 e5 ({Model game: Smith - Jones, Open 1999} 1... c5 2. Nf3 d6) 2. Nf3 Nc6 *",
        );
        assert_eq!(aggregation.games.len(), 2);

        let host = &aggregation.games[0].raw;
        assert_eq!(host.move_count(), 4);
        assert_eq!(aggregation.games[0].embedded_from, None);

        let embedded = &aggregation.games[1];
        assert_eq!(embedded.embedded_from, Some(0));
        assert_eq!(embedded.raw.header("White"), Some("Smith"));
        assert_eq!(embedded.raw.header("Event"), Some("Open"));
        assert_eq!(embedded.raw.header("Annotator"), Some("GM X"));
        assert_eq!(embedded.raw.setup_moves, vec!["e4".to_string()]);
        assert_eq!(embedded.raw.move_count(), 3);
        assert!(embedded.raw.nodes[0]
            .comment
            .as_deref()
            .unwrap()
            .starts_with("Model game"));
    }

    #[test]
    fn test_bundle_yields_one_record_per_marker() {
        let aggregation = detect(
            "{Model game 1: Alpha - Beta, Cup 2001} 1. d4 d5 2. c4 ({Example 2: Gamma - Delta, Open 2002} 2. Nf3 Nf6 3. g3) 2... e6 *",
        );
        // Host loses its only line, so it is dropped
        assert_eq!(aggregation.games.len(), 2);
        assert_eq!(aggregation.games[0].raw.header("White"), Some("Alpha"));
        assert_eq!(aggregation.games[0].embedded_from, None);
        assert_eq!(aggregation.games[0].raw.move_count(), 4);
        assert_eq!(aggregation.games[1].raw.header("White"), Some("Gamma"));
        assert_eq!(aggregation.games[1].embedded_from, Some(0));
        assert_eq!(
            aggregation.games[1].raw.setup_moves,
            vec!["d4".to_string(), "d5".to_string()]
        );
    }

    #[test]
    fn test_continuation_marker_stays_in_place() {
        let aggregation = detect("1. e4 e5 2. Nf3 {Model game: A - B} Nc6 *");
        assert_eq!(aggregation.games.len(), 1);
        assert_eq!(aggregation.games[0].raw.move_count(), 4);
        assert_eq!(aggregation.games[0].warnings.len(), 1);
        assert_eq!(aggregation.games[0].warnings[0].kind(), "ambiguous_marker");
    }

    #[test]
    fn test_malformed_explicit_marker_stays_in_place() {
        let aggregation = detect(r#"1. e4 e5 ({[%game White Smith]} 1... c5) 2. Nf3 *"#);
        assert_eq!(aggregation.games.len(), 1);
        assert_eq!(aggregation.games[0].raw.move_count(), 4);
        assert_eq!(aggregation.warning_count(), 1);
    }

    #[test]
    fn test_plain_record_is_untouched() {
        let aggregation = detect("[White \"A\"]\n\n1. e4 e5 (1... c5) 2. Nf3 *");
        assert_eq!(aggregation.games.len(), 1);
        assert_eq!(aggregation.games[0].raw.move_count(), 4);
        assert!(aggregation.games[0].warnings.is_empty());
    }
}
