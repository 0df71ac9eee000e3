//! PGN text → raw (unvalidated) game trees.
//!
//! The visitor records SAN, comments, NAGs and headers exactly as written;
//! legality is checked later by the game tree builder.

use crate::errors::Result;
use crate::malformed_record;
use pgn_reader::{BufferedReader, Nag, RawComment, RawHeader, SanPlus, Skip, Visitor};
use std::borrow::Cow;

pub type RawNodeId = usize;

/// One unvalidated ply
#[derive(Debug, Clone, Default)]
pub struct RawNode {
    pub san: String,
    pub parent: Option<RawNodeId>,
    pub children: Vec<RawNodeId>,
    pub pre_comment: Option<String>,
    pub comment: Option<String>,
    pub nags: Vec<u8>,
}

/// One PGN game as read, before validation
#[derive(Debug, Clone)]
pub struct RawGame {
    pub headers: Vec<(String, String)>,
    /// Arena; index 0 is the root (no move)
    pub nodes: Vec<RawNode>,
    /// Moves replayed from the starting position before the root
    pub setup_moves: Vec<String>,
    /// Header decoding problems; the builder rejects the record when set
    pub malformed: Option<String>,
}

impl Default for RawGame {
    fn default() -> Self {
        Self::new()
    }
}

impl RawGame {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
            nodes: vec![RawNode::default()],
            setup_moves: Vec::new(),
            malformed: None,
        }
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((key.to_string(), value)),
        }
    }

    /// Moves reachable from the root (detached subtrees excluded)
    pub fn move_count(&self) -> usize {
        self.preorder().len() - 1
    }

    /// SAN of the moves from the root down to `node` (inclusive)
    pub fn moves_to(&self, node: RawNodeId) -> Vec<String> {
        let mut moves = Vec::new();
        let mut current = node;
        while let Some(parent) = self.nodes[current].parent {
            moves.push(self.nodes[current].san.clone());
            current = parent;
        }
        moves.reverse();
        moves
    }

    pub fn add_child(&mut self, parent: RawNodeId, san: String) -> RawNodeId {
        let id = self.nodes.len();
        self.nodes.push(RawNode {
            san,
            parent: Some(parent),
            ..RawNode::default()
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Node ids in pre-order (root first, continuation before alternatives)
    pub fn preorder(&self) -> Vec<RawNodeId> {
        self.preorder_from(0)
    }

    pub fn preorder_from(&self, start: RawNodeId) -> Vec<RawNodeId> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            order.push(id);
            for child in self.nodes[id].children.iter().rev() {
                stack.push(*child);
            }
        }
        order
    }
}

/// Visitor building a [`RawGame`] per PGN game
pub struct RawGameVisitor {
    game: RawGame,
    /// Node the next move is appended to
    cursor: RawNodeId,
    /// Last node created (receives comments and NAGs)
    last: RawNodeId,
    /// (cursor, last) saved at each open variation
    stack: Vec<(RawNodeId, RawNodeId)>,
    /// Comments seen before the first move of a variation
    pending_pre_comment: Option<String>,
}

impl RawGameVisitor {
    pub fn new() -> Self {
        Self {
            game: RawGame::new(),
            cursor: 0,
            last: 0,
            stack: Vec::new(),
            pending_pre_comment: None,
        }
    }
}

impl Default for RawGameVisitor {
    fn default() -> Self {
        Self::new()
    }
}

fn append_text(slot: &mut Option<String>, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    match slot {
        Some(existing) => {
            existing.push(' ');
            existing.push_str(text);
        }
        None => *slot = Some(text.to_string()),
    }
}

impl Visitor for RawGameVisitor {
    type Result = RawGame;

    fn begin_game(&mut self) {
        self.game = RawGame::new();
        self.cursor = 0;
        self.last = 0;
        self.stack.clear();
        self.pending_pre_comment = None;
    }

    fn header(&mut self, key: &[u8], value: RawHeader<'_>) {
        let key = String::from_utf8_lossy(key).to_string();
        match value.decode_utf8() {
            Ok(value) => self.game.headers.push((key, value.to_string())),
            Err(e) => {
                self.game.malformed = Some(format!("header '{}' is not valid UTF-8: {}", key, e));
            }
        }
    }

    fn end_headers(&mut self) -> Skip {
        Skip(false)
    }

    fn san(&mut self, san_plus: SanPlus) {
        let id = self.game.add_child(self.cursor, san_plus.to_string());
        self.game.nodes[id].pre_comment = self.pending_pre_comment.take();
        self.cursor = id;
        self.last = id;
    }

    fn nag(&mut self, nag: Nag) {
        if self.last == 0 || self.awaiting_first_move() {
            return;
        }
        self.game.nodes[self.last].nags.push(nag.0);
    }

    fn comment(&mut self, comment: RawComment<'_>) {
        let text = String::from_utf8_lossy(comment.as_bytes()).to_string();
        if self.last == 0 && self.stack.is_empty() {
            // Before the first move of the game
            append_text(&mut self.game.nodes[0].comment, &text);
        } else if self.last == self.cursor && !self.awaiting_first_move() {
            append_text(&mut self.game.nodes[self.last].comment, &text);
        } else {
            append_text(&mut self.pending_pre_comment, &text);
        }
    }

    fn begin_variation(&mut self) -> Skip {
        self.stack.push((self.cursor, self.last));
        // The variation replaces the last move played
        let parent = self.game.nodes[self.cursor].parent.unwrap_or(0);
        self.cursor = parent;
        self.last = usize::MAX;
        Skip(false)
    }

    fn end_variation(&mut self) {
        if let Some((cursor, last)) = self.stack.pop() {
            // A comment-only variation is folded into the move it followed
            if let Some(orphan) = self.pending_pre_comment.take() {
                append_text(&mut self.game.nodes[cursor].comment, &orphan);
            }
            self.cursor = cursor;
            self.last = last;
        }
    }

    fn end_game(&mut self) -> Self::Result {
        if let Some(orphan) = self.pending_pre_comment.take() {
            append_text(&mut self.game.nodes[self.cursor].comment, &orphan);
        }
        std::mem::take(&mut self.game)
    }
}

impl RawGameVisitor {
    fn awaiting_first_move(&self) -> bool {
        self.last == usize::MAX
    }
}

/// Longest `{...}` body handed to the reader in one piece; its buffer is 8 KiB
pub const MAX_COMMENT_BYTES: usize = 4096;

/// Split a PGN text into per-game records.
///
/// A record starts at a tag pair line that follows movetext. Braced comments
/// are tracked across lines so a `[` inside a comment never starts a record.
pub fn split_records(pgn: &str) -> Vec<&str> {
    let mut records = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    let mut in_comment = false;
    let mut seen_movetext = false;

    for line in pgn.split_inclusive('\n') {
        if !in_comment && line.trim_start().starts_with('[') {
            if seen_movetext {
                records.push(&pgn[start..offset]);
                start = offset;
                seen_movetext = false;
            }
        } else if in_comment || !line.starts_with('%') {
            for c in line.chars() {
                match c {
                    '}' if in_comment => in_comment = false,
                    _ if in_comment => {}
                    '{' => {
                        in_comment = true;
                        seen_movetext = true;
                    }
                    ';' => {
                        seen_movetext = true;
                        break;
                    }
                    c if !c.is_whitespace() => seen_movetext = true,
                    _ => {}
                }
            }
        }
        offset += line.len();
    }

    if !pgn[start..].trim().is_empty() {
        records.push(&pgn[start..]);
    }
    records
}

/// Break `{...}` comments longer than [`MAX_COMMENT_BYTES`] into consecutive
/// blocks, cut at whitespace. The visitor joins consecutive comments with a
/// single space, so the comment text read back is unchanged.
pub fn split_long_comments(record: &str) -> Cow<'_, str> {
    let bytes = record.as_bytes();
    let mut out = String::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        let line_start = i == 0 || bytes[i - 1] == b'\n';
        match bytes[i] {
            b'[' | b'%' if line_start => i = line_end(record, i),
            b';' => i = line_end(record, i),
            b'{' => {
                let Some(len) = record[i + 1..].find('}') else {
                    break;
                };
                let body = &record[i + 1..i + 1 + len];
                if body.len() > MAX_COMMENT_BYTES {
                    out.push_str(&record[copied..i]);
                    let pieces: Vec<String> = comment_pieces(body).iter().map(|p| format!("{{{}}}", p)).collect();
                    out.push_str(&pieces.join(" "));
                    copied = i + len + 2;
                }
                i += len + 2;
            }
            _ => i += 1,
        }
    }

    if copied == 0 {
        Cow::Borrowed(record)
    } else {
        out.push_str(&record[copied..]);
        Cow::Owned(out)
    }
}

fn line_end(text: &str, from: usize) -> usize {
    text[from..].find('\n').map_or(text.len(), |at| from + at + 1)
}

fn comment_pieces(body: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = body.trim();
    while rest.len() > MAX_COMMENT_BYTES {
        let mut cut = MAX_COMMENT_BYTES;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let split = rest[..cut]
            .rfind(char::is_whitespace)
            .filter(|at| *at > 0)
            .unwrap_or(cut);
        pieces.push(rest[..split].trim_end());
        rest = rest[split..].trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}

/// Read the games of one record
pub fn read_record(record: &str) -> Result<Vec<RawGame>> {
    let text = split_long_comments(record);
    let mut reader = BufferedReader::new_cursor(text.as_bytes());
    let mut visitor = RawGameVisitor::new();
    let mut games = Vec::new();

    loop {
        match reader.read_game(&mut visitor) {
            Ok(Some(game)) => {
                if game.headers.is_empty() && game.move_count() == 0 && game.nodes[0].comment.is_none()
                {
                    continue;
                }
                games.push(game);
            }
            Ok(None) => break,
            Err(e) => return Err(malformed_record!("PGN read failed: {}", e)),
        }
    }

    Ok(games)
}

/// Read every record of a PGN text; an unreadable record does not affect the others
pub fn read_records(pgn: &str) -> Vec<Result<Vec<RawGame>>> {
    split_records(pgn).into_iter().map(read_record).collect()
}

/// Read every game in a PGN text, failing on the first unreadable record
pub fn read_games(pgn: &str) -> Result<Vec<RawGame>> {
    let mut games = Vec::new();
    for record in read_records(pgn) {
        games.extend(record?);
    }
    Ok(games)
}
