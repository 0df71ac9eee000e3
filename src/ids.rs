//! Deterministic chunk identifiers.
//!
//! `chunk_id = hex(sha256(source_id | game_index | path))`, truncated to a
//! fixed width. The registry remembers the full digest behind every issued
//! id so a truncated-hash collision is detected and resolved with a suffix
//! instead of silently reusing an id.
//!
//! Suffixes go to whichever colliding unit is registered second. Under a
//! parallel run that order depends on worker timing, so a suffixed id is the
//! one place where ids can differ between runs over the same input.

use crate::errors::ChunkWarning;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Hex characters kept from the digest
pub const DEFAULT_ID_WIDTH: usize = 32;

/// Serialize a unit path: labels joined by `/`, merged members joined by `+`
pub fn serialize_path(members: &[Vec<String>]) -> String {
    members
        .iter()
        .map(|labels| labels.join("/"))
        .collect::<Vec<_>>()
        .join("+")
}

pub fn preimage(source_id: &str, game_index: usize, path: &str) -> String {
    format!("{}|{}|{}", source_id, game_index, path)
}

fn digest(preimage: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(preimage.as_bytes()));
    out
}

fn hex_prefix(digest: &[u8; 32], width: usize) -> String {
    let mut hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex.truncate(width);
    hex
}

/// An id together with the collision it had to resolve, if any
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedId {
    pub id: String,
    pub collision: Option<ChunkWarning>,
}

/// Shared record of issued ids, each with the 32-byte digest it came from
pub struct IdRegistry {
    issued: DashMap<String, [u8; 32]>,
    width: usize,
    detect_collisions: bool,
}

impl IdRegistry {
    pub fn new(detect_collisions: bool) -> Self {
        Self::with_width(DEFAULT_ID_WIDTH, detect_collisions)
    }

    pub fn with_width(width: usize, detect_collisions: bool) -> Self {
        Self {
            issued: DashMap::new(),
            width: width.clamp(1, 64),
            detect_collisions,
        }
    }

    /// Id for a unit; the same preimage always yields the same id
    pub fn issue(&self, source_id: &str, game_index: usize, path: &str) -> IssuedId {
        let full = digest(&preimage(source_id, game_index, path));
        let base = hex_prefix(&full, self.width);
        if !self.detect_collisions {
            return IssuedId {
                id: base,
                collision: None,
            };
        }

        let mut suffix = 0usize;
        loop {
            let candidate = if suffix == 0 {
                base.clone()
            } else {
                format!("{}-{}", base, suffix)
            };
            match self.issued.entry(candidate.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(full);
                    let collision = (suffix > 0).then(|| {
                        warn!(base_id = %base, assigned_id = %candidate, "Chunk id collision");
                        ChunkWarning::IdCollision {
                            base_id: base.clone(),
                            assigned_id: candidate.clone(),
                        }
                    });
                    return IssuedId {
                        id: candidate,
                        collision,
                    };
                }
                Entry::Occupied(existing) if *existing.get() == full => {
                    return IssuedId {
                        id: candidate,
                        collision: None,
                    };
                }
                Entry::Occupied(_) => suffix += 1,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}
