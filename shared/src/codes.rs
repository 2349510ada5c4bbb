//! Item-code integrity: duplicate detection and disambiguated code proposals
//!
//! Ledger and usage records key off an item's durable id, but reporting keys
//! off the item code, so codes that collide case-insensitively are found and
//! renamed by an operator-driven maintenance pass.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::StockItem;

/// Width numeric proposals are zero-padded to
pub const CODE_WIDTH: usize = 3;

/// Errors raised when a code cannot be applied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodeError {
    #[error("Item code '{0}' is already used by another item")]
    Collision(String),

    #[error("Invalid item code: {0}")]
    Invalid(&'static str),
}

/// One member of a duplicate group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateMember {
    pub id: Uuid,
    pub item_code: String,
    pub created_at: DateTime<Utc>,
}

/// Items sharing a code case-insensitively, oldest first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateGroup {
    /// Lower-cased shared code
    pub key: String,
    pub members: Vec<DuplicateMember>,
}

/// A proposed code for one item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeProposal {
    pub id: Uuid,
    pub current_code: String,
    pub proposed_code: String,
}

impl CodeProposal {
    pub fn is_change(&self) -> bool {
        self.current_code != self.proposed_code
    }
}

/// Group items whose codes collide case-insensitively.
///
/// Groups are ordered by code; members by creation time, then id.
pub fn find_duplicate_codes(items: &[StockItem]) -> Vec<DuplicateGroup> {
    let mut by_code: BTreeMap<String, Vec<DuplicateMember>> = BTreeMap::new();

    for item in items {
        by_code
            .entry(item.item_code.trim().to_lowercase())
            .or_default()
            .push(DuplicateMember {
                id: item.id,
                item_code: item.item_code.clone(),
                created_at: item.created_at,
            });
    }

    by_code
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(key, mut members)| {
            members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            DuplicateGroup { key, members }
        })
        .collect()
}

/// Hands out codes that are not yet used, remembering what it has handed out
#[derive(Debug, Clone, Default)]
pub struct CodeAllocator {
    taken: HashSet<String>,
}

impl CodeAllocator {
    pub fn new<'a>(codes: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            taken: codes.into_iter().map(normalize).collect(),
        }
    }

    pub fn from_items(items: &[StockItem]) -> Self {
        Self::new(items.iter().map(|i| i.item_code.as_str()))
    }

    pub fn is_taken(&self, code: &str) -> bool {
        self.taken.contains(&normalize(code))
    }

    /// Reserve and return the next unused code derived from `base`.
    ///
    /// All-digit bases count upward from the base value; anything else, and
    /// any number with no free successor, gets an alphabetic suffix
    /// (`-A`, `-B`, ... `-Z`, `-AA`, ...).
    pub fn next_code(&mut self, base: &str) -> String {
        let base = base.trim();
        let code = parse_numeric(base)
            .and_then(|n| self.next_numeric(n))
            .unwrap_or_else(|| self.next_suffixed(base));

        self.taken.insert(normalize(&code));
        code
    }

    fn next_numeric(&self, mut n: u64) -> Option<String> {
        loop {
            n = n.checked_add(1)?;
            let candidate = format!("{:0width$}", n, width = CODE_WIDTH);
            if !self.is_taken(&candidate) {
                return Some(candidate);
            }
        }
    }

    fn next_suffixed(&self, base: &str) -> String {
        let mut index = 0usize;
        loop {
            let candidate = format!("{}-{}", base, alpha_suffix(index));
            if !self.is_taken(&candidate) {
                return candidate;
            }
            index += 1;
        }
    }

    /// First member keeps its code; every later member gets the next unused code
    pub fn propose(&mut self, group: &DuplicateGroup) -> Vec<CodeProposal> {
        let mut proposals = Vec::with_capacity(group.members.len());

        for (position, member) in group.members.iter().enumerate() {
            let proposed_code = if position == 0 {
                member.item_code.clone()
            } else {
                let base = group.members[0].item_code.clone();
                self.next_code(&base)
            };
            proposals.push(CodeProposal {
                id: member.id,
                current_code: member.item_code.clone(),
                proposed_code,
            });
        }

        proposals
    }
}

/// Propose codes for every duplicate group in `items`
pub fn propose_fixes(items: &[StockItem]) -> Vec<CodeProposal> {
    let mut allocator = CodeAllocator::from_items(items);
    find_duplicate_codes(items)
        .iter()
        .flat_map(|group| allocator.propose(group))
        .collect()
}

/// Check that `new_code` may be given to `item_id` without colliding
pub fn check_rename(items: &[StockItem], item_id: Uuid, new_code: &str) -> Result<(), CodeError> {
    crate::validation::validate_item_code(new_code).map_err(CodeError::Invalid)?;

    let collides = items
        .iter()
        .any(|other| other.id != item_id && other.code_matches(new_code));
    if collides {
        return Err(CodeError::Collision(new_code.trim().to_string()));
    }
    Ok(())
}

fn normalize(code: &str) -> String {
    code.trim().to_lowercase()
}

fn parse_numeric(code: &str) -> Option<u64> {
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    code.parse().ok()
}

fn alpha_suffix(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(char::from(b'A' + (index % 26) as u8));
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}
