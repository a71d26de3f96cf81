//! Pure list operations the core uses to merge service responses, local
//! mutations and push events into state.

use std::collections::HashSet;

use crate::state::{ChatMessage, Member};

/// Converts a newest-first service listing into display order (oldest first),
/// keeping the first occurrence of every id.
pub fn display_order(newest_first: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut seen = HashSet::new();
    let mut out: Vec<ChatMessage> = newest_first
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect();
    out.reverse();
    out
}

/// Replaces the text of the message with `message_id`. Returns whether a
/// message matched.
pub fn patch_text(messages: &mut [ChatMessage], message_id: &str, text: &str) -> bool {
    match messages.iter_mut().find(|m| m.id == message_id) {
        Some(m) => {
            m.text = text.to_string();
            true
        }
        None => false,
    }
}

/// Removes the message with `message_id`. Absent ids are a no-op.
pub fn remove_message(messages: &mut Vec<ChatMessage>, message_id: &str) -> bool {
    let before = messages.len();
    messages.retain(|m| m.id != message_id);
    messages.len() != before
}

/// Drops search results that are already members.
pub fn exclude_members(profiles: Vec<Member>, members: &[Member]) -> Vec<Member> {
    profiles
        .into_iter()
        .filter(|p| !members.iter().any(|m| m.username == p.username))
        .collect()
}

pub fn toggle_selection(selected: &mut Vec<Member>, profile: Member) {
    if selected.iter().any(|m| m.username == profile.username) {
        selected.retain(|m| m.username != profile.username);
    } else {
        selected.push(profile);
    }
}

/// Appends `added` to `members`, skipping usernames already present.
pub fn append_members(members: &mut Vec<Member>, added: Vec<Member>) {
    for member in added {
        if !members.iter().any(|m| m.username == member.username) {
            members.push(member);
        }
    }
}

pub fn remove_member(members: &mut Vec<Member>, username: &str) {
    members.retain(|m| m.username != username);
}
