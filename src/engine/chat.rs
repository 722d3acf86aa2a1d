//! Merging provisional outbound chat messages with the backend's copies.
//!
//! A provisional message is replaced by its confirmation when the backend
//! echoes the provisional id, or failing that when sender and text match and
//! the timestamps fall within the merge window. Two distinct identical
//! messages sent inside the window will collapse into one.

use chrono::Duration;

use crate::models::chat::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A provisional entry was replaced in place.
    Confirmed,
    /// The message was already present.
    Duplicate,
    Appended,
}

pub fn merge_message(
    messages: &mut Vec<ChatMessage>,
    incoming: ChatMessage,
    window: Duration,
) -> MergeOutcome {
    if incoming.is_provisional() {
        messages.push(incoming);
        return MergeOutcome::Appended;
    }

    if messages.iter().any(|m| m.id == incoming.id) {
        return MergeOutcome::Duplicate;
    }

    let slot = incoming
        .client_id
        .as_deref()
        .and_then(|client_id| {
            messages
                .iter()
                .position(|m| m.is_provisional() && m.id == client_id)
        })
        .or_else(|| {
            messages.iter().position(|m| {
                m.is_provisional()
                    && m.sender == incoming.sender
                    && m.text == incoming.text
                    && (m.timestamp - incoming.timestamp).abs() <= window
            })
        });

    match slot {
        Some(index) => {
            messages[index] = incoming;
            MergeOutcome::Confirmed
        }
        None => {
            messages.push(incoming);
            MergeOutcome::Appended
        }
    }
}
