use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One line in the lobby chat. `author == None` marks a system notice.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub author: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    pub fn message(author: &str, content: &str) -> Self {
        Self {
            author: Some(author.to_string()),
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn notice(content: String) -> Self {
        Self {
            author: None,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.author.is_none()
    }
}

/// Bounded chat history, oldest entries dropped first
pub struct ChatLog {
    entries: VecDeque<ChatEntry>,
    limit: usize,
}

impl ChatLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, entry: ChatEntry) {
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn joined(&mut self, display_name: &str) -> ChatEntry {
        let entry = ChatEntry::notice(format!("{display_name} joined the lobby"));
        self.push(entry.clone());
        entry
    }

    pub fn left(&mut self, display_name: &str) -> ChatEntry {
        let entry = ChatEntry::notice(format!("{display_name} left the lobby"));
        self.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> Vec<ChatEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
