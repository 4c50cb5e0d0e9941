use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, Notify};

use crate::error::JournalError;
use crate::journal::{Journal, JournalEntry, JournalInfo, StreamSpec};
use crate::nats::subject_matches;

#[derive(Default)]
struct Retained {
    entries: VecDeque<JournalEntry>,
    bytes: usize,
    last_sequence: u64,
}

impl Retained {
    fn pop_oldest(&mut self) {
        if let Some(entry) = self.entries.pop_front() {
            self.bytes -= entry.size();
        }
    }
}

/// Limits-retention stream held in memory; discards oldest first
pub struct InMemoryJournal {
    spec: StreamSpec,
    retained: Mutex<Retained>,
    appended: Notify,
}

impl InMemoryJournal {
    pub fn new(spec: StreamSpec) -> Self {
        Self {
            spec,
            retained: Mutex::new(Retained::default()),
            appended: Notify::new(),
        }
    }

    fn enforce_limits(&self, retained: &mut Retained, now_ms: i64) {
        if !self.spec.max_age.is_zero() {
            let max_age_ms = i64::try_from(self.spec.max_age.as_millis()).unwrap_or(i64::MAX);
            while retained
                .entries
                .front()
                .is_some_and(|e| now_ms.saturating_sub(e.timestamp) > max_age_ms)
            {
                retained.pop_oldest();
            }
        }
        if self.spec.max_messages > 0 {
            while retained.entries.len() as i64 > self.spec.max_messages {
                retained.pop_oldest();
            }
        }
        if self.spec.max_bytes > 0 {
            while retained.bytes as i64 > self.spec.max_bytes {
                retained.pop_oldest();
            }
        }
    }

    /// Wait until an entry at or after `from` matching `filter` is retained
    pub async fn wait_from(&self, from: u64, filter: &str) -> JournalEntry {
        loop {
            let appended = self.appended.notified();
            if let Ok(Some(entry)) = self.read_from(from, filter).await {
                return entry;
            }
            appended.await;
        }
    }
}

#[async_trait]
impl Journal for InMemoryJournal {
    fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    async fn append(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<u64, JournalError> {
        if !self.spec.subjects.iter().any(|p| subject_matches(p, subject)) {
            return Err(JournalError::AppendFailed(format!(
                "subject {} not bound to stream {}",
                subject, self.spec.name
            )));
        }

        let now_ms = Utc::now().timestamp_millis();
        let sequence = {
            let mut retained = self.retained.lock().await;
            retained.last_sequence += 1;
            let entry = JournalEntry {
                sequence: retained.last_sequence,
                timestamp: now_ms,
                subject: subject.to_string(),
                payload,
                headers,
            };
            retained.bytes += entry.size();
            retained.entries.push_back(entry);
            self.enforce_limits(&mut retained, now_ms);
            retained.last_sequence
        };
        self.appended.notify_waiters();
        Ok(sequence)
    }

    async fn read_from(
        &self,
        from: u64,
        filter: &str,
    ) -> Result<Option<JournalEntry>, JournalError> {
        let mut retained = self.retained.lock().await;
        self.enforce_limits(&mut retained, Utc::now().timestamp_millis());
        Ok(retained
            .entries
            .iter()
            .find(|e| e.sequence >= from && subject_matches(filter, &e.subject))
            .cloned())
    }

    async fn info(&self) -> JournalInfo {
        let retained = self.retained.lock().await;
        JournalInfo {
            messages: retained.entries.len() as u64,
            bytes: retained.bytes as u64,
            first_sequence: retained.entries.front().map(|e| e.sequence).unwrap_or(0),
            last_sequence: retained.last_sequence,
        }
    }
}
