use crate::schemas::answer::{AnswerMap, AnswerValue};

/// In-memory answers of one attempt, keyed by question id.
///
/// `set` replaces the whole value; there is no partial merge. Every mutation
/// bumps `revision`, which the autosave path uses to tell whether the server
/// has seen the latest state.
#[derive(Debug, Clone, Default)]
pub struct AnswerBuffer {
    answers: AnswerMap,
    revision: u64,
}

impl AnswerBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer restored from the server's last autosave.
    pub fn seeded(answers: AnswerMap) -> Self {
        Self { answers, revision: 0 }
    }

    pub fn get(&self, question_id: &str) -> Option<&AnswerValue> {
        self.answers.get(question_id)
    }

    pub fn set(&mut self, question_id: impl Into<String>, value: AnswerValue) {
        self.answers.insert(question_id.into(), value);
        self.revision += 1;
    }

    pub fn snapshot(&self) -> AnswerMap {
        self.answers.clone()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn answered_count(&self) -> usize {
        self.answers.values().filter(|value| value.is_answered()).count()
    }
}
