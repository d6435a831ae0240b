use chrono::{DateTime, Utc};
use std::path::PathBuf;
use uuid::Uuid;

use tgfetch_core::core::events::MessageHandle;

use crate::error::PipelineError;
use crate::models::media::{ArtifactKind, FormatRequest};

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: Uuid,
    pub url: String,
    pub request: FormatRequest,
    pub chat_id: i64,
    pub status_message: Option<MessageHandle>,
    pub dest_dir: PathBuf,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
}

impl DownloadTask {
    pub fn new(
        id: Uuid,
        url: impl Into<String>,
        request: FormatRequest,
        chat_id: i64,
        dest_dir: PathBuf,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            request,
            chat_id,
            status_message: None,
            dest_dir,
            state: TaskState::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn with_status_message(mut self, handle: MessageHandle) -> Self {
        self.status_message = Some(handle);
        self
    }

    /// Moves to `next` if the lifecycle allows it. Terminal states never move.
    pub fn transition(&mut self, next: TaskState) -> bool {
        if !self.state.can_transition_to(&next) {
            tracing::error!(
                "task {}: refused transition {:?} -> {:?}",
                self.id,
                self.state,
                next
            );
            return false;
        }
        tracing::info!("task {}: {} -> {}", self.id, self.state.name(), next.name());
        self.state = next;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Probing,
    Fetching,
    Evaluating,
    Remediating,
    Transmitting,
    Done,
    Failed(PipelineError),
    TimedOut(PipelineError),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Done | TaskState::Failed(_) | TaskState::TimedOut(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Probing => "probing",
            TaskState::Fetching => "fetching",
            TaskState::Evaluating => "evaluating",
            TaskState::Remediating => "remediating",
            TaskState::Transmitting => "transmitting",
            TaskState::Done => "done",
            TaskState::Failed(_) => "failed",
            TaskState::TimedOut(_) => "timed_out",
        }
    }

    pub fn can_transition_to(&self, next: &TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Probing) => true,
            (Probing, Fetching) | (Probing, Failed(_)) => true,
            // Fetching -> Transmitting is the timeout recovery path.
            (Fetching, Evaluating)
            | (Fetching, Transmitting)
            | (Fetching, Failed(_))
            | (Fetching, TimedOut(_)) => true,
            (Evaluating, Transmitting) | (Evaluating, Remediating) | (Evaluating, Failed(_)) => {
                true
            }
            (Remediating, Transmitting) | (Remediating, Failed(_)) => true,
            (Transmitting, Done) | (Transmitting, Failed(_)) => true,
            _ => false,
        }
    }
}

/// What a finished task reports back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub state: TaskState,
    pub delivered: Option<ArtifactKind>,
    pub recovered_after_timeout: bool,
}

impl TaskReport {
    pub fn is_success(&self) -> bool {
        self.state == TaskState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> DownloadTask {
        DownloadTask::new(
            Uuid::new_v4(),
            "https://example.com/v",
            FormatRequest::Video,
            1,
            PathBuf::from("/tmp/x"),
        )
    }

    #[test]
    fn happy_path_transitions() {
        let mut t = task();
        for next in [
            TaskState::Probing,
            TaskState::Fetching,
            TaskState::Evaluating,
            TaskState::Remediating,
            TaskState::Transmitting,
            TaskState::Done,
        ] {
            assert!(t.transition(next));
        }
        assert!(t.state.is_terminal());
    }

    #[test]
    fn terminal_states_do_not_move() {
        let mut t = task();
        t.transition(TaskState::Probing);
        t.transition(TaskState::Failed(PipelineError::LiveStreamUnsupported));
        assert!(!t.transition(TaskState::Fetching));
        assert!(!t.transition(TaskState::Failed(PipelineError::NoSuitableFormat)));
        assert_eq!(
            t.state,
            TaskState::Failed(PipelineError::LiveStreamUnsupported)
        );
    }

    #[test]
    fn cannot_skip_probing() {
        let mut t = task();
        assert!(!t.transition(TaskState::Fetching));
        assert_eq!(t.state, TaskState::Pending);
    }

    #[test]
    fn timeout_only_from_fetching() {
        let timed_out = TaskState::TimedOut(PipelineError::TimedOutNoArtifact);
        assert!(TaskState::Fetching.can_transition_to(&timed_out));
        assert!(!TaskState::Evaluating.can_transition_to(&timed_out));
        assert!(!TaskState::Remediating.can_transition_to(&timed_out));
    }
}
