//! 结果记录器：把循环报告整形为 ProcessingOutcome
//!
//! 任何终止方式都会产出记录。Completed 但最终答案以拒绝标记开头时记为 Failed / Rejected。
//! 持久化与摘要渲染由调用方另行完成。

use chrono::Local;

use crate::context::ArtifactId;
use crate::core::FailureKind;
use crate::outcome::{new_run_id, ProcessingOutcome, TerminalState, Termination};
use crate::react::{is_rejection, LoopReport};

/// 被处理的文档
#[derive(Debug, Clone)]
pub struct RunSubject {
    pub document_name: String,
    pub artifact_id: Option<ArtifactId>,
}

impl RunSubject {
    pub fn new(document_name: impl Into<String>, artifact_id: Option<ArtifactId>) -> Self {
        Self {
            document_name: document_name.into(),
            artifact_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutcomeRecorder {
    model: String,
}

impl OutcomeRecorder {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }

    pub fn finalize(&self, subject: &RunSubject, report: LoopReport) -> ProcessingOutcome {
        let final_text = report
            .conversation
            .last_assistant_text()
            .map(str::to_string);

        let (state, kind, reason) = match report.termination {
            Termination::Completed => match final_text.as_deref() {
                Some(text) if is_rejection(text) => (
                    TerminalState::Failed,
                    Some(FailureKind::Rejected),
                    Some(text.lines().next().unwrap_or(text).trim().to_string()),
                ),
                _ => (TerminalState::Completed, None, None),
            },
            Termination::Failed { kind, reason } => (TerminalState::Failed, Some(kind), Some(reason)),
            Termination::Exhausted => (TerminalState::Exhausted, None, None),
        };

        let outcome = ProcessingOutcome {
            run_id: new_run_id(),
            document_name: subject.document_name.clone(),
            artifact_id: subject.artifact_id.as_ref().map(|a| a.to_string()),
            state,
            failure_reason: reason,
            failure_kind: kind,
            iterations: report.iterations,
            invocations: report.invocations,
            final_text,
            tracked_documents: report.tracked.into_map(),
            model: self.model.clone(),
            processed_at: Local::now(),
            conversation: report.conversation.into_messages(),
        };
        tracing::info!(
            run_id = %outcome.run_id,
            document = %outcome.document_name,
            state = %outcome.state,
            iterations = outcome.iterations,
            "Run finalized"
        );
        outcome
    }

    /// 循环未能启动（抽取失败等）时的记录
    pub fn failed_before_loop(&self, subject: &RunSubject, kind: FailureKind, reason: impl Into<String>) -> ProcessingOutcome {
        ProcessingOutcome {
            run_id: new_run_id(),
            document_name: subject.document_name.clone(),
            artifact_id: subject.artifact_id.as_ref().map(|a| a.to_string()),
            state: TerminalState::Failed,
            failure_reason: Some(reason.into()),
            failure_kind: Some(kind),
            iterations: 0,
            invocations: Vec::new(),
            final_text: None,
            tracked_documents: Default::default(),
            model: self.model.clone(),
            processed_at: Local::now(),
            conversation: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Conversation, Message};
    use crate::tools::ArtifactTracker;

    fn report(termination: Termination, last: &str) -> LoopReport {
        let mut conversation = Conversation::new();
        conversation.push(Message::system("sys"));
        conversation.push(Message::user("doc"));
        conversation.push(Message::assistant(last));
        LoopReport {
            conversation,
            termination,
            iterations: 1,
            invocations: Vec::new(),
            tracked: ArtifactTracker::default(),
        }
    }

    #[test]
    fn test_completed_record() {
        let recorder = OutcomeRecorder::new("gpt-4o");
        let subject = RunSubject::new("claim.pdf", Some(ArtifactId::new("doc_1")));
        let o = recorder.finalize(&subject, report(Termination::Completed, "done"));
        assert_eq!(o.state, TerminalState::Completed);
        assert_eq!(o.final_text.as_deref(), Some("done"));
        assert!(o.failure_reason.is_none());
        assert_eq!(o.artifact_id.as_deref(), Some("doc_1"));
        assert!(o.run_id.starts_with("run_"));
        assert_eq!(o.conversation.len(), 3);
    }

    #[test]
    fn test_rejection_becomes_failed() {
        let recorder = OutcomeRecorder::new("gpt-4o");
        let subject = RunSubject::new("recipe.txt", None);
        let o = recorder.finalize(
            &subject,
            report(Termination::Completed, "DOCUMENT_REJECTED: cooking recipe\nno tools used"),
        );
        assert_eq!(o.state, TerminalState::Failed);
        assert_eq!(o.failure_kind, Some(FailureKind::Rejected));
        assert_eq!(o.failure_reason.as_deref(), Some("DOCUMENT_REJECTED: cooking recipe"));
    }

    #[test]
    fn test_failed_keeps_reason() {
        let recorder = OutcomeRecorder::new("gpt-4o");
        let subject = RunSubject::new("claim.pdf", None);
        let o = recorder.finalize(
            &subject,
            report(
                Termination::Failed {
                    kind: FailureKind::ApplicationFailure,
                    reason: "policy_number missing".into(),
                },
                "working on it",
            ),
        );
        assert_eq!(o.state, TerminalState::Failed);
        assert_eq!(o.failure_reason.as_deref(), Some("policy_number missing"));
    }

    #[test]
    fn test_failed_before_loop() {
        let recorder = OutcomeRecorder::new("gpt-4o");
        let o = recorder.failed_before_loop(
            &RunSubject::new("blank.pdf", None),
            FailureKind::Extraction,
            "no text",
        );
        assert_eq!(o.iterations, 0);
        assert_eq!(o.failure_kind, Some(FailureKind::Extraction));
    }
}
