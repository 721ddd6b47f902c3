//! 运行摘要（人类可读文本）

use crate::outcome::ProcessingOutcome;

const RULE: &str = "======================================================================";

pub fn render_summary(outcome: &ProcessingOutcome) -> String {
    let mut out = String::new();
    out.push_str("CLAIM PROCESSING SUMMARY\n");
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!("Run ID: {}\n", outcome.run_id));
    out.push_str(&format!("Document: {}\n", outcome.document_name));
    if let Some(id) = &outcome.artifact_id {
        out.push_str(&format!("Artifact ID: {}\n", id));
    }
    if !outcome.tracked_documents.is_empty() {
        out.push_str("Uploaded Document IDs:\n");
        for (name, id) in &outcome.tracked_documents {
            out.push_str(&format!("  - {}: {}\n", name, id));
        }
    }
    out.push_str(&format!(
        "Processing Date: {}\n",
        outcome.processed_at.format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!("LLM Model: {}\n", outcome.model));
    out.push_str(&format!("Iterations: {}\n", outcome.iterations));
    out.push_str(&format!("Status: {}\n", outcome.state));
    if let Some(reason) = &outcome.failure_reason {
        out.push_str(&format!("Failure Reason: {}\n", reason));
    }

    if !outcome.invocations.is_empty() {
        out.push_str("\nTool Calls:\n");
        for inv in &outcome.invocations {
            out.push_str(&format!(
                "  [{}] {} @ {} -> {}\n",
                inv.step,
                inv.tool,
                inv.server.as_deref().unwrap_or("-"),
                inv.outcome
            ));
        }
    }

    out.push('\n');
    out.push_str(RULE);
    out.push_str("\nLLM ANALYSIS:\n");
    out.push_str(RULE);
    out.push('\n');
    out.push_str(
        outcome
            .final_text
            .as_deref()
            .unwrap_or("No final response from oracle"),
    );
    out.push('\n');
    out
}
