use std::fmt::Write as _;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::model::Session;

const RULE_WIDE: usize = 80;
const RULE_NARROW: usize = 40;

/// Plain-text rendering of a finished session.
pub fn render_report(session: &Session) -> String {
    let wide = "=".repeat(RULE_WIDE);
    let narrow = "-".repeat(RULE_NARROW);
    let mut output = String::new();

    let _ = writeln!(output, "{wide}");
    let _ = writeln!(output, "WEB RESEARCH - RESULTS");
    let _ = writeln!(output, "{wide}");
    let _ = writeln!(
        output,
        "Generated: {}",
        session.finished_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(output, "Session ID: {}", session.id);
    let _ = writeln!(output);

    let _ = writeln!(output, "QUESTION:\n{narrow}\n{}\n", session.question);
    let _ = writeln!(output, "ANSWER:\n{narrow}\n{}\n", session.answer);

    if !session.steps.is_empty() {
        let _ = writeln!(output, "RESEARCH STEPS ({} steps):", session.steps.len());
        let _ = writeln!(output, "{narrow}");
        for step in &session.steps {
            let _ = writeln!(output, "\nStep {}: {}", step.ordinal, step.query);
            let _ = writeln!(
                output,
                "Timestamp: {}",
                step.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            let _ = writeln!(output, "Analysis:\n{}", step.analysis);
            let _ = writeln!(output, "{narrow}");
        }
    }

    if let Some(evaluation) = &session.evaluation {
        let metrics = &evaluation.metrics;
        let _ = writeln!(output, "\nEVALUATION RESULTS:\n{narrow}");
        let _ = writeln!(
            output,
            "Overall Score: {:.1}/10",
            evaluation.overall_score()
        );
        let _ = writeln!(output, "Action: {}", evaluation.action.as_str());
        if !evaluation.reasoning.is_empty() {
            let _ = writeln!(output, "Reasoning: {}", evaluation.reasoning);
        }
        let _ = writeln!(output, "Evaluation attempts: {}", session.iterations);
        let _ = writeln!(output, "\nDetailed Metrics:");
        for (name, value) in [
            ("Accuracy", metrics.accuracy),
            ("Completeness", metrics.completeness),
            ("Relevance", metrics.relevance),
            ("Clarity", metrics.clarity),
            ("Confidence", metrics.confidence),
        ] {
            let _ = writeln!(output, "  {name}: {value:.1}/10");
        }
    }

    let _ = writeln!(output, "\n{wide}\nEnd of Results\n{wide}");
    output
}

/// Write the rendered report to `<dir>/research_<YYYYmmdd_HHMMSS>_<short id>.txt`.
pub fn persist_report<P: AsRef<Path>>(dir: P, session: &Session) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir)
        .with_context(|| format!("failed to create report directory {}", dir.display()))?;

    let short_id: String = session.id.chars().take(8).collect();
    let filename = format!(
        "research_{}_{short_id}.txt",
        session.finished_at.format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(filename);

    let mut file = File::create(&path)
        .with_context(|| format!("failed to create report file {}", path.display()))?;
    file.write_all(render_report(session).as_bytes())
        .with_context(|| format!("failed to write report file {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Action, EvaluationAttempt, EvaluationMetrics, EvaluationResult, ResearchStep,
    };
    use chrono::{TimeZone, Utc};

    fn finished_session() -> Session {
        let at = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();
        let evaluation = EvaluationResult::new(
            Action::Sufficient,
            EvaluationMetrics::new(9.0, 8.0, 9.0, 8.0, 8.0),
            "Thorough and well cited.",
        );
        Session {
            id: "1234abcd-0000-4000-8000-000000000000".into(),
            question: "How do tides work?".into(),
            steps: vec![ResearchStep {
                ordinal: 1,
                query: "tidal forces moon".into(),
                results: Vec::new(),
                analysis: "The moon's gravity creates two bulges.".into(),
                created_at: at,
            }],
            answer: "Tides are driven mainly by the moon.".into(),
            evaluation: Some(evaluation.clone()),
            evaluations: vec![EvaluationAttempt {
                attempt: 1,
                result: evaluation,
                fallback: false,
                created_at: at,
            }],
            iterations: 1,
            started_at: at,
            finished_at: at,
        }
    }

    #[test]
    fn report_lists_answer_steps_and_evaluation() {
        let report = render_report(&finished_session());

        assert!(report.contains("QUESTION:\n"));
        assert!(report.contains("How do tides work?"));
        assert!(report.contains("RESEARCH STEPS (1 steps):"));
        assert!(report.contains("Step 1: tidal forces moon"));
        assert!(report.contains("Timestamp: 2024-05-17 09:30:00"));
        assert!(report.contains("Overall Score: 8.4/10"));
        assert!(report.contains("Action: sufficient"));
        assert!(report.contains("  Accuracy: 9.0/10"));
        assert!(report.trim_end().ends_with(&"=".repeat(RULE_WIDE)));
    }

    #[test]
    fn report_without_evaluation_omits_metrics() {
        let mut session = finished_session();
        session.evaluation = None;
        session.steps.clear();

        let report = render_report(&session);
        assert!(!report.contains("EVALUATION RESULTS"));
        assert!(!report.contains("RESEARCH STEPS"));
        assert!(report.contains("End of Results"));
    }

    #[test]
    fn persisted_report_uses_timestamped_name() -> Result<()> {
        let temp = tempfile::TempDir::new()?;
        let session = finished_session();

        let path = persist_report(temp.path().join("output"), &session)?;
        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some("research_20240517_093000_1234abcd.txt")
        );
        let contents = std::fs::read_to_string(&path)?;
        assert!(contents.contains("Tides are driven mainly by the moon."));
        Ok(())
    }
}
