//! Rendering job reports

use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use speech_synthesis::{BatchSummary, EngineStatus, JobReport};

/// JSON document written by `--report`
#[derive(Debug, Serialize)]
pub struct BatchReport<'a> {
    pub summary: &'a BatchSummary,
    pub jobs: &'a [JobReport],
}

/// One line per job
pub fn render_job(report: &JobReport) -> String {
    match &report.outcome {
        Ok(artifact) => {
            let mut line = format!(
                "✅ {}: {} ({} bytes, {}, {} attempt{})",
                report.job_id,
                artifact.path.display(),
                artifact.bytes,
                artifact.engine,
                artifact.attempts,
                if artifact.attempts == 1 { "" } else { "s" }
            );
            if artifact.downgraded {
                line.push_str(&format!(" ⚠️  kept as {}", artifact.format));
            }
            line
        },
        Err(failure) => format!(
            "❌ {}: {} [{}] after {} engine(s)",
            report.job_id, failure.detail, failure.kind, failure.engines_attempted
        ),
    }
}

pub fn render_summary(summary: &BatchSummary) -> String {
    format!(
        "📊 {} job(s): {} succeeded, {} failed, {} downgraded, {} bytes written",
        summary.total, summary.succeeded, summary.failed, summary.downgraded, summary.bytes_written
    )
}

pub fn render_engine(status: &EngineStatus) -> String {
    let marker = if status.available { "✅" } else { "❌" };
    let mut line = format!("{marker} {} ({}, voice {})", status.name, status.kind, status.voice);
    if let Some(error) = &status.error {
        line.push_str(&format!(": {error}"));
    }
    line
}

/// Write reports and their summary as pretty JSON to `path`
pub fn write_json(path: &Path, summary: &BatchSummary, jobs: &[JobReport]) -> anyhow::Result<()> {
    let document = BatchReport { summary, jobs };
    let json = serde_json::to_string_pretty(&document)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use speech_synthesis::{AudioFormat, ErrorKind, JobId, SynthesisArtifact, SynthesisFailure};

    use super::*;

    fn success(downgraded: bool) -> JobReport {
        JobReport {
            job_id: JobId::new("Chapter_1"),
            destination: PathBuf::from("audio/Chapter_1.mp3"),
            outcome: Ok(SynthesisArtifact {
                path: PathBuf::from("audio/Chapter_1.mp3"),
                bytes: 2048,
                format: if downgraded { AudioFormat::Wav } else { AudioFormat::Mp3 },
                engine: "azure".to_string(),
                attempts: 2,
                downgraded,
            }),
        }
    }

    #[test]
    fn success_line_names_engine_and_attempts() {
        let line = render_job(&success(false));
        assert!(line.contains("Chapter_1"));
        assert!(line.contains("azure"));
        assert!(line.contains("2 attempts"));
        assert!(!line.contains("kept as"));
    }

    #[test]
    fn downgraded_line_names_actual_format() {
        assert!(render_job(&success(true)).contains("kept as wav"));
    }

    #[test]
    fn failure_line_names_kind() {
        let report = JobReport {
            job_id: JobId::new("Chapter_2"),
            destination: PathBuf::from("audio/Chapter_2.mp3"),
            outcome: Err(SynthesisFailure {
                kind: ErrorKind::QuotaExhausted,
                detail: "openai: quota exceeded".to_string(),
                retryable: false,
                engines_attempted: 3,
            }),
        };

        let line = render_job(&report);
        assert!(line.contains("quota_exhausted"));
        assert!(line.contains("3 engine(s)"));
    }

    #[test]
    fn json_report_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let jobs = vec![success(false)];
        let summary = BatchSummary::from_reports(&jobs);

        write_json(&path, &summary, &jobs).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["summary"]["succeeded"], 1);
        assert_eq!(value["jobs"][0]["outcome"]["status"], "ok");
        assert_eq!(value["jobs"][0]["outcome"]["engine"], "azure");
    }
}
