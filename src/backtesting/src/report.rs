use anyhow::Result;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::models::ClassificationReport;

/// Generate a text report
pub fn generate_text_report<P: AsRef<Path>>(report: &ClassificationReport, path: P) -> Result<()> {
    let mut file = File::create(path)?;
    write_text_report(report, &mut file)
}

/// Write the text report to any writer.
pub fn write_text_report<W: Write>(report: &ClassificationReport, out: &mut W) -> Result<()> {
    writeln!(out, "Classification Report")?;
    writeln!(out, "=====================")?;
    writeln!(out)?;
    writeln!(out, "Samples: {}", report.n_samples)?;
    writeln!(out, "Threshold: {:.2}", report.threshold)?;
    writeln!(out)?;

    writeln!(out, "Performance Metrics:")?;
    writeln!(out, "--------------------")?;

    // Sort keys for consistent output
    let metrics = report.as_metrics();
    let mut keys: Vec<&String> = metrics.keys().collect();
    keys.sort();

    for key in keys {
        writeln!(out, "{}: {:.4}", key, metrics[key])?;
    }

    writeln!(out)?;
    let c = &report.confusion;
    writeln!(
        out,
        "Confusion: TP={} FP={} TN={} FN={}",
        c.true_positives, c.false_positives, c.true_negatives, c.false_negatives
    )?;

    Ok(())
}

/// Generate a JSON report
pub fn generate_json_report<P: AsRef<Path>>(report: &ClassificationReport, path: P) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::classification_report;

    #[test]
    fn test_reports_written() {
        let report = classification_report(&[1.0, 0.0, 1.0, 1.0], &[0.9, 0.1, 0.6, 0.4], 0.5).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let text_path = dir.path().join("report.txt");
        generate_text_report(&report, &text_path).unwrap();
        let text = std::fs::read_to_string(&text_path).unwrap();
        assert!(text.contains("Precision: 1.0000"));
        assert!(text.contains("TP=2 FP=0 TN=1 FN=1"));

        let json_path = dir.path().join("report.json");
        generate_json_report(&report, &json_path).unwrap();
        let parsed: ClassificationReport =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed.confusion, report.confusion);
        assert_eq!(parsed.precision, 1.0);
    }
}
