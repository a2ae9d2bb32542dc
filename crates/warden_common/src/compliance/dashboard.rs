//! Aggregate view over the latest report of each framework

use std::path::Path;

use super::{load_latest_report, FRAMEWORKS};

const BAR_WIDTH: usize = 20;

/// `[#########...........]` for a percentage
fn bar(percentage: u32) -> String {
    let filled = (percentage.min(100) as usize * BAR_WIDTH) / 100;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

/// Plain-text dashboard. Frameworks without a readable report show N/A.
pub fn render_dashboard(report_dir: &Path) -> String {
    let mut out = String::from("Compliance dashboard\n====================\n\n");

    for framework in FRAMEWORKS {
        let line = match load_latest_report(report_dir, framework) {
            Ok(Some(report)) => format!(
                "{:<6} {} {:>3}%  {}/{}  ({})\n",
                framework.to_uppercase(),
                bar(report.percentage),
                report.percentage,
                report.score,
                report.total,
                report.date.format("%Y-%m-%d %H:%M")
            ),
            Ok(None) => format!(
                "{:<6} [{}]  N/A  no report yet\n",
                framework.to_uppercase(),
                " ".repeat(BAR_WIDTH)
            ),
            Err(e) => format!(
                "{:<6} [{}]  N/A  {}\n",
                framework.to_uppercase(),
                " ".repeat(BAR_WIDTH),
                e
            ),
        };
        out.push_str(&line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::{save_report, ComplianceReport};

    #[test]
    fn test_bar_width() {
        assert_eq!(bar(0), format!("[{}]", ".".repeat(20)));
        assert_eq!(bar(100), format!("[{}]", "#".repeat(20)));
        assert_eq!(bar(50).matches('#').count(), 10);
        assert_eq!(bar(250).len(), 22);
    }

    #[test]
    fn test_missing_framework_shows_na() {
        let dir = tempfile::tempdir().unwrap();
        let report = ComplianceReport {
            framework: "cis".to_string(),
            version: "2.0.0".to_string(),
            date: chrono::Local::now(),
            hostname: "testhost".to_string(),
            score: 7,
            total: 14,
            percentage: 50,
            findings: Vec::new(),
        };
        save_report(&report, dir.path()).unwrap();

        let text = render_dashboard(dir.path());
        let cis = text.lines().find(|l| l.starts_with("CIS")).unwrap();
        assert!(cis.contains(" 50%"));
        assert!(cis.contains("7/14"));
        let nist = text.lines().find(|l| l.starts_with("NIST")).unwrap();
        assert!(nist.contains("N/A"));
    }

    #[test]
    fn test_missing_directory_is_not_an_error() {
        let text = render_dashboard(Path::new("/nonexistent/warden/reports"));
        assert_eq!(text.matches("N/A").count(), FRAMEWORKS.len());
    }
}
