//! Compliance scoring
//!
//! A framework is an ordered list of controls. Each control inspects live
//! state through the system collaborator and yields one classified finding.
//!
//! Scoring: `score` counts PASS findings, `total` counts every evaluated
//! control (N/A, WARN and INFO included), `percentage = floor(score * 100 / total)`
//! and 0 when there are no controls.

mod checks;
pub mod cis;
pub mod dashboard;
pub mod nist;

pub use dashboard::render_dashboard;

use chrono::{DateTime, Local};
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::error::{Result, WardenError};
use crate::system::SystemCollaborator;

/// Frameworks warden knows, in dashboard order
pub const FRAMEWORKS: &[&str] = &["cis", "nist"];

/// Classification of one control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Pass,
    Fail,
    Warn,
    NotApplicable,
    Info,
}

impl Classification {
    pub fn tag(&self) -> &'static str {
        match self {
            Classification::Pass => "PASS",
            Classification::Fail => "FAIL",
            Classification::Warn => "WARN",
            Classification::NotApplicable => "N/A",
            Classification::Info => "INFO",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "PASS" => Some(Classification::Pass),
            "FAIL" => Some(Classification::Fail),
            "WARN" => Some(Classification::Warn),
            "N/A" => Some(Classification::NotApplicable),
            "INFO" => Some(Classification::Info),
            _ => None,
        }
    }
}

/// One classified control result.
///
/// Serialized as `"[PASS] 5.3: description"` so reports stay human-readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Finding {
    pub control_id: String,
    pub classification: Classification,
    pub description: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.classification.tag(),
            self.control_id,
            self.description
        )
    }
}

impl FromStr for Finding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('[')
            .ok_or_else(|| format!("finding must start with '[': {}", s))?;
        let (tag, rest) = rest
            .split_once("] ")
            .ok_or_else(|| format!("missing classification: {}", s))?;
        let classification =
            Classification::from_tag(tag).ok_or_else(|| format!("unknown classification {}", tag))?;
        let (control_id, description) = rest
            .split_once(": ")
            .ok_or_else(|| format!("missing control id: {}", s))?;
        Ok(Finding {
            control_id: control_id.to_string(),
            classification,
            description: description.to_string(),
        })
    }
}

impl From<Finding> for String {
    fn from(finding: Finding) -> String {
        finding.to_string()
    }
}

impl TryFrom<String> for Finding {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Persisted result of one framework evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub framework: String,
    pub version: String,
    pub date: DateTime<Local>,
    pub hostname: String,
    pub score: u32,
    pub total: u32,
    pub percentage: u32,
    pub findings: Vec<Finding>,
}

impl ComplianceReport {
    pub fn count(&self, classification: Classification) -> usize {
        self.findings
            .iter()
            .filter(|f| f.classification == classification)
            .count()
    }
}

/// `floor(score * 100 / total)`, clamped to 0..=100; 0 when `total` is 0
pub fn percentage(score: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let pct = u64::from(score.min(total)) * 100 / u64::from(total);
    pct as u32
}

/// A control's verdict before it becomes a finding
pub struct Verdict {
    pub classification: Classification,
    pub detail: String,
}

impl Verdict {
    pub fn new(classification: Classification, detail: impl Into<String>) -> Self {
        Self {
            classification,
            detail: detail.into(),
        }
    }
}

/// One control of a framework
pub struct Control {
    pub id: &'static str,
    pub title: &'static str,
    pub check: fn(&dyn SystemCollaborator) -> Verdict,
}

/// A benchmark: identity plus its controls in evaluation order.
pub trait Framework {
    fn id(&self) -> &'static str;
    fn title(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn controls(&self) -> Vec<Control>;
}

/// Look up a framework by id (`cis`, `nist`)
pub fn framework_by_id(id: &str) -> Option<Box<dyn Framework>> {
    match id.to_lowercase().as_str() {
        "cis" => Some(Box::new(cis::CisBenchmark)),
        "nist" => Some(Box::new(nist::Nist80053)),
        _ => None,
    }
}

/// Evaluate every control in order.
pub fn evaluate(framework: &dyn Framework, system: &dyn SystemCollaborator) -> ComplianceReport {
    let findings: Vec<Finding> = framework
        .controls()
        .into_iter()
        .map(|control| {
            let verdict = (control.check)(system);
            debug!(
                "{} {}: {}",
                framework.id(),
                control.id,
                verdict.classification.tag()
            );
            let description = if verdict.detail.is_empty() {
                control.title.to_string()
            } else {
                format!("{} ({})", control.title, verdict.detail)
            };
            Finding {
                control_id: control.id.to_string(),
                classification: verdict.classification,
                description,
            }
        })
        .collect();

    let score = findings
        .iter()
        .filter(|f| f.classification == Classification::Pass)
        .count() as u32;
    let total = findings.len() as u32;

    ComplianceReport {
        framework: framework.id().to_string(),
        version: framework.version().to_string(),
        date: Local::now(),
        hostname: system.hostname(),
        score,
        total,
        percentage: percentage(score, total),
        findings,
    }
}

/// Write `<framework>-<timestamp>.json` into `dir`.
pub fn save_report(report: &ComplianceReport, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let stamp = report.date.format(crate::TIMESTAMP_FORMAT).to_string();
    let mut path = dir.join(format!("{}-{}.json", report.framework, stamp));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}-{}-{}.json", report.framework, stamp, n));
        n += 1;
    }
    fs::write(&path, serde_json::to_string_pretty(report)?)?;
    Ok(path)
}

/// Most recent report for `framework` in `dir`, if any.
pub fn load_latest_report(dir: &Path, framework: &str) -> Result<Option<ComplianceReport>> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Ok(None);
    };

    let prefix = format!("{}-", framework);
    let latest = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            name.starts_with(&prefix) && name.ends_with(".json")
        })
        .max_by_key(|p| (fs::metadata(p).and_then(|m| m.modified()).ok(), p.clone()));

    let Some(path) = latest else {
        return Ok(None);
    };
    let json = fs::read_to_string(&path)?;
    let report = serde_json::from_str(&json).map_err(|e| {
        WardenError::Validation(format!("corrupt report {}: {}", path.display(), e))
    })?;
    Ok(Some(report))
}

/// Colorized terminal summary of a report
pub fn render_summary(report: &ComplianceReport) -> String {
    let mut out = format!(
        "{} {} on {} ({})\n\n",
        report.framework.to_uppercase().bold(),
        report.version,
        report.hostname,
        report.date.format("%Y-%m-%d %H:%M:%S")
    );

    for finding in &report.findings {
        let tag = format!("[{}]", finding.classification.tag());
        let tag = match finding.classification {
            Classification::Pass => tag.green().to_string(),
            Classification::Fail => tag.red().to_string(),
            Classification::Warn => tag.yellow().to_string(),
            Classification::NotApplicable => tag.dimmed().to_string(),
            Classification::Info => tag.cyan().to_string(),
        };
        out.push_str(&format!(
            "  {:<8} {:<6} {}\n",
            tag, finding.control_id, finding.description
        ));
    }

    let score = format!(
        "Score: {}/{} ({}%)",
        report.score, report.total, report.percentage
    );
    let score = match report.percentage {
        80..=100 => score.green().to_string(),
        50..=79 => score.yellow().to_string(),
        _ => score.red().to_string(),
    };
    out.push_str(&format!(
        "\n{}  pass {} / fail {} / warn {} / n/a {}\n",
        score,
        report.count(Classification::Pass),
        report.count(Classification::Fail),
        report.count(Classification::Warn),
        report.count(Classification::NotApplicable)
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_bounds() {
        assert_eq!(percentage(0, 14), 0);
        assert_eq!(percentage(14, 14), 100);
        assert_eq!(percentage(7, 14), 50);
        assert_eq!(percentage(2, 3), 66);
        assert_eq!(percentage(0, 0), 0);
        for total in 1..=40 {
            for score in 0..=total {
                let pct = percentage(score, total);
                assert!(pct <= 100);
            }
        }
    }

    #[test]
    fn test_finding_string_form() {
        let finding = Finding {
            control_id: "5.3".to_string(),
            classification: Classification::Warn,
            description: "Limited sudo access (6 broad grants)".to_string(),
        };
        let text = finding.to_string();
        assert_eq!(text, "[WARN] 5.3: Limited sudo access (6 broad grants)");
        assert_eq!(text.parse::<Finding>().unwrap(), finding);

        let json = serde_json::to_string(&finding).unwrap();
        assert_eq!(json, "\"[WARN] 5.3: Limited sudo access (6 broad grants)\"");
    }

    #[test]
    fn test_finding_na_tag() {
        let finding: Finding = "[N/A] 1.2: AppArmor enabled".parse().unwrap();
        assert_eq!(finding.classification, Classification::NotApplicable);
        assert!("[MAYBE] 1.2: x".parse::<Finding>().is_err());
        assert!("no brackets".parse::<Finding>().is_err());
    }

    #[test]
    fn test_framework_lookup() {
        assert_eq!(framework_by_id("CIS").map(|f| f.id()), Some("cis"));
        assert_eq!(framework_by_id("nist").map(|f| f.id()), Some("nist"));
        assert!(framework_by_id("pci").is_none());
    }
}
