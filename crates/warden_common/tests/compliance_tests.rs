//! Compliance scoring, persistence and the dashboard

use warden_common::compliance::cis::CisBenchmark;
use warden_common::compliance::{
    evaluate, framework_by_id, load_latest_report, percentage, render_dashboard, save_report,
    Classification,
};
use warden_common::FakeSystem;

fn sudoers(grants: usize) -> String {
    let mut content = String::from(
        "Defaults\tenv_reset\nDefaults\tsecure_path=\"/usr/sbin:/usr/bin\"\n# comment ALL=(ALL) ALL\n",
    );
    for n in 0..grants {
        content.push_str(&format!("admin{} ALL=(ALL:ALL) ALL\n", n));
    }
    content
}

fn sudo_finding(grants: usize) -> Classification {
    let system = FakeSystem::healthy().with_file("/etc/sudoers", &sudoers(grants));
    let report = evaluate(&CisBenchmark, &system);
    report
        .findings
        .iter()
        .find(|f| f.control_id == "5.3")
        .map(|f| f.classification)
        .unwrap()
}

#[test]
fn sudo_grant_threshold() {
    assert_eq!(sudo_finding(0), Classification::Pass);
    assert_eq!(sudo_finding(4), Classification::Pass);
    assert_eq!(sudo_finding(5), Classification::Warn);
    assert_eq!(sudo_finding(9), Classification::Warn);
}

#[test]
fn percentage_stays_in_bounds() {
    for total in 0..=20u32 {
        for score in 0..=total + 2 {
            let pct = percentage(score, total);
            assert!(pct <= 100, "{}/{} gave {}", score, total, pct);
        }
    }
    assert_eq!(percentage(0, 0), 0);
    assert_eq!(percentage(2, 3), 66);
    assert_eq!(percentage(14, 14), 100);
}

#[test]
fn every_framework_scores_within_bounds() {
    let system = FakeSystem::new();
    for id in ["cis", "nist"] {
        let framework = framework_by_id(id).unwrap();
        let report = evaluate(framework.as_ref(), &system);
        assert_eq!(report.framework, id);
        assert!(report.score <= report.total);
        assert!(report.percentage <= 100);
        assert_eq!(report.total as usize, report.findings.len());
    }
    assert!(framework_by_id("pci").is_none());
}

#[test]
fn saved_report_feeds_the_dashboard() {
    let dir = tempfile::tempdir().unwrap();
    let system = FakeSystem::healthy().with_file("/etc/sudoers", &sudoers(1));
    let report = evaluate(&CisBenchmark, &system);

    let path = save_report(&report, dir.path()).unwrap();
    assert!(path.exists());

    let loaded = load_latest_report(dir.path(), "cis").unwrap().unwrap();
    assert_eq!(loaded, report);
    assert!(load_latest_report(dir.path(), "nist").unwrap().is_none());

    let dashboard = render_dashboard(dir.path());
    let cis_line = dashboard.lines().find(|l| l.starts_with("CIS")).unwrap();
    assert!(
        cis_line.contains(&format!("{}%", report.percentage)),
        "{}",
        cis_line
    );
    let nist_line = dashboard.lines().find(|l| l.starts_with("NIST")).unwrap();
    assert!(nist_line.contains("N/A"));
}
