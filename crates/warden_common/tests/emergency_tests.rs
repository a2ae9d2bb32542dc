//! Emergency assessment and firewall recovery on a degraded host

use std::time::Duration;

use warden_common::emergency::EmergencyEngine;
use warden_common::parsers::parse_ufw_status;
use warden_common::system::{FakeFirewall, ServiceState};
use warden_common::{FakeSystem, StatusLog, SystemCollaborator, WardenConfig};

#[test]
fn full_disk_is_an_emergency() {
    let dir = tempfile::tempdir().unwrap();
    let config = WardenConfig::default().rooted_at(dir.path());
    let system = FakeSystem::healthy().with_disk_usage(96);
    let log = StatusLog::memory("recovery");

    let assessment = EmergencyEngine::new(&system, &log, &config).check_emergency_state();
    assert!(assessment.is_emergency);
    assert_eq!(assessment.issues.len(), 1, "{:?}", assessment.issues);
    assert!(assessment.issues[0].contains("Critical disk space"));
    assert!(assessment.issues[0].contains("96%"));
}

#[test]
fn assessment_reflects_current_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = WardenConfig::default().rooted_at(dir.path());
    let system = FakeSystem::healthy();
    let log = StatusLog::memory("recovery");
    let engine = EmergencyEngine::new(&system, &log, &config);

    assert!(!engine.check_emergency_state().is_emergency);

    system.set_service("ssh", ServiceState::Failed);
    system.set_reachable("8.8.8.8", false);
    system.set_reachable("1.1.1.1", false);
    let degraded = engine.check_emergency_state();
    assert_eq!(degraded.issues.len(), 2, "{:?}", degraded.issues);

    system.set_service("ssh", ServiceState::Active);
    system.set_reachable("1.1.1.1", true);
    assert!(!engine.check_emergency_state().is_emergency);
}

#[test]
fn firewall_recovery_without_web_server_keeps_only_ssh() {
    let dir = tempfile::tempdir().unwrap();
    let config = WardenConfig::default().rooted_at(dir.path());
    let system = FakeSystem::healthy().with_firewall(FakeFirewall {
        active: true,
        default_incoming: "allow".to_string(),
        default_outgoing: "allow".to_string(),
        rules: vec!["22/tcp".to_string(), "3306/tcp".to_string()],
        denied: Vec::new(),
    });
    let log = StatusLog::memory("recovery");

    let report = EmergencyEngine::new(&system, &log, &config).recover_firewall();
    assert!(report.success, "{:?}", report.steps);

    let status = parse_ufw_status(
        &system
            .run("ufw", &["status", "verbose"], Duration::from_secs(5))
            .stdout,
    );
    assert!(status.active);
    assert_eq!(status.default_incoming.as_deref(), Some("deny"));
    assert_eq!(status.default_outgoing.as_deref(), Some("allow"));
    assert_eq!(status.allowed(), vec!["22/tcp"]);

    system.clear_commands();
    let again = EmergencyEngine::new(&system, &log, &config).recover_firewall();
    assert!(again.success);
    assert_eq!(system.commands_starting_with("ufw"), vec!["ufw status verbose"]);
}

#[test]
fn denied_ssh_is_reset_by_firewall_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let config = WardenConfig::default().rooted_at(dir.path());
    let status_text = "Status: active
Logging: on (low)
Default: deny (incoming), allow (outgoing), disabled (routed)
New profiles: skip

To                         Action      From
--                         ------      ----
22/tcp                     DENY IN     Anywhere
";
    let system = FakeSystem::healthy().with_firewall(FakeFirewall {
        active: true,
        denied: vec!["22/tcp".to_string()],
        ..Default::default()
    });
    assert_eq!(system.firewall().render_status(), status_text);
    let log = StatusLog::memory("recovery");

    let report = EmergencyEngine::new(&system, &log, &config).recover_firewall();
    assert!(report.success, "{:?}", report.steps);
    assert!(!report
        .steps
        .iter()
        .any(|s| s.contains("already matches")));
    assert!(system
        .commands()
        .contains(&"ufw --force reset".to_string()));

    let firewall = system.firewall();
    assert!(firewall.denied.is_empty());
    assert_eq!(firewall.rules, vec!["22/tcp"]);
}
