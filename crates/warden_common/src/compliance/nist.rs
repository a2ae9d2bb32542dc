//! NIST 800-53 style baseline (8 controls)

use super::checks;
use super::{Control, Framework};

pub struct Nist80053;

impl Framework for Nist80053 {
    fn id(&self) -> &'static str {
        "nist"
    }

    fn title(&self) -> &'static str {
        "NIST SP 800-53 baseline"
    }

    fn version(&self) -> &'static str {
        "rev5"
    }

    fn controls(&self) -> Vec<Control> {
        vec![
            Control {
                id: "AC-2",
                title: "Account management",
                check: checks::single_uid_zero,
            },
            Control {
                id: "AC-7",
                title: "Unsuccessful logon attempts",
                check: checks::fail2ban_active,
            },
            Control {
                id: "AU-2",
                title: "Event logging",
                check: checks::auditd_active,
            },
            Control {
                id: "CM-7",
                title: "Least functionality",
                check: checks::listening_ports,
            },
            Control {
                id: "IA-5",
                title: "Authenticator management",
                check: checks::password_max_age,
            },
            Control {
                id: "SC-7",
                title: "Boundary protection",
                check: checks::default_deny_incoming,
            },
            Control {
                id: "SI-2",
                title: "Flaw remediation",
                check: checks::automatic_updates,
            },
            Control {
                id: "SI-3",
                title: "Malicious code protection",
                check: checks::malware_scanner,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::{evaluate, Classification};
    use crate::system::{CommandOutput, FakeSystem, ServiceState};

    #[test]
    fn test_hardened_host_scores_high() {
        let listening: String = (0..5)
            .map(|i| format!("tcp LISTEN 0 128 0.0.0.0:{} 0.0.0.0:*\n", 8000 + i))
            .collect();
        let system = FakeSystem::healthy()
            .with_service("fail2ban", ServiceState::Active)
            .with_service("auditd", ServiceState::Active)
            .with_service("unattended-upgrades", ServiceState::Active)
            .with_command("rkhunter")
            .with_file("/etc/passwd", "root:x:0:0:root:/root:/bin/bash\nbob:x:1000:1000::/home/bob:/bin/bash\n")
            .with_file("/etc/login.defs", "PASS_MAX_DAYS\t90\n")
            .with_response(
                "ss -tuln",
                CommandOutput::ok(format!("Netid State Recv-Q Send-Q Local Peer\n{}", listening)),
            );

        let report = evaluate(&Nist80053, &system);
        assert_eq!(report.total, 8);
        let failing: Vec<_> = report
            .findings
            .iter()
            .filter(|f| f.classification != Classification::Pass)
            .collect();
        assert!(failing.is_empty(), "{:?}", failing);
        assert_eq!(report.percentage, 100);
    }

    #[test]
    fn test_missing_scanner_warns() {
        let system = FakeSystem::healthy();
        let report = evaluate(&Nist80053, &system);
        let si3 = report.findings.iter().find(|f| f.control_id == "SI-3").unwrap();
        assert_eq!(si3.classification, Classification::Warn);
    }
}
