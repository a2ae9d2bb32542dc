//! CIS-style Linux benchmark (14 controls)

use super::checks;
use super::{Control, Framework};

pub struct CisBenchmark;

impl Framework for CisBenchmark {
    fn id(&self) -> &'static str {
        "cis"
    }

    fn title(&self) -> &'static str {
        "CIS Linux Benchmark"
    }

    fn version(&self) -> &'static str {
        "2.0.0"
    }

    fn controls(&self) -> Vec<Control> {
        vec![
            Control {
                id: "1.1",
                title: "Separate /tmp partition",
                check: checks::tmp_partition,
            },
            Control {
                id: "1.2",
                title: "AppArmor enabled",
                check: checks::apparmor_enabled,
            },
            Control {
                id: "2.1",
                title: "Automatic security updates",
                check: checks::automatic_updates,
            },
            Control {
                id: "3.1",
                title: "IP forwarding disabled",
                check: checks::ip_forwarding_disabled,
            },
            Control {
                id: "3.2",
                title: "TCP SYN cookies enabled",
                check: checks::syn_cookies,
            },
            Control {
                id: "3.3",
                title: "Host firewall active",
                check: checks::firewall_active,
            },
            Control {
                id: "3.4",
                title: "Default deny incoming",
                check: checks::default_deny_incoming,
            },
            Control {
                id: "4.1",
                title: "Audit daemon running",
                check: checks::auditd_active,
            },
            Control {
                id: "5.1",
                title: "SSH root login restricted",
                check: checks::ssh_root_login,
            },
            Control {
                id: "5.2",
                title: "SSH password authentication disabled",
                check: checks::ssh_password_auth,
            },
            Control {
                id: "5.3",
                title: "Limited sudo access",
                check: checks::sudo_grants,
            },
            Control {
                id: "5.4",
                title: "Password expiration",
                check: checks::password_max_age,
            },
            Control {
                id: "6.1",
                title: "Only root has UID 0",
                check: checks::single_uid_zero,
            },
            Control {
                id: "6.2",
                title: "No empty passwords",
                check: checks::no_empty_passwords,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::{evaluate, Classification};
    use crate::system::FakeSystem;

    #[test]
    fn test_control_order_is_fixed() {
        let ids: Vec<&str> = CisBenchmark.controls().iter().map(|c| c.id).collect();
        assert_eq!(
            ids,
            vec![
                "1.1", "1.2", "2.1", "3.1", "3.2", "3.3", "3.4", "4.1", "5.1", "5.2", "5.3",
                "5.4", "6.1", "6.2"
            ]
        );
    }

    #[test]
    fn test_unreadable_inputs_are_not_applicable() {
        let system = FakeSystem::new();
        let report = evaluate(&CisBenchmark, &system);
        assert_eq!(report.total, 14);
        let sudo = report.findings.iter().find(|f| f.control_id == "5.3").unwrap();
        assert_eq!(sudo.classification, Classification::NotApplicable);
    }
}
