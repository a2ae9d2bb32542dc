//! Package phases (apt)

use crate::parsers::count_pending_upgrades;
use crate::sequencer::{Phase, PhaseContext, PhaseOutcome};

/// apt-get with prompts disabled
fn apt_get<'a>(args: &[&'a str]) -> Vec<&'a str> {
    let mut full = vec!["DEBIAN_FRONTEND=noninteractive", "apt-get"];
    full.extend_from_slice(args);
    full
}

pub struct SystemUpdatePhase;

impl Phase for SystemUpdatePhase {
    fn id(&self) -> &str {
        "system-update"
    }

    fn ordinal(&self) -> u32 {
        20
    }

    fn description(&self) -> &str {
        "Refresh package lists and apply pending upgrades"
    }

    fn depends_on(&self) -> &[&'static str] {
        &["system-backup"]
    }

    fn run(&self, ctx: &PhaseContext) -> PhaseOutcome {
        let timeout = ctx.config.timeouts.command();

        let refresh = ctx.system.run("env", &apt_get(&["update", "-q"]), timeout);
        if !refresh.success() {
            return PhaseOutcome::Failed(format!("apt-get update: {}", refresh.reason()));
        }

        let simulation = ctx.system.run("apt-get", &["-s", "upgrade"], timeout);
        if !simulation.success() {
            return PhaseOutcome::Failed(format!(
                "apt-get -s upgrade: {}",
                simulation.reason()
            ));
        }
        let pending = count_pending_upgrades(&simulation.stdout);
        if pending == 0 {
            return PhaseOutcome::Completed("no pending upgrades".to_string());
        }

        ctx.log.info(format!("Upgrading {} package(s)", pending));
        let upgrade = ctx.system.run(
            "env",
            &apt_get(&["-y", "-o", "Dpkg::Options::=--force-confold", "upgrade"]),
            timeout,
        );
        if upgrade.success() {
            PhaseOutcome::Completed(format!("{} package(s) upgraded", pending))
        } else {
            PhaseOutcome::Failed(format!("apt-get upgrade: {}", upgrade.reason()))
        }
    }
}

/// Installs whatever is missing from the configured package list.
pub struct BasePackagesPhase {
    packages: Vec<String>,
}

impl BasePackagesPhase {
    pub fn new(packages: Vec<String>) -> Self {
        Self { packages }
    }

    fn missing(&self, ctx: &PhaseContext) -> Vec<String> {
        let timeout = ctx.config.timeouts.command();
        self.packages
            .iter()
            .filter(|package| {
                let out = ctx.system.run(
                    "dpkg-query",
                    &["-W", "-f=${Status}", package.as_str()],
                    timeout,
                );
                !(out.success() && out.stdout.contains("install ok installed"))
            })
            .cloned()
            .collect()
    }
}

impl Phase for BasePackagesPhase {
    fn id(&self) -> &str {
        "base-packages"
    }

    fn ordinal(&self) -> u32 {
        30
    }

    fn description(&self) -> &str {
        "Install the security tool set"
    }

    fn depends_on(&self) -> &[&'static str] {
        &["system-update"]
    }

    fn run(&self, ctx: &PhaseContext) -> PhaseOutcome {
        let missing = self.missing(ctx);
        if missing.is_empty() {
            return PhaseOutcome::Completed(format!(
                "all {} package(s) already installed",
                self.packages.len()
            ));
        }

        ctx.log.info(format!("Installing {}", missing.join(" ")));
        let mut args = vec!["install", "-y"];
        args.extend(missing.iter().map(String::as_str));
        let out = ctx
            .system
            .run("env", &apt_get(&args), ctx.config.timeouts.command());
        if !out.success() {
            return PhaseOutcome::Failed(format!("apt-get install: {}", out.reason()));
        }

        let still_missing = self.missing(ctx);
        if still_missing.is_empty() {
            PhaseOutcome::Completed(format!("installed {}", missing.join(", ")))
        } else {
            PhaseOutcome::Failed(format!("still missing: {}", still_missing.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WardenConfig;
    use crate::logging::StatusLog;
    use crate::phases::testing::context;
    use crate::system::{CommandOutput, FakeSystem};

    #[test]
    fn test_only_missing_packages_are_installed() {
        let dir = tempfile::tempdir().unwrap();
        let config = WardenConfig::default().rooted_at(dir.path());
        let log = StatusLog::memory("warden");
        let system = FakeSystem::healthy().with_package("ufw");
        let ctx = context(&system, &log, &config);
        let phase = BasePackagesPhase::new(vec!["ufw".to_string(), "fail2ban".to_string()]);

        assert_eq!(
            phase.run(&ctx),
            PhaseOutcome::Completed("installed fail2ban".to_string())
        );
        let installs = system.commands_starting_with("env DEBIAN_FRONTEND=noninteractive apt-get install");
        assert_eq!(installs.len(), 1);
        assert!(installs[0].ends_with("install -y fail2ban"));

        system.clear_commands();
        assert!(matches!(phase.run(&ctx), PhaseOutcome::Completed(ref m) if m.contains("already")));
        assert!(system.commands_starting_with("env").is_empty());
    }

    #[test]
    fn test_upgrade_only_when_pending() {
        let dir = tempfile::tempdir().unwrap();
        let config = WardenConfig::default().rooted_at(dir.path());
        let log = StatusLog::memory("warden");
        let system = FakeSystem::healthy();
        let ctx = context(&system, &log, &config);

        assert_eq!(
            SystemUpdatePhase.run(&ctx),
            PhaseOutcome::Completed("no pending upgrades".to_string())
        );
        assert!(system
            .commands_starting_with("env DEBIAN_FRONTEND=noninteractive apt-get -y")
            .is_empty());

        system.respond(
            "apt-get -s upgrade",
            CommandOutput::ok("Inst openssl [3.0.2-0ubuntu1.14] (3.0.2-0ubuntu1.15 Ubuntu:22.04/jammy-security)\nConf openssl\n"),
        );
        assert_eq!(
            SystemUpdatePhase.run(&ctx),
            PhaseOutcome::Completed("1 package(s) upgraded".to_string())
        );
    }
}
