//! PRIVILEGE_DROP: system services, interfaces, then the console session.

use std::path::{Path, PathBuf};

use netlab_shared::errors::NetlabResult;

use crate::fsm::{BootContext, Stage, Transition};
use crate::ops::{GuestOps, LoginSession};

const ACTIVE_CONSOLE: &str = "/sys/class/tty/console/active";
const FALLBACK_CONSOLE: &str = "/dev/ttyS0";

pub fn run<O: GuestOps>(ctx: &mut BootContext, ops: &mut O) -> NetlabResult<Transition> {
    super::start_optional(ops, "mdev", &["-s"]);

    bring_up_interfaces(ops);

    super::start_optional(ops, "syslogd", &[]);
    super::start_optional(ops, "lldpd", &[]);

    let console = primary_console(ops);
    tracing::info!(console = %console.display(), "Starting console session");
    ctx.session = Some(LoginSession { console });
    Ok(Transition::Exec(Stage::InteractiveSetup))
}

/// `lo` plus every `eth*` interface, in name order.
fn bring_up_interfaces<O: GuestOps>(ops: &mut O) {
    let Some(ip) = super::find_program(ops, "ip") else {
        tracing::warn!("No 'ip' program, interfaces left down");
        return;
    };

    let mut interfaces = vec!["lo".to_string()];
    match ops.list_dir(Path::new("/sys/class/net")) {
        Ok(names) => interfaces.extend(names.into_iter().filter(|n| n.starts_with("eth"))),
        Err(e) => tracing::warn!("{}", e),
    }

    for interface in &interfaces {
        if let Err(e) = ops.run(&ip, &["link", "set", interface.as_str(), "up"]) {
            tracing::warn!(interface = %interface, "{}", e);
        }
    }
}

/// Last device listed as active console; the kernel lists the primary one last.
fn primary_console<O: GuestOps>(ops: &mut O) -> PathBuf {
    ops.read_file(Path::new(ACTIVE_CONSOLE))
        .ok()
        .and_then(|text| text.split_whitespace().last().map(|name| format!("/dev/{}", name)))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(FALLBACK_CONSOLE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::{drive, Halt, Handoff};
    use crate::ops::fake::RecordingOps;

    #[test]
    fn test_interfaces_and_session_console() {
        let mut ops = RecordingOps::default()
            .with_existing("/sbin/ip")
            .with_existing("/sbin/mdev")
            .with_dir("/sys/class/net", &["eth0", "eth1", "lo", "sit0"])
            .with_file(ACTIVE_CONSOLE, "tty0 hvc0\n");

        let (halt, ctx) = drive(Stage::PrivilegeDrop, BootContext::default(), &mut ops, None).unwrap();

        assert_eq!(halt, Halt::Replaced(Stage::InteractiveSetup));
        assert_eq!(
            ops.calls,
            vec![
                "run /sbin/mdev -s",
                "run /sbin/ip link set lo up",
                "run /sbin/ip link set eth0 up",
                "run /sbin/ip link set eth1 up",
                "exec /run/netlab/init",
            ]
        );

        let expected = LoginSession {
            console: PathBuf::from("/dev/hvc0"),
        };
        assert_eq!(ctx.session.as_ref(), Some(&expected));
        let (_, _, session) = &ops.execs[0];
        assert_eq!(session.as_ref(), Some(&expected));
        let (_, resumed) = Handoff::decode(&ops.execs[0].1).unwrap();
        assert_eq!(resumed.session, Some(expected));
    }

    #[test]
    fn test_console_fallback() {
        let mut ops = RecordingOps::default();
        assert_eq!(primary_console(&mut ops), PathBuf::from(FALLBACK_CONSOLE));
    }
}
