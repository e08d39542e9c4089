//! TOPOLOGY_CONFIG: data-plane address, routing and neighbor discovery.
//!
//! Safe to run again when the console session is restarted: addresses and
//! routes are replaced, daemons already running are left alone.

use std::path::Path;

use netlab_shared::constants::addressing;
use netlab_shared::errors::{NetlabError, NetlabResult};
use netlab_shared::NodeRole;

use crate::fsm::{BootContext, Stage, Transition};
use crate::ops::GuestOps;

const DATA_INTERFACE: &str = "eth0";
const IP_FORWARD: &str = "/proc/sys/net/ipv4/ip_forward";

/// Data-plane address with prefix for a node, e.g. `10.0.0.3/24`.
///
/// Routers take their ordinal as the last octet, hosts their ordinal
/// plus the host offset.
pub fn data_plane_address(role: NodeRole, ordinal: u32) -> NetlabResult<String> {
    let octet = match role {
        NodeRole::Router => Some(ordinal),
        NodeRole::Host => ordinal.checked_add(addressing::HOST_ORDINAL_OFFSET),
    };
    let octet = match octet {
        Some(octet @ 1..=254) => octet,
        _ => {
            return Err(NetlabError::Config(format!(
                "{} ordinal {} has no address in the data-plane subnet",
                role, ordinal
            )));
        }
    };
    let [a, b, c] = addressing::DATA_PLANE_PREFIX;
    Ok(format!(
        "{}.{}.{}.{}/{}",
        a,
        b,
        c,
        octet,
        addressing::DATA_PLANE_PREFIX_LEN
    ))
}

pub fn run<O: GuestOps>(ctx: &mut BootContext, ops: &mut O) -> NetlabResult<Transition> {
    let params = ctx.params()?;
    let (role, ordinal) = (params.role, params.ordinal);
    let address = data_plane_address(role, ordinal)?;

    let interface = Path::new("/sys/class/net").join(DATA_INTERFACE);
    match super::find_program(ops, "ip") {
        Some(ip) if ops.exists(&interface) => {
            ops.run(&ip, &["addr", "replace", address.as_str(), "dev", DATA_INTERFACE])?;
            tracing::info!(address = %address, interface = DATA_INTERFACE, "Address assigned");
            if role == NodeRole::Host {
                ops.run(
                    &ip,
                    &["route", "replace", "default", "via", addressing::DEFAULT_GATEWAY],
                )?;
            }
        }
        Some(_) => tracing::warn!("No {} interface, node left unaddressed", DATA_INTERFACE),
        None => tracing::warn!("No 'ip' program, node left unaddressed"),
    }

    if role == NodeRole::Router {
        ops.write_file(Path::new(IP_FORWARD), "1\n", None)?;
        if !super::is_running(ops, "bird") {
            super::start_optional(ops, "bird", &[]);
        }
    }

    if !super::is_running(ops, "lldpd") {
        super::start_optional(ops, "lldpd", &[]);
    }

    super::setup::install_power_controls(ctx, ops)?;
    Ok(Transition::Continue(Stage::InteractiveShell))
}
