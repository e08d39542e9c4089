//! Topology declaration and planning.
//!
//! A lab file declares nodes and the segments each node attaches to. The
//! planner validates the whole declaration up front and derives, for every
//! node, its ordinal, its guest flavor and one MAC address per segment
//! membership. Nothing is allocated on the host until planning succeeds.

mod planner;

pub use planner::{mac_for, plan, plan_lab};

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use netlab_shared::errors::{NetlabError, NetlabResult};
use netlab_shared::NodeRole;
use serde::{Deserialize, Serialize};

use crate::runtime::constants::nic_models;
use crate::runtime::options::LabOptions;

// ============================================================================
// DECLARATION (lab file)
// ============================================================================

/// Parsed lab file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabFile {
    #[serde(default)]
    pub settings: LabOptions,
    pub nodes: Vec<NodeDecl>,
}

impl LabFile {
    pub fn from_yaml(text: &str) -> NetlabResult<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| NetlabError::Config(format!("Invalid lab file: {}", e)))
    }

    pub fn load(path: &Path) -> NetlabResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            NetlabError::Config(format!("Failed to read lab file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }
}

/// One node as written in the lab file.
///
/// Flavor and role stay strings here so a typo is reported with the node
/// name at plan time instead of as a bare deserialization error.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDecl {
    pub name: String,
    #[serde(default = "default_flavor")]
    pub flavor: String,
    #[serde(default = "default_role")]
    pub role: String,
    /// Comma-separated segment ids, e.g. `"1,2"`.
    pub segments: String,
    /// Appliance base disk image.
    #[serde(default)]
    pub image: Option<PathBuf>,
    /// Appliance seed configuration file.
    #[serde(default)]
    pub seed: Option<PathBuf>,
}

fn default_flavor() -> String {
    GuestFlavor::Generic.as_str().to_string()
}

fn default_role() -> String {
    NodeRole::Host.as_str().to_string()
}

// ============================================================================
// PLAN
// ============================================================================

/// How a node is booted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestFlavor {
    /// Kernel + root archive + host passthroughs, runs the netlab boot sequence.
    Generic,
    /// Vendor disk image booted from a private overlay.
    Appliance,
}

impl GuestFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestFlavor::Generic => "generic",
            GuestFlavor::Appliance => "appliance",
        }
    }

    /// NIC model presented to the guest.
    pub fn nic_model(&self) -> &'static str {
        match self {
            GuestFlavor::Generic => nic_models::GENERIC,
            GuestFlavor::Appliance => nic_models::APPLIANCE,
        }
    }
}

impl fmt::Display for GuestFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GuestFlavor {
    type Err = NetlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generic" => Ok(GuestFlavor::Generic),
            "appliance" => Ok(GuestFlavor::Appliance),
            other => Err(NetlabError::Config(format!(
                "unknown flavor '{}' (expected 'generic' or 'appliance')",
                other
            ))),
        }
    }
}

/// Locally-administered unicast MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl Serialize for MacAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A node's membership in one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub segment: String,
    pub mac: MacAddress,
}

/// A validated node ready to start.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedNode {
    pub name: String,
    pub flavor: GuestFlavor,
    pub role: NodeRole,
    /// 1-based declaration order.
    pub ordinal: u32,
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<PathBuf>,
}

/// Validated lab topology.
#[derive(Debug, Clone, Serialize)]
pub struct LabPlan {
    /// Segment ids in order of first appearance.
    pub segments: Vec<String>,
    pub nodes: Vec<PlannedNode>,
}

impl LabPlan {
    pub fn node(&self, name: &str) -> Option<&PlannedNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn has_generic_nodes(&self) -> bool {
        self.nodes.iter().any(|n| n.flavor == GuestFlavor::Generic)
    }
}
