//! Boot parameters passed from host to guest on the kernel command line.
//!
//! The host encodes a node's identity and its passthrough mount points as
//! `netlab.<key>=<value>` words; the guest init decodes them from
//! `/proc/cmdline`. Unknown `netlab.*` keys are ignored so older guests keep
//! booting when the host adds parameters.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::cmdline as keys;
use crate::errors::{NetlabError, NetlabResult};

/// Role of a node in the lab, drives guest topology configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// End host: data-plane address plus default route.
    #[default]
    Host,
    /// Router: forwarding enabled, routing daemon started when available.
    Router,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Host => "host",
            NodeRole::Router => "router",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = NetlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(NodeRole::Host),
            "router" => Ok(NodeRole::Router),
            other => Err(NetlabError::Config(format!(
                "unknown node role '{}' (expected 'host' or 'router')",
                other
            ))),
        }
    }
}

/// Identity and passthrough mount points of one guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootParams {
    /// Node name, becomes the guest hostname.
    pub node: String,
    pub role: NodeRole,
    /// 1-based position of the node in the topology declaration.
    pub ordinal: u32,
    /// Operator home directory, bound at the same path in the guest.
    pub home: Option<PathBuf>,
    /// Lab working directory, bound at the same path in the guest.
    pub lab_dir: Option<PathBuf>,
    /// Run workspace, bound at the same path in the guest.
    pub workspace: Option<PathBuf>,
    /// Kernel module directory for the guest kernel.
    pub modules_dir: Option<PathBuf>,
    /// Operator uid/gid for the interactive session.
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl BootParams {
    pub fn new(node: impl Into<String>, role: NodeRole, ordinal: u32) -> Self {
        Self {
            node: node.into(),
            role,
            ordinal,
            home: None,
            lab_dir: None,
            workspace: None,
            modules_dir: None,
            uid: None,
            gid: None,
        }
    }

    /// Encode as kernel command line words.
    ///
    /// Values must not contain whitespace or quotes; the kernel splits the
    /// command line on spaces.
    pub fn to_cmdline(&self) -> NetlabResult<String> {
        let mut words = Vec::new();
        push_word(&mut words, keys::NODE, &self.node)?;
        push_word(&mut words, keys::ROLE, self.role.as_str())?;
        push_word(&mut words, keys::ORDINAL, &self.ordinal.to_string())?;

        let paths = [
            (keys::HOME, &self.home),
            (keys::LAB_DIR, &self.lab_dir),
            (keys::WORKSPACE, &self.workspace),
            (keys::MODULES, &self.modules_dir),
        ];
        for (key, path) in paths {
            if let Some(path) = path {
                push_word(&mut words, key, &path.to_string_lossy())?;
            }
        }

        if let Some(uid) = self.uid {
            push_word(&mut words, keys::UID, &uid.to_string())?;
        }
        if let Some(gid) = self.gid {
            push_word(&mut words, keys::GID, &gid.to_string())?;
        }

        Ok(words.join(" "))
    }

    /// Decode from a full kernel command line (`/proc/cmdline` contents).
    pub fn parse(cmdline: &str) -> NetlabResult<Self> {
        let mut params = BootParams::new(String::new(), NodeRole::Host, 1);

        for word in cmdline.split_whitespace() {
            let Some(rest) = word.strip_prefix(keys::PREFIX) else {
                continue;
            };
            let Some((key, value)) = rest.split_once('=') else {
                continue;
            };

            match key {
                keys::NODE => params.node = value.to_string(),
                keys::ROLE => params.role = value.parse()?,
                keys::ORDINAL => params.ordinal = parse_number(key, value)?,
                keys::HOME => params.home = Some(PathBuf::from(value)),
                keys::LAB_DIR => params.lab_dir = Some(PathBuf::from(value)),
                keys::WORKSPACE => params.workspace = Some(PathBuf::from(value)),
                keys::MODULES => params.modules_dir = Some(PathBuf::from(value)),
                keys::UID => params.uid = Some(parse_number(key, value)?),
                keys::GID => params.gid = Some(parse_number(key, value)?),
                _ => {}
            }
        }

        if params.node.is_empty() {
            return Err(NetlabError::Config(format!(
                "kernel command line has no {}{} parameter",
                keys::PREFIX,
                keys::NODE
            )));
        }

        Ok(params)
    }
}

fn push_word(words: &mut Vec<String>, key: &str, value: &str) -> NetlabResult<()> {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '"') {
        return Err(NetlabError::Config(format!(
            "boot parameter {}{} has a value that cannot be put on a kernel command line: {:?}",
            keys::PREFIX,
            key,
            value
        )));
    }
    words.push(format!("{}{}={}", keys::PREFIX, key, value));
    Ok(())
}

fn parse_number(key: &str, value: &str) -> NetlabResult<u32> {
    value.parse::<u32>().map_err(|e| {
        NetlabError::Config(format!(
            "invalid {}{} value '{}': {}",
            keys::PREFIX,
            key,
            value,
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BootParams {
        let mut params = BootParams::new("r1", NodeRole::Router, 3);
        params.home = Some(PathBuf::from("/home/alice"));
        params.lab_dir = Some(PathBuf::from("/home/alice/labs/ospf"));
        params.workspace = Some(PathBuf::from("/tmp/netlab-abc123"));
        params.modules_dir = Some(PathBuf::from("/lib/modules/6.1.0-18-amd64"));
        params.uid = Some(1000);
        params.gid = Some(1000);
        params
    }

    #[test]
    fn test_cmdline_is_parsed_back_among_kernel_words() {
        let params = sample();
        let cmdline = format!(
            "console=ttyS0 quiet {} panic=-1",
            params.to_cmdline().unwrap()
        );

        assert_eq!(BootParams::parse(&cmdline).unwrap(), params);
    }

    #[test]
    fn test_parse_defaults_and_ignores_unknown_keys() {
        let params = BootParams::parse("netlab.node=h1 netlab.future=1 root=/dev/ram0").unwrap();

        assert_eq!(params.node, "h1");
        assert_eq!(params.role, NodeRole::Host);
        assert_eq!(params.ordinal, 1);
        assert!(params.home.is_none());
        assert!(params.uid.is_none());
    }

    #[test]
    fn test_parse_requires_node() {
        let err = BootParams::parse("console=ttyS0 netlab.role=host").unwrap_err();
        assert!(matches!(err, NetlabError::Config(_)));
    }

    #[test]
    fn test_parse_rejects_unknown_role() {
        let err = BootParams::parse("netlab.node=x netlab.role=spine").unwrap_err();
        assert!(err.to_string().contains("spine"));
    }

    #[test]
    fn test_to_cmdline_rejects_whitespace() {
        let mut params = BootParams::new("h1", NodeRole::Host, 1);
        params.home = Some(PathBuf::from("/home/my user"));
        assert!(params.to_cmdline().is_err());
    }
}
