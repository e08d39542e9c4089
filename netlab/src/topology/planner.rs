use std::collections::HashSet;
use std::path::Path;

use netlab_shared::errors::{NetlabError, NetlabResult};
use netlab_shared::NodeRole;
use sha2::{Digest, Sha256};

use super::{Attachment, GuestFlavor, LabPlan, MacAddress, NodeDecl, PlannedNode};

/// Deterministic MAC for a node's membership in a segment.
///
/// First six bytes of SHA-256 over `node NUL segment`, with the first
/// octet forced to locally-administered unicast.
pub fn mac_for(node: &str, segment: &str) -> MacAddress {
    let mut hasher = Sha256::new();
    hasher.update(node.as_bytes());
    hasher.update([0u8]);
    hasher.update(segment.as_bytes());
    let digest = hasher.finalize();

    let mut mac = [0u8; 6];
    mac.copy_from_slice(&digest[..6]);
    mac[0] = (mac[0] & 0xfc) | 0x02;
    MacAddress(mac)
}

/// Attachments of one node, in declaration order.
pub fn plan(node: &str, segments: &[String]) -> Vec<Attachment> {
    segments
        .iter()
        .map(|segment| Attachment {
            segment: segment.clone(),
            mac: mac_for(node, segment),
        })
        .collect()
}

/// Validate a whole declaration and plan every node.
///
/// Relative image and seed paths are resolved against `base_dir` (the lab
/// file's directory). Any violation rejects the whole lab.
pub fn plan_lab(decls: &[NodeDecl], base_dir: Option<&Path>) -> NetlabResult<LabPlan> {
    if decls.is_empty() {
        return Err(NetlabError::Config("lab declares no nodes".into()));
    }

    let mut names = HashSet::new();
    let mut segment_order = Vec::new();
    let mut nodes = Vec::with_capacity(decls.len());

    for (index, decl) in decls.iter().enumerate() {
        validate_id("node name", &decl.name)?;
        if !names.insert(decl.name.as_str()) {
            return Err(NetlabError::Config(format!(
                "duplicate node name '{}'",
                decl.name
            )));
        }

        let flavor: GuestFlavor = decl
            .flavor
            .parse()
            .map_err(|e| NetlabError::Config(format!("node '{}': {}", decl.name, strip(e))))?;
        let role: NodeRole = decl
            .role
            .parse()
            .map_err(|e| NetlabError::Config(format!("node '{}': {}", decl.name, strip(e))))?;

        let segments = parse_segments(&decl.name, &decl.segments)?;
        for segment in &segments {
            if !segment_order.contains(segment) {
                segment_order.push(segment.clone());
            }
        }

        let resolve = |p: &Path| match base_dir {
            Some(base) if p.is_relative() => base.join(p),
            _ => p.to_path_buf(),
        };

        match flavor {
            GuestFlavor::Appliance => {
                if decl.image.is_none() {
                    return Err(NetlabError::Config(format!(
                        "appliance node '{}' must declare a base image",
                        decl.name
                    )));
                }
            }
            GuestFlavor::Generic => {
                if decl.image.is_some() || decl.seed.is_some() {
                    tracing::warn!(
                        node = %decl.name,
                        "image and seed are ignored for generic nodes"
                    );
                }
            }
        }

        let (image, seed) = match flavor {
            GuestFlavor::Appliance => (
                decl.image.as_deref().map(resolve),
                decl.seed.as_deref().map(resolve),
            ),
            GuestFlavor::Generic => (None, None),
        };

        nodes.push(PlannedNode {
            name: decl.name.clone(),
            flavor,
            role,
            ordinal: (index + 1) as u32,
            attachments: plan(&decl.name, &segments),
            image,
            seed,
        });
    }

    Ok(LabPlan {
        segments: segment_order,
        nodes,
    })
}

fn parse_segments(node: &str, list: &str) -> NetlabResult<Vec<String>> {
    let mut segments = Vec::new();
    for raw in list.split(',') {
        let id = raw.trim();
        validate_id(&format!("segment id of node '{}'", node), id)?;
        if segments.iter().any(|s| s == id) {
            return Err(NetlabError::Config(format!(
                "node '{}' attaches to segment '{}' twice",
                node, id
            )));
        }
        segments.push(id.to_string());
    }
    Ok(segments)
}

/// Names and segment ids become file names and command-line words.
fn validate_id(what: &str, id: &str) -> NetlabResult<()> {
    if id.is_empty() {
        return Err(NetlabError::Config(format!("{} must not be empty", what)));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(NetlabError::Config(format!(
            "{} '{}' may only contain letters, digits, '-' and '_'",
            what, id
        )));
    }
    Ok(())
}

fn strip(error: NetlabError) -> String {
    match error {
        NetlabError::Config(message) => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::LabFile;
    use proptest::prelude::*;

    fn decl(name: &str, flavor: &str, segments: &str) -> NodeDecl {
        NodeDecl {
            name: name.into(),
            flavor: flavor.into(),
            role: "host".into(),
            segments: segments.into(),
            image: None,
            seed: None,
        }
    }

    #[test]
    fn test_mac_is_locally_administered_unicast() {
        let mac = mac_for("a", "1");
        assert_eq!(mac.0[0] & 0x01, 0, "multicast bit must be clear");
        assert_eq!(mac.0[0] & 0x02, 0x02, "local bit must be set");
    }

    #[test]
    fn test_mac_deterministic() {
        let mac = mac_for("a", "1");
        let again = mac_for("a", "1");
        assert_eq!(mac, again);
        assert_eq!(mac.to_string().len(), 17);
        assert_ne!(mac_for("a", "1"), mac_for("a1", ""));
    }

    #[test]
    fn test_plan_preserves_segment_order() {
        let attachments = plan("r1", &["2".to_string(), "1".to_string()]);
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].segment, "2");
        assert_eq!(attachments[1].segment, "1");
        assert_ne!(attachments[0].mac, attachments[1].mac);
    }

    #[test]
    fn test_plan_lab_assigns_ordinals_and_segments() {
        let decls = vec![
            decl("a", "generic", "1"),
            decl("b", "generic", "1, 2"),
            NodeDecl {
                role: "router".into(),
                ..decl("r", "generic", "2")
            },
        ];

        let plan = plan_lab(&decls, None).unwrap();

        assert_eq!(plan.segments, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(plan.nodes[0].ordinal, 1);
        assert_eq!(plan.nodes[2].ordinal, 3);
        assert_eq!(plan.nodes[2].role, NodeRole::Router);
        assert_eq!(plan.nodes[1].attachments[1].segment, "2");
        assert_ne!(
            plan.nodes[0].attachments[0].mac,
            plan.nodes[1].attachments[0].mac
        );
    }

    #[test]
    fn test_unknown_flavor_rejected() {
        let err = plan_lab(&[decl("a", "mainframe", "1")], None).unwrap_err();
        assert!(matches!(err, NetlabError::Config(_)));
        assert!(err.to_string().contains("mainframe"));
        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn test_unknown_role_rejected() {
        let node = NodeDecl {
            role: "switch".into(),
            ..decl("a", "generic", "1")
        };
        assert!(plan_lab(&[node], None).is_err());
    }

    #[test]
    fn test_invalid_declarations_rejected() {
        let cases = vec![
            vec![decl("", "generic", "1")],
            vec![decl("a", "generic", "1"), decl("a", "generic", "2")],
            vec![decl("a", "generic", "")],
            vec![decl("a", "generic", "1,,2")],
            vec![decl("a", "generic", "1,1")],
            vec![decl("a b", "generic", "1")],
            vec![decl("a", "generic", "../x")],
            vec![decl("sw", "appliance", "1")],
        ];

        for decls in cases {
            let result = plan_lab(&decls, None);
            assert!(
                matches!(result, Err(NetlabError::Config(_))),
                "expected rejection for {:?}",
                decls
            );
        }

        assert!(plan_lab(&[], None).is_err());
    }

    #[test]
    fn test_appliance_paths_resolved_against_lab_dir() {
        let node = NodeDecl {
            image: Some("veos.qcow2".into()),
            seed: Some("/etc/sw1.cfg".into()),
            ..decl("sw1", "appliance", "1")
        };

        let plan = plan_lab(&[node], Some(Path::new("/labs/demo"))).unwrap();
        let sw1 = plan.node("sw1").unwrap();

        assert_eq!(sw1.flavor, GuestFlavor::Appliance);
        assert_eq!(
            sw1.image.as_deref(),
            Some(Path::new("/labs/demo/veos.qcow2"))
        );
        assert_eq!(sw1.seed.as_deref(), Some(Path::new("/etc/sw1.cfg")));
        assert!(!plan.has_generic_nodes());
    }

    #[test]
    fn test_lab_file_defaults() {
        let lab = LabFile::from_yaml(
            r#"
nodes:
  - name: a
    segments: "1"
  - name: b
    role: router
    segments: "1,2"
"#,
        )
        .unwrap();

        assert_eq!(lab.nodes[0].flavor, "generic");
        assert_eq!(lab.nodes[0].role, "host");
        assert_eq!(lab.settings.memory_mib, 256);

        let plan = plan_lab(&lab.nodes, None).unwrap();
        assert_eq!(plan.nodes.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_mac_deterministic_and_local(node in "[a-z0-9_-]{1,12}", segment in "[a-z0-9]{1,6}") {
            let first = mac_for(&node, &segment);
            let second = mac_for(&node, &segment);
            prop_assert_eq!(first, second);
            prop_assert_eq!(first.0[0] & 0x03, 0x02);
        }

        #[test]
        fn prop_mac_distinct_across_segments(node in "[a-z]{1,8}", a in "[0-9]{1,3}", b in "[0-9]{1,3}") {
            prop_assume!(a != b);
            prop_assert_ne!(mac_for(&node, &a), mac_for(&node, &b));
        }
    }
}
