//! netlab shared - code used on both sides of the host/guest boundary
//!
//! This crate contains the error type, the guest mount contract and the
//! boot parameter record that the host encodes onto the kernel command line
//! and the guest init decodes at boot.

pub mod boot_params;
pub mod constants;
pub mod errors;
pub mod layout;

pub use boot_params::{BootParams, NodeRole};
pub use errors::{NetlabError, NetlabResult};
