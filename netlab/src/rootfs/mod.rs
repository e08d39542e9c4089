//! Root image for generic nodes.
//!
//! A minimal gzip-compressed newc archive holding the toolset, its
//! shared libraries, the kernel modules the boot sequence needs and the
//! netlab boot entrypoint as `/init`.

mod builder;
mod cpio;
mod libraries;
mod modules;

pub use builder::{BuiltImage, RootImageBuilder, RootImageSources, build_image};
pub use cpio::{write_gzip_archive, write_newc};
pub use libraries::parse_ldd;
pub use modules::parse_show_depends;
