//! newc cpio archive writer.
//!
//! Entries are written in sorted order with root ownership and zero
//! mtimes, so the same tree always produces the same archive.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use netlab_shared::errors::{NetlabError, NetlabResult};
use walkdir::WalkDir;

const MAGIC: &str = "070701";
const HEADER_LEN: usize = 110;
const TRAILER: &str = "TRAILER!!!";

/// Archive `root` as gzip-compressed newc cpio at `dest`.
pub fn write_gzip_archive(root: &Path, dest: &Path) -> NetlabResult<u64> {
    let file = File::create(dest).map_err(|e| {
        NetlabError::Image(format!("Failed to create {}: {}", dest.display(), e))
    })?;

    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let encoder = write_newc(root, encoder)?;

    let mut writer = encoder.finish().map_err(|e| {
        NetlabError::Image(format!("Failed to compress {}: {}", dest.display(), e))
    })?;
    writer.flush().map_err(|e| {
        NetlabError::Image(format!("Failed to flush {}: {}", dest.display(), e))
    })?;

    let size = std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
    Ok(size)
}

/// Write every entry under `root` (not `root` itself) to `out`.
pub fn write_newc<W: Write>(root: &Path, mut out: W) -> NetlabResult<W> {
    let mut ino: u32 = 1;

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            NetlabError::Image(format!("Failed to walk {}: {}", root.display(), e))
        })?;
        let path = entry.path();
        let name = path
            .strip_prefix(root)
            .map_err(|e| NetlabError::Image(format!("{}: {}", path.display(), e)))?
            .to_string_lossy()
            .into_owned();

        let meta = std::fs::symlink_metadata(path).map_err(|e| {
            NetlabError::Image(format!("Failed to stat {}: {}", path.display(), e))
        })?;
        let file_type = meta.file_type();

        let data = if file_type.is_symlink() {
            let target = std::fs::read_link(path).map_err(|e| {
                NetlabError::Image(format!("Failed to read link {}: {}", path.display(), e))
            })?;
            target.to_string_lossy().into_owned().into_bytes()
        } else if file_type.is_file() {
            let mut buf = Vec::with_capacity(meta.len() as usize);
            File::open(path)
                .and_then(|mut f| f.read_to_end(&mut buf))
                .map_err(|e| {
                    NetlabError::Image(format!("Failed to read {}: {}", path.display(), e))
                })?;
            buf
        } else {
            Vec::new()
        };

        let nlink = if file_type.is_dir() { 2 } else { 1 };
        write_entry(&mut out, &name, ino, meta.mode(), nlink, &data)?;
        ino += 1;
    }

    write_entry(&mut out, TRAILER, 0, 0, 1, &[])?;
    Ok(out)
}

fn write_entry<W: Write>(
    out: &mut W,
    name: &str,
    ino: u32,
    mode: u32,
    nlink: u32,
    data: &[u8],
) -> NetlabResult<()> {
    let name_size = name.len() + 1;
    let fields = [
        ino,
        mode,
        0, // uid
        0, // gid
        nlink,
        0, // mtime
        data.len() as u32,
        0, // devmajor
        0, // devminor
        0, // rdevmajor
        0, // rdevminor
        name_size as u32,
        0, // check
    ];

    let mut header = String::with_capacity(HEADER_LEN);
    header.push_str(MAGIC);
    for field in fields {
        header.push_str(&format!("{:08x}", field));
    }

    let io = |e: std::io::Error| NetlabError::Image(format!("Failed to write archive: {}", e));

    out.write_all(header.as_bytes()).map_err(io)?;
    out.write_all(name.as_bytes()).map_err(io)?;
    out.write_all(&[0]).map_err(io)?;
    out.write_all(&padding(HEADER_LEN + name_size)).map_err(io)?;
    out.write_all(data).map_err(io)?;
    out.write_all(&padding(data.len())).map_err(io)?;
    Ok(())
}

fn padding(len: usize) -> Vec<u8> {
    vec![0u8; (4 - len % 4) % 4]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    struct Entry {
        name: String,
        mode: u32,
        data: Vec<u8>,
    }

    fn field(header: &[u8], index: usize) -> usize {
        let start = 6 + index * 8;
        let text = std::str::from_utf8(&header[start..start + 8]).unwrap();
        usize::from_str_radix(text, 16).unwrap()
    }

    fn align(n: usize) -> usize {
        (n + 3) & !3
    }

    fn parse(bytes: &[u8]) -> Vec<Entry> {
        let mut entries = Vec::new();
        let mut pos = 0;
        loop {
            let header = &bytes[pos..pos + HEADER_LEN];
            assert_eq!(&header[..6], MAGIC.as_bytes());
            let mode = field(header, 1) as u32;
            let size = field(header, 6);
            let name_size = field(header, 11);

            let name_start = pos + HEADER_LEN;
            let name = String::from_utf8(bytes[name_start..name_start + name_size - 1].to_vec())
                .unwrap();
            let data_start = align(name_start + name_size);
            let data = bytes[data_start..data_start + size].to_vec();
            pos = align(data_start + size);

            if name == TRAILER {
                break;
            }
            entries.push(Entry { name, mode, data });
        }
        entries
    }

    #[test]
    fn test_newc_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("bin")).unwrap();
        std::fs::write(root.join("bin/busybox"), b"ELF").unwrap();
        std::os::unix::fs::symlink("/bin/busybox", root.join("bin/sh")).unwrap();
        std::fs::write(root.join("init"), b"#!init").unwrap();

        let bytes = write_newc(root, Vec::new()).unwrap();
        let entries = parse(&bytes);

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["bin", "bin/busybox", "bin/sh", "init"]);

        let sh = &entries[2];
        assert_eq!(sh.mode & 0o170000, 0o120000);
        assert_eq!(sh.data, b"/bin/busybox");
        assert_eq!(entries[1].data, b"ELF");
        assert_eq!(entries[0].mode & 0o170000, 0o040000);
        assert_eq!(bytes.len() % 4, 0);
    }

    #[test]
    fn test_gzip_archive_decompresses() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("init"), b"x").unwrap();
        let dest = dir.path().join("rootfs.cpio.gz");

        let size = write_gzip_archive(&root, &dest).unwrap();
        assert!(size > 0);

        let mut bytes = Vec::new();
        flate2::read::GzDecoder::new(File::open(&dest).unwrap())
            .read_to_end(&mut bytes)
            .unwrap();
        let entries = parse(&bytes);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "init");
    }
}
