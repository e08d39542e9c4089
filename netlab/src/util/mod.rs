mod process;

pub use process::{is_process_alive, read_pid_file, signal, write_pid_file};

use std::path::{Path, PathBuf};

use netlab_shared::errors::{NetlabError, NetlabResult};
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable pointing at a directory holding netlab runtime binaries.
pub const RUNTIME_DIR_ENV: &str = "NETLAB_RUNTIME_DIR";

/// Find a host binary.
///
/// A value containing a path separator is taken literally. Otherwise the
/// following locations are searched in order:
/// 1. `$NETLAB_RUNTIME_DIR/<name>`
/// 2. the directory of the running executable
/// 3. `PATH`
pub fn find_binary(binary_name: &str) -> NetlabResult<PathBuf> {
    if binary_name.contains('/') {
        let path = PathBuf::from(binary_name);
        if path.exists() {
            return Ok(path);
        }
        return Err(NetlabError::NotFound(format!(
            "Binary '{}' does not exist",
            binary_name
        )));
    }

    let mut candidates = Vec::new();

    if let Ok(runtime_dir) = std::env::var(RUNTIME_DIR_ENV) {
        candidates.push(PathBuf::from(runtime_dir).join(binary_name));
    }

    if let Ok(current_exe) = std::env::current_exe()
        && let Some(dir) = current_exe.parent()
    {
        candidates.push(dir.join(binary_name));
    }

    for candidate in &candidates {
        tracing::debug!("Finding binary {:?} in path: {:?}", binary_name, candidate);
        if candidate.is_file() {
            tracing::debug!(binary = %candidate.display(), "Found binary");
            return Ok(candidate.clone());
        }
    }

    if let Ok(found) = which::which(binary_name) {
        tracing::debug!(binary = %found.display(), "Found binary on PATH");
        return Ok(found);
    }

    let locations = candidates
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .chain(std::iter::once("  - $PATH".to_string()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(NetlabError::NotFound(format!(
        "Binary '{}' not found.\nSearched locations:\n{}",
        binary_name, locations
    )))
}

pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}

/// Quote a word for POSIX `sh`.
///
/// Words made only of safe characters are returned unchanged; everything
/// else is wrapped in single quotes with embedded quotes escaped.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | ',' | ':' | '=' | '+' | '@')
        });
    if safe {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Render a command line as a single shell line.
pub fn shell_join<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| shell_quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write an executable shell script.
pub fn write_executable_script(path: &Path, body: &str) -> NetlabResult<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, body).map_err(|e| {
        NetlabError::Storage(format!("Failed to write script {}: {}", path.display(), e))
    })?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
        NetlabError::Storage(format!(
            "Failed to make script {} executable: {}",
            path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_safe_words_unchanged() {
        assert_eq!(shell_quote("-netdev"), "-netdev");
        assert_eq!(
            shell_quote("vde,id=net0,sock=/tmp/netlab-x/switch-1.ctl"),
            "vde,id=net0,sock=/tmp/netlab-x/switch-1.ctl"
        );
    }

    #[test]
    fn test_shell_quote_special_characters() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("console=ttyS0 quiet"), "'console=ttyS0 quiet'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_shell_join() {
        assert_eq!(
            shell_join(["qemu", "-append", "a b"]),
            "qemu -append 'a b'"
        );
    }

    #[test]
    fn test_find_binary_literal_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("tool");
        std::fs::write(&bin, "").unwrap();

        assert_eq!(find_binary(bin.to_str().unwrap()).unwrap(), bin);
        assert!(find_binary("/nonexistent/netlab/tool").is_err());
    }

    #[test]
    fn test_find_binary_on_path() {
        assert!(find_binary("sh").is_ok());
        assert!(matches!(
            find_binary("netlab-definitely-missing-binary"),
            Err(NetlabError::NotFound(_))
        ));
    }

    #[test]
    fn test_write_executable_script_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("node-a.sh");
        write_executable_script(&script, "#!/bin/sh\nexit 0\n").unwrap();

        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
