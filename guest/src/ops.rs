//! System effects of the boot sequence.
//!
//! Stages never touch the system directly; they go through [`GuestOps`].
//! [`LinuxOps`] performs the real calls, tests use a recording fake.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use netlab_shared::constants::boot;
use netlab_shared::errors::{NetlabError, NetlabResult};
use netlab_shared::layout::GuestRunLayout;
use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

/// One mount(2) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub source: String,
    pub target: PathBuf,
    pub fstype: Option<String>,
    pub flags: MsFlags,
    pub data: Option<String>,
}

/// Console session the init re-executes into after the privilege drop.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LoginSession {
    /// Primary console device, becomes the controlling terminal.
    pub console: PathBuf,
}

/// Interactive shell invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub home: PathBuf,
    pub path: String,
}

pub trait GuestOps {
    fn mount(&mut self, spec: &MountSpec) -> NetlabResult<()>;

    fn create_dir_all(&mut self, path: &Path) -> NetlabResult<()>;

    fn read_file(&mut self, path: &Path) -> NetlabResult<String>;

    /// Write a file, setting its mode when given.
    fn write_file(&mut self, path: &Path, contents: &str, mode: Option<u32>) -> NetlabResult<()>;

    fn copy_file(&mut self, from: &Path, to: &Path, mode: u32) -> NetlabResult<()>;

    fn exists(&mut self, path: &Path) -> bool;

    /// Whether `path` itself is a symbolic link.
    fn is_symlink(&mut self, path: &Path) -> bool;

    fn remove_file(&mut self, path: &Path) -> NetlabResult<()>;

    /// Entry names of a directory, sorted.
    fn list_dir(&mut self, path: &Path) -> NetlabResult<Vec<String>>;

    fn set_hostname(&mut self, name: &str) -> NetlabResult<()>;

    fn load_module(&mut self, path: &Path) -> NetlabResult<()>;

    /// Make `new_root` the root directory of this process.
    fn switch_root(&mut self, new_root: &Path) -> NetlabResult<()>;

    /// Run a program to completion; a non-zero exit is an error.
    fn run(&mut self, program: &Path, args: &[&str]) -> NetlabResult<()>;

    /// Replace this process with `program`, passing the handoff record.
    ///
    /// With a session, the init instead stays as supervisor and keeps a
    /// child running on the session console. Returns only on failure,
    /// except in test doubles.
    fn exec_init(
        &mut self,
        program: &Path,
        handoff: &str,
        session: Option<&LoginSession>,
    ) -> NetlabResult<()>;

    /// Write `query` to the terminal and read the reply up to `terminator`.
    ///
    /// Stops early when no byte arrives within `byte_timeout`.
    fn terminal_exchange(
        &mut self,
        query: &[u8],
        terminator: u8,
        byte_timeout: Duration,
    ) -> NetlabResult<Vec<u8>>;

    fn set_window_size(&mut self, rows: u16, cols: u16) -> NetlabResult<()>;

    /// Run the interactive shell and return its exit code.
    fn run_shell(&mut self, spec: &ShellSpec) -> NetlabResult<i32>;

    fn print(&mut self, text: &str);

    fn sleep(&mut self, duration: Duration);
}

/// Real system calls.
#[derive(Debug, Default)]
pub struct LinuxOps;

impl GuestOps for LinuxOps {
    fn mount(&mut self, spec: &MountSpec) -> NetlabResult<()> {
        tracing::debug!(
            source = %spec.source,
            target = %spec.target.display(),
            fstype = ?spec.fstype,
            "mount"
        );
        nix::mount::mount(
            Some(spec.source.as_str()),
            &spec.target,
            spec.fstype.as_deref(),
            spec.flags,
            spec.data.as_deref(),
        )
        .map_err(|e| {
            NetlabError::Boot(format!(
                "Failed to mount {} on {}: {}",
                spec.source,
                spec.target.display(),
                e
            ))
        })
    }

    fn create_dir_all(&mut self, path: &Path) -> NetlabResult<()> {
        std::fs::create_dir_all(path).map_err(|e| {
            NetlabError::Boot(format!("Failed to create {}: {}", path.display(), e))
        })
    }

    fn read_file(&mut self, path: &Path) -> NetlabResult<String> {
        std::fs::read_to_string(path)
            .map_err(|e| NetlabError::Boot(format!("Failed to read {}: {}", path.display(), e)))
    }

    fn write_file(&mut self, path: &Path, contents: &str, mode: Option<u32>) -> NetlabResult<()> {
        std::fs::write(path, contents)
            .map_err(|e| NetlabError::Boot(format!("Failed to write {}: {}", path.display(), e)))?;
        if let Some(mode) = mode {
            set_mode(path, mode)?;
        }
        Ok(())
    }

    fn copy_file(&mut self, from: &Path, to: &Path, mode: u32) -> NetlabResult<()> {
        std::fs::copy(from, to).map_err(|e| {
            NetlabError::Boot(format!(
                "Failed to copy {} to {}: {}",
                from.display(),
                to.display(),
                e
            ))
        })?;
        set_mode(to, mode)
    }

    fn exists(&mut self, path: &Path) -> bool {
        path.exists()
    }

    fn is_symlink(&mut self, path: &Path) -> bool {
        path.is_symlink()
    }

    fn remove_file(&mut self, path: &Path) -> NetlabResult<()> {
        std::fs::remove_file(path)
            .map_err(|e| NetlabError::Boot(format!("Failed to remove {}: {}", path.display(), e)))
    }

    fn list_dir(&mut self, path: &Path) -> NetlabResult<Vec<String>> {
        let entries = std::fs::read_dir(path)
            .map_err(|e| NetlabError::Boot(format!("Failed to list {}: {}", path.display(), e)))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    fn set_hostname(&mut self, name: &str) -> NetlabResult<()> {
        nix::unistd::sethostname(name)
            .map_err(|e| NetlabError::Boot(format!("Failed to set hostname {}: {}", name, e)))
    }

    fn load_module(&mut self, path: &Path) -> NetlabResult<()> {
        let file = File::open(path)
            .map_err(|e| NetlabError::Boot(format!("Failed to open {}: {}", path.display(), e)))?;
        let params = CString::default();
        match nix::kmod::finit_module(&file, &params, nix::kmod::ModuleInitFlags::empty()) {
            Ok(()) | Err(Errno::EEXIST) => Ok(()),
            Err(e) => Err(NetlabError::Boot(format!(
                "Failed to load module {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn switch_root(&mut self, new_root: &Path) -> NetlabResult<()> {
        let fail = |step: &str, e: Errno| {
            NetlabError::Boot(format!(
                "Failed to switch root to {} ({}): {}",
                new_root.display(),
                step,
                e
            ))
        };
        nix::unistd::chdir(new_root).map_err(|e| fail("chdir", e))?;
        nix::mount::mount(
            Some(new_root),
            "/",
            None::<&str>,
            MsFlags::MS_MOVE,
            None::<&str>,
        )
        .map_err(|e| fail("move", e))?;
        nix::unistd::chroot(".").map_err(|e| fail("chroot", e))?;
        nix::unistd::chdir("/").map_err(|e| fail("chdir", e))
    }

    fn run(&mut self, program: &Path, args: &[&str]) -> NetlabResult<()> {
        let status = Command::new(program).args(args).status().map_err(|e| {
            NetlabError::Boot(format!("Failed to run {}: {}", program.display(), e))
        })?;
        if !status.success() {
            return Err(NetlabError::Boot(format!(
                "{} {} exited with {}",
                program.display(),
                args.join(" "),
                status
            )));
        }
        Ok(())
    }

    fn exec_init(
        &mut self,
        program: &Path,
        handoff: &str,
        session: Option<&LoginSession>,
    ) -> NetlabResult<()> {
        match session {
            None => {
                let err = Command::new(program)
                    .env(boot::HANDOFF_ENV, handoff)
                    .exec();
                Err(NetlabError::Boot(format!(
                    "Failed to exec {}: {}",
                    program.display(),
                    err
                )))
            }
            Some(session) => supervise_session(program, handoff, session),
        }
    }

    fn terminal_exchange(
        &mut self,
        query: &[u8],
        terminator: u8,
        byte_timeout: Duration,
    ) -> NetlabResult<Vec<u8>> {
        use nix::poll::{poll, PollFd, PollFlags};
        use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};

        let stdin = std::io::stdin();
        let fail = |e: String| NetlabError::Boot(format!("Terminal size query failed: {}", e));

        let saved = tcgetattr(stdin.as_fd()).map_err(|e| fail(e.to_string()))?;
        let mut raw = saved.clone();
        raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw).map_err(|e| fail(e.to_string()))?;

        let mut tty = stdin
            .as_fd()
            .try_clone_to_owned()
            .map(File::from)
            .map_err(|e| fail(e.to_string()))?;
        let timeout = u16::try_from(byte_timeout.as_millis()).unwrap_or(u16::MAX);

        let mut reply = Vec::new();
        let mut stdout = std::io::stdout();
        let result = stdout
            .write_all(query)
            .and_then(|_| stdout.flush())
            .map_err(|e| fail(e.to_string()))
            .and_then(|_| {
                loop {
                    let mut fds = [PollFd::new(tty.as_fd(), PollFlags::POLLIN)];
                    let ready = poll(&mut fds, timeout).map_err(|e| fail(e.to_string()))?;
                    if ready == 0 {
                        break;
                    }
                    let mut byte = [0u8; 1];
                    match tty.read(&mut byte) {
                        Ok(1) => {
                            reply.push(byte[0]);
                            if byte[0] == terminator {
                                break;
                            }
                        }
                        Ok(_) => break,
                        Err(e) => return Err(fail(e.to_string())),
                    }
                }
                Ok(())
            });

        let restored = tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &saved);
        result?;
        restored.map_err(|e| fail(e.to_string()))?;
        Ok(reply)
    }

    fn set_window_size(&mut self, rows: u16, cols: u16) -> NetlabResult<()> {
        use nix::pty::Winsize;

        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let stdin = std::io::stdin();
        unsafe {
            if nix::libc::ioctl(
                stdin.as_raw_fd(),
                nix::libc::TIOCSWINSZ,
                &winsize as *const _,
            ) == -1
            {
                let errno = std::io::Error::last_os_error();
                return Err(NetlabError::Boot(format!(
                    "Failed to set terminal size ({}x{}): {}",
                    rows, cols, errno
                )));
            }
        }
        Ok(())
    }

    fn run_shell(&mut self, spec: &ShellSpec) -> NetlabResult<i32> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .env("HOME", &spec.home)
            .env("PATH", &spec.path)
            .current_dir(if spec.home.is_dir() {
                spec.home.as_path()
            } else {
                Path::new("/")
            });
        if let Some(gid) = spec.gid {
            command.gid(gid);
        }
        if let Some(uid) = spec.uid {
            command.uid(uid);
        }

        let status = command.status().map_err(|e| {
            NetlabError::Boot(format!("Failed to start {}: {}", spec.program.display(), e))
        })?;
        Ok(status.code().unwrap_or(-1))
    }

    fn print(&mut self, text: &str) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

fn set_mode(path: &Path, mode: u32) -> NetlabResult<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        NetlabError::Boot(format!("Failed to chmod {}: {}", path.display(), e))
    })
}

/// Keep a child of this init running on the session console.
///
/// The child is a new session leader with the console as its controlling
/// terminal. When it exits it is started again. Other orphans that land
/// on this process are reaped along the way.
fn supervise_session(program: &Path, handoff: &str, session: &LoginSession) -> NetlabResult<()> {
    let fifo = GuestRunLayout::default().power_fifo();
    if let Err(e) = crate::power::spawn_listener(&fifo) {
        tracing::warn!("Power requests unavailable: {}", e);
    }

    loop {
        let console = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&session.console)
            .map_err(|e| {
                NetlabError::Boot(format!(
                    "Failed to open console {}: {}",
                    session.console.display(),
                    e
                ))
            })?;
        let stdio = |file: &File| {
            file.try_clone().map(Stdio::from).map_err(|e| {
                NetlabError::Boot(format!("Failed to duplicate console handle: {}", e))
            })
        };

        let mut command = Command::new(program);
        command
            .env(boot::HANDOFF_ENV, handoff)
            .stdin(stdio(&console)?)
            .stdout(stdio(&console)?)
            .stderr(Stdio::from(console));
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                if nix::libc::ioctl(0, nix::libc::TIOCSCTTY, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = command.spawn().map_err(|e| {
            NetlabError::Boot(format!("Failed to start console session: {}", e))
        })?;
        let pid = child.id() as i32;
        tracing::info!(pid, console = %session.console.display(), "Console session started");

        loop {
            match waitpid(Pid::from_raw(-1), None) {
                Ok(WaitStatus::Exited(reaped, _)) | Ok(WaitStatus::Signaled(reaped, _, _))
                    if reaped.as_raw() == pid =>
                {
                    break;
                }
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => break,
                Err(e) => {
                    return Err(NetlabError::Boot(format!("waitpid failed: {}", e)));
                }
            }
        }

        tracing::warn!("Console session ended, starting a new one");
        std::thread::sleep(Duration::from_secs(1));
    }
}

#[cfg(test)]
pub mod fake {
    //! Recording test double.

    use std::collections::{HashMap, HashSet};

    use super::*;

    #[derive(Debug, Default)]
    pub struct RecordingOps {
        /// Every effect, in order, as a short description.
        pub calls: Vec<String>,
        pub files: HashMap<PathBuf, String>,
        pub dirs: HashMap<PathBuf, Vec<String>>,
        pub existing: HashSet<PathBuf>,
        pub symlinks: HashSet<PathBuf>,
        /// Mounts of these filesystem types fail.
        pub failing_fstypes: HashSet<String>,
        pub terminal_reply: Vec<u8>,
        pub window_size: Option<(u16, u16)>,
        pub execs: Vec<(PathBuf, String, Option<LoginSession>)>,
        pub shells: Vec<ShellSpec>,
        pub printed: String,
    }

    impl RecordingOps {
        pub fn with_file(mut self, path: &str, contents: &str) -> Self {
            self.files.insert(PathBuf::from(path), contents.to_string());
            self
        }

        pub fn with_existing(mut self, path: &str) -> Self {
            self.existing.insert(PathBuf::from(path));
            self
        }

        pub fn with_symlink(mut self, path: &str) -> Self {
            self.symlinks.insert(PathBuf::from(path));
            self
        }

        pub fn with_dir(mut self, path: &str, entries: &[&str]) -> Self {
            self.dirs.insert(
                PathBuf::from(path),
                entries.iter().map(|e| e.to_string()).collect(),
            );
            self
        }

        pub fn called(&self, prefix: &str) -> bool {
            self.calls.iter().any(|c| c.starts_with(prefix))
        }
    }

    impl GuestOps for RecordingOps {
        fn mount(&mut self, spec: &MountSpec) -> NetlabResult<()> {
            let fstype = spec.fstype.clone().unwrap_or_else(|| "-".into());
            self.calls.push(format!(
                "mount {} {} {}",
                fstype,
                spec.source,
                spec.target.display()
            ));
            if self.failing_fstypes.contains(&fstype) {
                return Err(NetlabError::Boot(format!("mount {} refused", fstype)));
            }
            Ok(())
        }

        fn create_dir_all(&mut self, path: &Path) -> NetlabResult<()> {
            self.calls.push(format!("mkdir {}", path.display()));
            self.existing.insert(path.to_path_buf());
            Ok(())
        }

        fn read_file(&mut self, path: &Path) -> NetlabResult<String> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| NetlabError::Boot(format!("no such file {}", path.display())))
        }

        fn write_file(
            &mut self,
            path: &Path,
            contents: &str,
            _mode: Option<u32>,
        ) -> NetlabResult<()> {
            self.calls.push(format!("write {}", path.display()));
            self.files.insert(path.to_path_buf(), contents.to_string());
            Ok(())
        }

        fn copy_file(&mut self, from: &Path, to: &Path, _mode: u32) -> NetlabResult<()> {
            self.calls
                .push(format!("copy {} {}", from.display(), to.display()));
            Ok(())
        }

        fn exists(&mut self, path: &Path) -> bool {
            self.existing.contains(path)
                || self.files.contains_key(path)
                || self.symlinks.contains(path)
        }

        fn is_symlink(&mut self, path: &Path) -> bool {
            self.symlinks.contains(path)
        }

        fn remove_file(&mut self, path: &Path) -> NetlabResult<()> {
            self.calls.push(format!("rm {}", path.display()));
            self.symlinks.remove(path);
            self.existing.remove(path);
            self.files.remove(path);
            Ok(())
        }

        fn list_dir(&mut self, path: &Path) -> NetlabResult<Vec<String>> {
            Ok(self.dirs.get(path).cloned().unwrap_or_default())
        }

        fn set_hostname(&mut self, name: &str) -> NetlabResult<()> {
            self.calls.push(format!("hostname {}", name));
            Ok(())
        }

        fn load_module(&mut self, path: &Path) -> NetlabResult<()> {
            self.calls.push(format!("insmod {}", path.display()));
            Ok(())
        }

        fn switch_root(&mut self, new_root: &Path) -> NetlabResult<()> {
            self.calls.push(format!("switch_root {}", new_root.display()));
            Ok(())
        }

        fn run(&mut self, program: &Path, args: &[&str]) -> NetlabResult<()> {
            self.calls
                .push(format!("run {} {}", program.display(), args.join(" ")));
            Ok(())
        }

        fn exec_init(
            &mut self,
            program: &Path,
            handoff: &str,
            session: Option<&LoginSession>,
        ) -> NetlabResult<()> {
            self.calls.push(format!("exec {}", program.display()));
            self.execs
                .push((program.to_path_buf(), handoff.to_string(), session.cloned()));
            Ok(())
        }

        fn terminal_exchange(
            &mut self,
            _query: &[u8],
            _terminator: u8,
            _byte_timeout: Duration,
        ) -> NetlabResult<Vec<u8>> {
            self.calls.push("terminal query".into());
            Ok(self.terminal_reply.clone())
        }

        fn set_window_size(&mut self, rows: u16, cols: u16) -> NetlabResult<()> {
            self.calls.push(format!("winsize {}x{}", rows, cols));
            self.window_size = Some((rows, cols));
            Ok(())
        }

        fn run_shell(&mut self, spec: &ShellSpec) -> NetlabResult<i32> {
            self.calls.push(format!("shell {}", spec.program.display()));
            self.shells.push(spec.clone());
            Ok(0)
        }

        fn print(&mut self, text: &str) {
            self.printed.push_str(text);
        }

        fn sleep(&mut self, duration: Duration) {
            self.calls.push(format!("sleep {}ms", duration.as_millis()));
        }
    }
}
