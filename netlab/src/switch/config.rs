//! Switch command line and rc file.

use std::path::Path;

use super::NetworkSegment;

/// rc file enabling unbuffered, active packet capture to `capture`.
pub fn render_rc(capture: &Path) -> String {
    format!(
        "plugin/add pdump.so\n\
         pdump/filename {}\n\
         pdump/buffered 0\n\
         pdump/active 1\n",
        capture.display()
    )
}

/// Arguments for one switch process.
pub fn switch_args(segment: &NetworkSegment) -> Vec<String> {
    vec![
        "--sock".to_string(),
        segment.ctl.to_string_lossy().into_owned(),
        "--mgmt".to_string(),
        segment.mgmt.to_string_lossy().into_owned(),
        "--rcfile".to_string(),
        segment.rc.to_string_lossy().into_owned(),
        "--nostdin".to_string(),
    ]
}
