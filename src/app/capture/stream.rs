use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const XLOG_DUMP_LOOP: &str =
    "while true; do cat /d/dri/0/debug/dump; echo \"newdump\"; done;";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum StreamKind {
    KernelLog,
    VendorDebugDump,
    SystemLog,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [
        StreamKind::KernelLog,
        StreamKind::VendorDebugDump,
        StreamKind::SystemLog,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StreamKind::KernelLog => "kernel-log",
            StreamKind::VendorDebugDump => "vendor-debug-dump",
            StreamKind::SystemLog => "system-log",
        }
    }

    /// Short label used on the form toggles and the CLI.
    pub fn short_name(self) -> &'static str {
        match self {
            StreamKind::KernelLog => "dmesg",
            StreamKind::VendorDebugDump => "xlog",
            StreamKind::SystemLog => "logcat",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            StreamKind::KernelLog => "dmesg.txt",
            StreamKind::VendorDebugDump => "xlog_out.txt",
            StreamKind::SystemLog => "logcat.txt",
        }
    }

    /// adb arguments, without the program and any `-s <serial>` prefix.
    pub fn adb_args(self) -> Vec<String> {
        match self {
            StreamKind::KernelLog => vec!["shell".into(), "dmesg".into(), "-w".into()],
            StreamKind::VendorDebugDump => vec!["shell".into(), XLOG_DUMP_LOOP.into()],
            StreamKind::SystemLog => vec!["logcat".into()],
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StreamKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let needle = value.trim().to_ascii_lowercase();
        StreamKind::ALL
            .into_iter()
            .find(|kind| kind.name() == needle || kind.short_name() == needle)
            .ok_or_else(|| {
                format!("Unknown log stream '{}'; expected dmesg, xlog or logcat", value.trim())
            })
    }
}

/// Parses a comma separated list such as `dmesg,logcat`. Duplicates collapse.
pub fn parse_stream_list(value: &str) -> Result<Vec<StreamKind>, String> {
    let mut streams = Vec::new();
    for part in value.split(',').filter(|part| !part.trim().is_empty()) {
        let kind = part.parse::<StreamKind>()?;
        if !streams.contains(&kind) {
            streams.push(kind);
        }
    }
    streams.sort();
    Ok(streams)
}
