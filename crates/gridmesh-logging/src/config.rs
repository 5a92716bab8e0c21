//! Logging settings for a GridMesh node
//!
//! Everything here deserializes from the `log` section of the daemon's
//! config file, with every field optional.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where node logs go and how verbose they are
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `gridmesh_node=debug,info`
    pub default_level: String,
    pub console: ConsoleConfig,
    /// Rotated JSONL files, off unless configured
    pub file: Option<FileConfig>,
    /// Shape of every JSON line, on the console and in files
    pub jsonl: JsonlConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".into(),
            console: ConsoleConfig::jsonl(),
            file: None,
            jsonl: JsonlConfig::default(),
        }
    }
}

impl LogConfig {
    /// A node run by hand at a terminal: debug level, colored text
    pub fn development() -> Self {
        Self {
            default_level: "debug".into(),
            console: ConsoleConfig::pretty(),
            ..Self::default()
        }
    }

    /// A node running unattended under a service manager
    ///
    /// The console stays quiet; JSONL goes to `log_dir` with a month of
    /// daily files kept, enough to cover a field visit interval.
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            console: ConsoleConfig::off(),
            file: Some(FileConfig {
                directory: log_dir,
                max_files: Some(30),
                ..FileConfig::default()
            }),
            ..Self::default()
        }
    }

    /// Test binaries: only warnings and errors, no color codes
    pub fn testing() -> Self {
        Self {
            default_level: "warn".into(),
            ..Self::default()
        }
    }
}

/// Standard output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// Human-readable lines instead of JSONL
    pub pretty: bool,
    /// Color codes; only honored with `pretty`
    pub ansi: bool,
}

impl ConsoleConfig {
    /// JSONL on stdout, for journald or a log shipper
    pub fn jsonl() -> Self {
        Self {
            enabled: true,
            pretty: false,
            ansi: false,
        }
    }

    /// Colored text on stdout
    pub fn pretty() -> Self {
        Self {
            enabled: true,
            pretty: true,
            ansi: true,
        }
    }

    /// Nothing on stdout
    pub fn off() -> Self {
        Self {
            enabled: false,
            ..Self::jsonl()
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self::jsonl()
    }
}

/// Log files on the node's storage
///
/// Files are named `<prefix>.<date>.log` when rotating and `<prefix>.log`
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Created on startup if missing
    pub directory: PathBuf,
    pub prefix: String,
    pub rotation: RotationStrategy,
    /// Older files beyond this count are deleted; `None` keeps everything
    pub max_files: Option<usize>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "gridmesh".into(),
            rotation: RotationStrategy::Daily,
            max_files: Some(7),
        }
    }
}

/// When a new log file is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// One file, truncated at every start
    Never,
}

/// Which details each JSON line carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlConfig {
    /// Put event fields (`peer`, `packet_id`, ...) at the top level
    pub flatten_events: bool,
    /// Include the enclosing spans, which carry the node id
    pub include_spans: bool,
    /// Source file and line
    pub include_location: bool,
    /// Runtime worker thread id and name
    pub include_thread_info: bool,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            flatten_events: true,
            include_spans: true,
            include_location: true,
            include_thread_info: false,
        }
    }
}
