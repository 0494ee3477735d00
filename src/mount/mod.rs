//! Mount table records and the shadow options the supervisor cares about.

mod table;

pub use table::MountTable;

use std::path::PathBuf;

/// Mount option naming the shadow migration mode.
pub const SHADOW_OPTION: &str = "shadow";

/// Filesystem types that can carry shadow mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
    Zfs,
    Nfs,
}

impl FsType {
    /// Recognize a mount-table filesystem type; anything else is ignored.
    pub fn recognize(fstype: &str) -> Option<Self> {
        match fstype {
            "zfs" => Some(FsType::Zfs),
            "nfs" => Some(FsType::Nfs),
            _ => None,
        }
    }
}

/// The value of a `shadow=<mode>` mount option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowMode {
    /// Mounted, but not pulling data yet
    Standby,
    /// Actively migrating
    Active,
    /// Any other mode the filesystem accepted
    Other(String),
}

impl ShadowMode {
    fn parse(value: &str) -> Self {
        match value {
            "standby" => ShadowMode::Standby,
            "active" => ShadowMode::Active,
            other => ShadowMode::Other(other.to_string()),
        }
    }
}

/// One record of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Dataset (special device) identifier
    pub special: String,
    pub mountpoint: PathBuf,
    pub fstype: String,
    /// Comma-separated option string as it appears in the table
    pub options: String,
}

impl MountEntry {
    pub fn new(
        special: impl Into<String>,
        mountpoint: impl Into<PathBuf>,
        fstype: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        Self {
            special: special.into(),
            mountpoint: mountpoint.into(),
            fstype: fstype.into(),
            options: options.into(),
        }
    }

    /// The recognized filesystem type, if any.
    pub fn fs_type(&self) -> Option<FsType> {
        FsType::recognize(&self.fstype)
    }

    /// The shadow mode, or `None` when no `shadow` option is present.
    ///
    /// A bare `shadow` option without a value counts as present.
    pub fn shadow_mode(&self) -> Option<ShadowMode> {
        self.options.split(',').find_map(|opt| {
            let (name, value) = match opt.split_once('=') {
                Some((name, value)) => (name, value),
                None => (opt, ""),
            };
            (name == SHADOW_OPTION).then(|| ShadowMode::parse(value))
        })
    }
}
