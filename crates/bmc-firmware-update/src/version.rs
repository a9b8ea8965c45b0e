//! Version identity, purpose and release-file parsing
//!
//! A [`Version`] is the immutable description of one firmware image known to
//! the updater. Its [`VersionId`] is derived from the version string so the
//! same image always lands on the same object path.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;
use std::path::{Path, PathBuf};

/// Fully qualified prefix accepted for purpose names in intake notifications
pub const PURPOSE_PREFIX: &str = "xyz.openbmc_project.Software.Version.VersionPurpose.";

/// Number of hex characters kept from the version hash
const VERSION_ID_LEN: usize = 8;

/// Stable identifier of a version, used as the object-path leaf
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    /// Derive the id from a version string (first 8 hex chars of its SHA-512)
    pub fn from_version(version: &str) -> Self {
        let digest = Sha512::digest(version.as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(VERSION_ID_LEN);
        Self(id)
    }

    /// Wrap an id that is already known, e.g. a mount directory suffix
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Firmware role a version belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VersionPurpose {
    /// Management controller image
    #[serde(rename = "BMC")]
    Bmc,
    /// Host boot firmware
    Host,
    /// Auxiliary microcontroller firmware
    Auxiliary,
    /// Whole-system image, handled like a BMC image
    System,
    /// Purpose could not be determined
    Unknown,
}

impl VersionPurpose {
    /// Parse a purpose from its bare or fully qualified name
    ///
    /// `MCU` is accepted as an alias for [`VersionPurpose::Auxiliary`].
    pub fn parse(name: &str) -> Option<Self> {
        let bare = name.strip_prefix(PURPOSE_PREFIX).unwrap_or(name);
        match bare {
            "BMC" => Some(Self::Bmc),
            "Host" => Some(Self::Host),
            "Auxiliary" | "MCU" => Some(Self::Auxiliary),
            "System" => Some(Self::System),
            "Unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Image class that handles versions of this purpose
    pub fn class(self) -> Option<ImageClass> {
        match self {
            Self::Bmc | Self::System => Some(ImageClass::Bmc),
            Self::Host => Some(ImageClass::Host),
            Self::Auxiliary => Some(ImageClass::Auxiliary),
            Self::Unknown => None,
        }
    }

    /// Fully qualified name as published on the object model
    pub fn qualified_name(self) -> String {
        format!("{PURPOSE_PREFIX}{self}")
    }
}

impl fmt::Display for VersionPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bmc => "BMC",
            Self::Host => "Host",
            Self::Auxiliary => "Auxiliary",
            Self::System => "System",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Class of image, selecting the write path and residency cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageClass {
    /// Management controller (static flash layout, applied at reboot)
    Bmc,
    /// Host BIOS, written by a service unit
    Host,
    /// Auxiliary microcontroller, written by a service unit
    Auxiliary,
}

impl ImageClass {
    /// All classes, in discovery order
    pub const ALL: [ImageClass; 3] = [ImageClass::Bmc, ImageClass::Host, ImageClass::Auxiliary];

    /// Whether the class holds several resident copies and boots by priority
    pub fn is_redundant(self) -> bool {
        matches!(self, ImageClass::Bmc)
    }

    /// Whether completing a write makes the version the running one
    ///
    /// Host and auxiliary images run as soon as they are written, BMC images
    /// only after a reboot.
    pub fn functional_on_write(self) -> bool {
        !self.is_redundant()
    }
}

impl fmt::Display for ImageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageClass::Bmc => "bmc",
            ImageClass::Host => "host",
            ImageClass::Auxiliary => "auxiliary",
        };
        f.write_str(name)
    }
}

/// One firmware image version known to the updater
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Primary key
    pub id: VersionId,
    /// Version string the id was derived from
    pub version: String,
    /// Firmware role
    pub purpose: VersionPurpose,
    /// Published object path
    pub path: String,
    /// Staged upload directory; empty once consumed
    pub source_path: PathBuf,
}

impl Version {
    /// Create a version rooted under the given software object root
    pub fn new(
        version: impl Into<String>,
        purpose: VersionPurpose,
        software_root: &str,
        source_path: impl Into<PathBuf>,
    ) -> Self {
        let version = version.into();
        let id = VersionId::from_version(&version);
        let path = object_path(software_root, &id);
        Self {
            id,
            version,
            purpose,
            path,
            source_path: source_path.into(),
        }
    }

    /// Whether the staged upload directory has been retired
    pub fn source_consumed(&self) -> bool {
        self.source_path.as_os_str().is_empty()
    }
}

/// Intake notification announcing a newly unpacked image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageNotification {
    /// Purpose name, bare or fully qualified
    pub purpose: String,
    /// Version string
    pub version: String,
    /// Directory the image was unpacked into
    pub file_path: PathBuf,
}

impl ImageNotification {
    /// Purpose of a well-formed notification
    ///
    /// Returns `None` when the version or path is empty or the purpose is
    /// unknown or unrecognised.
    pub fn accepted_purpose(&self) -> Option<VersionPurpose> {
        if self.version.is_empty() || self.file_path.as_os_str().is_empty() {
            return None;
        }
        VersionPurpose::parse(&self.purpose).filter(|p| p.class().is_some())
    }
}

/// Object path of a version under the software root
pub fn object_path(software_root: &str, id: &VersionId) -> String {
    format!("{}/{}", software_root.trim_end_matches('/'), id)
}

/// Extract `VERSION_ID` from release-file contents, stripping quotes
pub fn parse_release_version(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let value = line.trim().strip_prefix("VERSION_ID=")?;
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    })
}

/// Read a release file and return its version, if any
pub fn read_release_version(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_release_version(&contents),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Release file not readable");
            None
        }
    }
}
