//! Image artifacts and validation

use std::path::Path;
use tracing::error;

use crate::activation::ActivationStatus;
use crate::version::{ImageClass, VersionPurpose};

/// Single-file BMC image
pub const BMC_FULL_IMAGE: &str = "image-bmc";

/// Partition images making up a BMC image when no full image is present
pub const BMC_PARTITION_IMAGES: [&str; 4] =
    ["image-kernel", "image-rofs", "image-rwfs", "image-u-boot"];

/// Host BIOS image
pub const HOST_IMAGE: &str = "image-bios";

/// Auxiliary controller image
pub const AUXILIARY_IMAGE: &str = "image-mcu";

/// Single named artifact required by a class, if it has exactly one
pub fn full_image(class: ImageClass) -> &'static str {
    match class {
        ImageClass::Bmc => BMC_FULL_IMAGE,
        ImageClass::Host => HOST_IMAGE,
        ImageClass::Auxiliary => AUXILIARY_IMAGE,
    }
}

/// Artifacts to stage for a class, given which files exist in the source
///
/// A BMC full image wins over partition images; otherwise every partition
/// image that is present is staged.
pub fn artifacts_to_stage(class: ImageClass, exists: impl Fn(&str) -> bool) -> Vec<&'static str> {
    let full = full_image(class);
    if exists(full) {
        return vec![full];
    }
    match class {
        ImageClass::Bmc => BMC_PARTITION_IMAGES
            .iter()
            .copied()
            .filter(|name| exists(name))
            .collect(),
        ImageClass::Host | ImageClass::Auxiliary => Vec::new(),
    }
}

/// Checks a staged image directory before an activation is created
pub trait ImageValidator: Send {
    /// Report whether `source` holds everything `purpose` needs
    fn validate(&self, source: &Path, purpose: VersionPurpose) -> ActivationStatus;
}

/// Verifies an image signature against the configured keys
pub trait SignatureVerifier: Send {
    /// Return `true` when the image in `image_dir` is correctly signed
    fn verify(&self, image_dir: &Path, key_config: &Path) -> bool;
}

/// Validator that checks artifact presence on the filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageValidator;

impl FileImageValidator {
    fn all_present(source: &Path, names: &[&str]) -> bool {
        names.iter().all(|name| source.join(name).is_file())
    }
}

impl ImageValidator for FileImageValidator {
    fn validate(&self, source: &Path, purpose: VersionPurpose) -> ActivationStatus {
        let Some(class) = purpose.class() else {
            error!(purpose = %purpose, "No validation rule for purpose");
            return ActivationStatus::Invalid;
        };

        let valid = match class {
            ImageClass::Bmc => {
                Self::all_present(source, &[BMC_FULL_IMAGE])
                    || Self::all_present(source, &BMC_PARTITION_IMAGES)
            }
            ImageClass::Host | ImageClass::Auxiliary => {
                Self::all_present(source, &[full_image(class)])
            }
        };

        if valid {
            ActivationStatus::Ready
        } else {
            error!(
                source = %source.display(),
                class = %class,
                "Failed to find the needed images"
            );
            ActivationStatus::Invalid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> std::io::Result<()> {
        fs::write(dir.join(name), b"image")
    }

    #[test]
    fn test_bmc_full_image_is_ready() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        touch(dir.path(), BMC_FULL_IMAGE)?;
        let status = FileImageValidator.validate(dir.path(), VersionPurpose::Bmc);
        assert_eq!(status, ActivationStatus::Ready);
        Ok(())
    }

    #[test]
    fn test_bmc_partitions_need_all_four() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        for name in ["image-kernel", "image-rofs", "image-rwfs"] {
            touch(dir.path(), name)?;
        }
        assert_eq!(
            FileImageValidator.validate(dir.path(), VersionPurpose::System),
            ActivationStatus::Invalid
        );
        touch(dir.path(), "image-u-boot")?;
        assert_eq!(
            FileImageValidator.validate(dir.path(), VersionPurpose::System),
            ActivationStatus::Ready
        );
        Ok(())
    }

    #[test]
    fn test_host_and_auxiliary_need_their_artifact() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        touch(dir.path(), HOST_IMAGE)?;
        assert_eq!(
            FileImageValidator.validate(dir.path(), VersionPurpose::Host),
            ActivationStatus::Ready
        );
        assert_eq!(
            FileImageValidator.validate(dir.path(), VersionPurpose::Auxiliary),
            ActivationStatus::Invalid
        );
        Ok(())
    }

    #[test]
    fn test_unknown_purpose_is_invalid() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        assert_eq!(
            FileImageValidator.validate(dir.path(), VersionPurpose::Unknown),
            ActivationStatus::Invalid
        );
        Ok(())
    }

    #[test]
    fn test_artifacts_to_stage() {
        let only_partitions = |name: &str| name != BMC_FULL_IMAGE && name != "image-rwfs";
        assert_eq!(
            artifacts_to_stage(ImageClass::Bmc, only_partitions),
            vec!["image-kernel", "image-rofs", "image-u-boot"]
        );
        assert_eq!(artifacts_to_stage(ImageClass::Bmc, |_| true), vec![BMC_FULL_IMAGE]);
        assert!(artifacts_to_stage(ImageClass::Host, |_| false).is_empty());
    }
}
