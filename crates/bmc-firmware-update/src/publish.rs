//! Object-model publication

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::association::Association;
use crate::version::{Version, VersionId};

/// Everything published for one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionObject {
    /// Version attributes
    pub version: Version,
    /// Activation attributes
    pub activation: Activation,
    /// Whether this is the running version of its class
    pub functional: bool,
}

/// Exposes versions, activations and the association list to other processes
pub trait ObjectPublisher: Send {
    /// Replace the published association list as a whole
    fn publish_associations(&mut self, associations: &[Association]);

    /// Publish or refresh one version object
    fn publish_object(&mut self, object: &VersionObject);

    /// Withdraw a version object
    fn withdraw_object(&mut self, id: &VersionId);
}
