//! Inventory anchor lookup

use std::collections::BTreeMap;

use crate::config::UpdaterConfig;
use crate::error::{UpdaterError, UpdaterResult};
use crate::version::ImageClass;

/// Finds the inventory object a class of versions is attached to
pub trait InventoryLookup: Send {
    /// Inventory object path for `class`
    fn anchor(&self, class: ImageClass) -> UpdaterResult<String>;
}

/// Lookup answering from a fixed table
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    anchors: BTreeMap<ImageClass, String>,
}

impl StaticInventory {
    /// Build the table from the configured per-class anchors
    pub fn from_config(config: &UpdaterConfig) -> Self {
        let anchors = ImageClass::ALL
            .iter()
            .map(|class| (*class, config.class(*class).inventory_anchor.clone()))
            .filter(|(_, anchor)| !anchor.is_empty())
            .collect();
        Self { anchors }
    }

    /// Set or replace the anchor of a class
    pub fn with_anchor(mut self, class: ImageClass, anchor: impl Into<String>) -> Self {
        self.anchors.insert(class, anchor.into());
        self
    }
}

impl InventoryLookup for StaticInventory {
    fn anchor(&self, class: ImageClass) -> UpdaterResult<String> {
        self.anchors
            .get(&class)
            .cloned()
            .ok_or_else(|| UpdaterError::InventoryLookupFailed(format!("no {class} inventory item")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_inventory_from_config() -> UpdaterResult<()> {
        let mut config = UpdaterConfig::default();
        config.auxiliary.inventory_anchor.clear();
        let inventory = StaticInventory::from_config(&config);

        assert_eq!(inventory.anchor(ImageClass::Host)?, config.host.inventory_anchor);
        assert!(matches!(
            inventory.anchor(ImageClass::Auxiliary),
            Err(UpdaterError::InventoryLookupFailed(_))
        ));

        let inventory = inventory.with_anchor(ImageClass::Auxiliary, "/inventory/mcu0");
        assert_eq!(inventory.anchor(ImageClass::Auxiliary)?, "/inventory/mcu0");
        Ok(())
    }
}
