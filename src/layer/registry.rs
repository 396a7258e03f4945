use std::collections::HashMap;

use parking_lot::Mutex;

use crate::layer::runtime::Unload;
use crate::model::layer::LayerId;

/// Unload handles of the layers currently running in this process.
///
/// Starts empty and lives as long as its loader; nothing survives a process
/// restart, which is also the only way to drop code that offered no handle.
#[derive(Default)]
pub struct LayerRegistry {
    handles: Mutex<HashMap<LayerId, Box<dyn Unload>>>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` for `layer`, returning any handle it replaces.
    pub fn register(&self, layer: LayerId, handle: Box<dyn Unload>) -> Option<Box<dyn Unload>> {
        self.handles.lock().insert(layer, handle)
    }

    pub fn take(&self, layer: LayerId) -> Option<Box<dyn Unload>> {
        self.handles.lock().remove(&layer)
    }

    pub fn loaded(&self) -> Vec<LayerId> {
        let mut layers: Vec<LayerId> = self.handles.lock().keys().copied().collect();
        layers.sort();
        layers
    }
}
