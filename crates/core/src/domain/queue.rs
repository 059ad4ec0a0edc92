// Queue Domain Model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Queue identifier, e.g. "rpi4-generic"
pub type QueueId = String;

/// A named queue agents subscribe to. Queues are created implicitly the
/// first time an agent advertises them; `description` and `images` are
/// optional operator-supplied metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Queue {
    pub name: QueueId,
    pub description: Option<String>,
    /// image name -> provisioning data blob, advertised by agents servicing
    /// this queue (GET/POST `/agents/images/{queue}`).
    pub images: HashMap<String, serde_json::Value>,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            images: HashMap::new(),
        }
    }
}
