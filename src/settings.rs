use crate::scale::ScaleUnit;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Display settings shared by every dashboard view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub scale: Option<ScaleUnit>,
    #[serde(default)]
    pub show_db_stats: bool,
}

/// Observable settings. Holds `None` until settings have been loaded, so a
/// subscriber can tell "not loaded yet" from "feature disabled".
#[derive(Debug, Clone)]
pub struct SettingsStore {
    tx: Arc<watch::Sender<Option<Settings>>>,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, settings: Settings) {
        self.tx.send_replace(Some(settings));
    }

    pub fn current(&self) -> Option<Settings> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Settings>> {
        self.tx.subscribe()
    }
}
