use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use soulbrowser_event_bus::BusConfig;

/// Runtime knobs for one event log.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    pub stream: StreamCfg,
    pub journal: JournalCfg,
}

/// Subscriber fan-out settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamCfg {
    pub capacity: usize,
    pub grace_ms: u64,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            capacity: 256,
            grace_ms: 50,
        }
    }
}

impl StreamCfg {
    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            capacity: self.capacity,
            grace: Duration::from_millis(self.grace_ms),
        }
    }
}

/// Optional JSON-lines journal; one file per conversation under `root`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalCfg {
    pub enabled: bool,
    pub root: PathBuf,
}

impl Default for JournalCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            root: PathBuf::from("./generated/events"),
        }
    }
}

impl JournalCfg {
    pub fn path_for(&self, conversation: &str) -> PathBuf {
        let file: String = conversation
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{file}.jsonl"))
    }
}
