//! Process-wide channel registry.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::Channel;
use crate::error::{FabricError, Result};

static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Channel>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Arc<Channel>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Process-wide mapping from channel name to channel instance.
///
/// Entries are added at channel construction and never removed during
/// normal operation; [`ChannelRegistry::reset`] exists only for deterministic
/// test teardown.
pub struct ChannelRegistry;

impl ChannelRegistry {
    /// Register `channel` under its name. Fails if the name is already taken.
    pub fn register(channel: Arc<Channel>) -> Result<()> {
        let mut map = registry().lock();
        if map.contains_key(channel.name()) {
            return Err(FabricError::Config(format!(
                "channel {:?} is already registered",
                channel.name()
            )));
        }
        map.insert(channel.name().to_string(), channel);
        Ok(())
    }

    /// Look up a previously registered channel by name.
    pub fn get(name: &str) -> Option<Arc<Channel>> {
        registry().lock().get(name).cloned()
    }

    /// Clear all registered channels. Test-only: production code never
    /// removes a live channel.
    pub fn reset() {
        registry().lock().clear();
    }
}
