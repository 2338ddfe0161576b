use crate::error::Result;
use crate::persist::{load_json, save_json, show_all_servers_key, KeyValueStore};
use crate::speculative::Speculative;
use std::sync::Arc;

/// Per-user dashboard preferences backed by the key-value store.
pub struct DashboardPreferences {
    user_id: String,
    show_all: Speculative<bool>,
    store: Arc<dyn KeyValueStore>,
}

impl DashboardPreferences {
    pub fn load(user_id: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        let user_id = user_id.into();
        let show_all = load_json(store.as_ref(), &show_all_servers_key(&user_id)).unwrap_or(false);
        Self {
            user_id,
            show_all: Speculative::new(show_all),
            store,
        }
    }

    pub fn show_all(&self) -> bool {
        *self.show_all.get()
    }

    /// Flip locally, persist, and roll back if the write fails.
    pub fn set_show_all(&mut self, value: bool) -> Result<()> {
        let key = show_all_servers_key(&self.user_id);
        let store = self.store.clone();
        let result = self
            .show_all
            .commit_with(value, |v| save_json(store.as_ref(), &key, v));
        if let Err(e) = &result {
            log::warn!("Failed to save dashboard preference for {}: {}", self.user_id, e);
        }
        result
    }

    pub fn toggle_show_all(&mut self) -> Result<bool> {
        let next = !self.show_all();
        self.set_show_all(next)?;
        Ok(next)
    }
}
