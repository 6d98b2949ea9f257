use std::collections::HashMap;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalSubreddit;

pub const FAVORITES_KEY: &str = "favoriteSubreddits";

/// Opaque string key-value store the favorites list is kept in.
pub trait FavoritesStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteSubreddit {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribers: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&CanonicalSubreddit> for FavoriteSubreddit {
    fn from(sub: &CanonicalSubreddit) -> Self {
        Self {
            id: sub.id.clone(),
            name: sub.name.clone(),
            subscribers: Some(sub.subscribers),
            description: Some(sub.description.clone()).filter(|d| !d.is_empty()),
        }
    }
}

/// Favorites list backed by a [`FavoritesStore`]. Entries are unique by id
/// and kept in the order they were added.
pub struct Favorites<S> {
    store: S,
}

impl<S: FavoritesStore> Favorites<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Result<Vec<FavoriteSubreddit>> {
        match self.store.get(FAVORITES_KEY)? {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(&raw).context("favorites: decode stored list")
            }
            _ => Ok(Vec::new()),
        }
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|fav| fav.id == id))
    }

    /// Returns `false` when the id was already present.
    pub fn add(&self, favorite: FavoriteSubreddit) -> Result<bool> {
        let mut list = self.list()?;
        if list.iter().any(|fav| fav.id == favorite.id) {
            return Ok(false);
        }
        list.push(favorite);
        self.save(&list)?;
        Ok(true)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut list = self.list()?;
        let before = list.len();
        list.retain(|fav| fav.id != id);
        if list.len() == before {
            return Ok(false);
        }
        self.save(&list)?;
        Ok(true)
    }

    /// Adds or removes `favorite`; returns whether it is a favorite afterwards.
    pub fn toggle(&self, favorite: FavoriteSubreddit) -> Result<bool> {
        if self.contains(&favorite.id)? {
            self.remove(&favorite.id)?;
            Ok(false)
        } else {
            self.add(favorite)?;
            Ok(true)
        }
    }

    fn save(&self, list: &[FavoriteSubreddit]) -> Result<()> {
        let raw = serde_json::to_string(list).context("favorites: encode list")?;
        self.store
            .set(FAVORITES_KEY, &raw)
            .context("favorites: write list")
    }
}

#[derive(Debug, Default)]
pub struct MemoryFavorites {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryFavorites {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FavoritesStore for MemoryFavorites {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl<T: FavoritesStore + ?Sized> FavoritesStore for &T {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }
}
