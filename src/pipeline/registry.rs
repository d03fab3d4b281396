// src/pipeline/registry.rs

//! Subscriber registry.
//!
//! Maps each region to its ordered list of subscribers. The registry is
//! shared between the dispatcher, which mutates it, and the fetch loop, which
//! reads the active regions, so every operation takes an internal lock for
//! the duration of the map operation only.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{AppError, Result};
use crate::models::{ChatId, Region, Subscriber, UserId};

/// Persisted shape of the registry: region → subscribers in insertion order.
pub type RegistrySnapshot = BTreeMap<Region, Vec<Subscriber>>;

/// Region → ordered, user-unique subscriber lists.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    entries: Mutex<RegistrySnapshot>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a registry from persisted state.
    ///
    /// Duplicate user entries within a region keep the first occurrence.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let entries = snapshot
            .into_iter()
            .map(|(region, subscribers)| {
                let mut unique: Vec<Subscriber> = Vec::with_capacity(subscribers.len());
                for subscriber in subscribers {
                    if unique.iter().any(|s| s.user_id == subscriber.user_id) {
                        log::warn!(
                            "Dropping duplicate subscription of user {} to {}",
                            subscriber.user_id,
                            region
                        );
                        continue;
                    }
                    unique.push(subscriber);
                }
                (region, unique)
            })
            .collect();

        Self {
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistrySnapshot> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a subscriber to a region.
    ///
    /// Fails with [`AppError::AlreadySubscribed`] if the user is already on
    /// the region's list; the existing entry is left untouched.
    pub fn register(&self, user_id: UserId, chat_id: ChatId, region: &Region) -> Result<()> {
        let mut entries = self.lock();
        let subscribers = entries.entry(region.clone()).or_default();

        if subscribers.iter().any(|s| s.user_id == user_id) {
            return Err(AppError::AlreadySubscribed {
                user_id,
                region: region.to_string(),
            });
        }
        subscribers.push(Subscriber::new(user_id, chat_id));
        Ok(())
    }

    /// Remove a user from every region.
    ///
    /// Returns the number of regions the user was removed from. The order
    /// of the remaining subscribers is preserved.
    pub fn unregister(&self, user_id: UserId) -> usize {
        let mut entries = self.lock();
        let mut removed = 0;

        for subscribers in entries.values_mut() {
            if let Some(pos) = subscribers.iter().position(|s| s.user_id == user_id) {
                subscribers.remove(pos);
                removed += 1;
            }
        }
        removed
    }

    /// Subscribers of a region in registration order.
    pub fn subscribers(&self, region: &Region) -> Vec<Subscriber> {
        self.lock().get(region).cloned().unwrap_or_default()
    }

    /// Regions with at least one subscriber, ascending.
    pub fn active_regions(&self) -> Vec<Region> {
        self.lock()
            .iter()
            .filter(|(_, subscribers)| !subscribers.is_empty())
            .map(|(region, _)| region.clone())
            .collect()
    }

    /// Total number of subscriptions across all regions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Copy of the current state without empty regions.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.lock()
            .iter()
            .filter(|(_, subscribers)| !subscribers.is_empty())
            .map(|(region, subscribers)| (region.clone(), subscribers.clone()))
            .collect()
    }
}
