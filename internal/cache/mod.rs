use crate::meta::models::Account;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(60);
const DEFAULT_CAPACITY: usize = 1000;

/// Bounded account-by-id cache for the log-export path. Per-process only;
/// entries are dropped on TTL expiry and invalidated by the owning process
/// on every account update or delete.
#[derive(Clone)]
pub struct AccountCache {
    entries: Arc<DashMap<String, CachedAccount>>,
    ttl: Duration,
    capacity: usize,
}

struct CachedAccount {
    account: Account,
    inserted_at: Instant,
}

impl Default for AccountCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_TTL, DEFAULT_CAPACITY)
    }

    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            capacity,
        }
    }

    pub fn get(&self, id: &str) -> Option<Account> {
        let expired = match self.entries.get(id) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                return Some(entry.account.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(id);
        }
        None
    }

    pub fn put(&self, account: Account) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&account.id) {
            self.evict_oldest();
        }
        self.entries.insert(
            account.id.clone(),
            CachedAccount {
                account,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, id: &str) {
        self.entries.remove(id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.inserted_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
