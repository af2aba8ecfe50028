//! Local listing store.
//!
//! Product lists live in the key-value store as JSON arrays, most recent
//! first: one global list kept for older clients and one list per user.
//! Reads never fail (bad data reads as an empty list and is logged);
//! writes propagate store failures to the caller. Array entries that do
//! not decode as products are hidden from reads but written back untouched.
//!
//! There is no cross-key transaction. `publish` updates the user list and
//! then the global list; if the second write fails the first stays.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::kv::{KvStore, StoreError};
use crate::product::{ListingIdentity, Product, ProductDraft};
use crate::session::{self, User, GLOBAL_PRODUCTS_KEY};

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("no user is signed in; log in to manage listings")]
    NotSignedIn,
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("no listing at position {index} (list has {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("no listing with id {0}")]
    UnknownId(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<serde_json::Error> for ListingError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(StoreError::Encode(e))
    }
}

/// Result of `append_if_absent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Added,
    AlreadyPresent,
}

/// Per-list outcome of `publish`
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub product: Product,
    pub user_list: AppendOutcome,
    pub global_list: AppendOutcome,
}

/// What `remove_everywhere` touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub global_changed: bool,
    pub user_lists_changed: usize,
}

/// One element of a stored array
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Entry {
    Listing(Product),
    Opaque(Value),
}

impl Entry {
    fn listing(&self) -> Option<&Product> {
        match self {
            Entry::Listing(p) => Some(p),
            Entry::Opaque(_) => None,
        }
    }

    /// Display-identity match, used when sweeping a listing out of every list
    fn matches(&self, target: &Product) -> bool {
        self.listing()
            .is_some_and(|p| p.identity() == target.identity())
    }
}

pub struct ListingStore<'a> {
    kv: &'a dyn KvStore,
}

impl<'a> ListingStore<'a> {
    pub fn new(kv: &'a dyn KvStore) -> Self {
        Self { kv }
    }

    pub fn read_list(&self, key: &str) -> Vec<Product> {
        self.load_entries(key)
            .into_iter()
            .filter_map(|entry| match entry {
                Entry::Listing(p) => Some(p),
                Entry::Opaque(_) => None,
            })
            .collect()
    }

    fn load_entries(&self, key: &str) -> Vec<Entry> {
        let raw = match self.kv.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key, error = %e, "failed to read product list");
                return Vec::new();
            }
        };

        match decode_entries(&raw) {
            Some(entries) => entries,
            None => {
                warn!(key, "stored product list is malformed; treating as empty");
                Vec::new()
            }
        }
    }

    pub fn write_list(&self, key: &str, list: &[Product]) -> Result<(), ListingError> {
        let raw = serde_json::to_string(list)?;
        self.kv.set(key, &raw)?;
        debug!(key, len = list.len(), "product list saved");
        Ok(())
    }

    fn save_entries(&self, key: &str, entries: &[Entry]) -> Result<(), ListingError> {
        let raw = serde_json::to_string(entries)?;
        self.kv.set(key, &raw)?;
        debug!(key, len = entries.len(), "product list saved");
        Ok(())
    }

    pub fn append_if_absent(
        &self,
        key: &str,
        product: &Product,
    ) -> Result<AppendOutcome, ListingError> {
        let mut entries = self.load_entries(key);
        if entries
            .iter()
            .filter_map(Entry::listing)
            .any(|p| p.same_listing(product))
        {
            debug!(key, name = %product.name, "listing already present");
            return Ok(AppendOutcome::AlreadyPresent);
        }
        entries.insert(0, Entry::Listing(product.clone()));
        self.save_entries(key, &entries)?;
        Ok(AppendOutcome::Added)
    }

    /// Remove the `index`-th readable listing, as numbered by `read_list`.
    pub fn remove_at(&self, key: &str, index: usize) -> Result<Product, ListingError> {
        let mut entries = self.load_entries(key);
        let found = entries
            .iter()
            .enumerate()
            .filter_map(|(at, e)| e.listing().map(|p| (at, p.clone())))
            .nth(index);
        let Some((at, removed)) = found else {
            return Err(ListingError::IndexOutOfRange {
                index,
                len: entries.iter().filter_map(Entry::listing).count(),
            });
        };
        entries.remove(at);
        self.save_entries(key, &entries)?;
        Ok(removed)
    }

    /// Remove by the id assigned at creation. Stable under concurrent
    /// edits, unlike `remove_at`.
    pub fn remove_by_id(&self, key: &str, id: Uuid) -> Result<Product, ListingError> {
        let list = self.read_list(key);
        let index = list
            .iter()
            .position(|p| p.id == Some(id))
            .ok_or(ListingError::UnknownId(id))?;
        self.remove_at(key, index)
    }

    pub fn clear(&self, key: &str) -> Result<(), ListingError> {
        self.kv.remove(key)?;
        Ok(())
    }

    pub fn count(&self, key: &str) -> usize {
        self.read_list(key).len()
    }

    pub fn global_list(&self) -> Vec<Product> {
        self.read_list(GLOBAL_PRODUCTS_KEY)
    }

    /// The home listing: the user's own entries on top, then the global list.
    pub fn display_list(&self, user: Option<&User>) -> Vec<Product> {
        let user_list = user
            .map(|u| self.read_list(&u.products_key()))
            .unwrap_or_default();
        merge_for_display(&self.global_list(), &user_list)
    }

    /// Store a new listing under the user's list and the global list.
    pub fn publish(
        &self,
        user: Option<&User>,
        draft: ProductDraft,
    ) -> Result<PublishReport, ListingError> {
        let user = user.ok_or(ListingError::NotSignedIn)?;
        let missing = draft.missing_fields();
        if !missing.is_empty() {
            return Err(ListingError::MissingFields(missing));
        }

        let product = draft.into_product();
        let user_list = self.append_if_absent(&user.products_key(), &product)?;
        let global_list = self.append_if_absent(GLOBAL_PRODUCTS_KEY, &product)?;

        debug!(
            name = %product.name,
            user = %user.email,
            ?user_list,
            ?global_list,
            "listing published"
        );

        Ok(PublishReport {
            product,
            user_list,
            global_list,
        })
    }

    /// Drop every record matching `target` from the global list and from
    /// all per-user lists. Emptied per-user lists are deleted; unreadable
    /// lists are skipped.
    pub fn remove_everywhere(&self, target: &Product) -> Result<SweepReport, ListingError> {
        let mut report = SweepReport::default();

        let mut global = self.load_entries(GLOBAL_PRODUCTS_KEY);
        let before = global.len();
        global.retain(|e| !e.matches(target));
        if global.len() != before {
            self.save_entries(GLOBAL_PRODUCTS_KEY, &global)?;
            report.global_changed = true;
        }

        let keys = self.kv.list_keys()?;
        for key in keys.iter().filter(|k| session::is_user_products_key(k)) {
            let Some(raw) = self.kv.get(key)? else {
                continue;
            };
            let Some(mut entries) = decode_entries(&raw) else {
                warn!(key = %key, "skipping malformed product list");
                continue;
            };

            let before = entries.len();
            entries.retain(|e| !e.matches(target));
            if entries.len() == before {
                continue;
            }
            report.user_lists_changed += 1;
            if entries.is_empty() {
                self.kv.remove(key)?;
            } else {
                self.save_entries(key, &entries)?;
            }
        }

        Ok(report)
    }
}

/// Decode a stored list. `None` if the text is not a JSON array; array
/// entries that are not products are kept as raw JSON.
fn decode_entries(raw: &str) -> Option<Vec<Entry>> {
    let Value::Array(items) = serde_json::from_str::<Value>(raw).ok()? else {
        return None;
    };
    let entries = items
        .into_iter()
        .map(|item| match Product::deserialize(&item) {
            Ok(p) => Entry::Listing(p),
            Err(e) => {
                warn!(error = %e, "unreadable listing entry");
                Entry::Opaque(item)
            }
        })
        .collect();
    Some(entries)
}

/// User entries first (stored order), then global entries; the first
/// occurrence of each identity wins.
pub fn merge_for_display(global: &[Product], user: &[Product]) -> Vec<Product> {
    let mut seen: std::collections::HashSet<ListingIdentity<'_>> =
        std::collections::HashSet::new();
    let mut merged = Vec::with_capacity(user.len() + global.len());
    for p in user.iter().chain(global.iter()) {
        if seen.insert(p.identity()) {
            merged.push(p.clone());
        }
    }
    merged
}

/// Case-insensitive substring match on the listing name.
pub fn search<'p>(list: &'p [Product], query: &str) -> Vec<&'p Product> {
    let query = query.trim().to_lowercase();
    list.iter()
        .filter(|p| query.is_empty() || p.name.to_lowercase().contains(&query))
        .collect()
}
