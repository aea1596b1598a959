use crate::domain::models::DayDetails;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::{load_typed, save_typed, KeyValueStore};
use crate::infrastructure::local_store::ALL_DAY_DETAILS_KEY;
use crate::infrastructure::record_store::DayDetailsStore;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Calories and comment per day. Reads prefer the store and fall back to
/// the local mirror; writes go to the store first, then the mirror.
pub struct DayDetailsService<D, K>
where
    D: DayDetailsStore + ?Sized,
    K: KeyValueStore + ?Sized,
{
    store: Arc<D>,
    cache: Arc<K>,
}

impl<D, K> DayDetailsService<D, K>
where
    D: DayDetailsStore + ?Sized,
    K: KeyValueStore + ?Sized,
{
    pub fn new(store: Arc<D>, cache: Arc<K>) -> Self {
        Self { store, cache }
    }

    fn cached(&self) -> Result<BTreeMap<NaiveDate, DayDetails>, InfraError> {
        Ok(load_typed(self.cache.as_ref(), ALL_DAY_DETAILS_KEY)?.unwrap_or_default())
    }

    fn mirror(&self, details: &DayDetails) -> Result<(), InfraError> {
        let mut all = self.cached()?;
        all.insert(details.date, details.clone());
        save_typed(self.cache.as_ref(), ALL_DAY_DETAILS_KEY, &all)
    }

    pub async fn get(&self, date: NaiveDate) -> Result<DayDetails, InfraError> {
        match self.store.get(date).await {
            Ok(Some(details)) => {
                if let Err(error) = self.mirror(&details) {
                    tracing::warn!(error = %error, %date, "failed to mirror day details");
                }
                Ok(details)
            }
            Ok(None) => Ok(DayDetails::empty(date)),
            Err(error) => {
                tracing::warn!(error = %error, %date, "day details store unavailable; using cache");
                Ok(self
                    .cached()?
                    .remove(&date)
                    .unwrap_or_else(|| DayDetails::empty(date)))
            }
        }
    }

    pub async fn save(&self, mut details: DayDetails) -> Result<DayDetails, InfraError> {
        details.comment = details.comment.trim().to_string();
        let saved = self.store.upsert(&details).await?;
        self.mirror(&saved)?;
        Ok(saved)
    }
}
