use {
    crate::{
        DateTimeUtc, SealedPaste, VisitorRecord,
        code::PasteCode,
        encoding,
        error::StoreError,
        store::{InsertOutcome, Store},
    },
    std::{path::Path, time::Duration},
    tokio::task,
    tracing::warn,
};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Sled-backed [`Store`]: a `pastes` tree keyed by code and a `visitors`
/// tree keyed by remote address, bincode values in both.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
    pastes: sled::Tree,
    visitors: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path).map_err(StoreError::new)?)
    }

    /// Ephemeral database, deleted when dropped. For tests.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(StoreError::new)?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let pastes = db.open_tree("pastes").map_err(StoreError::new)?;
        let visitors = db.open_tree("visitors").map_err(StoreError::new)?;
        Ok(Self {
            db,
            pastes,
            visitors,
        })
    }

    // Sled calls block, so every operation runs on the blocking pool. This
    // also keeps the caller's timeout effective.
    async fn blocking<T, F>(task_fn: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    {
        task::spawn_blocking(task_fn)
            .await
            .map_err(StoreError::new)?
    }

    /// Removes pastes and visitor records whose expiry has passed. Records
    /// that no longer decode are removed as well, with a warning.
    pub async fn evict_expired(&self, now: DateTimeUtc) -> Result<usize, StoreError> {
        let pastes = self.pastes.clone();
        let visitors = self.visitors.clone();
        Self::blocking(move || {
            let swept_pastes = sweep_tree(&pastes, now, |bytes| {
                encoding::deserialize::<SealedPaste>(bytes).map(|paste| paste.expire_date)
            })?;
            let swept_visitors = sweep_tree(&visitors, now, |bytes| {
                encoding::deserialize::<VisitorRecord>(bytes).map(|visitor| visitor.expire_date)
            })?;
            Ok(swept_pastes.saturating_add(swept_visitors))
        })
        .await
    }

    pub async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_async().await.map_err(StoreError::new)?;
        Ok(())
    }
}

impl Store for SledStore {
    async fn find_paste(&self, code: &PasteCode) -> Result<Option<SealedPaste>, StoreError> {
        let pastes = self.pastes.clone();
        let key = code.as_str().to_owned();
        Self::blocking(move || {
            let Some(bytes) = pastes.get(key.as_bytes()).map_err(StoreError::new)? else {
                return Ok(None);
            };
            encoding::deserialize(&bytes)
                .map(Some)
                .map_err(StoreError::new)
        })
        .await
    }

    async fn insert_paste(&self, paste: &SealedPaste) -> Result<InsertOutcome, StoreError> {
        let pastes = self.pastes.clone();
        let key = paste.code.as_str().to_owned();
        let value = encoding::serialize(paste).map_err(StoreError::new)?;
        Self::blocking(move || {
            let swap = pastes
                .compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(value))
                .map_err(StoreError::new)?;
            Ok(match swap {
                Ok(()) => InsertOutcome::Inserted,
                Err(_existing) => InsertOutcome::Conflict,
            })
        })
        .await
    }

    async fn find_visitor(&self, remote_addr: &str) -> Result<Option<VisitorRecord>, StoreError> {
        let visitors = self.visitors.clone();
        let key = remote_addr.to_owned();
        Self::blocking(move || {
            let Some(bytes) = visitors.get(key.as_bytes()).map_err(StoreError::new)? else {
                return Ok(None);
            };
            encoding::deserialize(&bytes)
                .map(Some)
                .map_err(StoreError::new)
        })
        .await
    }

    async fn upsert_visitor(&self, visitor: &VisitorRecord) -> Result<(), StoreError> {
        let visitors = self.visitors.clone();
        let key = visitor.remote_addr.clone();
        let value = encoding::serialize(visitor).map_err(StoreError::new)?;
        Self::blocking(move || {
            visitors
                .insert(key.as_bytes(), value)
                .map_err(StoreError::new)?;
            Ok(())
        })
        .await
    }
}

fn sweep_tree(
    tree: &sled::Tree,
    now: DateTimeUtc,
    expire_date: impl Fn(&[u8]) -> Result<DateTimeUtc, bincode::error::DecodeError>,
) -> Result<usize, StoreError> {
    let mut removed: usize = 0;
    for entry in tree.iter() {
        let (key, value) = entry.map_err(StoreError::new)?;
        let expired = match expire_date(&value) {
            Ok(date) => date < now,
            Err(err) => {
                warn!(?err, tree = ?tree.name(), "removing undecodable record");
                true
            }
        };
        if expired {
            tree.remove(&key).map_err(StoreError::new)?;
            removed = removed.saturating_add(1);
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::KeyId,
        chrono::{TimeDelta, TimeZone, Utc},
        std::str::FromStr,
    };

    fn base() -> DateTimeUtc {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn paste(code: &str, expire_date: DateTimeUtc) -> SealedPaste {
        SealedPaste {
            code: PasteCode::from_str(code).unwrap(),
            key_id: KeyId(7),
            ciphertext: b"opaque".to_vec(),
            expire_date,
        }
    }

    fn visitor(remote_addr: &str, expire_date: DateTimeUtc) -> VisitorRecord {
        VisitorRecord {
            remote_addr: remote_addr.to_owned(),
            banned: false,
            last_access: base(),
            expire_date,
        }
    }

    #[tokio::test]
    async fn insert_refuses_duplicate_codes() {
        let store = SledStore::temporary().unwrap();
        let first = paste("abc123", base());
        assert_eq!(
            store.insert_paste(&first).await.unwrap(),
            InsertOutcome::Inserted
        );
        let second = paste("abc123", base());
        assert_eq!(
            store.insert_paste(&second).await.unwrap(),
            InsertOutcome::Conflict
        );
        let found = store.find_paste(&first.code).await.unwrap().unwrap();
        assert_eq!(found.ciphertext, first.ciphertext);
    }

    #[tokio::test]
    async fn find_paste_misses_unknown_codes() {
        let store = SledStore::temporary().unwrap();
        let code = PasteCode::from_str("zzzzzz").unwrap();
        assert!(store.find_paste(&code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_visitor_replaces() {
        let store = SledStore::temporary().unwrap();
        let mut record = visitor("198.51.100.7", base());
        store.upsert_visitor(&record).await.unwrap();
        record.banned = true;
        store.upsert_visitor(&record).await.unwrap();
        let found = store.find_visitor("198.51.100.7").await.unwrap().unwrap();
        assert!(found.banned);
        assert!(store.find_visitor("198.51.100.8").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn evict_expired_sweeps_both_trees() {
        let store = SledStore::temporary().unwrap();
        let now = base();
        let stale = now.checked_sub_signed(TimeDelta::minutes(1)).unwrap();
        let fresh = now.checked_add_signed(TimeDelta::minutes(1)).unwrap();
        store.insert_paste(&paste("abc123", stale)).await.unwrap();
        store.insert_paste(&paste("def456", fresh)).await.unwrap();
        store
            .upsert_visitor(&visitor("198.51.100.7", stale))
            .await
            .unwrap();
        store
            .upsert_visitor(&visitor("198.51.100.8", fresh))
            .await
            .unwrap();

        assert_eq!(store.evict_expired(now).await.unwrap(), 2);
        let gone = PasteCode::from_str("abc123").unwrap();
        assert!(store.find_paste(&gone).await.unwrap().is_none());
        let kept = PasteCode::from_str("def456").unwrap();
        assert!(store.find_paste(&kept).await.unwrap().is_some());
        assert!(store.find_visitor("198.51.100.7").await.unwrap().is_none());
        assert!(store.find_visitor("198.51.100.8").await.unwrap().is_some());
    }
}
