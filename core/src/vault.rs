use {
    crate::{
        DateTimeUtc, PlaintextPaste, SealedPaste,
        code::PasteCode,
        encoding,
        error::{Error, Result},
        keyring::KeyRing,
        store::{self, InsertOutcome, Store},
    },
    chrono::TimeDelta,
    std::sync::Arc,
    tracing::warn,
    zeroize::Zeroizing,
};

pub const MAX_TTL_SECONDS: u32 = 86_400;

const CODE_INSERT_ATTEMPTS: usize = 10;

/// Encrypts pastes into the store and decrypts them back out. Everything
/// at rest is ciphertext; the keys live only in the [`KeyRing`].
#[derive(Debug)]
pub struct PasteVault<S> {
    store: S,
    keyring: Arc<KeyRing>,
}

impl<S: Store> PasteVault<S> {
    #[inline]
    pub fn new(store: S, keyring: Arc<KeyRing>) -> Self {
        Self { store, keyring }
    }

    /// Encrypts `paste` and stores it under a fresh random code, readable
    /// for `ttl_seconds` from `now`.
    pub async fn seal(
        &self,
        paste: &PlaintextPaste,
        ttl_seconds: u32,
        now: DateTimeUtc,
    ) -> Result<PasteCode> {
        if ttl_seconds > MAX_TTL_SECONDS {
            return Err(Error::InvalidExpiry {
                requested: ttl_seconds,
            });
        }
        if paste.is_empty() {
            return Err(Error::EmptySubmission);
        }
        let expire_date = now
            .checked_add_signed(TimeDelta::seconds(i64::from(ttl_seconds)))
            .unwrap_or(DateTimeUtc::MAX_UTC);
        let (key_id, cipher) = self.keyring.find_or_create(expire_date)?;
        let encoded = Zeroizing::new(encoding::serialize(paste).map_err(Error::Encoding)?);
        let ciphertext = cipher.seal(&encoded)?;
        drop(encoded);

        let mut sealed = SealedPaste {
            code: PasteCode::generate()?,
            key_id,
            ciphertext,
            expire_date,
        };
        for attempt in 0..CODE_INSERT_ATTEMPTS {
            if attempt > 0 {
                sealed.code = PasteCode::generate()?;
            }
            match store::bounded(self.store.insert_paste(&sealed)).await? {
                InsertOutcome::Inserted => return Ok(sealed.code.clone()),
                InsertOutcome::Conflict => {}
            }
        }
        Err(Error::CodeSpaceExhausted)
    }

    /// Looks up and decrypts a paste. Missing, expired, key-less, and
    /// tampered records all come back as [`Error::NotFound`], so a reader
    /// cannot tell them apart.
    pub async fn open(&self, code: &PasteCode, now: DateTimeUtc) -> Result<PlaintextPaste> {
        let Some(sealed) = store::bounded(self.store.find_paste(code)).await? else {
            return Err(Error::NotFound);
        };
        if now > sealed.expire_date {
            return Err(Error::NotFound);
        }
        let Some(cipher) = self.keyring.lookup(sealed.key_id) else {
            return Err(Error::NotFound);
        };
        let Ok(encoded) = cipher.open(&sealed.ciphertext).map(Zeroizing::new) else {
            warn!(code = %code, "stored paste failed authentication");
            return Err(Error::NotFound);
        };
        match encoding::deserialize(&encoded) {
            Ok(paste) => Ok(paste),
            Err(_err) => {
                warn!(code = %code, "sealed paste no longer decodes");
                Err(Error::NotFound)
            }
        }
    }
}

#[cfg(test)]
#[expect(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "test"
)]
mod tests {
    use {
        super::*,
        crate::{Attachment, db::SledStore, error::StoreError},
        chrono::{TimeZone, Utc},
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    fn base() -> DateTimeUtc {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn shifted(seconds: i64) -> DateTimeUtc {
        base()
            .checked_add_signed(TimeDelta::seconds(seconds))
            .unwrap()
    }

    fn text_paste(text: &str) -> PlaintextPaste {
        PlaintextPaste {
            text: text.to_owned(),
            attachment: None,
        }
    }

    fn vault() -> PasteVault<SledStore> {
        PasteVault::new(SledStore::temporary().unwrap(), Arc::new(KeyRing::new()))
    }

    #[tokio::test]
    async fn sealed_pastes_round_trip() {
        let vault = vault();
        let paste = PlaintextPaste {
            text: "hello".to_owned(),
            attachment: Some(Attachment {
                file_name: "cat.png".to_owned(),
                content_type: "image/png".to_owned(),
                bytes: vec![1, 2, 3],
            }),
        };
        let code = vault.seal(&paste, 600, base()).await.unwrap();
        let opened = vault.open(&code, shifted(60)).await.unwrap();
        assert_eq!(opened.text, "hello");
        let attachment = opened.attachment.as_ref().unwrap();
        assert_eq!(attachment.file_name, "cat.png");
        assert_eq!(attachment.content_type, "image/png");
        assert_eq!(attachment.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn over_limit_expiry_is_rejected_without_side_effects() {
        let store = SledStore::temporary().unwrap();
        let keyring = Arc::new(KeyRing::new());
        let vault = PasteVault::new(store.clone(), Arc::clone(&keyring));
        let err = vault
            .seal(&text_paste("too long"), 86_401, base())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidExpiry { requested: 86_401 }));
        assert!(keyring.is_empty());
        // Nothing was persisted either.
        assert_eq!(store.evict_expired(DateTimeUtc::MAX_UTC).await.unwrap(), 0);

        // The limit itself is fine.
        vault
            .seal(&text_paste("a day"), 86_400, base())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_submissions_are_rejected() {
        let vault = vault();
        let empty = PlaintextPaste {
            text: String::new(),
            attachment: None,
        };
        let err = vault.seal(&empty, 600, base()).await.unwrap_err();
        assert!(matches!(err, Error::EmptySubmission));
    }

    #[tokio::test]
    async fn unknown_codes_read_as_missing() {
        let vault = vault();
        let code = "nosuch".parse::<PasteCode>().unwrap();
        let err = vault.open(&code, base()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn expiry_is_enforced_at_read_time() {
        let vault = vault();
        let code = vault.seal(&text_paste("brief"), 60, base()).await.unwrap();
        assert!(vault.open(&code, shifted(60)).await.is_ok());
        let err = vault.open(&code, shifted(61)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn purged_key_makes_paste_unrecoverable() {
        let store = SledStore::temporary().unwrap();
        let keyring = Arc::new(KeyRing::new());
        let vault = PasteVault::new(store, Arc::clone(&keyring));
        let code = vault
            .seal(&text_paste("short lived"), 60, base())
            .await
            .unwrap();
        assert_eq!(keyring.purge_expired(shifted(2 * 60 * 60)), 1);
        let err = vault.open(&code, shifted(30)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn tampered_ciphertext_reads_as_missing() {
        let store = SledStore::temporary().unwrap();
        let keyring = Arc::new(KeyRing::new());
        let vault = PasteVault::new(store.clone(), Arc::clone(&keyring));
        let code = vault
            .seal(&text_paste("original"), 600, base())
            .await
            .unwrap();

        let mut sealed = store.find_paste(&code).await.unwrap().unwrap();
        let last = sealed.ciphertext.len() - 1;
        sealed.ciphertext[last] ^= 0x01;
        sealed.code = "tamper".parse().unwrap();
        store.insert_paste(&sealed).await.unwrap();

        let err = vault.open(&sealed.code, shifted(60)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
        // The untouched record still opens.
        let opened = vault.open(&code, shifted(60)).await.unwrap();
        assert_eq!(opened.text, "original");
    }

    #[tokio::test]
    async fn nearby_pastes_share_a_key() {
        let store = SledStore::temporary().unwrap();
        let keyring = Arc::new(KeyRing::new());
        let vault = PasteVault::new(store.clone(), Arc::clone(&keyring));
        let first = vault.seal(&text_paste("one"), 600, base()).await.unwrap();
        let second = vault.seal(&text_paste("two"), 300, base()).await.unwrap();
        let first_key = store.find_paste(&first).await.unwrap().unwrap().key_id;
        let second_key = store.find_paste(&second).await.unwrap().unwrap().key_id;
        assert_eq!(first_key, second_key);
        assert_eq!(keyring.len(), 1);
    }

    #[tokio::test]
    async fn wipe_makes_every_paste_unreadable() {
        let store = SledStore::temporary().unwrap();
        let keyring = Arc::new(KeyRing::new());
        let vault = PasteVault::new(store, Arc::clone(&keyring));
        let code = vault.seal(&text_paste("secret"), 600, base()).await.unwrap();
        keyring.wipe_all();
        let err = vault.open(&code, shifted(1)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    struct CollidingStore {
        inner: SledStore,
        rejections: AtomicUsize,
    }

    impl Store for CollidingStore {
        async fn find_paste(&self, code: &PasteCode) -> Result<Option<SealedPaste>, StoreError> {
            self.inner.find_paste(code).await
        }

        async fn insert_paste(&self, paste: &SealedPaste) -> Result<InsertOutcome, StoreError> {
            let pending = self
                .rejections
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if pending.is_ok() {
                return Ok(InsertOutcome::Conflict);
            }
            self.inner.insert_paste(paste).await
        }

        async fn find_visitor(
            &self,
            remote_addr: &str,
        ) -> Result<Option<crate::VisitorRecord>, StoreError> {
            self.inner.find_visitor(remote_addr).await
        }

        async fn upsert_visitor(&self, visitor: &crate::VisitorRecord) -> Result<(), StoreError> {
            self.inner.upsert_visitor(visitor).await
        }
    }

    #[tokio::test]
    async fn code_collisions_are_retried() {
        let store = CollidingStore {
            inner: SledStore::temporary().unwrap(),
            rejections: AtomicUsize::new(3),
        };
        let vault = PasteVault::new(store, Arc::new(KeyRing::new()));
        let code = vault
            .seal(&text_paste("persistent"), 600, base())
            .await
            .unwrap();
        let opened = vault.open(&code, shifted(1)).await.unwrap();
        assert_eq!(opened.text, "persistent");
    }

    #[tokio::test]
    async fn code_space_exhaustion_is_reported() {
        let store = CollidingStore {
            inner: SledStore::temporary().unwrap(),
            rejections: AtomicUsize::new(usize::MAX),
        };
        let vault = PasteVault::new(store, Arc::new(KeyRing::new()));
        let err = vault
            .seal(&text_paste("unlucky"), 600, base())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CodeSpaceExhausted));
    }
}
