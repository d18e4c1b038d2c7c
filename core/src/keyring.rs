use {
    crate::{
        DateTimeUtc, KeyId,
        cipher::{Cipher, SymmetricKey},
        error::{Error, Result},
    },
    chrono::TimeDelta,
    parking_lot::Mutex,
    rand::{TryRngCore, rngs::OsRng},
    std::{
        collections::HashMap,
        fmt::{self, Debug},
        time::Duration,
    },
};

/// Extra lifetime granted to a fresh key beyond the paste that created it,
/// so pastes sealed shortly after can share it.
pub const KEY_GRACE: TimeDelta = TimeDelta::hours(1);

pub const PURGE_INTERVAL: Duration = Duration::from_secs(30 * 60);

struct StoredKey {
    key: SymmetricKey,
    expire_at: DateTimeUtc,
}

/// In-memory ring of ephemeral paste keys. Key material never leaves this
/// struct except as a ready-made [`Cipher`], and every access goes through
/// the one internal lock.
#[derive(Default)]
pub struct KeyRing {
    entries: Mutex<HashMap<KeyId, StoredKey>>,
}

impl KeyRing {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a key usable until at least `valid_until`, creating one when
    /// no current key lives that long. Fresh keys get [`KEY_GRACE`] on top
    /// of the requested lifetime so that nearby pastes share them.
    pub fn find_or_create(&self, valid_until: DateTimeUtc) -> Result<(KeyId, Cipher)> {
        let mut entries = self.entries.lock();
        if let Some((&id, stored)) = entries
            .iter()
            .find(|(_id, stored)| stored.expire_at >= valid_until)
        {
            return Ok((id, Cipher::new(&stored.key)));
        }
        let key = SymmetricKey::generate()?;
        let cipher = Cipher::new(&key);
        let mut id = KeyId(OsRng.try_next_u32().map_err(Error::Rng)?);
        while entries.contains_key(&id) {
            id = KeyId(OsRng.try_next_u32().map_err(Error::Rng)?);
        }
        let expire_at = valid_until
            .checked_add_signed(KEY_GRACE)
            .unwrap_or(DateTimeUtc::MAX_UTC);
        entries.insert(id, StoredKey { key, expire_at });
        Ok((id, cipher))
    }

    /// Expired-but-unpurged keys still resolve; expiry is enforced by
    /// [`purge_expired`](Self::purge_expired), not here.
    #[must_use]
    pub fn lookup(&self, id: KeyId) -> Option<Cipher> {
        self.entries
            .lock()
            .get(&id)
            .map(|stored| Cipher::new(&stored.key))
    }

    /// Drops every key whose expiry has passed and returns how many went.
    /// Dropping wipes the material.
    pub fn purge_expired(&self, now: DateTimeUtc) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_id, stored| stored.expire_at > now);
        before.saturating_sub(entries.len())
    }

    /// Drops all keys at once, making every sealed paste unreadable.
    pub fn wipe_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing").finish()
    }
}
