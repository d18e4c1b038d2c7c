use {
    crate::{
        DateTimeUtc, VisitorRecord,
        error::Result,
        store::{self, Store},
    },
    chrono::TimeDelta,
    tracing::warn,
};

/// How long accepted-submission bookkeeping is kept around.
pub const VISITOR_TTL: TimeDelta = TimeDelta::hours(2);

// Scanner fodder. Nothing the server actually serves matches any of these,
// so a hit identifies the client as hostile.
const PROBE_PATTERNS: &[&str] = &[
    ".php",
    ".asp",
    ".cgi",
    "/.env",
    "/.git",
    "/wp-admin",
    "/wp-login",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Paste submission; subject to the inter-submission interval.
    Submit,
    /// Everything else.
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanReason {
    ActiveBan,
    ProbePath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    RateLimited { retry_after_seconds: i64 },
    Forbidden(BanReason),
}

#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    pub rate_limit: TimeDelta,
    pub ban_duration: TimeDelta,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            rate_limit: TimeDelta::seconds(10),
            ban_duration: TimeDelta::days(90),
        }
    }
}

/// Per-address abuse control: bans addresses probing for known vulnerable
/// paths and spaces out submissions.
#[derive(Debug)]
pub struct AbuseGuard<S> {
    store: S,
    config: GuardConfig,
}

impl<S: Store> AbuseGuard<S> {
    #[inline]
    pub fn new(store: S, config: GuardConfig) -> Self {
        Self { store, config }
    }

    /// Decides whether a request may proceed. Rejected submissions leave
    /// `last_access` untouched, so retrying early never postpones the
    /// window. Read requests never create or modify visitor records.
    pub async fn on_request(
        &self,
        remote_addr: &str,
        path: &str,
        class: RequestClass,
        now: DateTimeUtc,
    ) -> Result<Decision> {
        let visitor = store::bounded(self.store.find_visitor(remote_addr)).await?;

        if let Some(record) = &visitor {
            if record.banned && now < record.expire_date {
                return Ok(Decision::Forbidden(BanReason::ActiveBan));
            }
        }

        if is_probe_path(path) {
            let ban = VisitorRecord {
                remote_addr: remote_addr.to_owned(),
                banned: true,
                last_access: now,
                expire_date: now
                    .checked_add_signed(self.config.ban_duration)
                    .unwrap_or(DateTimeUtc::MAX_UTC),
            };
            store::bounded(self.store.upsert_visitor(&ban)).await?;
            warn!(remote_addr, path, "banned address probing for vulnerable paths");
            return Ok(Decision::Forbidden(BanReason::ProbePath));
        }

        if class == RequestClass::Read {
            return Ok(Decision::Allowed);
        }

        if let Some(record) = &visitor {
            let elapsed = now.signed_duration_since(record.last_access);
            if elapsed < self.config.rate_limit {
                let remaining = self
                    .config
                    .rate_limit
                    .checked_sub(&elapsed)
                    .unwrap_or_default();
                // Rounded up: a hint of 0 would invite an immediate retry.
                let retry_after_seconds = remaining.num_milliseconds().saturating_add(999) / 1000;
                return Ok(Decision::RateLimited { retry_after_seconds });
            }
        }

        let accepted = VisitorRecord {
            remote_addr: remote_addr.to_owned(),
            banned: false,
            last_access: now,
            expire_date: now
                .checked_add_signed(VISITOR_TTL)
                .unwrap_or(DateTimeUtc::MAX_UTC),
        };
        store::bounded(self.store.upsert_visitor(&accepted)).await?;
        Ok(Decision::Allowed)
    }
}

fn is_probe_path(path: &str) -> bool {
    let path = path.to_ascii_lowercase();
    PROBE_PATTERNS.iter().any(|pattern| path.contains(pattern))
}
