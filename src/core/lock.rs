//! Run lease: at most one run per repository at a time.
//!
//! The lease is a small JSON file created with `create_new`, so two
//! processes racing for it cannot both win. A lease past its `expires_at`
//! belongs to a run that died without cleaning up and may be taken over.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LOCK_FILE_NAME: &str = "run.lock";

/// Longest lease honoured (one year)
const MAX_LEASE_SECS: u64 = 365 * 24 * 3600;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Another run holds the lease (pid {pid} on {host}) until {expires_at}")]
    Held {
        pid: u32,
        host: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Lease file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt lease file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Lease {path} was taken over by another run")]
    Lost { path: PathBuf },
}

/// Contents of the lease file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub pid: u32,
    pub host: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    fn new(lease_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            pid: std::process::id(),
            host: hostname(),
            acquired_at: now,
            expires_at: expiry(now, lease_secs),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Held lease; the file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    lease: Lease,
    lease_secs: u64,
}

impl RunLock {
    /// Take the lease in `dir`, replacing an expired one.
    pub fn acquire(dir: &Path, lease_secs: u64) -> Result<Self, LockError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);

        // Second pass only happens after removing an expired lease
        for _ in 0..2 {
            let lease = Lease::new(lease_secs);
            match try_create(&path, &lease) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), expires_at = %lease.expires_at, "Lease acquired");
                    return Ok(Self {
                        path,
                        lease,
                        lease_secs,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let existing = read_lease(&path)?;
                    if !existing.is_expired(Utc::now()) {
                        return Err(LockError::Held {
                            pid: existing.pid,
                            host: existing.host,
                            expires_at: existing.expires_at,
                        });
                    }
                    tracing::warn!(
                        pid = existing.pid,
                        host = %existing.host,
                        expired_at = %existing.expires_at,
                        "Taking over expired lease"
                    );
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let existing = read_lease(&path)?;
        Err(LockError::Held {
            pid: existing.pid,
            host: existing.host,
            expires_at: existing.expires_at,
        })
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Push `expires_at` a full lease length past now.
    ///
    /// Fails with [`LockError::Lost`] when the file no longer holds this
    /// lease, i.e. another run treated it as stale and took over.
    pub fn renew(&mut self) -> Result<(), LockError> {
        if !self.still_ours()? {
            return Err(LockError::Lost {
                path: self.path.clone(),
            });
        }

        let mut renewed = self.lease.clone();
        renewed.expires_at = expiry(Utc::now(), self.lease_secs);

        // Replace through a rename so readers never see a half-written lease
        let tmp = self.path.with_extension("lock.tmp");
        let json = serde_json::to_string_pretty(&renewed).map_err(|e| LockError::Parse {
            path: tmp.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(expires_at = %renewed.expires_at, "Lease renewed");
        self.lease = renewed;
        Ok(())
    }

    fn still_ours(&self) -> Result<bool, LockError> {
        match read_lease(&self.path) {
            Ok(on_disk) => Ok(on_disk == self.lease),
            Err(LockError::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Never remove a lease another run has since taken over
        if !matches!(self.still_ours(), Ok(true)) {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to release lease");
            }
        }
    }
}

/// Lease currently on disk in `dir`, if any.
pub fn current_lease(dir: &Path) -> Result<Option<Lease>, LockError> {
    let path = dir.join(LOCK_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    read_lease(&path).map(Some)
}

fn expiry(from: DateTime<Utc>, lease_secs: u64) -> DateTime<Utc> {
    from + Duration::seconds(lease_secs.min(MAX_LEASE_SECS) as i64)
}

fn try_create(path: &Path, lease: &Lease) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let json = serde_json::to_string_pretty(lease)
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
    file.write_all(json.as_bytes())?;
    file.sync_all()
}

fn read_lease(path: &Path) -> Result<Lease, LockError> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| LockError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
