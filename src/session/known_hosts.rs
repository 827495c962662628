//! OpenSSH known-hosts store and host-key verification.
//!
//! Lines follow the OpenSSH format: `[marker] patterns keytype base64 [comment]`.
//! Patterns may be comma lists, `[host]:port` forms for non-default ports,
//! or hashed `|1|salt|hash` entries.

use crate::error::{KnownHostsError, SessionError, SessionResult};
use crate::types::DEFAULT_SSH_PORT;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use directories::BaseDirs;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

type HmacSha1 = Hmac<Sha1>;

/// A server host key as presented during key exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    /// Key type, e.g. `ssh-ed25519`.
    pub algorithm: String,
    /// Base64 key blob as written in known_hosts.
    pub base64: String,
    /// `SHA256:...` fingerprint shown to the user.
    pub fingerprint: String,
}

impl HostKey {
    pub fn new(
        algorithm: impl Into<String>,
        base64: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            algorithm: algorithm.into(),
            base64: base64.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    None,
    Revoked,
}

#[derive(Debug, Clone)]
struct Entry {
    marker: Marker,
    patterns: Vec<String>,
    algorithm: String,
    key: String,
}

impl Entry {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut fields = line.split_whitespace();
        let mut first = fields.next()?;
        let marker = match first {
            "@revoked" => {
                first = fields.next()?;
                Marker::Revoked
            }
            // Certificate authorities sign keys; we only verify plain keys.
            "@cert-authority" => return None,
            other if other.starts_with('@') => return None,
            _ => Marker::None,
        };

        let algorithm = fields.next()?.to_string();
        let key = fields.next()?.to_string();

        Some(Self {
            marker,
            patterns: first.split(',').map(str::to_string).collect(),
            algorithm,
            key,
        })
    }

    fn matches_host(&self, host: &str, port: u16) -> bool {
        let name = host_pattern(host, port);
        let mut matched = false;
        for pattern in &self.patterns {
            if let Some(negated) = pattern.strip_prefix('!') {
                if pattern_matches(negated, &name) {
                    return false;
                }
            } else if pattern_matches(pattern, &name) {
                matched = true;
            }
        }
        matched
    }
}

/// The name a host is recorded under: `host` on port 22, `[host]:port` otherwise.
pub fn host_pattern(host: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    if let Some(hashed) = pattern.strip_prefix("|1|") {
        return hashed_matches(hashed, name);
    }
    if pattern.contains(|c| c == '*' || c == '?') {
        return wildcard_matches(pattern.as_bytes(), name.as_bytes());
    }
    pattern.eq_ignore_ascii_case(name)
}

/// OpenSSH host globbing: `*` matches any run of characters, `?` exactly one.
fn wildcard_matches(pattern: &[u8], name: &[u8]) -> bool {
    let (mut p, mut n) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some(b'*') => {
                star = Some((p, n));
                p += 1;
            }
            Some(b'?') => {
                p += 1;
                n += 1;
            }
            Some(c) if c.eq_ignore_ascii_case(&name[n]) => {
                p += 1;
                n += 1;
            }
            _ => match star {
                Some((star_p, star_n)) => {
                    p = star_p + 1;
                    n = star_n + 1;
                    star = Some((star_p, star_n + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

fn hashed_matches(hashed: &str, name: &str) -> bool {
    let Some((salt, digest)) = hashed.split_once('|') else {
        return false;
    };
    let (Ok(salt), Ok(digest)) = (BASE64.decode(salt), BASE64.decode(digest)) else {
        return false;
    };
    let Ok(mut mac) = HmacSha1::new_from_slice(&salt) else {
        return false;
    };
    mac.update(name.as_bytes());
    mac.verify_slice(&digest).is_ok()
}

/// Outcome of looking a presented key up in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// A matching entry exists.
    Trusted,
    /// No entry for this host and key type.
    Unknown,
    /// The host is recorded with a different key of the same type.
    Changed,
    /// The key is marked `@revoked`.
    Revoked,
}

/// A file-backed set of trusted host keys.
#[derive(Debug, Clone)]
pub struct KnownHosts {
    path: PathBuf,
    entries: Vec<Entry>,
}

impl KnownHosts {
    /// `~/.ssh/known_hosts`.
    pub fn default_path() -> Result<PathBuf, KnownHostsError> {
        let dirs = BaseDirs::new().ok_or(KnownHostsError::NoHomeDirectory)?;
        Ok(dirs.home_dir().join(".ssh").join("known_hosts"))
    }

    /// Load the store at `path`, creating an empty file if it does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, KnownHostsError> {
        let path = path.into();

        if !path.exists() {
            create_store(&path)?;
            debug!(path = %path.display(), "created empty known_hosts");
            return Ok(Self {
                path,
                entries: Vec::new(),
            });
        }

        let content = fs::read_to_string(&path).map_err(|e| KnownHostsError::ReadFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self::parse(path, &content))
    }

    fn parse(path: PathBuf, content: &str) -> Self {
        let entries = content.lines().filter_map(Entry::parse).collect::<Vec<_>>();
        debug!(path = %path.display(), entries = entries.len(), "loaded known_hosts");
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a presented key.
    pub fn check(&self, host: &str, port: u16, key: &HostKey) -> HostKeyStatus {
        let revoked = self.entries.iter().any(|entry| {
            entry.marker == Marker::Revoked
                && entry.algorithm == key.algorithm
                && entry.key == key.base64
        });
        if revoked {
            return HostKeyStatus::Revoked;
        }

        let mut changed = false;
        for entry in self
            .entries
            .iter()
            .filter(|e| e.marker == Marker::None && e.matches_host(host, port))
        {
            if entry.algorithm != key.algorithm {
                continue;
            }
            if entry.key == key.base64 {
                return HostKeyStatus::Trusted;
            }
            changed = true;
        }

        if changed {
            HostKeyStatus::Changed
        } else {
            HostKeyStatus::Unknown
        }
    }

    /// Append a trusted entry for `host` and remember it.
    pub fn add(&mut self, host: &str, port: u16, key: &HostKey) -> Result<(), KnownHostsError> {
        let pattern = host_pattern(host, port);
        let line = format!("{} {} {}\n", pattern, key.algorithm, key.base64);

        let write_err = |e: std::io::Error| KnownHostsError::WriteFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let mut file = open_options().append(true).open(&self.path).map_err(write_err)?;
        file.write_all(line.as_bytes()).map_err(write_err)?;

        self.entries.push(Entry {
            marker: Marker::None,
            patterns: vec![pattern],
            algorithm: key.algorithm.clone(),
            key: key.base64.clone(),
        });
        Ok(())
    }
}

fn open_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

fn create_store(path: &Path) -> Result<(), KnownHostsError> {
    let write_err = |e: std::io::Error| KnownHostsError::WriteFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    open_options().write(true).open(path).map_err(write_err)?;
    Ok(())
}

/// How unknown host keys are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Only keys already in known_hosts are accepted.
    Strict,
    /// Unknown hosts are recorded on first use; changed keys are still rejected.
    AcceptNew,
    /// No verification at all.
    Insecure,
}

impl HostKeyPolicy {
    pub fn from_flags(secure_mode: bool, accept_new: bool) -> Self {
        match (secure_mode, accept_new) {
            (false, _) => Self::Insecure,
            (true, true) => Self::AcceptNew,
            (true, false) => Self::Strict,
        }
    }
}

/// Decides whether a presented host key is trusted.
#[derive(Debug)]
pub struct HostKeyVerifier {
    policy: HostKeyPolicy,
    store: Option<KnownHosts>,
}

impl HostKeyVerifier {
    /// Verify against `store` under the given policy.
    pub fn new(store: KnownHosts, policy: HostKeyPolicy) -> Self {
        Self {
            policy,
            store: Some(store),
        }
    }

    /// Accept every key. Logged on each use.
    pub fn insecure() -> Self {
        Self {
            policy: HostKeyPolicy::Insecure,
            store: None,
        }
    }

    /// Build a verifier for the configured policy, loading the store at
    /// `path` (or the default location) unless verification is disabled.
    pub fn for_policy(policy: HostKeyPolicy, path: Option<&Path>) -> SessionResult<Self> {
        if policy == HostKeyPolicy::Insecure {
            return Ok(Self::insecure());
        }
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => KnownHosts::default_path()?,
        };
        Ok(Self::new(KnownHosts::load(path)?, policy))
    }

    pub fn policy(&self) -> HostKeyPolicy {
        self.policy
    }

    /// Accept or reject `key` for `host:port`.
    pub fn verify(&mut self, host: &str, port: u16, key: &HostKey) -> SessionResult<()> {
        let untrusted = |reason: &str| SessionError::HostKeyUntrusted {
            host: host.to_string(),
            port,
            fingerprint: key.fingerprint.clone(),
            reason: reason.to_string(),
        };

        let store = match (&self.policy, self.store.as_mut()) {
            (HostKeyPolicy::Insecure, _) | (_, None) => {
                warn!(
                    host,
                    port,
                    fingerprint = %key.fingerprint,
                    "host key verification is disabled (ssh_secure_mode = false)"
                );
                return Ok(());
            }
            (_, Some(store)) => store,
        };

        match store.check(host, port, key) {
            HostKeyStatus::Trusted => {
                debug!(host, port, algorithm = %key.algorithm, "host key matches known_hosts");
                Ok(())
            }
            HostKeyStatus::Revoked => Err(untrusted("key is marked @revoked")),
            HostKeyStatus::Changed => Err(untrusted(
                "REMOTE HOST IDENTIFICATION HAS CHANGED; known_hosts holds a different key",
            )),
            HostKeyStatus::Unknown if self.policy == HostKeyPolicy::AcceptNew => {
                store.add(host, port, key)?;
                info!(
                    host,
                    port,
                    fingerprint = %key.fingerprint,
                    path = %store.path().display(),
                    "recorded new host key"
                );
                Ok(())
            }
            HostKeyStatus::Unknown => Err(untrusted("no entry in known_hosts")),
        }
    }
}
