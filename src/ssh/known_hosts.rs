//! Known hosts management for SSH host key verification
//!
//! Reads OpenSSH `known_hosts` files and decides whether a presented host key
//! is trusted. Each configuration owns its own store; there is no process-wide
//! cache.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::config::HostKeyPolicy;
use super::error::{ConnectError, SshError};

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyVerification {
    /// Key matches known_hosts entry
    Verified,
    /// Host not in known_hosts (first connection)
    Unknown { fingerprint: String },
    /// Key changed from known_hosts entry (potential MITM)
    Changed {
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
}

/// Entry in known_hosts: (key_type, base64_key)
#[derive(Clone, Debug)]
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

/// known_hosts backed trust store
pub struct KnownHostsStore {
    /// host -> list of keys (supports multiple key types per host)
    hosts: RwLock<HashMap<String, Vec<HostKeyEntry>>>,
    /// Path to known_hosts file
    path: PathBuf,
}

impl KnownHostsStore {
    /// Load the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SshError> {
        let store = Self {
            hosts: RwLock::new(HashMap::new()),
            path: path.into(),
        };
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct host names with at least one key
    pub fn host_count(&self) -> usize {
        self.hosts.read().len()
    }

    fn load(&self) -> Result<(), SshError> {
        if !self.path.exists() {
            debug!("Known hosts file {} not found, starting empty", self.path.display());
            return Ok(());
        }

        let file = fs::File::open(&self.path).map_err(SshError::IoError)?;

        let reader = BufReader::new(file);
        let mut hosts = self.hosts.write();
        let mut entry_count = 0;

        for line in reader.lines() {
            let line = line.map_err(SshError::IoError)?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // hostname[,alias...] keytype base64key [comment]
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }

            // Markers such as @revoked / @cert-authority are not host entries
            if parts[0].starts_with('@') {
                continue;
            }

            let hostnames = parts[0];
            let entry = HostKeyEntry {
                key_type: parts[1].to_string(),
                key_data: parts[2].to_string(),
            };

            for hostname in hostnames.split(',') {
                // Hashed hostnames (|1|salt|hash) are not supported
                if hostname.starts_with('|') {
                    continue;
                }

                hosts
                    .entry(Self::normalize_hostname(hostname))
                    .or_default()
                    .push(entry.clone());
                entry_count += 1;
            }
        }

        info!(
            "Loaded {} known host entries ({} unique hosts) from {}",
            entry_count,
            hosts.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Normalize hostname for lookup, keeping a non-default port
    fn normalize_hostname(host: &str) -> String {
        if let Some(rest) = host.strip_prefix('[') {
            if let Some((name, port)) = rest.split_once("]:") {
                return match port.parse::<u16>() {
                    Ok(22) | Err(_) => name.to_lowercase(),
                    Ok(port) => Self::make_key(name, port),
                };
            }
            return rest.trim_end_matches(']').to_lowercase();
        }
        host.to_lowercase()
    }

    /// Create lookup key for host:port
    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// Compute SHA256 fingerprint of public key
    pub fn fingerprint(key: &PublicKey) -> String {
        Self::fingerprint_bytes(&key.public_key_bytes())
    }

    fn fingerprint_bytes(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let hash = hasher.finalize();
        format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
    }

    /// Verify a host's public key
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyVerification {
        let lookup_key = Self::make_key(host, port);
        let actual_key_b64 = BASE64.encode(key.public_key_bytes());
        let actual_key_type = Self::key_type_name(key);
        let fingerprint = Self::fingerprint(key);

        let hosts = self.hosts.read();

        let check_entries = |entries: &Vec<HostKeyEntry>| -> Option<HostKeyVerification> {
            let mut mismatch = None;
            for entry in entries.iter().filter(|e| e.key_type == actual_key_type) {
                if entry.key_data == actual_key_b64 {
                    debug!("Host key verified for {} (type: {})", lookup_key, actual_key_type);
                    return Some(HostKeyVerification::Verified);
                }
                mismatch.get_or_insert_with(|| HostKeyVerification::Changed {
                    expected_fingerprint: Self::compute_fingerprint_from_b64(&entry.key_data),
                    actual_fingerprint: fingerprint.clone(),
                });
            }
            mismatch
        };

        // Only the exact entry counts; a bare name vouches for port 22 alone
        if let Some(entries) = hosts.get(&lookup_key) {
            match check_entries(entries) {
                Some(HostKeyVerification::Changed {
                    expected_fingerprint,
                    actual_fingerprint,
                }) => {
                    warn!(
                        "HOST KEY CHANGED for {} (type: {})! Expected {}, got {}",
                        lookup_key, actual_key_type, expected_fingerprint, actual_fingerprint
                    );
                    return HostKeyVerification::Changed {
                        expected_fingerprint,
                        actual_fingerprint,
                    };
                }
                Some(result) => return result,
                None => debug!("Host {} known but no {} key stored", lookup_key, actual_key_type),
            }
        }

        debug!("Unknown host: {}", lookup_key);
        HostKeyVerification::Unknown { fingerprint }
    }

    /// Compute fingerprint from stored base64 key
    fn compute_fingerprint_from_b64(stored_b64: &str) -> String {
        match BASE64.decode(stored_b64) {
            Ok(bytes) => Self::fingerprint_bytes(&bytes),
            Err(_) => "unknown".to_string(),
        }
    }

    /// Add a new host key to known_hosts
    pub fn add_host(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        let lookup_key = Self::make_key(host, port);
        let key_b64 = BASE64.encode(key.public_key_bytes());
        let key_type = Self::key_type_name(key);

        // Append first so the cache never claims a key the file lacks
        self.append_to_file(&lookup_key, &key_type, &key_b64)?;

        self.hosts
            .write()
            .entry(lookup_key.clone())
            .or_default()
            .push(HostKeyEntry {
                key_type: key_type.clone(),
                key_data: key_b64,
            });

        info!("Added host key for {} (type: {}) to known_hosts", lookup_key, key_type);
        Ok(())
    }

    /// Get key type name for known_hosts format
    fn key_type_name(key: &PublicKey) -> String {
        key.algorithm().as_str().to_string()
    }

    fn append_to_file(&self, host: &str, key_type: &str, key_b64: &str) -> Result<(), SshError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(SshError::IoError)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(SshError::IoError)?;

        writeln!(file, "{} {} {}", host, key_type, key_b64).map_err(SshError::IoError)?;

        Ok(())
    }

    /// Remove a host from known_hosts (for key rotation)
    pub fn remove_host(&self, host: &str, port: u16) -> Result<(), SshError> {
        let lookup_key = Self::make_key(host, port);

        self.hosts.write().remove(&lookup_key);
        self.rewrite_without_host(&lookup_key)?;

        info!("Removed host key for {} from known_hosts", lookup_key);
        Ok(())
    }

    fn rewrite_without_host(&self, remove_host: &str) -> Result<(), SshError> {
        if !self.path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(&self.path).map_err(SshError::IoError)?;

        let filtered: Vec<&str> = content
            .lines()
            .filter(|line| match line.split_whitespace().next() {
                None => true,
                Some(hostnames) => !hostnames
                    .split(',')
                    .any(|h| Self::normalize_hostname(h) == remove_host),
            })
            .collect();

        fs::write(&self.path, filtered.join("\n") + "\n").map_err(SshError::IoError)?;

        Ok(())
    }
}

/// Accept/reject decision for a presented host key, built from a [`HostKeyPolicy`]
pub enum HostKeyVerifier {
    Strict(KnownHostsStore),
    AcceptAny,
}

impl HostKeyVerifier {
    pub fn from_policy(policy: &HostKeyPolicy) -> Result<Self, ConnectError> {
        match policy.known_hosts_path() {
            Some(path) => KnownHostsStore::open(&path).map(Self::Strict).map_err(|e| {
                ConnectError::Config(format!(
                    "failed to read known_hosts {}: {}",
                    path.display(),
                    e
                ))
            }),
            None => Ok(Self::AcceptAny),
        }
    }

    /// Decide whether `key` is acceptable for `host:port`
    pub fn check(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), ConnectError> {
        let store = match self {
            HostKeyVerifier::AcceptAny => {
                warn!(
                    "Host key checking disabled for {}:{} (fingerprint: {})",
                    host,
                    port,
                    KnownHostsStore::fingerprint(key)
                );
                return Ok(());
            }
            HostKeyVerifier::Strict(store) => store,
        };

        match store.verify(host, port, key) {
            HostKeyVerification::Verified => {
                info!("Host key verified for {}:{}", host, port);
                Ok(())
            }
            HostKeyVerification::Unknown { fingerprint } => {
                warn!(
                    "Unknown host key for {}:{} (fingerprint: {}), rejecting",
                    host, port, fingerprint
                );
                Err(ConnectError::UnknownHost {
                    host: format!("{}:{}", host, port),
                    fingerprint,
                })
            }
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => Err(ConnectError::HostKeyMismatch {
                host: format!("{}:{}", host, port),
                expected_fingerprint,
                actual_fingerprint,
            }),
        }
    }
}
