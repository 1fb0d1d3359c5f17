//! Passphrase agent: process-local cache of per-key passphrases.
//!
//! Entries expire after a TTL measured from their last use (default 5 min).
//! When the cache is full the least recently used entry is evicted.
//! Prompting is delegated to an injected [`Prompter`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hoard_core::config::AgentConfig;
use hoard_core::{ensure_active, HoardError, HoardResult};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

/// Supplies passphrases when the cache misses.
pub trait Prompter: Send + Sync {
    /// Ask for the passphrase of `fingerprint`. `reason` is shown to the user.
    ///
    /// Returns `PromptAborted` when the user declines.
    fn prompt(&self, fingerprint: &str, reason: &str) -> HoardResult<SecretString>;
}

/// Reads the passphrase from the controlling terminal without echo.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn prompt(&self, fingerprint: &str, reason: &str) -> HoardResult<SecretString> {
        let text = format!("{reason}\nPassphrase for {fingerprint}: ");
        match rpassword::prompt_password(text) {
            Ok(p) if p.is_empty() => Err(HoardError::PromptAborted),
            Ok(p) => Ok(SecretString::from(p)),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::Interrupted | std::io::ErrorKind::UnexpectedEof
                ) =>
            {
                Err(HoardError::PromptAborted)
            }
            Err(e) => Err(HoardError::Io(e)),
        }
    }
}

/// Answers every prompt with a fixed passphrase (CI, tests, scripted use).
pub struct StaticPrompter {
    passphrase: Option<SecretString>,
    prompts: AtomicUsize,
}

impl StaticPrompter {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(SecretString::from(passphrase.into())),
            prompts: AtomicUsize::new(0),
        }
    }

    /// A prompter that always aborts.
    pub fn aborting() -> Self {
        Self {
            passphrase: None,
            prompts: AtomicUsize::new(0),
        }
    }

    /// Number of prompts answered so far.
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl Prompter for StaticPrompter {
    fn prompt(&self, _fingerprint: &str, _reason: &str) -> HoardResult<SecretString> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.passphrase.clone().ok_or(HoardError::PromptAborted)
    }
}

struct Cached {
    passphrase: SecretString,
    last_used: Instant,
}

/// Passphrase cache keyed by fingerprint.
pub struct Agent {
    prompter: Box<dyn Prompter>,
    ttl: Duration,
    capacity: usize,
    cache: Mutex<HashMap<String, Cached>>,
}

impl Agent {
    pub fn new(prompter: Box<dyn Prompter>, ttl: Duration, capacity: usize) -> Self {
        Self {
            prompter,
            ttl,
            capacity: capacity.max(1),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(prompter: Box<dyn Prompter>, config: &AgentConfig) -> Self {
        Self::new(prompter, Duration::from_secs(config.ttl_secs), config.capacity)
    }

    /// Cached passphrase for `fingerprint`, prompting on a miss.
    pub fn passphrase(
        &self,
        cancel: &CancellationToken,
        fingerprint: &str,
        reason: &str,
    ) -> HoardResult<SecretString> {
        ensure_active(cancel)?;
        if let Some(hit) = self.lookup(fingerprint, Instant::now()) {
            tracing::debug!(fingerprint, "passphrase cache hit");
            return Ok(hit);
        }

        tracing::debug!(fingerprint, "prompting for passphrase");
        let passphrase = self.prompter.prompt(fingerprint, reason)?;
        // A prompt answered after cancellation is discarded
        ensure_active(cancel)?;

        self.insert(fingerprint, passphrase.clone(), Instant::now());
        Ok(passphrase)
    }

    /// Forget the passphrase of one key (e.g. after a failed unlock).
    pub fn remove(&self, fingerprint: &str) {
        if self.cache().remove(fingerprint).is_some() {
            tracing::debug!(fingerprint, "evicted cached passphrase");
        }
    }

    /// Forget every cached passphrase.
    pub fn purge(&self) {
        self.cache().clear();
    }

    /// Liveness check; also drops expired entries.
    pub fn ping(&self) -> HoardResult<()> {
        let now = Instant::now();
        let ttl = self.ttl;
        self.cache()
            .retain(|_, c| now.saturating_duration_since(c.last_used) < ttl);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cache().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Cached>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, fingerprint: &str, now: Instant) -> Option<SecretString> {
        let mut cache = self.cache();
        let entry = cache.get_mut(fingerprint)?;
        if now.saturating_duration_since(entry.last_used) >= self.ttl {
            cache.remove(fingerprint);
            return None;
        }
        entry.last_used = now;
        Some(entry.passphrase.clone())
    }

    fn insert(&self, fingerprint: &str, passphrase: SecretString, now: Instant) {
        let mut cache = self.cache();
        let ttl = self.ttl;
        cache.retain(|_, c| now.saturating_duration_since(c.last_used) < ttl);

        if !cache.contains_key(fingerprint) && cache.len() >= self.capacity {
            let lru = cache
                .iter()
                .min_by_key(|(_, c)| c.last_used)
                .map(|(fp, _)| fp.clone());
            if let Some(lru) = lru {
                cache.remove(&lru);
            }
        }
        cache.insert(
            fingerprint.to_string(),
            Cached {
                passphrase,
                last_used: now,
            },
        );
    }
}
