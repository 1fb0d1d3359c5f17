//! Encrypted vault: the Store API with values sealed by the XC cipher.

use std::sync::Arc;

use hoard_core::config::HoardConfig;
use hoard_core::{fsutil, HoardError, HoardResult};
use hoard_crypto::{Agent, Identity, KdfProfile, KeyRing, Prompter, Pubring, Secring, Xc};
use hoard_remote::RemoteStore;
use hoard_store::{Revision, Store, StoreSettings};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use crate::sync::{self, SyncContext, SyncOptions, SyncReport};

pub struct Vault {
    store: Store,
    xc: Xc,
    recipients: Vec<String>,
    remote: Option<(RemoteStore, SyncOptions)>,
    kdf: KdfProfile,
}

impl Vault {
    /// `recipients` are the fingerprints every value is encrypted for, in
    /// addition to the local signing key.
    pub fn new(store: Store, xc: Xc, recipients: Vec<String>) -> Self {
        Self {
            store,
            xc,
            recipients,
            remote: None,
            kdf: KdfProfile::default(),
        }
    }

    /// KDF profile for keys made by [`Vault::generate_identity`].
    pub fn with_kdf(mut self, kdf: KdfProfile) -> Self {
        self.kdf = kdf;
        self
    }

    /// Attach a remote for [`Vault::sync`].
    pub fn with_remote(mut self, remote: RemoteStore, options: SyncOptions) -> Self {
        self.remote = Some((remote, options));
        self
    }

    /// Open the store, rings and (if enabled) remote described by `config`.
    ///
    /// An empty recipient list in the config means "every local identity".
    pub fn open(config: &HoardConfig, prompter: Box<dyn Prompter>) -> HoardResult<Self> {
        let root = config.store_root();
        fsutil::create_private_dir_all(&root)?;

        let secring = Arc::new(Secring::load(config.secring_path())?);
        let pubring = Arc::new(Pubring::load(config.pubring_path(), Some(&secring))?);
        let agent = Arc::new(Agent::from_config(prompter, &config.agent));

        let recipients = if config.crypto.recipients.is_empty() {
            secring.list()
        } else {
            config.crypto.recipients.clone()
        };

        let store = Store::open(root, StoreSettings::from(&config.store))?;
        let vault = Self::new(store, Xc::new(pubring, secring, agent), recipients)
            .with_kdf(config.crypto.kdf.into());

        if !config.remote.enabled {
            return Ok(vault);
        }
        let op = hoard_remote::build_from_env(&config.remote)
            .map_err(|e| HoardError::Config(format!("{e:#}")))?;
        let remote = RemoteStore::from_config(op, &config.remote);
        Ok(vault.with_remote(remote, SyncOptions::from(&config.remote)))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn xc(&self) -> &Xc {
        &self.xc
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn kdf(&self) -> KdfProfile {
        self.kdf
    }

    /// Generate a keypair with the vault's KDF profile and persist the
    /// private ring when it has a backing file. Returns the fingerprint.
    pub fn generate_identity(
        &self,
        identity: Identity,
        passphrase: &SecretString,
    ) -> HoardResult<String> {
        let secring = self.xc.secring();
        let key = secring.generate(identity, passphrase, self.kdf)?;
        if secring.path().is_some() {
            secring.save()?;
        }
        Ok(key.fingerprint())
    }

    /// Decrypted latest value of `name`.
    pub fn get(&self, cancel: &CancellationToken, name: &str) -> HoardResult<Vec<u8>> {
        let ciphertext = self.store.get(cancel, name)?;
        self.xc.decrypt(cancel, &ciphertext)
    }

    pub fn get_revision(
        &self,
        cancel: &CancellationToken,
        name: &str,
        revision_id: &str,
    ) -> HoardResult<Vec<u8>> {
        let ciphertext = self.store.get_revision(cancel, name, revision_id)?;
        self.xc.decrypt(cancel, &ciphertext)
    }

    /// Encrypt `plaintext` and store it as a new revision of `name`.
    pub fn set(
        &self,
        cancel: &CancellationToken,
        name: &str,
        plaintext: &[u8],
    ) -> HoardResult<String> {
        self.set_with_message(cancel, name, plaintext, None)
    }

    pub fn set_with_message(
        &self,
        cancel: &CancellationToken,
        name: &str,
        plaintext: &[u8],
        message: Option<&str>,
    ) -> HoardResult<String> {
        let ciphertext = self.xc.encrypt(cancel, plaintext, &self.recipients)?;
        self.store.set_with_message(cancel, name, &ciphertext, message)
    }

    pub fn delete(&self, cancel: &CancellationToken, name: &str) -> HoardResult<bool> {
        self.store.delete(cancel, name)
    }

    pub fn list(&self, cancel: &CancellationToken, prefix: &str) -> HoardResult<Vec<String>> {
        self.store.list(cancel, prefix)
    }

    pub fn exists(&self, cancel: &CancellationToken, name: &str) -> HoardResult<bool> {
        self.store.exists(cancel, name)
    }

    pub fn revisions(&self, cancel: &CancellationToken, name: &str) -> HoardResult<Vec<Revision>> {
        self.store.revisions(cancel, name)
    }

    /// Reconcile with the attached remote.
    pub async fn sync(&self, cancel: &CancellationToken) -> HoardResult<SyncReport> {
        let (remote, options) = self
            .remote
            .as_ref()
            .ok_or_else(|| HoardError::Config("remote sync is not configured".into()))?;
        sync::sync(
            cancel,
            SyncContext {
                store: &self.store,
                xc: &self.xc,
                recipients: &self.recipients,
                remote,
                options,
            },
        )
        .await
    }
}
