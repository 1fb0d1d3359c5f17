//! End-to-end XC scenarios: identities, multi-recipient isolation, rings on disk.

use std::sync::Arc;
use std::time::Duration;

use hoard_core::HoardError;
use hoard_crypto::{
    Agent, Identity, KdfProfile, KeyRing, Pubring, Secring, StaticPrompter, Xc,
};
use proptest::prelude::*;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

struct Client {
    xc: Xc,
    fp: String,
}

fn client(name: &str, passphrase: &str, kdf: KdfProfile) -> Client {
    let secring = Arc::new(Secring::in_memory());
    let fp = secring
        .generate(
            Identity::new(name, format!("{name}@example.org")),
            &SecretString::from(passphrase),
            kdf,
        )
        .unwrap()
        .fingerprint();
    let pubring = Arc::new(Pubring::in_memory(Some(&secring)));
    let agent = Arc::new(Agent::new(
        Box::new(StaticPrompter::new(passphrase)),
        Duration::from_secs(300),
        16,
    ));
    Client {
        xc: Xc::new(pubring, secring, agent),
        fp,
    }
}

fn introduce(from: &Client, to: &Client) {
    let exported = from.xc.pubring().export(&from.fp, false).unwrap();
    to.xc.pubring().import(&exported).unwrap();
}

#[test]
fn create_identity_and_roundtrip_secret() {
    // Full-strength KDF parameters once, to exercise the production profile
    let alice = client("alice", "s3cret", KdfProfile::Standard);
    let cancel = CancellationToken::new();

    let ct = alice
        .xc
        .encrypt(&cancel, b"hello world", &[alice.fp.clone()])
        .unwrap();
    assert_eq!(alice.xc.decrypt(&cancel, &ct).unwrap(), b"hello world");

    // The signer is already a recipient, so there is exactly one entry
    assert_eq!(Xc::recipient_ids(&ct).unwrap(), vec![alice.fp.clone()]);
}

#[test]
fn multi_recipient_isolation() {
    let alice = client("alice", "s3cret", KdfProfile::Light);
    let bob = client("bob", "hunter2", KdfProfile::Light);
    let charlie = client("charlie", "letmein", KdfProfile::Light);
    introduce(&bob, &alice);
    introduce(&alice, &bob);
    introduce(&alice, &charlie);

    let cancel = CancellationToken::new();
    let ct = alice
        .xc
        .encrypt(&cancel, b"msg", &[alice.fp.clone(), bob.fp.clone()])
        .unwrap();

    let err = charlie.xc.decrypt(&cancel, &ct).unwrap_err();
    assert!(matches!(err, HoardError::NotForMe));

    assert_eq!(bob.xc.decrypt(&cancel, &ct).unwrap(), b"msg");
    assert_eq!(alice.xc.decrypt(&cancel, &ct).unwrap(), b"msg");
}

#[test]
fn rings_survive_reload_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let sec_path = dir.path().join(".gopass-secring.xc");
    let pub_path = dir.path().join(".gopass-pubring.xc");
    let cancel = CancellationToken::new();

    let ct = {
        let secring = Arc::new(Secring::load(&sec_path).unwrap());
        secring
            .generate(
                Identity::new("alice", "alice@example.org"),
                &SecretString::from("s3cret"),
                KdfProfile::Light,
            )
            .unwrap();
        let pubring = Arc::new(Pubring::load(&pub_path, Some(&secring)).unwrap());
        secring.save().unwrap();
        pubring.save().unwrap();

        let agent = Arc::new(Agent::new(
            Box::new(StaticPrompter::new("s3cret")),
            Duration::from_secs(300),
            16,
        ));
        Xc::new(pubring, secring, agent)
            .encrypt(&cancel, b"persisted", &[])
            .unwrap()
    };

    let secring = Arc::new(Secring::load(&sec_path).unwrap());
    let pubring = Arc::new(Pubring::load(&pub_path, Some(&secring)).unwrap());
    let agent = Arc::new(Agent::new(
        Box::new(StaticPrompter::new("s3cret")),
        Duration::from_secs(300),
        16,
    ));
    let xc = Xc::new(pubring, secring, agent);
    assert_eq!(xc.decrypt(&cancel, &ct).unwrap(), b"persisted");
}

#[test]
fn passphrase_is_prompted_once_per_ttl() {
    let prompter = Arc::new(StaticPrompter::new("s3cret"));

    struct Counting(Arc<StaticPrompter>);
    impl hoard_crypto::Prompter for Counting {
        fn prompt(
            &self,
            fp: &str,
            reason: &str,
        ) -> hoard_core::HoardResult<SecretString> {
            self.0.prompt(fp, reason)
        }
    }

    let secring = Arc::new(Secring::in_memory());
    secring
        .generate(
            Identity::new("alice", "alice@example.org"),
            &SecretString::from("s3cret"),
            KdfProfile::Light,
        )
        .unwrap();
    let pubring = Arc::new(Pubring::in_memory(Some(&secring)));
    let agent = Arc::new(Agent::new(
        Box::new(Counting(prompter.clone())),
        Duration::from_secs(300),
        16,
    ));
    let xc = Xc::new(pubring, secring, agent);
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        let ct = xc.encrypt(&cancel, b"x", &[]).unwrap();
        xc.decrypt(&cancel, &ct).unwrap();
    }
    assert_eq!(prompter.prompts(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn decrypt_inverts_encrypt(plaintext in proptest::collection::vec(any::<u8>(), 0..40_000)) {
        let alice = client("alice", "s3cret", KdfProfile::Light);
        let cancel = CancellationToken::new();
        let ct = alice.xc.encrypt(&cancel, &plaintext, &[]).unwrap();
        prop_assert_eq!(alice.xc.decrypt(&cancel, &ct).unwrap(), plaintext);
    }
}
