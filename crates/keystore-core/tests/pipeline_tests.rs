//! End-to-end tests for the session keystore.
//!
//! Tests cover:
//!  1. put → reopen (process restart) → get
//!  2. Absent entry vs corrupted entry
//!  3. Blob swapped between entry keys
//!  4. Lost master key
//!  5. Login → restart → sign with the stored session

use base64::{engine::general_purpose, Engine as _};
use keystore_core::master_key::{FileFacility, MasterKeyProvider};
use keystore_core::store::{EncryptedStore, FileBackend};
use keystore_core::{
    KeyFacilityKind, KeystoreConfig, KeystoreError, SessionKeystore, EPHEM_PUBLIC_KEY, IV_KEY,
    SESSION_ID,
};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn file_config(dir: &Path) -> KeystoreConfig {
    KeystoreConfig {
        key_facility: KeyFacilityKind::File,
        data_dir: Some(dir.to_path_buf()),
        ..KeystoreConfig::default()
    }
}

/// Rewrite one field of a stored entry in the on-disk document.
fn edit_entry(path: &Path, key: &str, edit: impl FnOnce(&mut serde_json::Map<String, Value>)) {
    let mut doc: Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
    let entry = doc["entries"][key].as_object_mut().unwrap();
    edit(entry);
    fs::write(path, serde_json::to_vec(&doc).unwrap()).unwrap();
}

// ─── Test 1: survives restart ───────────────────────────────────────────────

#[test]
fn put_survives_process_restart() {
    let dir = tempdir().unwrap();
    let config = file_config(dir.path());
    let bytes_a = "a1b2c3d4e5f60718293a4b5c6d7e8f90";

    {
        let ks = SessionKeystore::open(&config).unwrap();
        ks.save(IV_KEY, bytes_a).unwrap();
    }

    let reopened = SessionKeystore::open(&config).unwrap();
    assert_eq!(reopened.load(IV_KEY).unwrap().as_deref(), Some(bytes_a));
}

#[test]
fn raw_bytes_survive_restart() {
    let dir = tempdir().unwrap();
    let facility = Arc::new(FileFacility::new(dir.path()));
    let path = dir.path().join("Web3Auth.json");
    let value: Vec<u8> = (0..=255u8).collect();

    {
        let keys = Arc::new(MasterKeyProvider::new(facility.clone(), "Web3Auth"));
        let store = EncryptedStore::new(keys, Box::new(FileBackend::open(&path).unwrap()));
        store.put("ivKey", &value).unwrap();
    }

    let keys = Arc::new(MasterKeyProvider::new(facility, "Web3Auth"));
    let store = EncryptedStore::new(keys, Box::new(FileBackend::open(&path).unwrap()));
    assert_eq!(store.get("ivKey").unwrap(), Some(value));
}

// ─── Test 2: absence vs corruption ──────────────────────────────────────────

#[test]
fn absent_is_none_but_corrupted_is_error() {
    let dir = tempdir().unwrap();
    let config = file_config(dir.path());
    let store_path = config.store_path().unwrap();

    {
        let ks = SessionKeystore::open(&config).unwrap();
        assert_eq!(ks.load(EPHEM_PUBLIC_KEY).unwrap(), None);
        ks.save(EPHEM_PUBLIC_KEY, "04deadbeef").unwrap();
    }

    edit_entry(&store_path, EPHEM_PUBLIC_KEY, |entry| {
        let ct = entry["ciphertext"].as_str().unwrap();
        let mut raw = general_purpose::STANDARD.decode(ct).unwrap();
        raw[0] ^= 0x01;
        entry.insert(
            "ciphertext".into(),
            Value::String(general_purpose::STANDARD.encode(raw)),
        );
    });

    let ks = SessionKeystore::open(&config).unwrap();
    assert!(matches!(
        ks.load(EPHEM_PUBLIC_KEY),
        Err(KeystoreError::DecryptionFailure)
    ));
    assert_eq!(ks.load(IV_KEY).unwrap(), None);
}

#[test]
fn truncated_iv_on_disk_is_error() {
    let dir = tempdir().unwrap();
    let config = file_config(dir.path());
    SessionKeystore::open(&config)
        .unwrap()
        .save(IV_KEY, "value")
        .unwrap();

    edit_entry(&config.store_path().unwrap(), IV_KEY, |entry| {
        entry.insert("iv".into(), Value::String("AAAA".into()));
    });

    let ks = SessionKeystore::open(&config).unwrap();
    assert!(matches!(ks.load(IV_KEY), Err(KeystoreError::DecryptionFailure)));
}

#[test]
fn misshapen_entry_leaves_other_entries_readable() {
    let dir = tempdir().unwrap();
    let config = file_config(dir.path());
    let store_path = config.store_path().unwrap();
    {
        let ks = SessionKeystore::open(&config).unwrap();
        ks.save_session("abc123").unwrap();
        ks.save(IV_KEY, "iv-material").unwrap();
        ks.save(EPHEM_PUBLIC_KEY, "04deadbeef").unwrap();
    }

    let mut doc: Value = serde_json::from_slice(&fs::read(&store_path).unwrap()).unwrap();
    doc["entries"][IV_KEY] = serde_json::json!({ "iv": "AAAA" });
    fs::write(&store_path, serde_json::to_vec(&doc).unwrap()).unwrap();

    let ks = SessionKeystore::open(&config).unwrap();
    assert_eq!(ks.session_id().unwrap().as_deref(), Some("abc123"));
    assert_eq!(ks.load(EPHEM_PUBLIC_KEY).unwrap().as_deref(), Some("04deadbeef"));
    assert!(matches!(ks.load(IV_KEY), Err(KeystoreError::DecryptionFailure)));
}

// ─── Test 3: swapped blobs ──────────────────────────────────────────────────

#[test]
fn blob_moved_to_other_key_is_rejected() {
    let dir = tempdir().unwrap();
    let config = file_config(dir.path());
    let store_path = config.store_path().unwrap();
    {
        let ks = SessionKeystore::open(&config).unwrap();
        ks.save(IV_KEY, "iv-material").unwrap();
        ks.save(EPHEM_PUBLIC_KEY, "ephemeral").unwrap();
    }

    let mut doc: Value = serde_json::from_slice(&fs::read(&store_path).unwrap()).unwrap();
    let iv_entry = doc["entries"][IV_KEY].clone();
    doc["entries"][EPHEM_PUBLIC_KEY] = iv_entry;
    fs::write(&store_path, serde_json::to_vec(&doc).unwrap()).unwrap();

    let ks = SessionKeystore::open(&config).unwrap();
    assert_eq!(ks.load(IV_KEY).unwrap().as_deref(), Some("iv-material"));
    assert!(matches!(
        ks.load(EPHEM_PUBLIC_KEY),
        Err(KeystoreError::DecryptionFailure)
    ));
}

// ─── Test 4: lost master key ────────────────────────────────────────────────

#[test]
fn erased_master_key_makes_entries_unreadable() {
    let dir = tempdir().unwrap();
    let config = file_config(dir.path());
    {
        let ks = SessionKeystore::open(&config).unwrap();
        ks.save_session("abc123").unwrap();
        ks.master_keys().erase().unwrap();
    }

    let ks = SessionKeystore::open(&config).unwrap();
    assert!(matches!(ks.session_id(), Err(KeystoreError::DecryptionFailure)));
    assert!(matches!(ks.sign_request("x"), Err(KeystoreError::DecryptionFailure)));
}

// ─── Test 5: sign after restart ─────────────────────────────────────────────

#[test]
fn stored_session_signs_identically_after_restart() {
    let dir = tempdir().unwrap();
    let config = file_config(dir.path());
    let session_id = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    let (pair, signature, proof) = {
        let ks = SessionKeystore::open(&config).unwrap();
        let pair = ks.save_session(session_id).unwrap();
        (
            pair,
            ks.sign_request("{\"nonce\":1}").unwrap(),
            ks.proof_of_possession().unwrap(),
        )
    };

    let ks = SessionKeystore::open(&config).unwrap();
    assert_eq!(ks.session_id().unwrap().as_deref(), Some(session_id));
    assert_eq!(ks.session_key_pair().unwrap(), pair);
    assert_eq!(ks.sign_request("{\"nonce\":1}").unwrap(), signature);
    assert_eq!(ks.proof_of_possession().unwrap(), proof);

    let decoded = general_purpose::STANDARD.decode(&signature).unwrap();
    assert_eq!(decoded.len(), 65);
    assert_eq!(decoded[64], 0);

    ks.clear_session().unwrap();
    assert!(matches!(ks.sign_request("x"), Err(KeystoreError::NoActiveSession)));
    assert_eq!(ks.load(SESSION_ID).unwrap(), None);
}

#[test]
fn store_file_never_contains_session_id() {
    let dir = tempdir().unwrap();
    let config = file_config(dir.path());
    let session_id = "feedfacecafebeef0123456789";
    SessionKeystore::open(&config)
        .unwrap()
        .save_session(session_id)
        .unwrap();
    let raw = fs::read_to_string(config.store_path().unwrap()).unwrap();
    assert!(raw.contains(SESSION_ID));
    assert!(!raw.contains(session_id));
}
