//! Parameter store behavior over a failing storage backend.
//!
//! Writes must surface the failure so the caller never redirects without a
//! stored verifier. Reads and deletes degrade to "absent".

use std::sync::Arc;

use inbox_pkce::auth::pkce::generate_verifier;
use inbox_pkce::auth::storage::{SessionStorage, StorageError};
use inbox_pkce::auth::store::{ParameterStore, PkceParams};
use inbox_pkce::auth::{FlowContext, PkceFlow};
use inbox_pkce::{FlowError, PkceError};
use mockall::mock;

mock! {
    pub Storage {}

    impl SessionStorage for Storage {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
        fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
        fn delete(&self, key: &str) -> Result<(), StorageError>;
        fn keys(&self) -> Result<Vec<String>, StorageError>;
    }
}

fn unavailable() -> StorageError {
    StorageError::Unavailable("quota exceeded".to_string())
}

#[test]
fn test_store_propagates_write_failure() {
    let mut storage = MockStorage::new();
    storage.expect_set().returning(|_, _| Err(unavailable()));

    let store = ParameterStore::new(Arc::new(storage));
    let params = PkceParams::new(generate_verifier().unwrap(), "state");

    let err = store.store("flow", &params).unwrap_err();
    assert!(matches!(err, PkceError::Storage(StorageError::Unavailable(_))));
}

#[test]
fn test_begin_fails_when_storage_rejects_write() {
    let mut storage = MockStorage::new();
    storage.expect_set().times(1).returning(|_, _| Err(unavailable()));

    let flow = PkceFlow::new(ParameterStore::new(Arc::new(storage)));
    assert!(flow.begin("flow", FlowContext::new("whatsapp_cloud")).is_err());
}

#[test]
fn test_retrieve_reads_failure_as_absent() {
    let mut storage = MockStorage::new();
    storage.expect_get().returning(|_| Err(unavailable()));
    storage.expect_delete().never();

    let store = ParameterStore::new(Arc::new(storage));
    assert!(store.retrieve("flow").is_none());
}

#[test]
fn test_complete_with_unreadable_storage_is_expired() {
    let mut storage = MockStorage::new();
    storage.expect_get().returning(|_| Err(unavailable()));

    let flow = PkceFlow::new(ParameterStore::new(Arc::new(storage)));
    let err = flow.complete("flow", "code", "state").unwrap_err();
    assert!(matches!(err, FlowError::Expired { .. }));
}

#[test]
fn test_delete_failure_is_swallowed() {
    let mut storage = MockStorage::new();
    storage
        .expect_delete()
        .withf(|key| key == "oauth_pkce::flow")
        .times(1)
        .returning(|_| Err(unavailable()));

    let store = ParameterStore::new(Arc::new(storage));
    store.delete("flow");
}

#[test]
fn test_clear_all_counts_only_successful_deletes() {
    let mut storage = MockStorage::new();
    storage.expect_keys().returning(|| {
        Ok(vec![
            "oauth_pkce::a".to_string(),
            "oauth_pkce::b".to_string(),
            "user_prefs".to_string(),
        ])
    });
    storage
        .expect_delete()
        .withf(|key| key == "oauth_pkce::a")
        .returning(|_| Ok(()));
    storage
        .expect_delete()
        .withf(|key| key == "oauth_pkce::b")
        .returning(|_| Err(unavailable()));

    let store = ParameterStore::new(Arc::new(storage));
    assert_eq!(store.clear_all(), 1);
}

#[test]
fn test_clear_all_with_unlistable_storage() {
    let mut storage = MockStorage::new();
    storage.expect_keys().returning(|| Err(unavailable()));
    storage.expect_delete().never();

    let store = ParameterStore::new(Arc::new(storage));
    assert_eq!(store.clear_all(), 0);
    assert_eq!(store.purge_expired(), 0);
}
