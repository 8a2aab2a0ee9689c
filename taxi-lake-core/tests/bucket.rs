use taxi_lake_core::bucket::{ensure_bucket, BucketState};
use taxi_lake_core::config::validate_bucket_name;
use taxi_lake_core::contract::MockObjectStore;
use taxi_lake_core::error::{BucketError, StoreError};

#[tokio::test]
async fn existing_bucket_is_left_alone() {
    let mut store = MockObjectStore::new();
    store
        .expect_list_buckets()
        .return_once(|| Ok(vec!["other".into(), "trip-data-bucket".into()]));
    store.expect_create_bucket().never();

    let state = ensure_bucket(&store, "trip-data-bucket").await.unwrap();
    assert_eq!(state, BucketState::AlreadyExists);
}

#[tokio::test]
async fn missing_bucket_is_created() {
    let mut store = MockObjectStore::new();
    store.expect_list_buckets().return_once(|| Ok(vec![]));
    store
        .expect_create_bucket()
        .withf(|name| name == "trip-data-bucket")
        .times(1)
        .returning(|_| Ok(()));

    let state = ensure_bucket(&store, "trip-data-bucket").await.unwrap();
    assert_eq!(state, BucketState::Created);
}

#[tokio::test]
async fn name_collision_is_reported_as_permanent() {
    let mut store = MockObjectStore::new();
    store.expect_list_buckets().return_once(|| Ok(vec![]));
    store
        .expect_create_bucket()
        .times(1)
        .returning(|name| Err(StoreError::NameTaken(name.to_string())));

    let err = ensure_bucket(&store, "taken-name").await.unwrap_err();
    assert!(matches!(err, BucketError::NameTaken(ref n) if n == "taken-name"));
}

#[tokio::test]
async fn listing_failure_is_a_store_error() {
    let mut store = MockObjectStore::new();
    store
        .expect_list_buckets()
        .return_once(|| Err(StoreError::Transport("dns failure".into())));
    store.expect_create_bucket().never();

    let err = ensure_bucket(&store, "trip-data-bucket").await.unwrap_err();
    assert!(matches!(err, BucketError::Store { .. }));
}

#[test]
fn bucket_names_follow_gcs_rules() {
    assert!(validate_bucket_name("de-zoomcamp-485104-bucket").is_ok());
    assert!(validate_bucket_name("ab").is_err());
    assert!(validate_bucket_name("Upper-Case").is_err());
    assert!(validate_bucket_name("-leading-dash").is_err());
    assert!(validate_bucket_name("google-owned").is_err());
}
