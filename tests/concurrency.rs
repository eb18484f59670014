//! Integration tests for version-guarded updates
//!
//! Writers racing on the same movie must never silently overwrite each
//! other: exactly one wins per observed version and the rest see
//! `EditConflict`.

use marquee::db::movies::{Movie, MovieStore, Runtime};
use marquee::db::Database;
use marquee::MarqueeError;
use std::time::Duration;
use tempfile::TempDir;

/// Helper to create a file-backed store in a temporary directory
fn create_store() -> (MovieStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(&temp_dir.path().join("marquee.db"), Duration::from_secs(3)).unwrap();
    (MovieStore::new(db), temp_dir)
}

async fn insert_movie(store: &MovieStore) -> Movie {
    let mut movie = Movie::new(
        "The Breakfast Club",
        1985,
        Runtime(97),
        vec!["drama".to_string(), "comedy".to_string()],
    );
    store.insert(&mut movie).await.unwrap();
    movie
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_writers_one_winner() {
    let (store, _temp) = create_store();
    let movie = insert_movie(&store).await;

    let mut first = store.get(movie.id).await.unwrap();
    let mut second = store.get(movie.id).await.unwrap();
    assert_eq!(first.version, 1);
    assert_eq!(second.version, 1);

    first.title = "Writer One".into();
    second.runtime = Runtime(120);

    let (a, b) = tokio::join!(
        {
            let store = store.clone();
            async move { store.update(&mut first).await.map(|_| first) }
        },
        {
            let store = store.clone();
            async move { store.update(&mut second).await.map(|_| second) }
        },
    );

    let (winner, loser) = match (a, b) {
        (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
        (Ok(_), Ok(_)) => panic!("both writers succeeded"),
        (Err(a), Err(b)) => panic!("both writers failed: {:?} / {:?}", a, b),
    };
    assert!(matches!(loser, MarqueeError::EditConflict));
    assert_eq!(winner.version, 2);

    // The stored record is exactly the winner's write
    let stored = store.get(movie.id).await.unwrap();
    assert_eq!(stored, winner);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_writers_on_same_version() {
    let (store, _temp) = create_store();
    let movie = insert_movie(&store).await;

    // Every writer observes version 1 before any of them writes
    let mut copies = vec![];
    for _ in 0..8 {
        copies.push(store.get(movie.id).await.unwrap());
    }
    assert!(copies.iter().all(|c| c.version == 1));

    let mut handles = vec![];
    for (i, mut copy) in copies.into_iter().enumerate() {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            copy.title = format!("Writer {}", i);
            store.update(&mut copy).await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => successes += 1,
            Err(MarqueeError::EditConflict) => conflicts += 1,
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(store.get(movie.id).await.unwrap().version, 2);
}

#[tokio::test]
async fn test_retry_after_conflict_succeeds() {
    let (store, _temp) = create_store();
    let movie = insert_movie(&store).await;

    let mut stale = store.get(movie.id).await.unwrap();
    let mut fresh = store.get(movie.id).await.unwrap();
    fresh.year = 1986;
    store.update(&mut fresh).await.unwrap();

    stale.title = "Retitled".into();
    let err = store.update(&mut stale).await.unwrap_err();
    assert!(matches!(err, MarqueeError::EditConflict));

    // Re-read, re-apply, write again
    let mut reread = store.get(movie.id).await.unwrap();
    reread.title = "Retitled".into();
    store.update(&mut reread).await.unwrap();

    let stored = store.get(movie.id).await.unwrap();
    assert_eq!(stored.title, "Retitled");
    assert_eq!(stored.year, 1986);
    assert_eq!(stored.version, 3);
}

#[tokio::test]
async fn test_update_after_delete_is_conflict() {
    let (store, _temp) = create_store();
    let movie = insert_movie(&store).await;

    let mut copy = store.get(movie.id).await.unwrap();
    store.delete(movie.id).await.unwrap();

    copy.title = "Ghost".into();
    let err = store.update(&mut copy).await.unwrap_err();
    assert!(matches!(err, MarqueeError::EditConflict));
}
