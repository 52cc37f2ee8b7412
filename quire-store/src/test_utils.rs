// SPDX-License-Identifier: MIT OR Apache-2.0

/// Macro to run the same test logic against all store backend implementations.
///
/// This macro takes a closure that will be executed against each store type:
/// - In-memory store (`MemoryStore`)
/// - SQLite store (`SqliteStore`) using a temporary in-memory database
///
/// Writes in the test body need to be wrapped in a transaction, as they would be in production
/// code.
///
/// ## Example
///
/// ```rust
/// # use quire_core::DocumentId;
/// # use quire_store::{assert_all_stores, RevisionStore};
/// # async fn run() {
/// assert_all_stores!(|store| async {
///     let document_id = DocumentId::new("doc").unwrap();
///     assert_eq!(store.latest_version(&document_id).await.unwrap(), 0);
/// });
/// # }
/// ```
#[macro_export]
macro_rules! assert_all_stores {
    (|$store:ident| $test_body:expr) => {
        // Test with MemoryStore.
        {
            let $store = $crate::memory::MemoryStore::default();
            $test_body.await;
        }

        // Test with SqliteStore.
        {
            let $store = $crate::sqlite::SqliteStore::temporary().await;
            $test_body.await;
        }
    };
}
