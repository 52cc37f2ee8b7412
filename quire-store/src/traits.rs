// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

/// Traits to implement database transaction provider.
///
/// To guard against sharing transactions unknowingly across unrelated database queries, a concept
/// of a "permit" was introduced which does not protect from misuse but helps to make "holding" a
/// transaction explicit.
pub trait Transaction {
    type Error: Error + Send + Sync + 'static;

    type Permit: Send;

    /// Begins a transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Permit, Self::Error>> + Send;

    /// Rolls back the transaction and with that all uncommitted changes.
    fn rollback(
        &self,
        permit: Self::Permit,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Commits the transaction.
    fn commit(&self, permit: Self::Permit) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
