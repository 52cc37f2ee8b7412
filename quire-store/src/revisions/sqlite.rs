// SPDX-License-Identifier: MIT OR Apache-2.0

use quire_core::{AuthorId, ClientId, DocumentId, Revision, Version};
use sqlx::{FromRow, query, query_as};

use crate::revisions::RevisionStore;
use crate::sqlite::{SqliteError, SqliteStore, decode_u64, encode_u64};

impl RevisionStore for SqliteStore {
    type Error = SqliteError;

    async fn append_revision(&self, revision: &Revision) -> Result<bool, Self::Error> {
        let version = encode_u64("version", revision.version)?;
        let created_at = encode_u64("created_at", revision.created_at)?;

        // Ignore insertion when version already exists (PRIMARY KEY constraint).
        self.tx(async |tx| {
            let result = query(
                "
                INSERT OR IGNORE
                INTO
                    revisions_v1 (
                        document_id,
                        version,
                        author_id,
                        client_id,
                        payload,
                        created_at
                    )
                VALUES
                    (?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(revision.document_id.as_str())
            .bind(version)
            .bind(revision.author_id.as_str())
            .bind(revision.client_id.as_str())
            .bind(&revision.payload)
            .bind(created_at)
            .execute(&mut **tx)
            .await?;

            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn get_revisions(
        &self,
        document_id: &DocumentId,
        from: Version,
        to: Option<Version>,
    ) -> Result<Vec<Revision>, Self::Error> {
        let from = encode_u64("from", from)?;
        let to = match to {
            Some(to) => encode_u64("to", to)?,
            None => i64::MAX,
        };

        let rows = self
            .execute(async |pool| {
                let rows = query_as::<_, RevisionRow>(
                    "
                    SELECT
                        document_id,
                        version,
                        author_id,
                        client_id,
                        payload,
                        created_at
                    FROM
                        revisions_v1
                    WHERE
                        document_id = ?
                        AND version >= ?
                        AND version <= ?
                    ORDER BY
                        version ASC
                    ",
                )
                .bind(document_id.as_str())
                .bind(from)
                .bind(to)
                .fetch_all(pool)
                .await?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(Revision::try_from).collect()
    }

    async fn latest_version(&self, document_id: &DocumentId) -> Result<Version, Self::Error> {
        let row: (Option<i64>,) = self
            .execute(async |pool| {
                let row: (Option<i64>,) = query_as(
                    "
                    SELECT
                        MAX(version)
                    FROM
                        revisions_v1
                    WHERE
                        document_id = ?
                    ",
                )
                .bind(document_id.as_str())
                .fetch_one(pool)
                .await?;
                Ok(row)
            })
            .await?;

        // This returns "0" (default) if no rows are in the database.
        match row.0 {
            Some(version) => decode_u64("version", version),
            None => Ok(0),
        }
    }

    async fn prune_revisions(
        &self,
        document_id: &DocumentId,
        through: Version,
    ) -> Result<u64, Self::Error> {
        let through = encode_u64("through", through)?;

        self.tx(async |tx| {
            let result = query(
                "
                DELETE FROM
                    revisions_v1
                WHERE
                    document_id = ?
                    AND version <= ?
                ",
            )
            .bind(document_id.as_str())
            .bind(through)
            .execute(&mut **tx)
            .await?;

            Ok(result.rows_affected())
        })
        .await
    }
}

/// Single revision row as it is inserted in the SQLite database.
#[derive(Debug, FromRow)]
struct RevisionRow {
    document_id: String,
    version: i64,
    author_id: String,
    client_id: String,
    payload: Vec<u8>,
    created_at: i64,
}

impl TryFrom<RevisionRow> for Revision {
    type Error = SqliteError;

    fn try_from(row: RevisionRow) -> Result<Self, Self::Error> {
        Ok(Revision {
            document_id: DocumentId::new(row.document_id)
                .map_err(|err| SqliteError::Decode("document_id".to_string(), err.into()))?,
            version: decode_u64("version", row.version)?,
            author_id: AuthorId::new(row.author_id)
                .map_err(|err| SqliteError::Decode("author_id".to_string(), err.into()))?,
            client_id: ClientId::new(row.client_id)
                .map_err(|err| SqliteError::Decode("client_id".to_string(), err.into()))?,
            payload: row.payload,
            created_at: decode_u64("created_at", row.created_at)?,
        })
    }
}
