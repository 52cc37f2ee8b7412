// SPDX-License-Identifier: MIT OR Apache-2.0

use quire_core::{CommittedDocument, DocumentId};
use sqlx::{FromRow, query, query_as};

use crate::documents::DocumentStore;
use crate::sqlite::{SqliteError, SqliteStore, decode_u64, encode_u64};

impl DocumentStore for SqliteStore {
    type Error = SqliteError;

    async fn load_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<CommittedDocument>, Self::Error> {
        let row = self
            .execute(async |pool| {
                let row = query_as::<_, DocumentRow>(
                    "
                    SELECT
                        content,
                        committed_through,
                        committed_at
                    FROM
                        documents_v1
                    WHERE
                        document_id = ?
                    ",
                )
                .bind(document_id.as_str())
                .fetch_optional(pool)
                .await?;
                Ok(row)
            })
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => Ok(None),
        }
    }

    async fn save_document(
        &self,
        document_id: &DocumentId,
        document: &CommittedDocument,
    ) -> Result<(), Self::Error> {
        let committed_through = encode_u64("committed_through", document.committed_through)?;
        let committed_at = encode_u64("committed_at", document.committed_at)?;

        self.tx(async |tx| {
            query(
                "
                INSERT INTO
                    documents_v1 (
                        document_id,
                        content,
                        committed_through,
                        committed_at
                    )
                VALUES
                    (?, ?, ?, ?)
                ON CONFLICT(document_id) DO UPDATE SET
                    content = excluded.content,
                    committed_through = excluded.committed_through,
                    committed_at = excluded.committed_at
                ",
            )
            .bind(document_id.as_str())
            .bind(&document.content)
            .bind(committed_through)
            .bind(committed_at)
            .execute(&mut **tx)
            .await?;

            Ok(())
        })
        .await
    }
}

/// Committed document row as it is inserted in the SQLite database.
#[derive(Debug, FromRow)]
struct DocumentRow {
    content: Vec<u8>,
    committed_through: i64,
    committed_at: i64,
}

impl TryFrom<DocumentRow> for CommittedDocument {
    type Error = SqliteError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(CommittedDocument {
            content: row.content,
            committed_through: decode_u64("committed_through", row.committed_through)?,
            committed_at: decode_u64("committed_at", row.committed_at)?,
        })
    }
}
