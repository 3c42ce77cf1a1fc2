use super::{VectorQuery, VectorRecord, VectorStore};
use async_trait::async_trait;
use docchat_common::errors::{AppError, Result};
use docchat_common::nodes::{NodeMetadata, NodeWithScore, TextNode};
use pgvector::Vector;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;

/// Vector store over a pgvector table.
///
/// Records survive restarts on their own, so `persist` and `restore` keep
/// their no-op defaults.
pub struct PgVectorStore {
    pool: PgPool,
    table: String,
}

#[derive(sqlx::FromRow)]
struct VectorRow {
    key: String,
    index_id: String,
    ref_doc_id: Option<String>,
    text: String,
    metadata: Json<NodeMetadata>,
    embedding: Vector,
}

impl From<VectorRow> for VectorRecord {
    fn from(row: VectorRow) -> Self {
        VectorRecord {
            key: row.key.clone(),
            index_id: row.index_id,
            node: TextNode {
                id: row.key,
                ref_doc_id: row.ref_doc_id,
                text: row.text,
                metadata: row.metadata.0,
            },
            embedding: row.embedding.to_vec(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ScoredRow {
    key: String,
    ref_doc_id: Option<String>,
    text: String,
    metadata: Json<NodeMetadata>,
    score: f64,
}

fn db_err(op: &str, err: sqlx::Error) -> AppError {
    AppError::VectorStore {
        message: format!("{} failed: {}", op, err),
    }
}

impl PgVectorStore {
    /// `table` must be a plain SQL identifier
    pub fn new(pool: PgPool, table: &str) -> Result<Self> {
        let valid = !table.is_empty()
            && !table.starts_with(|c: char| c.is_ascii_digit())
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(AppError::Configuration {
                message: format!("Invalid vector store table name: {:?}", table),
            });
        }

        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn get_vector(&self, key: &str) -> Result<Option<VectorRecord>> {
        let sql = format!(
            "SELECT key, index_id, ref_doc_id, text, metadata, embedding FROM {} WHERE key = $1",
            self.table
        );
        let row = sqlx::query_as::<_, VectorRow>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("get_vector", e))?;
        Ok(row.map(VectorRecord::from))
    }

    async fn set_vector(&self, record: VectorRecord) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (key, index_id, ref_doc_id, text, metadata, embedding)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (key) DO UPDATE SET
                index_id = EXCLUDED.index_id,
                ref_doc_id = EXCLUDED.ref_doc_id,
                text = EXCLUDED.text,
                metadata = EXCLUDED.metadata,
                embedding = EXCLUDED.embedding
            "#,
            self.table
        );
        sqlx::query(&sql)
            .bind(&record.key)
            .bind(&record.index_id)
            .bind(&record.node.ref_doc_id)
            .bind(&record.node.text)
            .bind(Json(&record.node.metadata))
            .bind(Vector::from(record.embedding))
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("set_vector", e))?;
        Ok(())
    }

    async fn delete_vector(&self, key: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE key = $1", self.table);
        let result = sqlx::query(&sql)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("delete_vector", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_all_vectors(&self) -> Result<Vec<VectorRecord>> {
        let sql = format!(
            "SELECT key, index_id, ref_doc_id, text, metadata, embedding FROM {} ORDER BY key",
            self.table
        );
        let rows = sqlx::query_as::<_, VectorRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("get_all_vectors", e))?;
        Ok(rows.into_iter().map(VectorRecord::from).collect())
    }

    async fn get_nearest_vectors(&self, query: &VectorQuery) -> Result<Vec<NodeWithScore>> {
        let filters: serde_json::Map<String, serde_json::Value> = query
            .filters
            .iter()
            .map(|f| (f.key.clone(), serde_json::Value::String(f.value.clone())))
            .collect();

        let sql = format!(
            r#"
            SELECT key, ref_doc_id, text, metadata,
                   (1 - (embedding <=> $1))::float8 AS score
            FROM {}
            WHERE ($2::text IS NULL OR index_id = $2)
              AND metadata @> $3
            ORDER BY embedding <=> $1, key
            LIMIT $4
            "#,
            self.table
        );

        let rows = sqlx::query_as::<_, ScoredRow>(&sql)
            .bind(Vector::from(query.embedding.clone()))
            .bind(&query.index_id)
            .bind(Json(serde_json::Value::Object(filters)))
            .bind(query.top_k as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("get_nearest_vectors", e))?;

        debug!(results = rows.len(), top_k = query.top_k, "pgvector search");

        Ok(rows
            .into_iter()
            .map(|row| NodeWithScore {
                node: TextNode {
                    id: row.key,
                    ref_doc_id: row.ref_doc_id,
                    text: row.text,
                    metadata: row.metadata.0,
                },
                score: Some(row.score as f32),
            })
            .collect())
    }

    async fn delete_index(&self, index_id: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE index_id = $1", self.table);
        let result = sqlx::query(&sql)
            .bind(index_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("delete_index", e))?;
        Ok(result.rows_affected())
    }

    async fn count(&self, index_id: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE index_id = $1", self.table);
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(index_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("count", e))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn test_table_name_validation() {
        // Lazy pools never connect until first use
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/docchat")
            .unwrap();

        assert!(PgVectorStore::new(pool.clone(), "pg_vector_store").is_ok());
        assert!(PgVectorStore::new(pool.clone(), "vectors; DROP TABLE x").is_err());
        assert!(PgVectorStore::new(pool.clone(), "1vectors").is_err());
        assert!(PgVectorStore::new(pool, "").is_err());
    }
}
