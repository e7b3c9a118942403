use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::instrument;
use uuid::Uuid;

use tessera_authz::{Relation, RelationFilter, RelationRepository, RelationTuple};
use tessera_core::{AuthzResult, Namespace, ObjectRef, RelationId, SubjectRef};

use super::{map_row_error, map_sqlx_error};

const COLUMNS: &str = "id, object_namespace, object_id, subject_namespace, subject_id, \
                       subject_sub_relation, relation_name, created_at, updated_at";

/// Every filter field is optional; `$5` only narrows when a sub-relation is requested.
const FILTER: &str = "($1::text IS NULL OR object_namespace = $1) \
                      AND ($2::text IS NULL OR object_id = $2) \
                      AND ($3::text IS NULL OR subject_namespace = $3) \
                      AND ($4::text IS NULL OR subject_id = $4) \
                      AND ($5::text IS NULL OR subject_sub_relation = $5) \
                      AND ($6::text IS NULL OR relation_name = $6)";

const TUPLE_MATCH: &str = "subject_namespace = $1 AND subject_id = $2 \
                           AND subject_sub_relation = $3 AND relation_name = $4 \
                           AND object_namespace = $5 AND object_id = $6";

#[derive(Debug, Clone)]
pub struct PostgresRelationStore {
    pool: Arc<PgPool>,
}

impl PostgresRelationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn bind_filter<'q>(
    query: Query<'q, Postgres, PgArguments>,
    filter: &'q RelationFilter,
) -> Query<'q, Postgres, PgArguments> {
    let object = filter.object.as_ref();
    let subject = filter.subject.as_ref();
    query
        .bind(object.map(|o| o.namespace.as_str()))
        .bind(object.and_then(|o| o.id.as_deref()))
        .bind(subject.map(|s| s.namespace.as_str()))
        .bind(subject.and_then(|s| s.id.as_deref()))
        .bind(subject.and_then(|s| s.sub_relation.as_deref()))
        .bind(filter.relation_name.as_deref())
}

fn bind_tuple<'q>(
    query: Query<'q, Postgres, PgArguments>,
    tuple: &'q RelationTuple,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(tuple.subject.namespace.as_str())
        .bind(tuple.subject.id.as_str())
        .bind(tuple.subject.sub_relation.as_deref().unwrap_or(""))
        .bind(tuple.relation_name.as_str())
        .bind(tuple.object.namespace.as_str())
        .bind(tuple.object.id.as_str())
}

fn relation_from_row(row: &PgRow) -> Result<Relation, sqlx::Error> {
    let sub_relation: String = row.try_get("subject_sub_relation")?;
    let mut subject = SubjectRef::new(
        Namespace::new(row.try_get::<String, _>("subject_namespace")?),
        row.try_get::<String, _>("subject_id")?,
    );
    if !sub_relation.is_empty() {
        subject = subject.with_sub_relation(sub_relation);
    }
    Ok(Relation {
        id: RelationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        object: ObjectRef::new(
            Namespace::new(row.try_get::<String, _>("object_namespace")?),
            row.try_get::<String, _>("object_id")?,
        ),
        subject,
        relation_name: row.try_get("relation_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl RelationRepository for PostgresRelationStore {
    #[instrument(skip(self, relation), fields(relation = %relation.tuple()), err)]
    async fn insert(&self, relation: Relation) -> AuthzResult<Relation> {
        sqlx::query(
            r#"
            INSERT INTO relations (
                id, object_namespace, object_id, subject_namespace, subject_id,
                subject_sub_relation, relation_name, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(relation.id.as_uuid())
        .bind(relation.object.namespace.as_str())
        .bind(&relation.object.id)
        .bind(relation.subject.namespace.as_str())
        .bind(&relation.subject.id)
        .bind(relation.subject.sub_relation.as_deref().unwrap_or(""))
        .bind(&relation.relation_name)
        .bind(relation.created_at)
        .bind(relation.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_relation", e))?;
        Ok(relation)
    }

    #[instrument(skip(self, relations), fields(count = relations.len()), err)]
    async fn insert_missing(&self, relations: Vec<Relation>) -> AuthzResult<usize> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut written = 0;
        for relation in &relations {
            let result = sqlx::query(
                r#"
                INSERT INTO relations (
                    id, object_namespace, object_id, subject_namespace, subject_id,
                    subject_sub_relation, relation_name, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT ON CONSTRAINT relations_tuple_key DO NOTHING
                "#,
            )
            .bind(relation.id.as_uuid())
            .bind(relation.object.namespace.as_str())
            .bind(&relation.object.id)
            .bind(relation.subject.namespace.as_str())
            .bind(&relation.subject.id)
            .bind(relation.subject.sub_relation.as_deref().unwrap_or(""))
            .bind(&relation.relation_name)
            .bind(relation.created_at)
            .bind(relation.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_missing_relations", e))?;
            written += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(written)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: RelationId) -> AuthzResult<Option<Relation>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM relations WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_relation", e))?;
        row.map(|r| relation_from_row(&r))
            .transpose()
            .map_err(|e| map_row_error("get_relation", e))
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &RelationFilter) -> AuthzResult<Vec<Relation>> {
        let sql = format!("SELECT {COLUMNS} FROM relations WHERE {FILTER} ORDER BY created_at, id");
        let rows = bind_filter(sqlx::query(&sql), filter)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_relations", e))?;
        rows.iter()
            .map(relation_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_row_error("list_relations", e))
    }

    #[instrument(skip(self, tuple), fields(relation = %tuple), err)]
    async fn delete(&self, tuple: &RelationTuple) -> AuthzResult<bool> {
        let sql = format!("DELETE FROM relations WHERE {TUPLE_MATCH}");
        let result = bind_tuple(sqlx::query(&sql), tuple)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_relation", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn delete_matching(&self, filter: &RelationFilter) -> AuthzResult<usize> {
        let sql = format!("DELETE FROM relations WHERE {FILTER}");
        let result = bind_filter(sqlx::query(&sql), filter)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_relations", e))?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self, tuple), fields(relation = %tuple), err)]
    async fn exists(&self, tuple: &RelationTuple) -> AuthzResult<bool> {
        let sql = format!("SELECT EXISTS (SELECT 1 FROM relations WHERE {TUPLE_MATCH})");
        let row = bind_tuple(sqlx::query(&sql), tuple)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("relation_exists", e))?;
        row.try_get::<bool, _>(0)
            .map_err(|e| map_row_error("relation_exists", e))
    }
}
