//! PostgreSQL backend: one JSONB table per collection.
//!
//! Filters and updates are compiled to SQL so matching and arithmetic run on
//! the server. When a schema is bound to the collection, its top-level
//! constraints are compiled into the UPDATE's WHERE clause; rows whose new
//! document would violate them are matched but not modified.

use super::expr::{segments, Filter, Update, UpdateOp};
use super::{check_collection, ensure_id, Document, DocumentStore, UpdateResult};
use crate::config::DatabaseConfig;
use crate::error::Error;
use crate::schema::{FieldType, Schema, SchemaRegistry};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Number, Value};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Arguments, PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Bound parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Path(Vec<String>),
    Text(String),
    Json(Value),
    Int(i64),
    Float(f64),
}

/// SQL text plus its positional parameters
#[derive(Debug, Default)]
pub struct SqlBuilder {
    pub args: Vec<SqlArg>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, arg: SqlArg) -> String {
        self.args.push(arg);
        format!("${}", self.args.len())
    }

    fn path(&mut self, path: &str) -> String {
        format!("{}::text[]", self.push(SqlArg::Path(segments(path))))
    }

    fn number(&mut self, n: &Number) -> String {
        let arg = match n.as_i64() {
            Some(i) => SqlArg::Int(i),
            None => SqlArg::Float(n.as_f64().unwrap_or_default()),
        };
        format!("{}::numeric", self.push(arg))
    }

    fn json(&mut self, value: &Value) -> String {
        format!("{}::jsonb", self.push(SqlArg::Json(value.clone())))
    }

    /// Boolean expression over the jsonb expression `doc`
    pub fn filter(&mut self, filter: &Filter, doc: &str) -> String {
        match filter {
            Filter::Eq(path, Value::Null) => {
                let p = self.path(path);
                format!("({doc} #> {p} IS NULL OR {doc} #> {p} = 'null'::jsonb)")
            }
            Filter::Eq(path, value) => {
                let p = self.path(path);
                let v = self.json(value);
                format!("({doc} #> {p} = {v})")
            }
            Filter::Exists(path, present) => {
                let p = self.path(path);
                let op = if *present { "IS NOT NULL" } else { "IS NULL" };
                format!("({doc} #> {p} {op})")
            }
            Filter::In(_, values) if values.is_empty() => "FALSE".to_string(),
            Filter::In(path, values) => {
                let p = self.path(path);
                let set = self.json(&Value::Array(values.clone()));
                format!("({set} @> jsonb_build_array({doc} #> {p}))")
            }
            Filter::Gte(path, bound) => self.range(path, ">=", bound, doc),
            Filter::Lt(path, bound) => self.range(path, "<", bound, doc),
            Filter::And(clauses) if clauses.is_empty() => "TRUE".to_string(),
            Filter::And(clauses) => {
                let parts: Vec<String> = clauses.iter().map(|c| self.filter(c, doc)).collect();
                format!("({})", parts.join(" AND "))
            }
        }
    }

    fn range(&mut self, path: &str, op: &str, bound: &Number, doc: &str) -> String {
        let p = self.path(path);
        let n = self.number(bound);
        format!("(CASE WHEN jsonb_typeof({doc} #> {p}) = 'number' THEN ({doc} #> {p})::numeric END {op} {n})")
    }

    /// Updated document as a chain of LATERAL steps over the jsonb expression `doc`
    pub fn update(&mut self, update: &Update, doc: &str) -> DocPipeline {
        let mut pipeline = DocPipeline::new(doc);
        for op in &update.ops {
            match op {
                UpdateOp::Set(path, value) => {
                    self.parents(&mut pipeline, path);
                    let p = self.path(path);
                    let v = self.json(value);
                    let step = format!("jsonb_set({}, {p}, {v}, true)", pipeline.result);
                    pipeline.push(step);
                }
                UpdateOp::Unset(path) => {
                    let p = self.path(path);
                    let step = format!("({} #- {p})", pipeline.result);
                    pipeline.push(step);
                }
                UpdateOp::Inc(path, by) => {
                    self.parents(&mut pipeline, path);
                    let p = self.path(path);
                    let n = self.number(by);
                    let cur = pipeline.result.clone();
                    let step = format!(
                        "jsonb_set({cur}, {p}, to_jsonb(COALESCE(CASE WHEN jsonb_typeof({cur} #> {p}) = 'null' \
                         THEN NULL ELSE ({cur} #> {p})::numeric END, 0) + {n}), true)"
                    );
                    pipeline.push(step);
                }
            }
        }
        pipeline
    }

    /// jsonb_set only creates the last path element, so build missing parents first
    fn parents(&mut self, pipeline: &mut DocPipeline, path: &str) {
        let parts = segments(path);
        for depth in 1..parts.len() {
            let prefix = parts[..depth].join(".");
            let p = self.path(&prefix);
            let cur = pipeline.result.clone();
            let step = format!("jsonb_set({cur}, {p}, COALESCE({cur} #> {p}, '{{}}'::jsonb), true)");
            pipeline.push(step);
        }
    }

    /// Top-level schema constraints over the jsonb expression `doc`
    pub fn schema_guard(&mut self, schema: &Schema, doc: &str) -> String {
        let mut checks = Vec::new();
        for spec in &schema.fields {
            let key = self.push(SqlArg::Text(spec.name.clone()));
            let value = format!("({doc} -> {key}::text)");
            let absent = format!("({value} IS NULL OR jsonb_typeof({value}) = 'null')");

            if spec.required {
                let text = if spec.trim {
                    format!("btrim({doc} ->> {key}::text)")
                } else {
                    format!("({doc} ->> {key}::text)")
                };
                checks.push(format!(
                    "(NOT {absent} AND (jsonb_typeof({value}) <> 'string' OR {text} <> ''))"
                ));
            }

            let json_type = match spec.field_type {
                FieldType::String => "string",
                FieldType::Number | FieldType::Date => "number",
                FieldType::Boolean => "boolean",
                FieldType::Object(_) => "object",
                FieldType::Array(_) => "array",
            };
            if spec.field_type == FieldType::Date {
                // epoch millis are integral
                checks.push(format!(
                    "({absent} OR CASE WHEN jsonb_typeof({value}) = 'number' \
                     THEN scale(({value})::numeric) = 0 ELSE FALSE END)"
                ));
            } else {
                checks.push(format!("({absent} OR jsonb_typeof({value}) = '{json_type}')"));
            }

            if let Some(allowed) = &spec.allowed {
                let set = self.json(&Value::from(allowed.clone()));
                checks.push(format!("({absent} OR {set} @> jsonb_build_array({value}))"));
            }
        }

        if checks.is_empty() {
            "TRUE".to_string()
        } else {
            checks.join(" AND ")
        }
    }

    pub fn arguments(&self) -> Result<PgArguments> {
        let mut args = PgArguments::default();
        for arg in &self.args {
            let bound = match arg {
                SqlArg::Path(p) => args.add(p.clone()),
                SqlArg::Text(s) => args.add(s.clone()),
                SqlArg::Json(v) => args.add(Json(v.clone())),
                SqlArg::Int(i) => args.add(*i),
                SqlArg::Float(f) => args.add(*f),
            };
            bound.map_err(|e| Error::Operation(format!("Failed to bind parameter: {}", e)))?;
        }
        Ok(args)
    }
}

/// Ordered rewrite steps; each step reads the previous one's `doc` column
#[derive(Debug, Clone, PartialEq)]
pub struct DocPipeline {
    /// `CROSS JOIN LATERAL` clauses
    pub steps: Vec<String>,
    /// Expression for the final document
    pub result: String,
}

impl DocPipeline {
    fn new(doc: &str) -> Self {
        Self {
            steps: Vec::new(),
            result: doc.to_string(),
        }
    }

    fn push(&mut self, expr: String) {
        let alias = format!("s{}", self.steps.len() + 1);
        self.steps.push(format!("CROSS JOIN LATERAL (SELECT {expr} AS doc) {alias}"));
        self.result = format!("{alias}.doc");
    }
}

/// JSONB-backed document store
pub struct PgDocumentStore {
    pool: Arc<PgPool>,
    schemas: Arc<SchemaRegistry>,
}

impl PgDocumentStore {
    pub async fn connect(url: &str, config: &DatabaseConfig, schemas: Arc<SchemaRegistry>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| Error::Connection(format!("Failed to connect to database: {}", e)))?;

        info!("Connected to PostgreSQL database");

        Ok(Self {
            pool: Arc::new(pool),
            schemas,
        })
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(collection)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to look up collection {}: {}", collection, e)))?;
        Ok(exists)
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{collection}" (
                id UUID PRIMARY KEY,
                doc JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ))
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create collection {}: {}", collection, e)))?;
        Ok(())
    }
}

/// Statement for one bulk update returning `(matched, modified)`.
///
/// With a schema, only the fields the update writes are checked against it.
pub fn update_many_sql(
    collection: &str,
    filter: &Filter,
    update: &Update,
    schema: Option<&Schema>,
) -> (String, SqlBuilder) {
    let mut builder = SqlBuilder::new();
    let predicate = builder.filter(filter, "doc");
    let pipeline = builder.update(update, "matched.doc");
    let guard = match schema {
        Some(schema) => builder.schema_guard(&schema.touched(update.paths()), "staged.next"),
        None => "TRUE".to_string(),
    };
    let steps = pipeline.steps.join("\n            ");
    let next = &pipeline.result;

    let sql = format!(
        r#"
        WITH matched AS (
            SELECT id, doc FROM "{collection}" WHERE {predicate} FOR UPDATE
        ), staged AS (
            SELECT matched.id, matched.doc AS prev, {next} AS next
            FROM matched
            {steps}
        ), updated AS (
            UPDATE "{collection}" t
            SET doc = staged.next, updated_at = NOW()
            FROM staged
            WHERE t.id = staged.id
              AND staged.prev IS DISTINCT FROM staged.next
              AND {guard}
            RETURNING t.id
        )
        SELECT
            (SELECT COUNT(*) FROM matched) AS matched_count,
            (SELECT COUNT(*) FROM updated) AS modified_count
        "#
    );
    (sql, builder)
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> Result<UpdateResult> {
        check_collection(collection)?;
        filter.validate()?;
        update.validate()?;

        if !self.collection_exists(collection).await? {
            debug!("Collection {} does not exist; nothing to update", collection);
            return Ok(UpdateResult::default());
        }

        let schema = self.schemas.for_collection(collection);
        let (sql, builder) = update_many_sql(collection, filter, update, schema.as_deref());

        let row = sqlx::query_with(&sql, builder.arguments()?)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to update {}: {}", collection, e)))?;

        let matched: i64 = row.try_get("matched_count")?;
        let modified: i64 = row.try_get("modified_count")?;

        Ok(UpdateResult {
            matched_count: matched as u64,
            modified_count: modified as u64,
        })
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        check_collection(collection)?;
        filter.validate()?;

        if !self.collection_exists(collection).await? {
            return Ok(0);
        }

        let mut builder = SqlBuilder::new();
        let predicate = builder.filter(filter, "doc");
        let sql = format!(r#"SELECT COUNT(*) FROM "{collection}" WHERE {predicate}"#);

        let count: i64 = sqlx::query_scalar_with(&sql, builder.arguments()?)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to count {}: {}", collection, e)))?;

        Ok(count as u64)
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        check_collection(collection)?;
        filter.validate()?;

        if !self.collection_exists(collection).await? {
            return Ok(Vec::new());
        }

        let mut builder = SqlBuilder::new();
        let predicate = builder.filter(filter, "doc");
        let sql = format!(r#"SELECT doc FROM "{collection}" WHERE {predicate} ORDER BY created_at"#);

        let rows: Vec<Json<Document>> = sqlx::query_scalar_with(&sql, builder.arguments()?)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to query {}: {}", collection, e)))?;

        Ok(rows.into_iter().map(|Json(doc)| doc).collect())
    }

    async fn insert_one(&self, collection: &str, mut document: Document) -> Result<Uuid> {
        check_collection(collection)?;
        let id = ensure_id(&mut document)?;
        self.ensure_collection(collection).await?;

        sqlx::query(&format!(r#"INSERT INTO "{collection}" (id, doc) VALUES ($1, $2)"#))
            .bind(id)
            .bind(Json(&document))
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to insert into {}: {}", collection, e)))?;

        Ok(id)
    }

    async fn close(&self) -> Result<()> {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("Closed PostgreSQL connection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::entities::{self, MARKETPLACE_SALES_COLLECTION};
    use serde_json::json;

    #[test]
    fn test_filter_sql() {
        let mut builder = SqlBuilder::new();
        let sql = builder.filter(
            &Filter::one_of("status", ["returned"]).and(Filter::gte("returnDate", 5)),
            "doc",
        );

        assert_eq!(
            sql,
            "(($2::jsonb @> jsonb_build_array(doc #> $1::text[])) AND \
             (CASE WHEN jsonb_typeof(doc #> $3::text[]) = 'number' THEN (doc #> $3::text[])::numeric END >= $4::numeric))"
        );
        assert_eq!(
            builder.args,
            vec![
                SqlArg::Path(vec!["status".to_string()]),
                SqlArg::Json(json!(["returned"])),
                SqlArg::Path(vec!["returnDate".to_string()]),
                SqlArg::Int(5),
            ]
        );
    }

    #[test]
    fn test_missing_field_sql() {
        let mut builder = SqlBuilder::new();
        assert_eq!(builder.filter(&Filter::missing("status"), "doc"), "(doc #> $1::text[] IS NULL)");
        assert_eq!(builder.filter(&Filter::all(), "doc"), "TRUE");
        assert_eq!(builder.filter(&Filter::In("a".into(), vec![]), "doc"), "FALSE");
    }

    #[test]
    fn test_update_sql_chains_operations() {
        let mut builder = SqlBuilder::new();
        let pipeline = builder.update(&Update::new().set("status", "completed").unset("legacy"), "doc");
        assert_eq!(
            pipeline.steps,
            vec![
                "CROSS JOIN LATERAL (SELECT jsonb_set(doc, $1::text[], $2::jsonb, true) AS doc) s1"
                    .to_string(),
                "CROSS JOIN LATERAL (SELECT (s1.doc #- $3::text[]) AS doc) s2".to_string(),
            ]
        );
        assert_eq!(pipeline.result, "s2.doc");
    }

    #[test]
    fn test_nested_set_builds_parents() {
        let mut builder = SqlBuilder::new();
        let pipeline = builder.update(&Update::new().set("audit.by", "ops"), "doc");
        assert_eq!(
            pipeline.steps[0],
            "CROSS JOIN LATERAL (SELECT jsonb_set(doc, $1::text[], \
             COALESCE(doc #> $1::text[], '{}'::jsonb), true) AS doc) s1"
        );
        assert!(pipeline.steps[1].starts_with("CROSS JOIN LATERAL (SELECT jsonb_set(s1.doc, $2::text[]"));
        assert_eq!(builder.args[0], SqlArg::Path(vec!["audit".to_string()]));
        assert_eq!(builder.args[1], SqlArg::Path(vec!["audit".to_string(), "by".to_string()]));
    }

    #[test]
    fn test_update_sql_grows_linearly() {
        let mut update = Update::new();
        for _ in 0..12 {
            update = update.inc("stats.daily.count", 1);
        }
        let mut builder = SqlBuilder::new();
        let pipeline = builder.update(&update, "doc");

        // two parent steps plus the increment per op
        assert_eq!(pipeline.steps.len(), 36);
        let longest = pipeline.steps.iter().map(String::len).max().unwrap_or_default();
        assert!(longest < 300, "step of {} bytes", longest);
        assert_eq!(pipeline.result, "s36.doc");
    }

    #[test]
    fn test_update_statement_guards_written_fields() {
        let registry = entities::registry();
        let schema = registry.for_collection(MARKETPLACE_SALES_COLLECTION).unwrap();
        let (sql, builder) = update_many_sql(
            MARKETPLACE_SALES_COLLECTION,
            &Filter::missing("status"),
            &Update::new().set("status", "completed"),
            Some(schema.as_ref()),
        );

        assert!(sql.contains(r#"UPDATE "marketplacesales" t"#));
        assert!(sql.contains("staged.prev IS DISTINCT FROM staged.next"));
        assert!(builder.args.contains(&SqlArg::Text("status".to_string())));
        assert!(!builder.args.contains(&SqlArg::Text("orderId".to_string())));
        assert!(!builder.args.contains(&SqlArg::Text("returnDate".to_string())));
        assert!(builder
            .args
            .contains(&SqlArg::Json(json!(["completed", "returned", "cancelled", "wrongreturn"]))));
        assert!(builder.arguments().is_ok());
    }

    #[test]
    fn test_date_guard_requires_integral_millis() {
        let registry = entities::registry();
        let schema = registry.for_collection(MARKETPLACE_SALES_COLLECTION).unwrap();
        let mut builder = SqlBuilder::new();
        let guard = builder.schema_guard(&schema.touched(["returnDate"]), "next");

        assert!(guard.contains("scale(((next -> $1::text))::numeric) = 0"));
        assert_eq!(builder.args, vec![SqlArg::Text("returnDate".to_string())]);
    }

    // Runs only against a live database
    #[tokio::test]
    async fn test_pg_round_trip() -> Result<()> {
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            println!("Skipping PostgreSQL test. Set TEST_DATABASE_URL to run.");
            return Ok(());
        };

        let schemas = Arc::new(entities::registry());
        let store = PgDocumentStore::connect(&url, &DatabaseConfig::default(), schemas).await?;
        let collection = format!("test_sales_{}", Uuid::new_v4().simple());

        let doc = |v: Value| v.as_object().cloned().unwrap();
        store.insert_one(&collection, doc(json!({"orderId": "A-1"}))).await?;
        store
            .insert_one(
                &collection,
                doc(json!({"orderId": "A-2", "status": "returned", "returnDate": 1_769_594_400_000i64})),
            )
            .await?;

        let result = store
            .update_many(&collection, &Filter::missing("status"), &Update::new().set("status", "completed"))
            .await?;
        assert_eq!(result, UpdateResult { matched_count: 1, modified_count: 1 });

        let again = store
            .update_many(&collection, &Filter::missing("status"), &Update::new().set("status", "completed"))
            .await?;
        assert_eq!(again.modified_count, 0);

        let shifted = store
            .update_many(
                &collection,
                &Filter::eq("status", "returned"),
                &Update::new().inc("returnDate", -86_400_000i64),
            )
            .await?;
        assert_eq!(shifted.modified_count, 1);

        let docs = store.find(&collection, &Filter::eq("orderId", "A-2")).await?;
        assert_eq!(docs[0]["returnDate"], json!(1_769_508_000_000i64));

        sqlx::query(&format!(r#"DROP TABLE "{collection}""#))
            .execute(&*store.pool)
            .await?;
        store.close().await?;
        Ok(())
    }
}
