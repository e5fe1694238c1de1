//! PostgreSQL store
//!
//! Identifiers are validated and quoted; every value, including date bounds and filter
//! operands, is a bound parameter. Each call checks a connection (or a transaction) out
//! of the pool and returns it when the call ends, on success and on error alike.

use super::Store;
use crate::error::{Result, StoreError};
use crate::ident::{quote_ident, IdentifierAllowList};
use crate::query::EventQuery;
use crate::table::{Column, ColumnType, Table, TableRef};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use riskfold_core::{Filter, FilterOp, FilterValue, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as _, Postgres, QueryBuilder, Row, TypeInfo};

/// Postgres caps bind parameters per statement at 65535
const BIND_LIMIT: usize = 65_535;

/// PostgreSQL store backend
pub struct PostgresStore {
    pool: PgPool,

    /// When set, source queries may only touch configured tables and columns
    allow_list: Option<IdentifierAllowList>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            allow_list: None,
        }
    }

    /// Connect a pool to `url`
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let max_connections = max_connections.max(1);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to PostgreSQL: {}", e)))?;
        tracing::info!(max_connections, "Created PostgreSQL connection pool");
        Ok(Self::new(pool))
    }

    pub fn with_allow_list(mut self, allow_list: IdentifierAllowList) -> Self {
        self.allow_list = Some(allow_list);
        self
    }
}

fn qualified(table: &TableRef) -> Result<String> {
    Ok(format!(
        "{}.{}",
        quote_ident(&table.namespace)?,
        quote_ident(&table.name)?
    ))
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Integer => "BIGINT",
        ColumnType::Float => "DOUBLE PRECISION",
        ColumnType::Text => "TEXT",
        ColumnType::Bool => "BOOLEAN",
        ColumnType::Date => "DATE",
    }
}

fn column_type(type_name: &str) -> ColumnType {
    match type_name {
        "INT2" | "INT4" | "INT8" => ColumnType::Integer,
        "FLOAT4" | "FLOAT8" | "NUMERIC" => ColumnType::Float,
        "DATE" | "TIMESTAMP" | "TIMESTAMPTZ" => ColumnType::Date,
        "BOOL" => ColumnType::Bool,
        _ => ColumnType::Text,
    }
}

fn bind_value(builder: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Null => builder.push("NULL"),
        Value::Bool(b) => builder.push_bind(*b),
        Value::Number(n) => builder.push_bind(*n),
        Value::Date(d) => builder.push_bind(*d),
        Value::Text(s) => builder.push_bind(s.clone()),
    };
}

/// Append a filter as a boolean SQL expression
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) -> Result<()> {
    let column = quote_ident(&filter.column)?;
    match filter.op {
        FilterOp::IsNull | FilterOp::NotNull => {
            builder.push(format!("{} {}", column, filter.op.sql()));
        }
        FilterOp::In | FilterOp::NotIn => {
            let values: Vec<&Value> = filter
                .value
                .values()
                .into_iter()
                .filter(|v| !v.is_null())
                .collect();
            if values.is_empty() {
                // IN () is a syntax error; the empty list matches nothing non-null
                match filter.op {
                    FilterOp::In => builder.push("FALSE"),
                    _ => builder.push(format!("{} IS NOT NULL", column)),
                };
            } else {
                builder.push(format!("{} {} (", column, filter.op.sql()));
                for (i, value) in values.into_iter().enumerate() {
                    if i > 0 {
                        builder.push(", ");
                    }
                    bind_value(builder, value);
                }
                builder.push(")");
            }
        }
        op => match &filter.value {
            FilterValue::One(value) if !value.is_null() => {
                builder.push(format!("{} {} ", column, op.sql()));
                bind_value(builder, value);
            }
            _ => {
                builder.push("FALSE");
            }
        },
    }
    Ok(())
}

/// `SELECT` of an event query. Date bounds compare the column's calendar date, so a
/// timestamp on the bound day counts as that day, as in decoded rows.
fn events_sql(query: &EventQuery) -> Result<QueryBuilder<'static, Postgres>> {
    let table = qualified(&query.table)?;
    let date_column = quote_ident(&query.date_column)?;
    let columns = query
        .columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Result<Vec<_>>>()?;

    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "SELECT {} FROM {} WHERE TRUE",
        columns.join(", "),
        table
    ));
    if let Some(upper) = query.on_or_before {
        builder.push(format!(" AND {}::date <= ", date_column));
        builder.push_bind(upper);
    }
    if let Some(lower) = query.after {
        builder.push(format!(" AND {}::date > ", date_column));
        builder.push_bind(lower);
    }
    for filter in &query.filters {
        builder.push(" AND (");
        push_filter(&mut builder, filter)?;
        builder.push(")");
    }
    Ok(builder)
}

fn decode_cell(row: &PgRow, idx: usize, type_name: &str) -> Result<Value> {
    let value = match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(|v| Value::from(i64::from(v))),
        "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(|v| Value::from(i64::from(v))),
        "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx)?.map(|v| Value::from(f64::from(v))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(Value::from),
        "NUMERIC" => row
            .try_get::<Option<bigdecimal::BigDecimal>, _>(idx)?
            .and_then(|bd| bd.to_string().parse::<f64>().ok())
            .map(Value::from),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(idx)?.map(Value::from),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|dt| Value::from(dt.date())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|dt| Value::from(dt.date_naive())),
        "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(Value::from),
        _ => row.try_get::<Option<String>, _>(idx)?.map(Value::from),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn decode_rows(rows: Vec<PgRow>, requested: &[String]) -> Result<Table> {
    let Some(first) = rows.first() else {
        return Ok(Table::new(
            requested
                .iter()
                .map(|name| Column::new(name.clone(), ColumnType::Text))
                .collect(),
        ));
    };

    let type_names: Vec<String> = first
        .columns()
        .iter()
        .map(|c| c.type_info().name().to_string())
        .collect();
    let mut table = Table::new(
        first
            .columns()
            .iter()
            .zip(&type_names)
            .map(|(c, t)| Column::new(c.name().to_string(), column_type(t)))
            .collect(),
    );

    for row in &rows {
        let mut values = Vec::with_capacity(type_names.len());
        for (idx, type_name) in type_names.iter().enumerate() {
            values.push(decode_cell(row, idx, type_name)?);
        }
        table.rows.push(values);
    }
    Ok(table)
}

/// Map undefined-table/column database errors onto store errors
fn query_error(err: sqlx::Error, table: &TableRef) -> StoreError {
    if let Some(db) = err.as_database_error() {
        match db.code().as_deref() {
            Some("42P01") => return StoreError::UnknownTable(table.to_string()),
            Some("42703") => {
                return StoreError::UnknownColumn {
                    table: table.to_string(),
                    column: db.message().to_string(),
                }
            }
            _ => {}
        }
    }
    StoreError::Backend(err.to_string())
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn fetch_events(&self, query: &EventQuery) -> Result<Table> {
        if let Some(allow_list) = &self.allow_list {
            allow_list.check(query)?;
        }
        let mut builder = events_sql(query)?;
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error(e, &query.table))?;
        tracing::debug!(table = %query.table, rows = rows.len(), "Fetched events");
        decode_rows(rows, &query.columns)
    }

    async fn replace_table(&self, table: &TableRef, data: Table) -> Result<()> {
        let name = qualified(table)?;
        data.check(&table.to_string())?;
        let columns = data
            .columns
            .iter()
            .map(|c| Ok((quote_ident(&c.name)?, c.ty)))
            .collect::<Result<Vec<_>>>()?;
        let column_list = columns
            .iter()
            .map(|(c, _)| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let definitions = columns
            .iter()
            .map(|(c, ty)| format!("{} {}", c, sql_type(*ty)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", name))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("CREATE TABLE {} ({})", name, definitions))
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error(e, table))?;

        let types: Vec<ColumnType> = data.columns.iter().map(|c| c.ty).collect();
        let rows_per_insert = (BIND_LIMIT / types.len().max(1)).max(1);
        for chunk in data.rows.chunks(rows_per_insert) {
            let mut builder =
                QueryBuilder::<Postgres>::new(format!("INSERT INTO {} ({}) ", name, column_list));
            builder.push_values(chunk, |mut b, row| {
                for (value, ty) in row.iter().zip(&types) {
                    match ty {
                        ColumnType::Integer => b.push_bind(value.as_i64()),
                        ColumnType::Float => b.push_bind(value.as_f64()),
                        ColumnType::Text => b.push_bind(value.to_category()),
                        ColumnType::Bool => b.push_bind(value.as_bool()),
                        ColumnType::Date => b.push_bind(value.as_date()),
                    };
                }
            });
            builder.build().execute(&mut *tx).await?;
        }

        if !data.unique_key.is_empty() {
            let key = data
                .unique_key
                .iter()
                .map(|k| quote_ident(k))
                .collect::<Result<Vec<_>>>()?;
            sqlx::query(&format!("CREATE UNIQUE INDEX ON {} ({})", name, key.join(", ")))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::debug!(table = %table, rows = data.rows.len(), "Replaced table");
        Ok(())
    }

    async fn read_table(&self, table: &TableRef, filters: &[Filter]) -> Result<Table> {
        let name = qualified(table)?;
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT * FROM {} WHERE TRUE", name));
        for filter in filters {
            builder.push(" AND (");
            push_filter(&mut builder, filter)?;
            builder.push(")");
        }
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error(e, table))?;
        decode_rows(rows, &[])
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let namespace = quote_ident(namespace)?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", namespace))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<()> {
        let namespace = quote_ident(namespace)?;
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", namespace))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_tables(&self, namespace: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = $1 ORDER BY table_name",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(StoreError::from))
            .collect()
    }
}
