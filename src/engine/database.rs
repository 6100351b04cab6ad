//! DATABASE ノードの外部ストア
//!
//! # 責務
//!
//! DATABASE ノードの設定に従って、外部のリレーショナルデータベースに1文を発行します。
//!
//! - 接続は呼び出しごとに新規に開き、発行後すぐに閉じる（プールやノードをまたぐトランザクションはない）
//! - SELECT: 行を「列名 → 値」のオブジェクトのリストとして返す
//! - INSERT / UPDATE / DELETE: 影響行数を返す
//!
//! エラーはすべて実行の失敗になります（DATABASE ノードに `on_error` はありません）。

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use tracing::debug;

use crate::config::node::DatabaseNode;
use crate::error::DatabaseError;

/// データベースクライアント
///
/// エグゼキューターと外部ストアの境界です。
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// ノードの `query` を1回実行する
    ///
    /// # 戻り値
    ///
    /// - SELECT: 行オブジェクトのリスト（`Value::Array`）
    /// - それ以外: 影響行数（`Value::Number`）
    async fn execute(&self, node: &DatabaseNode) -> Result<Value, DatabaseError>;
}

/// MySQL クライアント（sqlx）
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlClient;

impl MySqlClient {
    pub fn new() -> Self {
        Self
    }

    fn options(node: &DatabaseNode) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&node.host)
            .port(node.port)
            .username(&node.user)
            .password(&node.password);
        if !node.database.is_empty() {
            options = options.database(&node.database);
        }
        options
    }
}

#[async_trait]
impl DatabaseClient for MySqlClient {
    async fn execute(&self, node: &DatabaseNode) -> Result<Value, DatabaseError> {
        let mut conn = MySqlConnection::connect_with(&Self::options(node))
            .await
            .map_err(|source| DatabaseError::Connect {
                host: node.host.clone(),
                port: node.port,
                source,
            })?;

        debug!(host = %node.host, operation = ?node.operation, "executing database statement");

        let result = if node.operation.returns_rows() {
            match sqlx::query(&node.query).fetch_all(&mut conn).await {
                Ok(rows) => rows_to_json(&rows),
                Err(e) => Err(DatabaseError::Query(e)),
            }
        } else {
            sqlx::query(&node.query)
                .execute(&mut conn)
                .await
                .map(|done| Value::from(done.rows_affected()))
                .map_err(DatabaseError::Query)
        };

        // 結果に関係なく接続は閉じる。close の失敗は結果を変えない
        if let Err(e) = conn.close().await {
            debug!(error = %e, "failed to close database connection");
        }

        result
    }
}

fn rows_to_json(rows: &[MySqlRow]) -> Result<Value, DatabaseError> {
    rows.iter()
        .map(|row| {
            let mut object = Map::with_capacity(row.columns().len());
            for column in row.columns() {
                object.insert(column.name().to_string(), column_value(row, column.ordinal())?);
            }
            Ok(Value::Object(object))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn column_value(row: &MySqlRow, index: usize) -> Result<Value, DatabaseError> {
    let raw = row.try_get_raw(index).map_err(DatabaseError::Query)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    let decode = |e: sqlx::Error| DatabaseError::Decode(format!("{} ({})", e, type_name));

    let value = match type_name.as_str() {
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(index).map_err(decode)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::from(row.try_get::<i64, _>(index).map_err(decode)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => Value::from(row.try_get::<u64, _>(index).map_err(decode)?),
        "FLOAT" => Value::from(f64::from(row.try_get::<f32, _>(index).map_err(decode)?)),
        "DOUBLE" => Value::from(row.try_get::<f64, _>(index).map_err(decode)?),
        "DATETIME" | "TIMESTAMP" => {
            let ts = row
                .try_get::<chrono::NaiveDateTime, _>(index)
                .map_err(decode)?;
            Value::String(ts.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        "DATE" => Value::String(
            row.try_get::<chrono::NaiveDate, _>(index)
                .map_err(decode)?
                .to_string(),
        ),
        "TIME" => Value::String(
            row.try_get::<chrono::NaiveTime, _>(index)
                .map_err(decode)?
                .to_string(),
        ),
        "DECIMAL" => {
            let text = lossy_text(row, index)?;
            text.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::String(text))
        }
        "JSON" => {
            let text = lossy_text(row, index)?;
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        }
        _ => Value::String(lossy_text(row, index)?),
    };
    Ok(value)
}

fn lossy_text(row: &MySqlRow, index: usize) -> Result<String, DatabaseError> {
    let bytes: Vec<u8> = row
        .try_get_unchecked(index)
        .map_err(|e| DatabaseError::Decode(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
