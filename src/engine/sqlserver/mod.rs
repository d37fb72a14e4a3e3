//! SQL Server Provider Implementation
//!
//! # Implementation Notes
//! - Uses `tiberius` over a tokio `TcpStream` wrapped with `tokio-util` compat
//! - Connection strings are ADO.NET style and parsed by tiberius itself
//! - Row-returning statements are detected by their leading keyword; other
//!   statements go through `execute` so the affected count is available
//! - Values are read by probing typed getters in a fixed order
//! - Plans come from `SHOWPLAN_XML` (estimated) and `STATISTICS XML` (actual)
//! - tiberius cannot send an attention request, so a cancelled statement
//!   inside a transaction is read to its end before the session is reused and
//!   reports its own outcome rather than `cancelled`. `KILL <spid>` is not an
//!   option there: it ends the session and rolls the transaction back

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tiberius::numeric::Numeric;
use tiberius::{Client, ColumnData, Config, Row as TdsRow};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::connection_string::{with_database, ConnectionString, HOST_KEYS};
use crate::engine::{
    run_cancellable, run_to_completion, ColumnInfo, DatabaseCommands, DatabaseProvider, DatabaseType, PlanFormat,
    PlanType, QueryPlan, QueryResult, Row, TransactionInfo, TransactionRegistry, Value,
};
use crate::error::{AionError, Result};

mod commands;

pub use commands::SqlServerCommands;

type TdsClient = Client<Compat<TcpStream>>;

const DEFAULT_PORT: u16 = 1433;
const SHOWPLAN_COLUMN: &str = "Microsoft SQL Server 2005 XML Showplan";
const ROW_RETURNING_KEYWORDS: &[&str] = &["SELECT", "WITH", "EXEC", "EXECUTE", "SP_"];

/// SQL Server provider
pub struct SqlServerProvider {
    commands: SqlServerCommands,
    transactions: TransactionRegistry<TdsClient>,
}

impl SqlServerProvider {
    #[must_use]
    pub fn new() -> Self {
        Self { commands: SqlServerCommands, transactions: TransactionRegistry::new() }
    }
}

impl Default for SqlServerProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseProvider for SqlServerProvider {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SqlServer
    }

    fn commands(&self) -> &dyn DatabaseCommands {
        &self.commands
    }

    async fn list_databases(&self, connection_string: &str) -> Result<Option<Vec<String>>> {
        let cs = self.rewrite_connection_string(connection_string, "master");
        let mut client = match connect(&cs).await {
            Ok(client) => client,
            Err(e) => {
                debug!(error = %e, "SQL Server connection could not be opened");
                return Ok(None);
            }
        };

        let rows = query_rows(
            &mut client,
            "SELECT name FROM sys.databases \
             WHERE name NOT IN ('master', 'tempdb', 'model', 'msdb') \
             ORDER BY name",
        )
        .await
        .map_err(|e| AionError::query_failed(format!("Failed to list databases: {e}")))?;

        Ok(Some(rows.iter().filter_map(|row| text(row, 0)).collect()))
    }

    async fn list_tables(&self, connection_string: &str, database: &str) -> Result<Vec<String>> {
        let mut client = connect(&self.rewrite_connection_string(connection_string, database)).await?;
        let rows = query_rows(
            &mut client,
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = 'dbo' AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
        )
        .await
        .map_err(|e| AionError::query_failed(format!("Failed to list tables: {e}")))?;

        Ok(rows.iter().filter_map(|row| text(row, 0)).collect())
    }

    async fn list_columns(
        &self,
        connection_string: &str,
        database: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>> {
        let mut client = connect(&self.rewrite_connection_string(connection_string, database)).await?;
        let query = r"
            SELECT
                c.COLUMN_NAME,
                c.DATA_TYPE,
                c.IS_NULLABLE,
                c.COLUMN_DEFAULT,
                c.CHARACTER_MAXIMUM_LENGTH,
                CASE WHEN pk.COLUMN_NAME IS NULL THEN 0 ELSE 1 END AS IS_PRIMARY_KEY,
                COLUMNPROPERTY(OBJECT_ID(c.TABLE_SCHEMA + '.' + c.TABLE_NAME), c.COLUMN_NAME, 'IsIdentity') AS IS_IDENTITY
            FROM INFORMATION_SCHEMA.COLUMNS c
            LEFT JOIN (
                SELECT ku.TABLE_NAME, ku.COLUMN_NAME
                FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
                    ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME
                WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' AND tc.TABLE_SCHEMA = 'dbo'
            ) pk ON c.TABLE_NAME = pk.TABLE_NAME AND c.COLUMN_NAME = pk.COLUMN_NAME
            WHERE c.TABLE_SCHEMA = 'dbo' AND c.TABLE_NAME = @P1
            ORDER BY c.ORDINAL_POSITION
        ";

        let rows = client
            .query(query, &[&table])
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to list columns: {e}")))?
            .into_first_result()
            .await
            .map_err(|e| AionError::query_failed(format!("Failed to list columns: {e}")))?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: text(row, 0).unwrap_or_default(),
                data_type: text(row, 1).unwrap_or_default(),
                is_nullable: text(row, 2).is_some_and(|v| v == "YES"),
                default_value: text(row, 3),
                max_length: row.try_get::<i32, _>(4).ok().flatten().map(i64::from),
                is_primary_key: row.try_get::<i32, _>(5).ok().flatten() == Some(1),
                is_identity: row.try_get::<i32, _>(6).ok().flatten() == Some(1),
            })
            .collect())
    }

    async fn execute_query(
        &self,
        connection_string: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> QueryResult {
        let client = tokio::select! {
            biased;
            () = cancel.cancelled() => return QueryResult::cancelled(),
            client = connect(connection_string) => client,
        };

        match client {
            Ok(mut client) => run_cancellable(cancel, execute_sql(&mut client, sql)).await,
            Err(e) => QueryResult::failed(e.message()),
        }
    }

    fn rewrite_connection_string(&self, connection_string: &str, database: &str) -> String {
        with_database(connection_string, "Database", database)
    }

    fn default_port(&self) -> Option<u16> {
        Some(DEFAULT_PORT)
    }

    fn validate_connection_string(&self, connection_string: &str) -> Result<()> {
        let cs = ConnectionString::parse(connection_string)?;
        if cs.get_non_empty(HOST_KEYS).is_none() {
            return Err(AionError::invalid_input("Server is required"));
        }
        Config::from_ado_string(connection_string)
            .map(|_| ())
            .map_err(|e| AionError::invalid_input(e.to_string()))
    }

    async fn estimated_plan(&self, connection_string: &str, sql: &str) -> QueryPlan {
        let content: Result<String> = async {
            let mut client = connect(connection_string).await?;
            batch(&mut client, "SET SHOWPLAN_XML ON").await?;
            let results = query_results(&mut client, sql).await?;
            batch(&mut client, "SET SHOWPLAN_XML OFF").await?;
            Ok(results.into_iter().flatten().find_map(first_cell_text).unwrap_or_default())
        }
        .await;
        QueryPlan::from_result(PlanType::Estimated, PlanFormat::Xml, content)
    }

    async fn actual_plan(&self, connection_string: &str, sql: &str) -> QueryPlan {
        let content: Result<String> = async {
            let mut client = connect(connection_string).await?;
            batch(&mut client, "SET STATISTICS XML ON").await?;
            let results = query_results(&mut client, sql).await?;
            batch(&mut client, "SET STATISTICS XML OFF").await?;
            Ok(results
                .into_iter()
                .filter(|set| {
                    set.first()
                        .and_then(|row| row.columns().first())
                        .is_some_and(|column| column.name() == SHOWPLAN_COLUMN)
                })
                .flatten()
                .filter_map(first_cell_text)
                .collect::<Vec<_>>()
                .join("\n"))
        }
        .await;
        QueryPlan::from_result(PlanType::Actual, PlanFormat::Xml, content)
    }

    async fn begin_transaction(&self, connection_string: &str) -> Result<TransactionInfo> {
        let mut client = connect(connection_string).await?;
        batch(&mut client, "BEGIN TRANSACTION").await?;

        let info = self.transactions.register(client).await;
        info!(transaction_id = %info.id, "SQL Server transaction started");
        Ok(info)
    }

    async fn commit_transaction(&self, transaction_id: &str) -> Result<()> {
        let mut client = self.transactions.take(transaction_id).await?;
        batch(&mut client, "COMMIT TRANSACTION").await?;
        info!(transaction_id, "SQL Server transaction committed");
        Ok(())
    }

    async fn rollback_transaction(&self, transaction_id: &str) -> Result<()> {
        let mut client = self.transactions.take(transaction_id).await?;
        batch(&mut client, "ROLLBACK TRANSACTION").await?;
        info!(transaction_id, "SQL Server transaction rolled back");
        Ok(())
    }

    async fn execute_in_transaction(
        &self,
        transaction_id: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let mut client = self.transactions.acquire(transaction_id).await?;
        // No interrupt: the statement runs to its end and the transaction stays open
        Ok(run_to_completion(cancel, execute_sql(&mut client, sql), std::future::ready(())).await)
    }
}

async fn connect(connection_string: &str) -> Result<TdsClient> {
    let config = Config::from_ado_string(connection_string)
        .map_err(|e| AionError::invalid_input(format!("Invalid SQL Server connection string: {e}")))?;

    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| AionError::connection_failed(format!("Failed to connect to SQL Server: {e}")))?;
    tcp.set_nodelay(true).ok();

    Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| AionError::connection_failed(format!("Failed to authenticate: {e}")))
}

fn returns_rows(sql: &str) -> bool {
    let head = sql.trim_start().to_ascii_uppercase();
    ROW_RETURNING_KEYWORDS.iter().any(|keyword| head.starts_with(keyword))
}

async fn execute_sql(client: &mut TdsClient, sql: &str) -> Result<QueryResult> {
    if !returns_rows(sql) {
        let result = client
            .execute(sql, &[])
            .await
            .map_err(|e| AionError::query_failed(e.to_string()))?;
        return Ok(QueryResult::affected(result.total()));
    }

    let mut stream = client
        .simple_query(sql)
        .await
        .map_err(|e| AionError::query_failed(e.to_string()))?;

    let columns: Vec<String> = stream
        .columns()
        .await
        .map_err(|e| AionError::query_failed(e.to_string()))?
        .map(|columns| columns.iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rows = stream
        .into_first_result()
        .await
        .map_err(|e| AionError::query_failed(e.to_string()))?;

    let rows = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(idx, name)| (name.clone(), tiberius_value(row, idx)))
                .collect::<Row>()
        })
        .collect();

    Ok(QueryResult::rows(columns, rows))
}

async fn batch(client: &mut TdsClient, sql: &str) -> Result<()> {
    client
        .simple_query(sql)
        .await
        .map_err(|e| AionError::query_failed(e.to_string()))?
        .into_results()
        .await
        .map_err(|e| AionError::query_failed(e.to_string()))?;
    Ok(())
}

async fn query_results(client: &mut TdsClient, sql: &str) -> Result<Vec<Vec<TdsRow>>> {
    client
        .simple_query(sql)
        .await
        .map_err(|e| AionError::query_failed(e.to_string()))?
        .into_results()
        .await
        .map_err(|e| AionError::query_failed(e.to_string()))
}

async fn query_rows(client: &mut TdsClient, sql: &str) -> Result<Vec<TdsRow>> {
    Ok(query_results(client, sql).await?.into_iter().next().unwrap_or_default())
}

fn text(row: &TdsRow, idx: usize) -> Option<String> {
    row.try_get::<&str, _>(idx).ok().flatten().map(str::to_string)
}

/// First cell of a row as text, including XML plans
fn first_cell_text(row: TdsRow) -> Option<String> {
    match row.into_iter().next()? {
        ColumnData::String(Some(text)) => Some(text.into_owned()),
        ColumnData::Xml(Some(xml)) => Some(xml.into_owned().into_string()),
        _ => None,
    }
}

/// Convert a tiberius cell into a [`Value`]
///
/// A typed getter for the wrong type errors, the right type with NULL
/// yields `Ok(None)`.
fn tiberius_value(row: &TdsRow, idx: usize) -> Value {
    macro_rules! probe {
        ($ty:ty, $map:expr) => {
            match row.try_get::<$ty, _>(idx) {
                Ok(Some(v)) => return $map(v),
                Ok(None) => return Value::Null,
                Err(_) => {}
            }
        };
    }

    probe!(bool, Value::Bool);
    probe!(u8, |v: u8| Value::Int(i64::from(v)));
    probe!(i16, |v: i16| Value::Int(i64::from(v)));
    probe!(i32, |v: i32| Value::Int(i64::from(v)));
    probe!(i64, Value::Int);
    probe!(f32, |v: f32| Value::Float(f64::from(v)));
    probe!(f64, Value::Float);
    probe!(Numeric, |v: Numeric| Value::Decimal(v.to_string()));
    probe!(&str, |v: &str| Value::Text(v.to_string()));
    probe!(uuid::Uuid, Value::Uuid);
    probe!(NaiveDateTime, Value::DateTime);
    probe!(NaiveDate, Value::Date);
    probe!(NaiveTime, Value::Time);
    probe!(DateTime<Utc>, Value::DateTimeTz);
    probe!(&[u8], |v: &[u8]| Value::Bytes(v.to_vec()));

    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> &'static str {
        "Server=tcp:localhost,1433;Database=master;User ID=sa;Password=Passw0rd!;TrustServerCertificate=true"
    }

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("  select 1"));
        assert!(returns_rows("WITH x AS (SELECT 1 AS a) SELECT * FROM x"));
        assert!(returns_rows("EXEC sp_who"));
        assert!(!returns_rows("UPDATE t SET a = 1"));
        assert!(!returns_rows("CREATE TABLE t (id int)"));
    }

    #[test]
    fn test_validate_connection_string() {
        let provider = SqlServerProvider::new();
        assert!(provider.validate_connection_string(local()).is_ok());
        let err = provider.validate_connection_string("User ID=sa;Password=x").unwrap_err();
        assert!(err.message().contains("Server is required"));
    }

    #[test]
    fn test_rewrite_uses_existing_catalog_key() {
        let provider = SqlServerProvider::new();
        assert_eq!(
            provider.rewrite_connection_string("Server=h;Initial Catalog=a;User ID=sa", "b"),
            "Server=h;Initial Catalog=b;User ID=sa"
        );
        assert_eq!(provider.default_port(), Some(1433));
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let provider = SqlServerProvider::new();
        let err = provider
            .execute_in_transaction("missing", "SELECT 1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AionError::TransactionNotFound(_)));
    }

    #[tokio::test]
    #[ignore = "Requires running SQL Server instance"]
    async fn test_execute_select_query() {
        let provider = SqlServerProvider::new();
        let result = provider
            .execute_query(local(), "SELECT CAST(1 AS INT) AS one, N'x' AS s", &CancellationToken::new())
            .await;
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.rows[0]["one"], Value::Int(1));
        assert_eq!(result.rows[0]["s"], Value::Text("x".into()));
    }

    #[tokio::test]
    #[ignore = "Requires running SQL Server instance"]
    async fn test_cancelled_statement_leaves_transaction_usable() {
        let provider = SqlServerProvider::new();
        let tx = provider.begin_transaction(local()).await.unwrap();

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });
        provider.execute_in_transaction(&tx.id, "WAITFOR DELAY '00:00:01'", &token).await.unwrap();

        let result = provider
            .execute_in_transaction(&tx.id, "SELECT CAST(1 AS INT) AS one", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.rows[0]["one"], Value::Int(1));
        provider.rollback_transaction(&tx.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running SQL Server instance"]
    async fn test_estimated_plan_is_xml() {
        let provider = SqlServerProvider::new();
        let plan = provider.estimated_plan(local(), "SELECT 1").await;
        assert_eq!(plan.format, PlanFormat::Xml);
        assert!(plan.content.contains("ShowPlanXML"));
    }
}
