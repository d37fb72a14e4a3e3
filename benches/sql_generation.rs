//! Edit Engine Performance Benchmarks
//!
//! Benchmarks for turning grid edits into SQL. These measure:
//! - Staging cell edits into the pending change ledger
//! - Generating a mixed batch for each dialect
//! - Single-table detection on editor queries

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use aion::edit::extract_source_table;
use aion::engine::{DatabaseCommands, Row};
use aion::{ColumnInfo, DatabaseType, EditSession, EditState, SqlChangeGenerator, Value};

const ROWS: usize = 500;

fn columns() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new("id", "int").primary_key().identity(),
        ColumnInfo::new("name", "varchar"),
        ColumnInfo::new("email", "varchar"),
        ColumnInfo::new("balance", "decimal"),
    ]
}

fn snapshot(i: usize) -> Row {
    let id = i64::try_from(i).unwrap_or(i64::MAX);
    [
        ("id".to_string(), Value::Int(id)),
        ("name".to_string(), Value::from(format!("Customer {i}"))),
        ("email".to_string(), Value::from(format!("customer{i}@example.com"))),
        ("balance".to_string(), Value::Decimal(format!("{i}.50"))),
    ]
    .into_iter()
    .collect()
}

/// A ledger with updates, deletes and inserts spread over the result
fn staged_session(rows: &[Row]) -> EditSession {
    let mut session = EditSession::new("customers", "shop", columns());
    for (i, row) in rows.iter().enumerate() {
        match i % 3 {
            0 => session.state.update_cell(i, row, "name", Value::from(format!("Renamed {i}"))).unwrap(),
            1 => session.state.delete_row(i, row),
            _ => {}
        }
    }
    for i in 0..ROWS / 10 {
        let mut values = Row::new();
        values.insert("name".to_string(), Value::from(format!("New {i}")));
        session.state.insert_row(ROWS + i, values).unwrap();
    }
    session
}

fn bench_stage_cell_edits(c: &mut Criterion) {
    let rows: Vec<Row> = (0..ROWS).map(snapshot).collect();

    c.bench_function("stage_cell_edits", |b| {
        b.iter(|| {
            let mut state = EditState::new();
            for (i, row) in rows.iter().enumerate() {
                state.update_cell(i, row, "email", Value::from("changed@example.com")).unwrap();
                state.update_cell(i, row, "balance", Value::Decimal("0.00".into())).unwrap();
            }
            black_box(state.len())
        });
    });
}

fn bench_generate(c: &mut Criterion, name: &str, commands: &dyn DatabaseCommands) {
    let rows: Vec<Row> = (0..ROWS).map(snapshot).collect();
    let session = staged_session(&rows);

    c.bench_function(name, |b| {
        b.iter(|| {
            let result =
                SqlChangeGenerator::generate(black_box(&session.source), black_box(session.state.changes()), commands);
            assert!(result.requires_transaction);
            result
        });
    });
}

#[cfg(feature = "postgres")]
fn bench_generate_postgres(c: &mut Criterion) {
    bench_generate(c, "generate_postgres", &aion::engine::postgres::PostgresCommands);
}

#[cfg(feature = "mysql")]
fn bench_generate_mysql(c: &mut Criterion) {
    bench_generate(c, "generate_mysql", &aion::engine::mysql::MySqlCommands);
}

#[cfg(feature = "sqlserver")]
fn bench_generate_sqlserver(c: &mut Criterion) {
    bench_generate(c, "generate_sqlserver", &aion::engine::sqlserver::SqlServerCommands);
}

#[cfg(feature = "document")]
fn bench_generate_document(c: &mut Criterion) {
    bench_generate(c, "generate_document", &aion::engine::document::DocumentCommands);
}

fn bench_extract_source_table(c: &mut Criterion) {
    let sql = "SELECT id,\n       name,\n       email\nFROM [dbo].[Customer Accounts]\nWHERE balance > 0\nORDER BY id";

    c.bench_function("extract_source_table", |b| {
        b.iter(|| extract_source_table(black_box(sql), DatabaseType::SqlServer));
    });
}

#[cfg(feature = "all-engines")]
criterion_group!(
    benches,
    bench_stage_cell_edits,
    bench_generate_postgres,
    bench_generate_mysql,
    bench_generate_sqlserver,
    bench_generate_document,
    bench_extract_source_table
);

#[cfg(not(feature = "all-engines"))]
criterion_group!(benches, bench_stage_cell_edits, bench_extract_source_table);

criterion_main!(benches);
