//! Benchmarks for the SQL text pipeline: classification, script splitting,
//! select rendering and change-set script building.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use sqlbridge::db::changes::build_change_script;
use sqlbridge::db::{SortDirection, TableChanges};
use sqlbridge::sql::{
    build_select, classify, parse_script, split_statements, Engine, Filter, FilterOp, Filters,
    OrderBy, SelectRequest,
};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

const SIMPLE_SELECT: &str = "SELECT * FROM users";

const SELECT_WITH_JOIN: &str = "SELECT u.name, o.total, o.created_at \
    FROM users u \
    JOIN orders o ON u.id = o.user_id \
    WHERE o.total > 100.00 \
    ORDER BY o.created_at DESC \
    LIMIT 50";

const CTE_QUERY: &str = "WITH active_users AS (\
        SELECT id, name, email FROM users WHERE status = 'active'\
    ), user_orders AS (\
        SELECT u.id, u.name, COUNT(o.id) AS order_count, SUM(o.total) AS total_spent \
        FROM active_users u \
        JOIN orders o ON u.id = o.user_id \
        GROUP BY u.id, u.name\
    ) \
    SELECT name, order_count, total_spent \
    FROM user_orders \
    WHERE total_spent > 1000 \
    ORDER BY total_spent DESC";

const INSERT_RETURNING: &str =
    "INSERT INTO users (name, email) VALUES ('John Doe', 'john@example.com') RETURNING id";

const UPDATE_QUERY: &str = "UPDATE employees SET salary = salary * 1.10, \
    updated_at = CURRENT_TIMESTAMP \
    WHERE department = 'Engineering' AND performance_rating > 4";

const CREATE_TABLE: &str = "CREATE TABLE audit_log (id BIGSERIAL PRIMARY KEY, \
    actor TEXT NOT NULL, action TEXT NOT NULL, at TIMESTAMPTZ DEFAULT now())";

const PG_SCRIPT: &str = "\
BEGIN;
CREATE FUNCTION touch() RETURNS trigger AS $body$
BEGIN
  NEW.updated_at := now(); -- keep; this semicolon is inside the body
  RETURN NEW;
END;
$body$ LANGUAGE plpgsql;
INSERT INTO notes (body) VALUES ('it''s; fine');
/* block ; comment */
SELECT count(*) FROM notes;
COMMIT;";

const ORACLE_SCRIPT: &str = "\
CREATE OR REPLACE PACKAGE BODY billing AS
  PROCEDURE close_period(p_id NUMBER) IS
  BEGIN
    UPDATE periods SET closed = 1 WHERE id = p_id;
    IF SQL%ROWCOUNT = 0 THEN
      RAISE_APPLICATION_ERROR(-20001, 'no such period');
    END IF;
  END close_period;
END billing;
/
DECLARE
  n NUMBER;
BEGIN
  SELECT COUNT(*) INTO n FROM periods;
END;
/
SELECT * FROM periods OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY";

// ---------------------------------------------------------------------------
// Benchmark groups
// ---------------------------------------------------------------------------

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    let cases = [
        ("simple_select", SIMPLE_SELECT),
        ("select_join", SELECT_WITH_JOIN),
        ("cte", CTE_QUERY),
        ("insert_returning", INSERT_RETURNING),
        ("update", UPDATE_QUERY),
        ("create_table", CREATE_TABLE),
    ];

    for engine in [Engine::Postgres, Engine::Oracle] {
        let dialect = engine.dialect();
        for (name, sql) in &cases {
            group.bench_with_input(BenchmarkId::new(engine.name(), name), sql, |b, sql| {
                b.iter(|| classify(black_box(sql), dialect));
            });
        }
    }

    group.finish();
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split");

    group.bench_function("postgres_script", |b| {
        b.iter(|| split_statements(black_box(PG_SCRIPT)));
    });
    group.bench_function("oracle_script", |b| {
        b.iter(|| split_statements(black_box(ORACLE_SCRIPT)));
    });

    let large = vec![PG_SCRIPT; 50].join("\n");
    group.bench_function("postgres_script_x50", |b| {
        b.iter(|| split_statements(black_box(&large)));
    });

    group.bench_function("parse_script_postgres", |b| {
        b.iter(|| parse_script(black_box(PG_SCRIPT), Engine::Postgres.dialect()));
    });

    group.finish();
}

fn bench_select_builder(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_builder");

    let mut request = SelectRequest::new(Some("public"), "orders").page(200, 50);
    request.order_by = vec![
        OrderBy::Spec {
            field: "created_at".to_string(),
            direction: SortDirection::Desc,
        },
        OrderBy::Field("id".to_string()),
    ];
    request.filters = Some(Filters::all(vec![
        Filter::new("status", FilterOp::Eq, "paid"),
        Filter::new("total", FilterOp::Ge, 100),
        Filter::new("customer", FilterOp::ILike, "%o'brien%"),
        Filter::any_of("region", vec![json!("eu"), json!("us"), json!("apac")]),
    ]));

    for engine in [Engine::Postgres, Engine::Oracle] {
        let dialect = engine.dialect();
        group.bench_with_input(BenchmarkId::new("page", engine.name()), &request, |b, r| {
            b.iter(|| build_select(dialect, black_box(r)));
        });
        let count = request.counting();
        group.bench_with_input(BenchmarkId::new("count", engine.name()), &count, |b, r| {
            b.iter(|| build_select(dialect, black_box(r)));
        });
    }

    group.finish();
}

fn bench_change_script(c: &mut Criterion) {
    let mut group = c.benchmark_group("change_script");

    let rows: Vec<_> = (0..100)
        .map(|i| json!({"name": format!("user {}", i), "email": format!("u{}@example.com", i)}))
        .collect();
    let updates: Vec<_> = (0..100)
        .map(|i| json!({"table": "users", "schema": "public",
                        "primaryKeys": [{"column": "id", "value": i}],
                        "changes": {"active": false}}))
        .collect();
    let changes: TableChanges = serde_json::from_value(json!({
        "inserts": [{"table": "users", "schema": "public", "data": rows}],
        "updates": updates,
    }))
    .unwrap_or_default();

    group.bench_function("100_inserts_100_updates", |b| {
        b.iter(|| build_change_script(Engine::Postgres.dialect(), black_box(&changes)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_classify,
    bench_split,
    bench_select_builder,
    bench_change_script,
);
criterion_main!(benches);
