//! Contract shared by every log store strategy.
//!
//! The SQLite store runs against an in-memory database. The PostgreSQL store
//! runs only when `FERRY_TEST_POSTGRES_URL` points at a scratch database.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use ferry_core::domain::log::{BuildId, NewLogLine};
use ferry_server::db;
use ferry_server::repository::{LogStore, PgLogStore, SqliteLogStore, StoreError};
use proptest::prelude::*;
use proptest::test_runner::TestRunner;

// =============================================================================
// Fixtures
// =============================================================================

enum Fixture {
    Sqlite(SqliteLogStore),
    Postgres(PgLogStore),
}

impl Fixture {
    async fn sqlite() -> Self {
        let pool = db::create_sqlite_pool("sqlite::memory:").await.unwrap();
        let store = SqliteLogStore::new(pool);
        store.ensure_schema().await.unwrap();
        Fixture::Sqlite(store)
    }

    async fn postgres() -> Option<Self> {
        let url = std::env::var("FERRY_TEST_POSTGRES_URL").ok()?;
        Some(Self::postgres_at(&url).await)
    }

    async fn postgres_at(url: &str) -> Self {
        let pool = db::create_pg_pool(url).await.unwrap();
        let store = PgLogStore::new(pool);
        store.ensure_schema().await.unwrap();
        Fixture::Postgres(store)
    }

    fn store(&self) -> &dyn LogStore {
        match self {
            Fixture::Sqlite(store) => store,
            Fixture::Postgres(store) => store,
        }
    }

    async fn add_builds(&self, build_ids: &[BuildId]) {
        for build_id in build_ids {
            match self {
                Fixture::Sqlite(store) => {
                    sqlx::query("INSERT OR IGNORE INTO build (build_id) VALUES (?)")
                        .bind(*build_id as i64)
                        .execute(store.pool())
                        .await
                        .unwrap();
                }
                Fixture::Postgres(store) => {
                    sqlx::query("INSERT INTO build (build_id) VALUES ($1) ON CONFLICT DO NOTHING")
                        .bind(*build_id as i64)
                        .execute(store.pool())
                        .await
                        .unwrap();
                }
            }
        }
    }
}

/// Build ids unique to one test run, so runs against a shared PostgreSQL
/// database never see each other's builds.
fn fresh_base() -> BuildId {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_micros() as u64
        % 1_000_000_000_000;
    seed * 1_000 + NEXT.fetch_add(100, Ordering::Relaxed) % 1_000
}

/// Timestamps at microsecond precision survive every backend unchanged.
fn at(seconds: i64, micros: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, micros * 1_000).unwrap()
}

fn line(build_id: BuildId, message: &str, seconds: i64) -> NewLogLine {
    NewLogLine::new(build_id, message, at(seconds, 0))
}

// =============================================================================
// Contract
// =============================================================================

/// Insert `lines` and check the result against the builds that exist.
async fn check_insert_contract(
    store: &dyn LogStore,
    existing: &HashSet<BuildId>,
    lines: Vec<NewLogLine>,
) {
    let expected: Vec<NewLogLine> = lines
        .iter()
        .filter(|line| existing.contains(&line.build_id))
        .cloned()
        .collect();

    let persisted = store.insert_batch(lines).await.unwrap();

    assert_eq!(persisted.len(), expected.len());
    for (persisted, expected) in persisted.iter().zip(&expected) {
        assert_eq!(persisted.build_id, expected.build_id);
        assert_eq!(persisted.message, expected.message);
        assert_eq!(persisted.timestamp, expected.timestamp);
    }
    for pair in persisted.windows(2) {
        assert!(pair[0].log_id < pair[1].log_id, "ids must strictly increase");
    }
}

async fn contract_full_batch(fixture: &Fixture) {
    let build = fresh_base() + 1;
    fixture.add_builds(&[build]).await;
    let lines: Vec<_> = (0..25).map(|i| line(build, &format!("line {i}"), i)).collect();

    check_insert_contract(fixture.store(), &HashSet::from([build]), lines).await;
}

async fn contract_missing_build_is_dropped(fixture: &Fixture) {
    let base = fresh_base();
    let (present, missing) = (base + 1, base + 2);
    fixture.add_builds(&[present]).await;
    let lines = vec![
        line(present, "a", 1),
        line(missing, "ghost", 2),
        line(present, "b", 3),
        line(missing, "ghost again", 4),
    ];

    check_insert_contract(fixture.store(), &HashSet::from([present]), lines).await;
    assert!(fixture.store().find_by_build(missing, None).await.unwrap().is_empty());
}

async fn contract_only_missing_builds(fixture: &Fixture) {
    let missing = fresh_base() + 999;
    let persisted = fixture
        .store()
        .insert_batch(vec![line(missing, "a", 1), line(missing, "b", 2)])
        .await
        .unwrap();

    assert!(persisted.is_empty());
}

async fn contract_empty_batch(fixture: &Fixture) {
    assert!(fixture.store().insert_batch(Vec::new()).await.unwrap().is_empty());
}

async fn contract_ids_increase_across_batches(fixture: &Fixture) {
    let build = fresh_base() + 1;
    fixture.add_builds(&[build]).await;

    let first = fixture
        .store()
        .insert_batch(vec![line(build, "a", 1), line(build, "b", 2)])
        .await
        .unwrap();
    let second = fixture
        .store()
        .insert_batch(vec![line(build, "c", 3)])
        .await
        .unwrap();

    assert!(first[1].log_id < second[0].log_id);
}

async fn contract_find_by_build(fixture: &Fixture) {
    let base = fresh_base();
    let (build, other) = (base + 1, base + 2);
    fixture.add_builds(&[build, other]).await;

    let persisted = fixture
        .store()
        .insert_batch(vec![
            line(build, "a", 1),
            line(other, "x", 2),
            line(build, "b", 3),
            line(build, "c", 4),
        ])
        .await
        .unwrap();

    let all = fixture.store().find_by_build(build, None).await.unwrap();
    let messages: Vec<&str> = all.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["a", "b", "c"]);

    let after_first = fixture
        .store()
        .find_by_build(build, Some(persisted[0].log_id))
        .await
        .unwrap();
    let messages: Vec<&str> = after_first.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["b", "c"]);
}

async fn contract_out_of_range_build_id(fixture: &Fixture) {
    let result = fixture
        .store()
        .insert_batch(vec![line(u64::MAX, "huge", 1)])
        .await;

    assert!(matches!(result, Err(StoreError::BuildIdOutOfRange(u64::MAX))));
}

async fn run_contract(fixture: &Fixture) {
    contract_full_batch(fixture).await;
    contract_missing_build_is_dropped(fixture).await;
    contract_only_missing_builds(fixture).await;
    contract_empty_batch(fixture).await;
    contract_ids_increase_across_batches(fixture).await;
    contract_find_by_build(fixture).await;
    contract_out_of_range_build_id(fixture).await;
}

#[tokio::test]
async fn test_sqlite_store_contract() {
    run_contract(&Fixture::sqlite().await).await;
}

#[tokio::test]
async fn test_postgres_store_contract() {
    let Some(fixture) = Fixture::postgres().await else {
        eprintln!("FERRY_TEST_POSTGRES_URL not set, skipping PostgreSQL contract");
        return;
    };
    run_contract(&fixture).await;
}

// =============================================================================
// Property-based contract
// =============================================================================

/// (build offset, message, seconds, micros)
fn arb_line() -> impl Strategy<Value = (u64, String, i64, u32)> {
    (
        1u64..6,
        "[ -~]{0,40}",
        0i64..4_000_000_000,
        0u32..1_000_000,
    )
}

fn arb_case() -> impl Strategy<Value = (Vec<u64>, Vec<(u64, String, i64, u32)>)> {
    (
        prop::collection::vec(1u64..6, 0..5),
        prop::collection::vec(arb_line(), 0..40),
    )
}

/// Run one generated case against a fresh store on its own runtime.
fn run_property_case(postgres_url: Option<&str>, existing: Vec<u64>, lines: Vec<(u64, String, i64, u32)>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let fixture = match postgres_url {
            Some(url) => Fixture::postgres_at(url).await,
            None => Fixture::sqlite().await,
        };

        let base = fresh_base();
        let existing: HashSet<BuildId> = existing.into_iter().map(|k| base + k).collect();
        let build_ids: Vec<BuildId> = existing.iter().copied().collect();
        fixture.add_builds(&build_ids).await;

        let lines = lines
            .into_iter()
            .map(|(k, message, seconds, micros)| {
                NewLogLine::new(base + k, message, at(seconds, micros))
            })
            .collect();

        check_insert_contract(fixture.store(), &existing, lines).await;
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_sqlite_persists_exactly_lines_of_existing_builds((existing, lines) in arb_case()) {
        run_property_case(None, existing, lines);
    }
}

#[test]
fn prop_postgres_persists_exactly_lines_of_existing_builds() {
    let Ok(url) = std::env::var("FERRY_TEST_POSTGRES_URL") else {
        eprintln!("FERRY_TEST_POSTGRES_URL not set, skipping PostgreSQL property run");
        return;
    };

    let mut runner = TestRunner::new(ProptestConfig::with_cases(32));
    runner
        .run(&arb_case(), |(existing, lines)| {
            run_property_case(Some(&url), existing, lines);
            Ok(())
        })
        .unwrap();
}
