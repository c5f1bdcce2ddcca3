//! Worker-loop tests against an in-memory fake queue (no Redis required) and
//! a real Postgres instance for the allocation side, exercising the priority
//! boost and the not-found drop path end to end.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courseflow_server::config::WorkerConfig;
use courseflow_server::db::{self, DbConfig};
use courseflow_server::error::Error;
use courseflow_server::models::QueuedRequest;
use courseflow_server::queue::{compute_score, IntakeQueue};
use courseflow_server::worker::run_allocator;
use serial_test::serial;
use sqlx::PgPool;
use tokio::sync::{watch, Mutex};

/// A single-process stand-in for the Redis sorted set, sufficient to drive
/// the worker's pop/allocate loop in tests without a live Redis instance.
#[derive(Default)]
struct FakeQueue {
    sets: Mutex<BTreeMap<i64, BTreeMap<String, (f64, QueuedRequest)>>>,
}

#[async_trait]
impl IntakeQueue for FakeQueue {
    async fn add(&self, course_id: i64, req: &QueuedRequest, score: f64) -> Result<(), Error> {
        let member = serde_json::to_string(req).unwrap();
        let mut sets = self.sets.lock().await;
        sets.entry(course_id)
            .or_default()
            .insert(member, (score, req.clone()));
        Ok(())
    }

    async fn pop_min(&self, course_id: i64) -> Result<Option<String>, Error> {
        let mut sets = self.sets.lock().await;
        let Some(set) = sets.get_mut(&course_id) else {
            return Ok(None);
        };
        let min_member = set
            .iter()
            .min_by(|a, b| a.1 .0.partial_cmp(&b.1 .0).unwrap().then(a.0.cmp(b.0)))
            .map(|(k, _)| k.clone());

        Ok(min_member.map(|m| {
            set.remove(&m);
            m
        }))
    }

    async fn rank(&self, course_id: i64, req: &QueuedRequest) -> Result<Option<u64>, Error> {
        let member = serde_json::to_string(req).unwrap();
        let sets = self.sets.lock().await;
        let Some(set) = sets.get(&course_id) else {
            return Ok(None);
        };
        if !set.contains_key(&member) {
            return Ok(None);
        }
        let target_score = set[&member].0;
        let rank = set
            .values()
            .filter(|(score, _)| *score < target_score)
            .count();
        Ok(Some(rank as u64))
    }

    async fn cardinality(&self, course_id: i64) -> Result<u64, Error> {
        let sets = self.sets.lock().await;
        Ok(sets.get(&course_id).map(|s| s.len()).unwrap_or(0) as u64)
    }

    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }
}

impl FakeQueue {
    /// Inserts a member bypassing canonical encoding, for exercising the
    /// decode-failure path with a deliberately malformed payload.
    async fn insert_raw(&self, course_id: i64, raw: &str, score: f64) {
        let mut sets = self.sets.lock().await;
        sets.entry(course_id).or_default().insert(
            raw.to_string(),
            (
                score,
                QueuedRequest {
                    student_id: -1,
                    course_id,
                    idempotency_key: String::new(),
                },
            ),
        );
    }
}

async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/courseflow_test".to_string());

    let config = DbConfig {
        database_url,
        max_connections: 10,
        min_connections: 2,
        acquire_timeout: Duration::from_secs(10),
        idle_timeout: Duration::from_secs(60),
    };

    db::init_db(config)
        .await
        .expect("Failed to initialize test database")
}

async fn cleanup(pool: &PgPool) {
    sqlx::query("TRUNCATE TABLE enrollments, waitlist, courses RESTART IDENTITY CASCADE")
        .execute(pool)
        .await
        .expect("Failed to clean up test data");
}

async fn create_course(pool: &PgPool, name: &str, capacity: i32) -> i64 {
    sqlx::query_scalar("INSERT INTO courses (name, capacity) VALUES ($1, $2) RETURNING id")
        .bind(name)
        .bind(capacity)
        .fetch_one(pool)
        .await
        .expect("Failed to create course")
}

#[tokio::test]
#[serial]
async fn higher_priority_request_is_enrolled_over_earlier_low_priority_ones() {
    let pool = setup_test_db().await;
    cleanup(&pool).await;
    let course_id = create_course(&pool, "priority_boost", 1).await;

    let queue = Arc::new(FakeQueue::default());
    let base_time = 1_000_000_000_i64;

    for student_id in 0..3 {
        let req = QueuedRequest {
            student_id,
            course_id,
            idempotency_key: format!("low-{student_id}"),
        };
        // All three low-priority requests arrive within the same 30ms window.
        let score = compute_score(base_time + student_id * 1_000, 0);
        queue.add(course_id, &req, score).await.unwrap();
    }

    let priority_req = QueuedRequest {
        student_id: 99,
        course_id,
        idempotency_key: "priority-10".to_string(),
    };
    let priority_score = compute_score(base_time + 20_000, 10);
    queue.add(course_id, &priority_req, priority_score).await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(run_allocator(
        course_id,
        pool.clone(),
        queue.clone(),
        WorkerConfig {
            empty_backoff: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
            allocation_timeout: Duration::from_secs(5),
        },
        shutdown_rx,
    ));

    // Let the worker drain all four queued items, then shut it down.
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let enrolled_student: i64 = sqlx::query_scalar(
        "SELECT student_id FROM enrollments WHERE course_id = $1",
    )
    .bind(course_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(enrolled_student, 99, "the priority-10 student should win the single seat");
}

#[tokio::test]
#[serial]
async fn not_found_course_is_dropped_without_side_effects() {
    let pool = setup_test_db().await;
    cleanup(&pool).await;

    let queue = Arc::new(FakeQueue::default());
    let missing_course_id = 4_242_424;
    let req = QueuedRequest {
        student_id: 1,
        course_id: missing_course_id,
        idempotency_key: "ghost".to_string(),
    };
    queue
        .add(missing_course_id, &req, compute_score(1, 0))
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(run_allocator(
        missing_course_id,
        pool.clone(),
        queue.clone(),
        WorkerConfig {
            empty_backoff: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
            allocation_timeout: Duration::from_secs(5),
        },
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(queue.cardinality(missing_course_id).await.unwrap(), 0);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
#[serial]
async fn malformed_member_is_dropped_without_the_error_backoff() {
    let pool = setup_test_db().await;
    cleanup(&pool).await;
    let course_id = create_course(&pool, "malformed_member_dropped", 1).await;

    let queue = Arc::new(FakeQueue::default());
    // Pops first: not valid JSON, must not trip the (deliberately huge)
    // error backoff.
    queue.insert_raw(course_id, "not-json", 0.0).await;
    // Pops second, behind the malformed member.
    let valid = QueuedRequest {
        student_id: 7,
        course_id,
        idempotency_key: "after-malformed".to_string(),
    };
    queue.add(course_id, &valid, 1_000.0).await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(run_allocator(
        course_id,
        pool.clone(),
        queue.clone(),
        WorkerConfig {
            empty_backoff: Duration::from_millis(20),
            error_backoff: Duration::from_secs(5),
            allocation_timeout: Duration::from_secs(5),
        },
        shutdown_rx,
    ));

    // If the malformed member incorrectly triggered the 5s error backoff,
    // the valid member behind it would not be processed within this window.
    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM enrollments WHERE idempotency_key = 'after-malformed'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1, "the valid member behind the malformed one should still be processed promptly");
}
