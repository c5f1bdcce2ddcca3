//! The per-course ordered intake queue.
//!
//! Backed by a Redis sorted set keyed `queue:course:{id}`. Members are the
//! canonical JSON encoding of [`QueuedRequest`]; scores are computed so that
//! priority only nudges ordering within the arrival-time window it buys,
//! never globally preempting older requests.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::QueueConfig;
use crate::error::Error;
use crate::models::QueuedRequest;

/// Microseconds a single priority level advances a request against
/// concurrently arriving lower-priority requests.
const PRIORITY_STEP_MICROS: i64 = 10_000;

fn queue_key(course_id: i64) -> String {
    format!("queue:course:{}", course_id)
}

/// Canonical member encoding: the same logical request always serializes to
/// identical bytes so a retried enqueue updates (never duplicates) the
/// queued entry.
fn encode_member(req: &QueuedRequest) -> Result<String, Error> {
    serde_json::to_string(req).map_err(|e| Error::Queue(format!("encode queued request: {e}")))
}

/// Decodes a raw popped member. Kept separate from `pop_min` itself so a
/// caller can tell "queue unreachable" (an `Err` from `pop_min`) apart from
/// "popped a malformed member" (an `Err` from this function) and handle the
/// two differently.
pub fn decode_member(raw: &str) -> Result<QueuedRequest, Error> {
    serde_json::from_str(raw).map_err(|e| Error::Queue(format!("decode queued request: {e}")))
}

/// `score = now_microseconds - priority * 10_000`.
pub fn compute_score(now_micros: i64, priority: i64) -> f64 {
    (now_micros - priority.max(0) * PRIORITY_STEP_MICROS) as f64
}

pub fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// The intake queue contract this codebase speaks against. Kept as a trait
/// so the allocator worker and intake handler can be exercised against an
/// in-memory fake in tests without a live Redis instance.
#[async_trait]
pub trait IntakeQueue: Send + Sync {
    async fn add(&self, course_id: i64, req: &QueuedRequest, score: f64) -> Result<(), Error>;
    /// Pops the minimum-score member and returns its raw encoding, undecoded.
    /// The caller is responsible for decoding it with [`decode_member`] so a
    /// connectivity failure (`Err` from this call) is never conflated with a
    /// malformed member (an `Err` from decoding a successfully popped value).
    async fn pop_min(&self, course_id: i64) -> Result<Option<String>, Error>;
    async fn rank(&self, course_id: i64, req: &QueuedRequest) -> Result<Option<u64>, Error>;
    async fn cardinality(&self, course_id: i64) -> Result<u64, Error>;
    async fn ping(&self) -> Result<(), Error>;
}

/// Redis-backed implementation of [`IntakeQueue`].
#[derive(Clone)]
pub struct RedisQueue {
    manager: ConnectionManager,
}

impl RedisQueue {
    pub async fn connect(config: &QueueConfig) -> Result<Self, Error> {
        let client = redis::Client::open(config.redis_url())?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl IntakeQueue for RedisQueue {
    async fn add(&self, course_id: i64, req: &QueuedRequest, score: f64) -> Result<(), Error> {
        let member = encode_member(req)?;
        let mut conn = self.manager.clone();
        // Plain ZADD already updates the score in place when the member
        // (the canonical encoding) already exists, so a retried enqueue
        // updates rather than duplicates the queued entry.
        let _: () = conn.zadd(queue_key(course_id), member, score).await?;
        Ok(())
    }

    async fn pop_min(&self, course_id: i64) -> Result<Option<String>, Error> {
        let mut conn = self.manager.clone();
        let popped: Vec<(String, f64)> = conn.zpopmin(queue_key(course_id), 1).await?;
        Ok(popped.into_iter().next().map(|(member, _score)| member))
    }

    async fn rank(&self, course_id: i64, req: &QueuedRequest) -> Result<Option<u64>, Error> {
        let member = encode_member(req)?;
        let mut conn = self.manager.clone();
        let rank: Option<i64> = conn.zrank(queue_key(course_id), member).await?;
        Ok(rank.map(|r| r as u64))
    }

    async fn cardinality(&self, course_id: i64) -> Result<u64, Error> {
        let mut conn = self.manager.clone();
        let count: i64 = conn.zcard(queue_key(course_id)).await?;
        Ok(count as u64)
    }

    async fn ping(&self) -> Result<(), Error> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
