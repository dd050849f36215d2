use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// How long a consumer counts as alive after its last heartbeat.
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(30);

/// How often a worker refreshes its heartbeat and reclaims dead consumers' messages.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// A message taken off the queue and held in the consumer's processing list
/// until it is acknowledged or requeued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: String,
}

impl Delivery {
    pub fn job_id(&self) -> Option<Uuid> {
        Uuid::parse_str(self.payload.trim()).ok()
    }
}

/// FIFO hand-off of job ids from the submission path to the worker.
///
/// Each queue handle is one consumer with its own processing list. A consumer
/// stays alive by heartbeating; only the lists of consumers whose heartbeat
/// has lapsed are reclaimed.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Take the oldest message, moving it to this consumer's processing list.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    /// Drop a finished message from the processing list.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Put a message back at the head of the line.
    async fn requeue(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Mark this consumer alive for another [`HEARTBEAT_TTL`].
    async fn heartbeat(&self) -> Result<(), QueueError>;

    /// Move messages held by consumers that stopped heartbeating to the back of
    /// the queue. Returns how many were moved.
    async fn recover_in_flight(&self) -> Result<u64, QueueError>;

    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed job queue.
///
/// Producers `LPUSH` onto `{name}`; consumers `RPOPLPUSH` into
/// `{name}:processing:{consumer}` and `LREM` once the job record is updated.
/// Live consumers are listed in `{name}:consumers` and hold an expiring
/// `{name}:heartbeat:{consumer}` key.
pub struct RedisJobQueue {
    client: redis::Client,
    queue_name: String,
    consumer_id: String,
    processing_key: String,
    heartbeat_key: String,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        let consumer_id = Uuid::new_v4().to_string();
        Ok(Self {
            client,
            processing_key: processing_key(queue_name, &consumer_id),
            heartbeat_key: heartbeat_key(queue_name, &consumer_id),
            queue_name: queue_name.to_string(),
            consumer_id,
        })
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    fn consumers_key(&self) -> String {
        format!("{}:consumers", self.queue_name)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

fn processing_key(queue_name: &str, consumer_id: &str) -> String {
    format!("{}:processing:{}", queue_name, consumer_id)
}

fn heartbeat_key(queue_name: &str, consumer_id: &str) -> String {
    format!("{}:heartbeat:{}", queue_name, consumer_id)
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn publish(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(&self.queue_name, job_id.to_string())
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        // A consumer must be visibly alive before it holds anything.
        self.heartbeat().await?;

        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .rpoplpush(&self.queue_name, &self.processing_key)
            .await
            .map_err(QueueError::Redis)?;

        Ok(payload.map(|payload| Delivery { payload }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(&self.processing_key, 1, &delivery.payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .rpush(&self.queue_name, &delivery.payload)
            .ignore()
            .lrem(&self.processing_key, 1, &delivery.payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .sadd(self.consumers_key(), &self.consumer_id)
            .ignore()
            .set_ex(&self.heartbeat_key, 1, HEARTBEAT_TTL.as_secs())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let consumers: Vec<String> = conn
            .smembers(self.consumers_key())
            .await
            .map_err(QueueError::Redis)?;

        let mut moved = 0;
        for consumer in consumers {
            if consumer == self.consumer_id {
                continue;
            }
            let alive: bool = conn
                .exists(heartbeat_key(&self.queue_name, &consumer))
                .await
                .map_err(QueueError::Redis)?;
            if alive {
                continue;
            }

            // RPOPLPUSH moves one element atomically, so two workers reclaiming
            // the same list never duplicate a message.
            let dead_list = processing_key(&self.queue_name, &consumer);
            loop {
                let payload: Option<String> = conn
                    .rpoplpush(&dead_list, &self.queue_name)
                    .await
                    .map_err(QueueError::Redis)?;
                if payload.is_none() {
                    break;
                }
                moved += 1;
            }
            conn.srem::<_, _, ()>(self.consumers_key(), &consumer)
                .await
                .map_err(QueueError::Redis)?;
            tracing::info!(consumer = %consumer, "Reclaimed processing list of dead consumer");
        }
        Ok(moved)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.queue_name).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryLists {
    /// Front is the back of the line; consumers pop from the back.
    pending: VecDeque<String>,
    /// Per-consumer processing lists, oldest delivery first.
    processing: HashMap<String, Vec<String>>,
    live: HashSet<String>,
}

/// In-process queue with the same per-consumer processing-list semantics as
/// [`RedisJobQueue`]. Handles made with [`MemoryJobQueue::consumer`] share one
/// queue, like separate worker processes sharing a Redis instance.
pub struct MemoryJobQueue {
    lists: Arc<Mutex<MemoryLists>>,
    consumer_id: String,
    fail_publish: Arc<AtomicBool>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            lists: Arc::new(Mutex::new(MemoryLists::default())),
            consumer_id: Uuid::new_v4().to_string(),
            fail_publish: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Another consumer on the same queue.
    pub fn consumer(&self) -> Self {
        Self {
            lists: self.lists.clone(),
            consumer_id: Uuid::new_v4().to_string(),
            fail_publish: self.fail_publish.clone(),
        }
    }

    /// Let this consumer's heartbeat lapse, as if its process had died.
    pub async fn stop_heartbeat(&self) {
        self.lists.lock().await.live.remove(&self.consumer_id);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Push a raw payload, bypassing the job-id typing of `publish`.
    pub async fn push_raw(&self, payload: &str) {
        self.lists.lock().await.pending.push_front(payload.to_string());
    }

    /// Queued payloads, next-to-be-received first.
    pub async fn pending(&self) -> Vec<String> {
        self.lists.lock().await.pending.iter().rev().cloned().collect()
    }

    /// Payloads held by any consumer.
    pub async fn in_flight(&self) -> Vec<String> {
        self.lists
            .lock()
            .await
            .processing
            .values()
            .flatten()
            .cloned()
            .collect()
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_first(list: Option<&mut Vec<String>>, payload: &str) {
    if let Some(list) = list {
        if let Some(pos) = list.iter().position(|p| p == payload) {
            list.remove(pos);
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn publish(&self, job_id: Uuid) -> Result<(), QueueError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable);
        }
        self.push_raw(&job_id.to_string()).await;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut lists = self.lists.lock().await;
        lists.live.insert(self.consumer_id.clone());
        let Some(payload) = lists.pending.pop_back() else {
            return Ok(None);
        };
        lists
            .processing
            .entry(self.consumer_id.clone())
            .or_default()
            .push(payload.clone());
        Ok(Some(Delivery { payload }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut lists = self.lists.lock().await;
        remove_first(lists.processing.get_mut(&self.consumer_id), &delivery.payload);
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut lists = self.lists.lock().await;
        remove_first(lists.processing.get_mut(&self.consumer_id), &delivery.payload);
        lists.pending.push_back(delivery.payload.clone());
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), QueueError> {
        self.lists.lock().await.live.insert(self.consumer_id.clone());
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let mut lists = self.lists.lock().await;
        let dead: Vec<String> = lists
            .processing
            .keys()
            .filter(|id| **id != self.consumer_id && !lists.live.contains(*id))
            .cloned()
            .collect();

        let mut moved = 0;
        for consumer in dead {
            let held = lists.processing.remove(&consumer).unwrap_or_default();
            for payload in held {
                lists.pending.push_front(payload);
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.lists.lock().await.pending.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Job queue unavailable")]
    Unavailable,
}
