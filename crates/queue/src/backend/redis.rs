//! Redis-backed durable job queue.
//!
//! Layout under `{prefix}:{queue}`:
//!
//! | key          | type       | content                              |
//! |--------------|------------|--------------------------------------|
//! | `:jobs`      | hash       | post id -> job JSON                  |
//! | `:scheduled` | sorted set | post id scored by run-at (ms)        |
//! | `:active`    | sorted set | post id scored by lease deadline (ms)|
//! | `:dead`      | hash       | post id -> dead-letter JSON          |
//!
//! Each operation is a single Lua script, so Redis applies it atomically and
//! a reschedule never leaves two live jobs for one post.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fred::clients::Client;
use fred::interfaces::{ClientLike, HashesInterface, KeysInterface, LuaInterface};
use fred::types::config::Config as RedisConfig;
use tracing::info;

use super::{DeadJob, JobQueue, score};
use crate::error::QueueError;
use crate::job::{JobCounts, PublishJob};

const SCHEDULE: &str = r"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
return 1
";

const RESCHEDULE: &str = r"
local previous = redis.call('HGET', KEYS[1], ARGV[1])
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
return previous
";

const CANCEL: &str = r"
redis.call('ZREM', KEYS[2], ARGV[1])
return redis.call('HDEL', KEYS[1], ARGV[1])
";

// A post that still holds a lease is skipped and stays scheduled until the
// running attempt settles or its lease is reaped.
const FETCH_DUE: &str = r"
local offset = 0
while true do
  local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', offset, 32)
  if #due == 0 then
    return false
  end
  for _, post_id in ipairs(due) do
    if not redis.call('ZSCORE', KEYS[3], post_id) then
      redis.call('ZREM', KEYS[1], post_id)
      local raw = redis.call('HGET', KEYS[2], post_id)
      if raw then
        local job = cjson.decode(raw)
        job.attempts = (tonumber(job.attempts) or 0) + 1
        raw = cjson.encode(job)
        redis.call('HSET', KEYS[2], post_id, raw)
        redis.call('ZADD', KEYS[3], ARGV[2], post_id)
        return raw
      end
      offset = offset - 1
    end
  end
  offset = offset + #due
end
";

// Shared guard for settling an attempt. When the job was replaced or
// cancelled the lease still belongs to the old attempt unless the current
// job has since been leased itself, so it is released only while the
// current job is absent or waiting.
macro_rules! guarded {
    ($body:literal) => {
        concat!(
            r"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw or cjson.decode(raw).job_id ~= ARGV[2] then
  if not raw or redis.call('ZSCORE', KEYS[2], ARGV[1]) then
    redis.call('ZREM', KEYS[3], ARGV[1])
  end
  return 0
end
",
            $body
        )
    };
}

const COMPLETE: &str = guarded!(r"
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
return 1
");

const RETRY: &str = guarded!(r"
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[4], ARGV[1])
return 1
");

const BURY: &str = guarded!(r"
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HSET', KEYS[4], ARGV[1], ARGV[3])
return 1
");

// Expired leases are dropped. The post goes back to scheduled only when its
// job still exists, and a replacement already waiting keeps its run-at.
const REAP_STALLED: &str = r"
local stalled = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
for _, post_id in ipairs(stalled) do
  redis.call('ZREM', KEYS[1], post_id)
  if redis.call('HEXISTS', KEYS[3], post_id) == 1 then
    redis.call('ZADD', KEYS[2], 'NX', ARGV[1], post_id)
  end
end
return #stalled
";

const COUNTS: &str = r"
return {
  redis.call('ZCARD', KEYS[1]),
  redis.call('ZCARD', KEYS[2]),
  redis.call('HLEN', KEYS[3])
}
";

/// Key names for one queue.
#[derive(Debug, Clone)]
struct QueueKeys {
    jobs: String,
    scheduled: String,
    active: String,
    dead: String,
}

impl QueueKeys {
    fn new(prefix: &str, queue_name: &str) -> Self {
        let base = format!("{prefix}:{queue_name}");
        Self {
            jobs: format!("{base}:jobs"),
            scheduled: format!("{base}:scheduled"),
            active: format!("{base}:active"),
            dead: format!("{base}:dead"),
        }
    }
}

/// Durable [`JobQueue`] stored in Redis.
#[derive(Clone)]
pub struct RedisJobQueue {
    client: Client,
    keys: QueueKeys,
}

impl RedisJobQueue {
    /// Wrap an already connected client.
    #[must_use]
    pub fn new(client: Client, prefix: &str, queue_name: &str) -> Self {
        Self {
            client,
            keys: QueueKeys::new(prefix, queue_name),
        }
    }

    /// Connect to Redis and wrap the client.
    pub async fn connect(url: &str, prefix: &str, queue_name: &str) -> Result<Self, QueueError> {
        let config = RedisConfig::from_url(url)?;
        let client = Client::new(config, None, None, None);
        client.init().await?;

        info!(queue = queue_name, "Redis job queue connected");
        Ok(Self::new(client, prefix, queue_name))
    }

    /// Close the connection.
    pub async fn quit(&self) -> Result<(), QueueError> {
        self.client.quit().await?;
        Ok(())
    }

    /// Every key this queue owns.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        vec![
            self.keys.jobs.clone(),
            self.keys.scheduled.clone(),
            self.keys.active.clone(),
            self.keys.dead.clone(),
        ]
    }

    /// Delete every job, lease and dead-letter entry of this queue.
    pub async fn purge(&self) -> Result<u64, QueueError> {
        let removed: u64 = self.client.del(self.keys()).await?;
        info!(removed, "Redis job queue purged");
        Ok(removed)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn schedule(&self, job: &PublishJob) -> Result<(), QueueError> {
        let inserted: i64 = self
            .client
            .eval(
                SCHEDULE,
                vec![
                    self.keys.jobs.clone(),
                    self.keys.scheduled.clone(),
                    self.keys.dead.clone(),
                ],
                vec![
                    job.post_id.clone(),
                    serde_json::to_string(job)?,
                    score(job.run_at).to_string(),
                ],
            )
            .await?;

        if inserted == 0 {
            return Err(QueueError::AlreadyScheduled(job.post_id.clone()));
        }
        Ok(())
    }

    async fn reschedule(&self, job: &PublishJob) -> Result<Option<String>, QueueError> {
        let previous: Option<String> = self
            .client
            .eval(
                RESCHEDULE,
                vec![
                    self.keys.jobs.clone(),
                    self.keys.scheduled.clone(),
                    self.keys.dead.clone(),
                ],
                vec![
                    job.post_id.clone(),
                    serde_json::to_string(job)?,
                    score(job.run_at).to_string(),
                ],
            )
            .await?;

        previous
            .map(|raw| serde_json::from_str::<PublishJob>(&raw).map(|j| j.job_id))
            .transpose()
            .map_err(Into::into)
    }

    async fn cancel(&self, post_id: &str) -> Result<bool, QueueError> {
        let removed: i64 = self
            .client
            .eval(
                CANCEL,
                vec![self.keys.jobs.clone(), self.keys.scheduled.clone()],
                vec![post_id.to_string()],
            )
            .await?;
        Ok(removed > 0)
    }

    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<PublishJob>, QueueError> {
        let raw: Option<String> = self
            .client
            .eval(
                FETCH_DUE,
                vec![
                    self.keys.scheduled.clone(),
                    self.keys.jobs.clone(),
                    self.keys.active.clone(),
                ],
                vec![score(now).to_string(), score(lease_until).to_string()],
            )
            .await?;

        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Into::into)
    }

    async fn complete(&self, job: &PublishJob) -> Result<bool, QueueError> {
        let applied: i64 = self
            .client
            .eval(
                COMPLETE,
                vec![
                    self.keys.jobs.clone(),
                    self.keys.scheduled.clone(),
                    self.keys.active.clone(),
                ],
                vec![job.post_id.clone(), job.job_id.clone()],
            )
            .await?;
        Ok(applied == 1)
    }

    async fn retry(
        &self,
        job: &PublishJob,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, QueueError> {
        let mut next = job.clone();
        next.run_at = run_at;
        next.last_error = Some(error.to_string());

        let applied: i64 = self
            .client
            .eval(
                RETRY,
                vec![
                    self.keys.jobs.clone(),
                    self.keys.scheduled.clone(),
                    self.keys.active.clone(),
                ],
                vec![
                    job.post_id.clone(),
                    job.job_id.clone(),
                    serde_json::to_string(&next)?,
                    score(run_at).to_string(),
                ],
            )
            .await?;
        Ok(applied == 1)
    }

    async fn bury(
        &self,
        job: &PublishJob,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let entry = DeadJob::new(job.clone(), job.attempts, error.to_string(), now);

        let applied: i64 = self
            .client
            .eval(
                BURY,
                vec![
                    self.keys.jobs.clone(),
                    self.keys.scheduled.clone(),
                    self.keys.active.clone(),
                    self.keys.dead.clone(),
                ],
                vec![
                    job.post_id.clone(),
                    job.job_id.clone(),
                    serde_json::to_string(&entry)?,
                ],
            )
            .await?;
        Ok(applied == 1)
    }

    async fn reap_stalled(&self, now: DateTime<Utc>) -> Result<u64, QueueError> {
        let reaped: i64 = self
            .client
            .eval(
                REAP_STALLED,
                vec![
                    self.keys.active.clone(),
                    self.keys.scheduled.clone(),
                    self.keys.jobs.clone(),
                ],
                vec![score(now).to_string()],
            )
            .await?;
        Ok(u64::try_from(reaped).unwrap_or_default())
    }

    async fn pending(&self, post_id: &str) -> Result<Option<PublishJob>, QueueError> {
        let raw: Option<String> = self.client.hget(self.keys.jobs.as_str(), post_id).await?;
        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Into::into)
    }

    async fn dead_letter(&self, post_id: &str) -> Result<Option<DeadJob>, QueueError> {
        let raw: Option<String> = self.client.hget(self.keys.dead.as_str(), post_id).await?;
        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Into::into)
    }

    async fn counts(&self) -> Result<JobCounts, QueueError> {
        let counts: Vec<i64> = self
            .client
            .eval(
                COUNTS,
                vec![
                    self.keys.scheduled.clone(),
                    self.keys.active.clone(),
                    self.keys.dead.clone(),
                ],
                Vec::<String>::new(),
            )
            .await?;

        let at = |i: usize| {
            counts
                .get(i)
                .and_then(|n| u64::try_from(*n).ok())
                .unwrap_or_default()
        };
        Ok(JobCounts {
            scheduled: at(0),
            active: at(1),
            dead: at(2),
        })
    }
}
