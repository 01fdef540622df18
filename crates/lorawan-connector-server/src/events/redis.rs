//! Redis stream source for device change events.
//!
//! Uses a consumer group so every entry is delivered to one connector
//! instance and stays pending until acknowledged:
//! 1. `XGROUP CREATE ... MKSTREAM` on connect (an existing group is reused)
//! 2. `XREADGROUP ... 0` replays entries this consumer received but never
//!    acknowledged, e.g. before a crash
//! 3. `XAUTOCLAIM` takes over entries left idle by consumers that are gone
//! 4. `XREADGROUP ... >` for new entries, blocking up to the configured time
//! 5. `XACK` when the dispatcher commits an entry

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use lorawan_connector_core::{ConnectorError, ConnectorResult};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};
use tracing::{debug, info, warn};

use super::{ChangeEventSource, Delivery};

/// Stream entry field holding the JSON message.
pub const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, Clone)]
pub struct RedisStreamSettings {
    pub url: String,
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub block: Duration,
    pub batch_size: usize,
    /// Minimum idle time before another consumer's entry is claimed;
    /// zero disables claiming.
    pub claim_idle: Duration,
}

/// Where the next read starts.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadPhase {
    /// Own pending entries after the given id.
    Backlog(String),
    /// Idle entries of other consumers, from the given cursor.
    Reclaim(String),
    /// Entries never delivered to the group.
    Live,
}

impl ReadPhase {
    fn start() -> Self {
        Self::Backlog("0".into())
    }

    /// Next phase after a backlog read whose last entry id was `last`.
    fn after_backlog(last: Option<String>, claim: bool) -> Self {
        match last {
            Some(id) => Self::Backlog(id),
            None if claim => Self::Reclaim("0-0".into()),
            None => Self::Live,
        }
    }

    /// Next phase after a claim round returning `next` as cursor.
    fn after_reclaim(next: String) -> Self {
        if next == "0-0" || next.is_empty() {
            Self::Live
        } else {
            Self::Reclaim(next)
        }
    }
}

/// Errors raised while setting up the stream consumer.
#[derive(Debug, thiserror::Error)]
pub enum RedisStreamError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis consumer group error: {0}")]
    Group(String),
}

pub struct RedisStreamSource {
    conn: MultiplexedConnection,
    settings: RedisStreamSettings,
    buffer: VecDeque<Delivery>,
    phase: ReadPhase,
}

impl RedisStreamSource {
    pub async fn connect(settings: RedisStreamSettings) -> Result<Self, RedisStreamError> {
        let client = redis::Client::open(settings.url.as_str())
            .map_err(|e| RedisStreamError::Connection(e.to_string()))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RedisStreamError::Connection(e.to_string()))?;

        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&settings.stream, &settings.group, "$")
            .await;
        match created {
            Ok(()) => info!(stream = %settings.stream, group = %settings.group, "Created consumer group"),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(group = %settings.group, "Consumer group already exists");
            }
            Err(e) => return Err(RedisStreamError::Group(e.to_string())),
        }

        info!(
            stream = %settings.stream,
            group = %settings.group,
            consumer = %settings.consumer,
            "Subscribed to device event stream"
        );
        Ok(Self {
            conn,
            settings,
            buffer: VecDeque::new(),
            phase: ReadPhase::start(),
        })
    }

    async fn fill(&mut self) -> ConnectorResult<()> {
        match self.phase.clone() {
            ReadPhase::Backlog(after) => {
                let options = StreamReadOptions::default()
                    .group(&self.settings.group, &self.settings.consumer)
                    .count(self.settings.batch_size);
                let entries = self.read_group(&after, &options).await?;
                let last = entries.last().map(|e| e.id.clone());
                if !entries.is_empty() {
                    info!(count = entries.len(), "Replaying unacknowledged stream entries");
                }
                self.push_entries(entries);
                self.phase = ReadPhase::after_backlog(last, !self.settings.claim_idle.is_zero());
            }
            ReadPhase::Reclaim(cursor) => {
                let reply: StreamAutoClaimReply = self
                    .conn
                    .xautoclaim_options(
                        &self.settings.stream,
                        &self.settings.group,
                        &self.settings.consumer,
                        self.settings.claim_idle.as_millis() as u64,
                        &cursor,
                        StreamAutoClaimOptions::default().count(self.settings.batch_size),
                    )
                    .await
                    .map_err(|e| ConnectorError::Transport(format!("XAUTOCLAIM: {e}")))?;
                if !reply.claimed.is_empty() {
                    info!(count = reply.claimed.len(), "Claimed idle stream entries");
                }
                self.push_entries(reply.claimed);
                self.phase = ReadPhase::after_reclaim(reply.next_stream_id);
            }
            ReadPhase::Live => {
                let options = StreamReadOptions::default()
                    .group(&self.settings.group, &self.settings.consumer)
                    .count(self.settings.batch_size)
                    .block(self.settings.block.as_millis() as usize);
                let entries = self.read_group(">", &options).await?;
                self.push_entries(entries);
            }
        }
        Ok(())
    }

    async fn read_group(
        &mut self,
        id: &str,
        options: &StreamReadOptions,
    ) -> ConnectorResult<Vec<StreamId>> {
        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[&self.settings.stream], &[id], options)
            .await
            .map_err(|e| ConnectorError::Transport(format!("XREADGROUP: {e}")))?;
        Ok(reply
            .map(|r| r.keys)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|key| key.ids)
            .collect())
    }

    fn push_entries(&mut self, entries: Vec<StreamId>) {
        for entry in entries {
            let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_else(|| {
                warn!(message_id = %entry.id, "Stream entry without payload field");
                Vec::new()
            });
            self.buffer.push_back(Delivery {
                id: entry.id,
                payload,
            });
        }
    }
}

#[async_trait]
impl ChangeEventSource for RedisStreamSource {
    async fn recv(&mut self) -> ConnectorResult<Option<Delivery>> {
        loop {
            if let Some(delivery) = self.buffer.pop_front() {
                return Ok(Some(delivery));
            }
            self.fill().await?;
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> ConnectorResult<()> {
        let _: i64 = self
            .conn
            .xack(&self.settings.stream, &self.settings.group, &[&delivery.id])
            .await
            .map_err(|e| ConnectorError::Transport(format!("XACK: {e}")))?;
        Ok(())
    }
}
