use crate::convert::{convert_reply, transport};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamInfoGroupsReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::sync::Arc;
use tributary_core::{
    error::{Result, TributaryError},
    traits::StreamLogClient,
    types::{EntryId, Fields, GroupStart, ReadOptions, StreamBatch, StreamRead},
};

/// Redis Streams backed stream log
pub struct RedisStreamLog {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisStreamLog {
    /// Connect to a Redis server using a URL
    ///
    /// The URL format follows the Redis convention:
    /// `redis://[username:password@]host[:port][/database]`, or `rediss://`
    /// for TLS connections.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| TributaryError::Config(format!("invalid Redis URL: {}", e)))?;
        Self::from_client(client).await
    }

    /// Open a connection from an existing [`redis::Client`]
    pub async fn from_client(client: redis::Client) -> Result<Self> {
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(transport("connect"))?;
        tracing::debug!("Opened Redis stream log connection");
        Ok(Self { client, conn })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl StreamLogClient for RedisStreamLog {
    async fn exists(&self, stream: &str) -> Result<bool> {
        let mut conn = self.conn();
        conn.exists(stream).await.map_err(transport("exists"))
    }

    async fn group_exists(&self, stream: &str, group: &str) -> Result<bool> {
        if !self.exists(stream).await? {
            return Ok(false);
        }

        let mut conn = self.conn();
        let reply: StreamInfoGroupsReply = conn
            .xinfo_groups(stream)
            .await
            .map_err(transport("group_exists"))?;
        Ok(reply.groups.iter().any(|g| g.name == group))
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
        create_stream: bool,
    ) -> Result<()> {
        let mut conn = self.conn();
        let start = start.to_string();

        let result: redis::RedisResult<()> = if create_stream {
            conn.xgroup_create_mkstream(stream, group, &start).await
        } else {
            conn.xgroup_create(stream, group, &start).await
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Err(TributaryError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            }),
            Err(e) => Err(TributaryError::transport("create_group", e)),
        }
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[StreamRead],
        options: &ReadOptions,
    ) -> Result<Vec<StreamBatch>> {
        let keys: Vec<&str> = streams.iter().map(|r| r.stream.as_str()).collect();
        let ids: Vec<String> = streams.iter().map(|r| r.cursor.to_string()).collect();

        let read_options = StreamReadOptions::default()
            .group(group, consumer)
            .count(options.count)
            .block(options.block.as_millis() as usize);

        let mut conn = self.conn();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&keys, &ids, &read_options)
            .await
            .map_err(transport("read_group"))?;

        Ok(convert_reply(reply))
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = ids.iter().map(EntryId::to_string).collect();
        let mut conn = self.conn();
        conn.xack(stream, group, &ids).await.map_err(transport("ack"))
    }

    async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId> {
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let mut conn = self.conn();
        let id: String = conn
            .xadd(stream, "*", &items)
            .await
            .map_err(transport("append"))?;
        id.parse()
    }

    async fn duplicate(&self) -> Result<Arc<dyn StreamLogClient>> {
        let log = Self::from_client(self.client.clone()).await?;
        Ok(Arc::new(log))
    }
}
