use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::warn;

use crate::{
    aggregation::AggregationStore,
    config::Config,
    models::{
        aggregation::{ActorProfile, WindowContents},
        event::NotificationEvent,
    },
};

/// Redis-backed aggregation window store. Members live in a sorted set keyed
/// by arrival time, display profiles and the first-event snapshot in hashes;
/// the flush path reads and deletes all three in one atomic transaction.
pub struct RedisAggregationStore {
    connection: MultiplexedConnection,
}

impl RedisAggregationStore {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let client = Client::open(config.redis_url.as_str())
            .map_err(|_| anyhow!("Failed to create redis client"))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|_| anyhow!("Failed to connect to redis client"))?;

        Ok(Self { connection })
    }

    fn members_key(key: &str) -> String {
        format!("{}:actors", key)
    }

    fn profiles_key(key: &str) -> String {
        format!("{}:profiles", key)
    }

    fn meta_key(key: &str) -> String {
        format!("{}:meta", key)
    }
}

#[async_trait]
impl AggregationStore for RedisAggregationStore {
    async fn add_member(&self, key: &str, actor_id: &str, ts_ms: i64) -> Result<u64, Error> {
        let mut conn = self.connection.clone();
        let members = Self::members_key(key);

        // NX keeps the first arrival timestamp for a replayed actor.
        let _: () = redis::cmd("ZADD")
            .arg(&members)
            .arg("NX")
            .arg(ts_ms)
            .arg(actor_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Failed to add window member: {}", e))?;

        let count: u64 = conn
            .zcard(&members)
            .await
            .map_err(|e| anyhow!("Failed to read window cardinality: {}", e))?;

        Ok(count)
    }

    async fn upsert_profile(
        &self,
        key: &str,
        actor_id: &str,
        profile: &ActorProfile,
    ) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        let profiles = Self::profiles_key(key);
        let encoded = serde_json::to_string(profile)?;

        conn.hset_nx::<_, _, _, ()>(&profiles, actor_id, encoded)
            .await
            .map_err(|e| anyhow!("Failed to upsert actor profile: {}", e))?;

        Ok(())
    }

    async fn init_meta(&self, key: &str, first_event: &NotificationEvent) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        let meta = Self::meta_key(key);
        let encoded = serde_json::to_string(first_event)?;

        conn.hset_nx::<_, _, _, ()>(&meta, "first_event", encoded)
            .await
            .map_err(|e| anyhow!("Failed to initialize window metadata: {}", e))?;

        Ok(())
    }

    async fn refresh_ttl(&self, key: &str, ttl_secs: i64) -> Result<(), Error> {
        let mut conn = self.connection.clone();

        let _: () = redis::pipe()
            .expire(Self::members_key(key), ttl_secs)
            .ignore()
            .expire(Self::profiles_key(key), ttl_secs)
            .ignore()
            .expire(Self::meta_key(key), ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Failed to refresh window ttl: {}", e))?;

        Ok(())
    }

    async fn take_window(&self, key: &str) -> Result<Option<WindowContents>, Error> {
        let mut conn = self.connection.clone();
        let members_key = Self::members_key(key);
        let profiles_key = Self::profiles_key(key);
        let meta_key = Self::meta_key(key);

        // MULTI/EXEC: the read and the delete land as one unit, so the first
        // concurrent flush consumes the window and the second sees nothing.
        let (raw_members, raw_profiles, raw_meta): (
            Vec<(String, f64)>,
            HashMap<String, String>,
            HashMap<String, String>,
        ) = redis::pipe()
            .atomic()
            .cmd("ZRANGE")
            .arg(&members_key)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .cmd("HGETALL")
            .arg(&profiles_key)
            .cmd("HGETALL")
            .arg(&meta_key)
            .cmd("DEL")
            .arg(&members_key)
            .ignore()
            .cmd("DEL")
            .arg(&profiles_key)
            .ignore()
            .cmd("DEL")
            .arg(&meta_key)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Failed to take window: {}", e))?;

        if raw_members.is_empty() {
            return Ok(None);
        }

        let Some(first_event) = raw_meta.get("first_event") else {
            // A writer lost the race between member insert and metadata
            // init; without the snapshot there is nothing to build.
            return Ok(None);
        };
        let first_event: NotificationEvent = serde_json::from_str(first_event)?;

        let members = raw_members
            .into_iter()
            .map(|(actor, score)| (actor, score as i64))
            .collect();

        let mut profiles = HashMap::new();
        for (actor, encoded) in raw_profiles {
            match serde_json::from_str::<ActorProfile>(&encoded) {
                Ok(profile) => {
                    profiles.insert(actor, profile);
                }
                Err(e) => {
                    warn!(actor = %actor, error = %e, "Skipping undecodable actor profile");
                }
            }
        }

        Ok(Some(WindowContents {
            members,
            profiles,
            first_event,
        }))
    }

    async fn scan_generation(&self, window_id: i64) -> Result<Vec<String>, Error> {
        let mut conn = self.connection.clone();
        let pattern = format!("agg:{}:*:actors", window_id);
        let suffix = ":actors";

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow!("Failed to scan window generation: {}", e))?;

            keys.extend(
                batch
                    .into_iter()
                    .filter_map(|k| k.strip_suffix(suffix).map(str::to_string)),
            );

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }
}
