//! Redis-backed counter store.

use std::time::Duration;

use async_trait::async_trait;
use fred::clients::Client;
use fred::interfaces::ClientLike;
use fred::interfaces::LuaInterface;
use fred::types::config::Config;
use fred::types::config::ReconnectPolicy;
use fred::types::scripts::Script;
use tracing::debug;

use super::Admission;
use super::AdmissionParams;
use super::CounterStore;
use super::StoreError;
use crate::configuration::RedisConfig;

/// The admission transaction. Runs server side so the read-refill-write
/// cycle cannot interleave with another gate process. Tokens travel back as
/// a string: Lua replies truncate numbers to integers.
const ADMISSION_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local cost = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
local refill_rate = tonumber(ARGV[4])
local expiry = tonumber(ARGV[5])

local row = redis.call('HMGET', key, 'tokens', 'lastRefill')
local tokens = tonumber(row[1])
local last = tonumber(row[2])
if tokens == nil or last == nil then
  tokens = capacity
  last = now
end

local elapsed = now - last
if elapsed < 0 then
  elapsed = 0
end
tokens = math.min(capacity, tokens + refill_rate * elapsed / 1000)

local ok = 0
local retry = -1
if tokens >= cost then
  tokens = tokens - cost
  ok = 1
else
  retry = math.ceil((cost - tokens) * 1000 / refill_rate)
end

redis.call('HSET', key, 'tokens', tokens, 'lastRefill', now)
redis.call('PEXPIRE', key, expiry)
return { ok, tostring(tokens), retry }
"#;

/// Counter store over a shared Redis, using the `fred` client.
#[derive(Debug)]
pub struct RedisCounterStore {
    client: Client,
    script: Script,
    namespace: String,
    command_timeout: Duration,
}

impl RedisCounterStore {
    /// Connects to the configured Redis and preloads the admission script.
    pub async fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let redis_config = Config::from_url(&config.url).map_err(backend)?;
        let policy = ReconnectPolicy::new_constant(0, 500);
        let client = Client::new(redis_config, None, None, Some(policy));
        // The connection task runs for the lifetime of the client.
        let _connection = client.connect();
        client.wait_for_connect().await.map_err(backend)?;

        let hash: String = client.script_load(ADMISSION_SCRIPT).await.map_err(backend)?;
        debug!(%hash, "loaded admission script");

        Ok(RedisCounterStore {
            client,
            script: Script::from_lua(ADMISSION_SCRIPT),
            namespace: config.namespace.clone(),
            command_timeout: config.command_timeout(),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn admit(&self, params: AdmissionParams<'_>) -> Result<Admission, StoreError> {
        let keys = vec![counter_key(&self.namespace, params.client_id)];
        let args = vec![
            params.now_ms.to_string(),
            params.cost.to_string(),
            params.capacity.to_string(),
            params.refill_rate.to_string(),
            params.key_expiry_ms.to_string(),
        ];

        let call = self.script.evalsha_with_reload(&self.client, keys, args);
        let (success, tokens, retry_after_ms): (i64, String, i64) =
            tokio::time::timeout(self.command_timeout, call)
                .await
                .map_err(|_| StoreError::Timeout(self.command_timeout))?
                .map_err(backend)?;

        let tokens: f64 = tokens
            .parse()
            .map_err(|_| StoreError::MalformedResponse(format!("tokens = {tokens:?}")))?;
        Ok(Admission {
            success: success == 1,
            tokens,
            retry_after_ms: u64::try_from(retry_after_ms).ok(),
        })
    }
}

fn counter_key(namespace: &str, client_id: &str) -> String {
    format!("{namespace}:{client_id}")
}

fn backend(error: fred::error::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}
