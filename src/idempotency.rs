use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};

pub const KEY_PREFIX: &str = "mintmark:idem:";

pub fn redis_key(route: &str, key: &str) -> String {
    format!("{KEY_PREFIX}{route}:{key}")
}

pub async fn redis_get<T: DeserializeOwned>(client: &redis::Client, key: &str) -> Option<T> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(_) => return None,
    };
    let s: Option<String> = conn.get(key).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

pub async fn redis_set<T: Serialize>(client: &redis::Client, key: &str, value: &T, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}

pub fn ttl_from_env() -> u64 {
    std::env::var("IDEMPOTENCY_TTL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(3600)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_route() {
        assert_eq!(redis_key("ingest", "abc"), "mintmark:idem:ingest:abc");
        assert_ne!(redis_key("ingest", "abc"), redis_key("batches", "abc"));
    }
}
