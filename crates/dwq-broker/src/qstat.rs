//! Parsing for `QSTAT`'s reply, a flat array of alternating field name and
//! value, the same shape Disque uses for most of its introspection commands.

use anyhow::{Context as _, Result};
use redis::{FromRedisValue, Value};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub len: i64,
    pub blocked: i64,
}

impl QueueStats {
    pub fn from_resp_fields(fields: &[Value]) -> Result<Self> {
        if fields.len() % 2 != 0 {
            anyhow::bail!("QSTAT reply had an odd number of fields");
        }
        let mut map = HashMap::new();
        for pair in fields.chunks_exact(2) {
            let key = String::from_redis_value(&pair[0]).context("QSTAT field name")?;
            map.insert(key, pair[1].clone());
        }
        let field = |name: &str| -> Result<i64> {
            match map.get(name) {
                Some(v) => i64::from_redis_value(v).with_context(|| format!("QSTAT field {name}")),
                None => Ok(0),
            }
        };
        Ok(Self {
            len: field("len")?,
            blocked: field("blocked")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn parses_len_and_blocked() {
        let fields = vec![
            bulk("len"),
            bulk("3"),
            bulk("blocked"),
            bulk("1"),
            bulk("jobs"),
            Value::Array(vec![]),
        ];
        let stats = QueueStats::from_resp_fields(&fields).unwrap();
        assert_eq!(stats, QueueStats { len: 3, blocked: 1 });
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let stats = QueueStats::from_resp_fields(&[]).unwrap();
        assert_eq!(stats, QueueStats::default());
    }

    #[test]
    fn odd_field_count_is_rejected() {
        assert!(QueueStats::from_resp_fields(&[bulk("len")]).is_err());
    }
}
