use serde_json::{Map, Value};

use crate::Error;

/// JSON payload written to published nodes: `addr`, `cluster_id` and the
/// current Unix time, with `kv` pairs layered on top.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `kv` has odd length.
pub fn build(addr: &str, cluster_id: &str, kv: &[&str]) -> Result<String, Error> {
    if kv.len() % 2 != 0 {
        return Err(Error::InvalidArgument(format!(
            "extra publish values must come in key/value pairs, got {}",
            kv.len()
        )));
    }

    let mut input = Map::new();
    input.insert("addr".into(), Value::from(addr));
    input.insert("cluster_id".into(), Value::from(cluster_id));
    input.insert("time".into(), Value::from(chrono::Utc::now().timestamp()));
    for pair in kv.chunks_exact(2) {
        input.insert(pair[0].to_string(), Value::from(pair[1]));
    }

    Ok(serde_json::to_string(&input)?)
}

/// Split `host:port` (or `[v6]:port`) and return the host.
pub fn host_of(addr: &str) -> Result<&str, Error> {
    let malformed = || Error::InvalidArgument(format!("malformed address: {}", addr));
    let host = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(malformed)?;
        if !tail.starts_with(':') {
            return Err(malformed());
        }
        host
    } else {
        let (host, _port) = addr.rsplit_once(':').ok_or_else(malformed)?;
        if host.contains(':') {
            return Err(malformed());
        }
        host
    };
    if host.is_empty() {
        return Err(malformed());
    }
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_contains_required_keys() {
        let raw = build("10.0.0.1:8080", "c1", &[]).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["addr"], "10.0.0.1:8080");
        assert_eq!(value["cluster_id"], "c1");
        assert!(value["time"].as_i64().unwrap() > 1_600_000_000);
    }

    #[test]
    fn test_build_applies_overrides() {
        let raw = build("a:1", "c1", &["weight", "10", "addr", "b:2"]).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["weight"], "10");
        assert_eq!(value["addr"], "b:2");
    }

    #[test]
    fn test_build_rejects_odd_pairs() {
        assert!(matches!(build("a:1", "c", &["k1"]), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("192.168.1.2:8080").unwrap(), "192.168.1.2");
        assert_eq!(host_of("[::1]:80").unwrap(), "::1");
        assert!(host_of("no-port").is_err());
        assert!(host_of(":8080").is_err());
        assert!(host_of("::1:80").is_err());
        assert!(host_of("[::1]80").is_err());
    }
}
