//! Reverse lookups against the mirrored nameservers. A hit caches for the
//! record's TTL; a name-not-found reply caches as `"n/a"` for ten minutes so
//! repeated clicks on an unresolvable address stay cheap.

use std::net::IpAddr;
use std::time::Duration;

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use thiserror::Error;
use tokio::task;

use super::cache::{DnsCacheEntry, now_timestamp};
use super::providers::DnsProvider;

pub const NOT_FOUND_PTR: &str = "n/a";
const NOT_FOUND_TTL_SECS: i64 = 600;
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("lookup failed: {0}")]
    Dns(#[from] hickory_resolver::error::ResolveError),
}

/// Outcome of the full resolve flow; `cache` tells whether the answer came
/// from the cache or a fresh lookup.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub ip: String,
    pub ptr: String,
    pub cache: bool,
}

#[derive(Debug, Error)]
pub enum ResolveFailure {
    #[error("no dnsProv configured on apic")]
    NoNameservers,

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("internal task failure")]
    Internal,
}

/// Full resolve flow: serve from the cache while the entry is fresh,
/// otherwise look the address up against the mirrored nameservers and cache
/// the outcome.
pub async fn resolve_with_cache(ip: &str) -> Result<Resolution, ResolveFailure> {
    let lookup_ip = ip.to_string();
    let (cached, nameservers) = task::spawn_blocking(move || -> Result<_, rusqlite::Error> {
        let conn = crate::db::new_connection_result()?;
        let cached = DnsCacheEntry::get(&conn, &lookup_ip)?
            .filter(|entry| entry.is_fresh(now_timestamp()));
        let nameservers = DnsProvider::nameservers(&conn)?;
        Ok((cached, nameservers))
    })
    .await
    .map_err(|e| {
        log::error!("resolve task failed: {}", e);
        ResolveFailure::Internal
    })??;

    if let Some(entry) = cached {
        log::debug!("serving {} from cache", ip);
        return Ok(Resolution {
            ip: ip.to_string(),
            ptr: entry.ptr,
            cache: true,
        });
    }

    let addrs = parse_nameservers(&nameservers);
    if addrs.is_empty() {
        return Err(ResolveFailure::NoNameservers);
    }

    let entry = reverse_lookup(ip, &addrs).await?;
    let stored = entry.clone();
    let store = task::spawn_blocking(move || -> Result<(), rusqlite::Error> {
        let conn = crate::db::new_connection_result()?;
        stored.upsert(&conn)
    })
    .await;
    match store {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Failed to store resolution for {}: {}", entry.addr, e),
        Err(e) => log::error!("resolve store task failed: {}", e),
    }

    Ok(Resolution {
        ip: ip.to_string(),
        ptr: entry.ptr,
        cache: false,
    })
}

/// PTR lookup for one address. Name-not-found is a successful outcome (an
/// `"n/a"` entry with a short expiry), not an error; the returned entry is
/// ready to upsert into the cache.
pub async fn reverse_lookup(
    ip: &str,
    nameservers: &[IpAddr],
) -> Result<DnsCacheEntry, LookupError> {
    let addr: IpAddr = ip
        .parse()
        .map_err(|_| LookupError::InvalidAddress(ip.to_string()))?;

    let resolver = build_resolver(nameservers);
    let now = now_timestamp();
    match resolver.reverse_lookup(addr).await {
        Ok(reply) => {
            let Some(name) = reply.iter().next() else {
                return Ok(not_found_entry(ip, now));
            };
            let ptr = name.to_string().trim_end_matches('.').to_string();
            let ttl = reply
                .as_lookup()
                .record_iter()
                .next()
                .map(|record| record.ttl() as i64)
                .unwrap_or(NOT_FOUND_TTL_SECS);
            log::debug!("{} resolved to {} (ttl {})", ip, ptr, ttl);
            Ok(DnsCacheEntry::new(ip, &ptr, now + ttl))
        }
        Err(e) => match e.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => {
                log::debug!("no ptr record for {}", ip);
                Ok(not_found_entry(ip, now))
            }
            _ => Err(e.into()),
        },
    }
}

/// Parse mirrored nameserver addresses, dropping anything unparseable.
pub fn parse_nameservers(addrs: &[String]) -> Vec<IpAddr> {
    addrs
        .iter()
        .filter_map(|addr| {
            addr.parse()
                .map_err(|_| log::warn!("ignoring unparseable nameserver address {}", addr))
                .ok()
        })
        .collect()
}

fn build_resolver(nameservers: &[IpAddr]) -> TokioAsyncResolver {
    let group = NameServerConfigGroup::from_ips_clear(nameservers, 53, true);
    let config = ResolverConfig::from_parts(None, vec![], group);
    let mut opts = ResolverOpts::default();
    opts.timeout = LOOKUP_TIMEOUT;
    TokioAsyncResolver::tokio(config, opts)
}

fn not_found_entry(ip: &str, now: i64) -> DnsCacheEntry {
    DnsCacheEntry::new(ip, NOT_FOUND_PTR, now + NOT_FOUND_TTL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nameservers_drops_garbage() {
        let addrs = vec![
            "10.0.0.53".to_string(),
            "not-an-ip".to_string(),
            "2001:db8::53".to_string(),
        ];
        let parsed = parse_nameservers(&addrs);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], "10.0.0.53".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_not_found_entry_shape() {
        let entry = not_found_entry("10.0.0.5", 1000);
        assert_eq!(entry.addr, "10.0.0.5");
        assert_eq!(entry.ptr, "n/a");
        assert_eq!(entry.expire, 1000 + NOT_FOUND_TTL_SECS);
    }

    #[tokio::test]
    async fn test_reverse_lookup_rejects_invalid_address() {
        let err = reverse_lookup("10.0.0.999", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid address 10.0.0.999");
    }

    // The resolve endpoint serves these texts verbatim
    #[test]
    fn test_no_nameservers_failure_text() {
        assert_eq!(
            ResolveFailure::NoNameservers.to_string(),
            "no dnsProv configured on apic"
        );
    }
}
