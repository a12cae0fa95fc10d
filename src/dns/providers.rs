//! Nameserver mirror. The `dnsProv` and `dnsDomain` objects under the
//! controller's default DNS profile are mirrored into sqlite on an interval;
//! the resolve path reads nameservers from the mirror instead of querying the
//! controller per lookup. A change in the mirrored address set invalidates
//! the reverse-lookup cache.

use std::collections::BTreeSet;

use rusqlite::Connection;
use serde_json::Value;
use tokio::task;

use super::cache::DnsCacheEntry;
use crate::apic::filters::QueryFilters;
use crate::apic::types::{DnsDomainAttributes, DnsProviderAttributes, class_attributes, yes_no};
use crate::apic::{ApicClient, ApicError, SessionContext};

/// Only objects under the default DNS profile are mirrored.
const DEFAULT_PROFILE_MARKER: &str = "/dnsp-default/";

#[derive(Debug, Clone, PartialEq)]
pub struct DnsProvider {
    pub dn: String,
    pub addr: String,
    pub preferred: bool,
}

impl DnsProvider {
    pub const CLASS_NAME: &'static str = "dnsProv";

    pub fn create_table_if_not_exists(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS dns_providers (
                dn TEXT PRIMARY KEY,
                addr TEXT NOT NULL,
                preferred INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Mirrored providers, preferred entries first.
    pub fn all(conn: &Connection) -> rusqlite::Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT dn, addr, preferred FROM dns_providers ORDER BY preferred DESC, addr",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Self {
                dn: row.get(0)?,
                addr: row.get(1)?,
                preferred: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    /// Nameserver addresses in lookup order.
    pub fn nameservers(conn: &Connection) -> rusqlite::Result<Vec<String>> {
        Ok(Self::all(conn)?.into_iter().map(|p| p.addr).collect())
    }

    fn from_object(obj: &Value) -> Option<Self> {
        let (class_name, attributes) = class_attributes(obj)?;
        if class_name != Self::CLASS_NAME {
            log::debug!("skipping object of class {}", class_name);
            return None;
        }
        let attrs: DnsProviderAttributes = serde_json::from_value(attributes.clone())
            .map_err(|e| log::debug!("skipping provider object: {}", e))
            .ok()?;
        Some(Self {
            dn: attrs.dn,
            addr: attrs.addr,
            preferred: yes_no(&attrs.preferred),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DnsDomain {
    pub dn: String,
    pub name: String,
    pub is_default: bool,
}

impl DnsDomain {
    pub const CLASS_NAME: &'static str = "dnsDomain";

    pub fn create_table_if_not_exists(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS dns_domains (
                dn TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_default INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn all(conn: &Connection) -> rusqlite::Result<Vec<Self>> {
        let mut stmt =
            conn.prepare("SELECT dn, name, is_default FROM dns_domains ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(Self {
                dn: row.get(0)?,
                name: row.get(1)?,
                is_default: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    fn from_object(obj: &Value) -> Option<Self> {
        let (class_name, attributes) = class_attributes(obj)?;
        if class_name != Self::CLASS_NAME {
            log::debug!("skipping object of class {}", class_name);
            return None;
        }
        let attrs: DnsDomainAttributes = serde_json::from_value(attributes.clone())
            .map_err(|e| log::debug!("skipping domain object: {}", e))
            .ok()?;
        Some(Self {
            dn: attrs.dn,
            name: attrs.name,
            is_default: yes_no(&attrs.is_default),
        })
    }
}

/// Pull the default-profile providers and domains from the controller and
/// replace the mirror. Returns whether the nameserver address set changed.
pub async fn sync_dns_mirror(
    client: &ApicClient,
    session: &SessionContext,
) -> Result<bool, ApicError> {
    let provider_objects = client
        .get_class(session, DnsProvider::CLASS_NAME, &QueryFilters::new(), None)
        .await?;
    let domain_objects = client
        .get_class(session, DnsDomain::CLASS_NAME, &QueryFilters::new(), None)
        .await?;

    let providers = mirrored_providers(&provider_objects);
    let domains = mirrored_domains(&domain_objects);
    log::debug!(
        "mirroring {} providers, {} domains",
        providers.len(),
        domains.len()
    );

    let changed = task::spawn_blocking(move || -> Result<bool, rusqlite::Error> {
        let conn = crate::db::new_connection_result()?;
        apply_mirror(&conn, &providers, &domains)
    })
    .await
    .map_err(|e| {
        log::error!("mirror task failed: {}", e);
        ApicError::Internal
    })??;
    Ok(changed)
}

fn mirrored_providers(objects: &[Value]) -> Vec<DnsProvider> {
    objects
        .iter()
        .filter_map(DnsProvider::from_object)
        .filter(|p| in_default_profile(&p.dn))
        .collect()
}

fn mirrored_domains(objects: &[Value]) -> Vec<DnsDomain> {
    objects
        .iter()
        .filter_map(DnsDomain::from_object)
        .filter(|d| in_default_profile(&d.dn))
        .collect()
}

fn in_default_profile(dn: &str) -> bool {
    dn.contains(DEFAULT_PROFILE_MARKER)
}

/// Replace the mirror contents in one transaction. A preferred-flag change
/// keeps the cache; only a different address set clears it.
fn apply_mirror(
    conn: &Connection,
    providers: &[DnsProvider],
    domains: &[DnsDomain],
) -> rusqlite::Result<bool> {
    let before: BTreeSet<String> = DnsProvider::all(conn)?
        .into_iter()
        .map(|p| p.addr)
        .collect();

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM dns_providers", [])?;
    for provider in providers {
        tx.execute(
            "INSERT INTO dns_providers (dn, addr, preferred) VALUES (?1, ?2, ?3)",
            rusqlite::params![provider.dn, provider.addr, provider.preferred],
        )?;
    }
    tx.execute("DELETE FROM dns_domains", [])?;
    for domain in domains {
        tx.execute(
            "INSERT INTO dns_domains (dn, name, is_default) VALUES (?1, ?2, ?3)",
            rusqlite::params![domain.dn, domain.name, domain.is_default],
        )?;
    }
    tx.commit()?;

    let after: BTreeSet<String> = providers.iter().map(|p| p.addr.clone()).collect();
    let changed = before != after;
    if changed {
        let cleared = DnsCacheEntry::clear_all(conn)?;
        log::info!(
            "nameserver set changed ({} -> {} entries), cleared {} cached lookups",
            before.len(),
            after.len(),
            cleared
        );
    }
    Ok(changed)
}
