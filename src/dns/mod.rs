pub mod cache;
pub mod providers;
pub mod resolver;

pub use cache::DnsCacheEntry;
pub use providers::{DnsDomain, DnsProvider, sync_dns_mirror};
