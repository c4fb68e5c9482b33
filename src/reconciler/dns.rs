use crate::reconciler::tunnel::TunnelIdentity;
use crate::reconciler::zone::hostname_to_zone;
use crate::Error;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

pub const TUNNEL_DOMAIN: &str = "cfargotunnel.com";
/// A ttl of 1 lets the provider pick the value.
pub const AUTO_TTL: u32 = 1;

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default)]
    pub zone_id: Option<String>,
}

/// Body of a CNAME create or update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CnameParams {
    pub name: String,
    pub content: String,
    pub ttl: u32,
    pub proxied: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DnsSyncSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn find_zone(&self, name: &str) -> Result<Option<Zone>, Error>;

    /// Every CNAME record of the zone, across all pages.
    async fn list_cname_records(&self, zone_id: &str) -> Result<Vec<DnsRecord>, Error>;

    async fn create_cname(&self, zone_id: &str, params: &CnameParams)
        -> Result<DnsRecord, Error>;

    async fn update_cname(
        &self,
        zone_id: &str,
        record_id: &str,
        params: &CnameParams,
    ) -> Result<DnsRecord, Error>;
}

pub fn tunnel_target(tunnel_id: &str) -> String {
    format!("{}.{}", tunnel_id, TUNNEL_DOMAIN)
}

fn same_host(record_name: &str, hostname: &str) -> bool {
    record_name
        .trim_end_matches('.')
        .eq_ignore_ascii_case(hostname.trim_end_matches('.'))
}

/// Groups hostnames by zone, keeping declaration order and dropping repeats.
pub fn hostnames_by_zone<'a, I>(hostnames: I) -> Result<BTreeMap<String, Vec<String>>, Error>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = BTreeSet::new();
    let mut zones: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for hostname in hostnames {
        let zone = hostname_to_zone(hostname)?;
        if seen.insert(hostname.trim_end_matches('.').to_ascii_lowercase()) {
            zones.entry(zone).or_default().push(hostname.to_owned());
        }
    }

    Ok(zones)
}

/// Points one CNAME per hostname of `zone` at the tunnel. Records of hostnames that are no
/// longer declared are left alone.
pub async fn sync_dns(
    provider: &dyn DnsProvider,
    zone: &str,
    hostnames: &[String],
    tunnel: &TunnelIdentity,
) -> Result<DnsSyncSummary, Error> {
    let zone = provider
        .find_zone(zone)
        .await?
        .ok_or_else(|| Error::ZoneNotFound(zone.to_owned()))?;

    let records = provider.list_cname_records(&zone.id).await?;
    let target = tunnel_target(&tunnel.id);
    let mut summary = DnsSyncSummary::default();

    for hostname in hostnames {
        match records.iter().find(|record| same_host(&record.name, hostname)) {
            Some(record) if record.content == target && record.ttl == AUTO_TTL => {
                debug!(hostname = %hostname, "dns record already points at tunnel");
                summary.unchanged += 1;
            }
            Some(record) => {
                let params = CnameParams {
                    name: record.name.clone(),
                    content: target.clone(),
                    ttl: AUTO_TTL,
                    proxied: record.proxied,
                };
                let zone_id = record.zone_id.as_deref().unwrap_or(&zone.id);
                provider.update_cname(zone_id, &record.id, &params).await?;
                info!(
                    hostname = %hostname,
                    record_id = %record.id,
                    previous = %record.content,
                    "updated dns record"
                );
                summary.updated += 1;
            }
            None => {
                let params = CnameParams {
                    name: hostname.clone(),
                    content: target.clone(),
                    ttl: AUTO_TTL,
                    proxied: false,
                };
                let record = provider.create_cname(&zone.id, &params).await?;
                info!(hostname = %hostname, record_id = %record.id, "created dns record");
                summary.created += 1;
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::testing::{identity, FakeDnsProvider};

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn creates_missing_records_unproxied() {
        let provider = FakeDnsProvider::with_zone("example.com");
        let tunnel = identity("abc", "t1");

        let summary = sync_dns(&provider, "example.com", &hosts(&["api.example.com"]), &tunnel)
            .await
            .unwrap();

        assert_eq!(summary.created, 1);
        let record = provider.record("api.example.com").unwrap();
        assert_eq!(record.content, "abc.cfargotunnel.com");
        assert_eq!(record.ttl, 1);
        assert!(!record.proxied);
    }

    #[tokio::test]
    async fn stale_records_are_updated_in_place() {
        let provider = FakeDnsProvider::with_zone("example.com");
        let stale_id = provider.seed_record("api.example.com", "old.cfargotunnel.com", true);
        let tunnel = identity("abc", "t1");

        let summary = sync_dns(&provider, "example.com", &hosts(&["api.example.com"]), &tunnel)
            .await
            .unwrap();

        assert_eq!(summary, DnsSyncSummary { created: 0, updated: 1, unchanged: 0 });
        let record = provider.record("api.example.com").unwrap();
        assert_eq!(record.id, stale_id);
        assert!(record.proxied);
        assert_eq!(record.content, "abc.cfargotunnel.com");
        assert_eq!(provider.create_calls(), 0);
    }

    #[tokio::test]
    async fn converged_records_issue_no_writes() {
        let provider = FakeDnsProvider::with_zone("example.com");
        provider.seed_record("api.example.com", "abc.cfargotunnel.com", false);
        let tunnel = identity("abc", "t1");

        let summary = sync_dns(&provider, "example.com", &hosts(&["api.example.com"]), &tunnel)
            .await
            .unwrap();

        assert_eq!(summary.unchanged, 1);
        assert_eq!(provider.create_calls(), 0);
        assert_eq!(provider.update_calls(), 0);
    }

    #[tokio::test]
    async fn every_hostname_ends_with_exactly_one_record() {
        let provider = FakeDnsProvider::with_zone("example.com");
        provider.seed_record("www.example.com", "old.cfargotunnel.com", false);
        provider.seed_record("legacy.example.com", "elsewhere.example.net", false);
        let tunnel = identity("abc", "t1");
        let hostnames = hosts(&["api.example.com", "www.example.com", "docs.example.com"]);

        sync_dns(&provider, "example.com", &hostnames, &tunnel)
            .await
            .unwrap();

        for hostname in &hostnames {
            let matching = provider
                .records()
                .into_iter()
                .filter(|record| &record.name == hostname)
                .collect::<Vec<_>>();
            assert_eq!(matching.len(), 1, "{hostname}");
            assert_eq!(matching[0].content, "abc.cfargotunnel.com");
        }
        // Undeclared records are never removed.
        assert!(provider.record("legacy.example.com").is_some());
    }

    #[tokio::test]
    async fn missing_zone_stops_the_zone_and_is_retried() {
        let mut provider = MockDnsProvider::new();
        provider.expect_find_zone().returning(|_| Ok(None));
        provider.expect_list_cname_records().never();

        let err = sync_dns(
            &provider,
            "example.com",
            &hosts(&["api.example.com"]),
            &identity("abc", "t1"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::ZoneNotFound(ref zone) if zone == "example.com"));
        assert!(err.is_retryable());
    }

    #[test]
    fn hostnames_group_by_zone_without_repeats() {
        let zones = hostnames_by_zone([
            "api.example.com",
            "www.example.org",
            "API.example.com",
            "docs.example.com",
        ])
        .unwrap();

        assert_eq!(zones.len(), 2);
        assert_eq!(zones["example.com"], hosts(&["api.example.com", "docs.example.com"]));
        assert_eq!(zones["example.org"], hosts(&["www.example.org"]));
    }

    #[test]
    fn grouping_rejects_bare_labels() {
        assert!(matches!(
            hostnames_by_zone(["localhost"]),
            Err(Error::InvalidHostname(_))
        ));
    }
}
