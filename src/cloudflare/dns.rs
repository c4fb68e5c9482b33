use crate::cloudflare::AuthenticatedClient;
use crate::reconciler::dns::{CnameParams, DnsProvider, DnsRecord, Zone};
use crate::Error;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

const PAGE_SIZE: u32 = 100;

fn cname_body(params: &CnameParams) -> Value {
    json!({
        "type": "CNAME",
        "name": params.name,
        "content": params.content,
        "ttl": params.ttl,
        "proxied": params.proxied,
    })
}

#[async_trait]
impl DnsProvider for AuthenticatedClient {
    async fn find_zone(&self, name: &str) -> Result<Option<Zone>, Error> {
        let zones = self
            .get::<Vec<Zone>>("zones", &[("name", name.to_owned())])
            .await?
            .result;

        Ok(zones
            .into_iter()
            .find(|zone| zone.name.eq_ignore_ascii_case(name)))
    }

    async fn list_cname_records(&self, zone_id: &str) -> Result<Vec<DnsRecord>, Error> {
        let path = format!("zones/{}/dns_records", zone_id);
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let query = [
                ("type", "CNAME".to_owned()),
                ("per_page", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ];
            let response = self.get::<Vec<DnsRecord>>(&path, &query).await?;
            let has_next_page = response.has_next_page();
            records.extend(response.result);

            if !has_next_page {
                break;
            }
            page += 1;
        }

        Ok(records)
    }

    async fn create_cname(&self, zone_id: &str, params: &CnameParams) -> Result<DnsRecord, Error> {
        let path = format!("zones/{}/dns_records", zone_id);
        Ok(self
            .send::<DnsRecord>(Method::POST, &path, cname_body(params))
            .await?
            .result)
    }

    async fn update_cname(
        &self,
        zone_id: &str,
        record_id: &str,
        params: &CnameParams,
    ) -> Result<DnsRecord, Error> {
        let path = format!("zones/{}/dns_records/{}", zone_id, record_id);
        Ok(self
            .send::<DnsRecord>(Method::PUT, &path, cname_body(params))
            .await?
            .result)
    }
}
