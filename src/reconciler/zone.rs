use crate::Error;

/// Turns a hostname into its zone, e.g. `blah.example.com` into `example.com`.
pub fn hostname_to_zone(hostname: &str) -> Result<String, Error> {
    let labels = hostname
        .trim_end_matches('.')
        .rsplitn(3, '.')
        .take(2)
        .collect::<Vec<_>>();

    match labels.as_slice() {
        [tld, domain] if !tld.is_empty() && !domain.is_empty() => {
            Ok(format!("{}.{}", domain, tld).to_ascii_lowercase())
        }
        _ => Err(Error::InvalidHostname(hostname.to_owned())),
    }
}
