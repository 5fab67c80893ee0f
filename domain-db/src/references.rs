use reqwest::Url;

/// Hosts that point back at the machine rendering the reference.
const LOOPBACK_HOSTS: &[&str] = &["localhost", "0.0.0.0", "[::1]"];
const LOOPBACK_PREFIX: &str = "127.";

/// Whether a reference URL may be stored and later rendered as a link.
///
/// Only absolute `http`/`https` URLs with a non-empty host are accepted, and
/// the host must not be one of the local markers. The host check works on
/// the raw hostname, no address resolution is done. Anything that does not
/// parse is rejected.
pub fn is_safe(url: &str) -> bool {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    match parsed.host_str() {
        None | Some("") => false,
        Some(host) => !is_loopback(host),
    }
}

fn is_loopback(host: &str) -> bool {
    LOOPBACK_HOSTS.contains(&host) || host.starts_with(LOOPBACK_PREFIX)
}

/// Filter `urls` through [`is_safe`] and join the survivors with `,`,
/// preserving their order.
pub fn join_safe<'a, I>(urls: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    urls.into_iter()
        .filter(|url| {
            let safe = is_safe(url);
            if !safe {
                log::debug!("dropping unsafe reference {url}");
            }
            safe
        })
        .collect::<Vec<_>>()
        .join(",")
}
