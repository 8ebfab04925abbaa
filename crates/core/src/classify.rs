/// Address classification
///
/// Maps an address (bare `host[:port]` or a full URL) to the routing class
/// that decides which backend carries the connection.

use std::fmt;
use std::net::IpAddr;

/// Routing class of an address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AddressClass {
    /// Hostname ends in `.i2p`
    I2p,
    /// Hostname ends in `.onion`
    Onion,
    /// Hostname is an IPv4 or IPv6 literal
    Ip,
    /// Anything else, carrying the top-level label (or the whole
    /// hostname when it has no usable separator)
    Other(String),
}

impl AddressClass {
    pub fn label(&self) -> &str {
        match self {
            Self::I2p => "i2p",
            Self::Onion => "onion",
            Self::Ip => "ip",
            Self::Other(label) => label,
        }
    }

    fn from_label(label: &str) -> Self {
        match label {
            "i2p" => Self::I2p,
            "onion" => Self::Onion,
            "ip" => Self::Ip,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for AddressClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify an address.
///
/// Labels are compared exactly as supplied: `EXAMPLE.ONION` is
/// `Other("ONION")`, not `Onion`.
pub fn classify(address: &str) -> Result<AddressClass, AddressError> {
    top_level_label(address).map(|label| AddressClass::from_label(&label))
}

/// Top-level label of the address host, `"ip"` for IP literals.
///
/// A host without a dot, or ending in one, is returned whole, so
/// `localhost` yields `localhost` and `example.com.` yields `example.com.`.
pub fn top_level_label(address: &str) -> Result<String, AddressError> {
    let hostname = extract_hostname(address)?;

    if hostname.parse::<IpAddr>().is_ok() {
        return Ok("ip".to_string());
    }

    match hostname.rfind('.') {
        Some(dot) if dot + 1 < hostname.len() => Ok(hostname[dot + 1..].to_string()),
        _ => Ok(hostname.to_string()),
    }
}

/// Extract the hostname from an address, stripping scheme, userinfo,
/// port, path and IPv6 brackets.
pub fn extract_hostname(address: &str) -> Result<&str, AddressError> {
    let authority = authority(address)
        .map_err(|reason| AddressError::InvalidAddress(format!("{}: {}", address, reason)))?;

    // userinfo@host
    let host_port = match authority.rfind('@') {
        Some(at) => &authority[at + 1..],
        None => authority,
    };

    let hostname = split_host_port(host_port)
        .map_err(|reason| AddressError::InvalidAddress(format!("{}: {}", address, reason)))?
        .0;

    if hostname.is_empty() {
        return Err(AddressError::InvalidAddress(format!(
            "{}: no hostname found",
            address
        )));
    }

    Ok(hostname)
}

/// Authority component of an address. Without a scheme the address is
/// read as if `http://` had been prepended.
fn authority(address: &str) -> Result<&str, &'static str> {
    let rest = match split_scheme(address)? {
        Some((_, rest)) => rest,
        None => address,
    };

    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    Ok(&rest[..end])
}

/// Split `scheme://rest`. A `://` only counts as a scheme separator when
/// everything before it is `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )`;
/// anywhere else (a query, a path) the address has no usable authority.
pub(crate) fn split_scheme(address: &str) -> Result<Option<(&str, &str)>, &'static str> {
    let Some((scheme, rest)) = address.split_once("://") else {
        return Ok(None);
    };

    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    if valid {
        Ok(Some((scheme, rest)))
    } else {
        Err("'://' outside of a scheme")
    }
}

/// Split `host[:port]` or `[v6][:port]` into host and optional port digits
pub(crate) fn split_host_port(host_port: &str) -> Result<(&str, Option<&str>), &'static str> {
    if let Some(bracketed) = host_port.strip_prefix('[') {
        let end = bracketed.find(']').ok_or("missing ']' in host")?;
        let host = &bracketed[..end];
        let tail = &bracketed[end + 1..];

        return match tail {
            "" => Ok((host, None)),
            _ => match tail.strip_prefix(':') {
                Some(port) => Ok((host, parse_port(port)?)),
                None => Err("unexpected characters after ']'"),
            },
        };
    }

    match host_port.rfind(':') {
        Some(colon) => {
            let port = &host_port[colon + 1..];
            Ok((&host_port[..colon], parse_port(port)?))
        }
        None => Ok((host_port, None)),
    }
}

fn parse_port(port: &str) -> Result<Option<&str>, &'static str> {
    if port.is_empty() {
        return Ok(None);
    }
    if !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err("invalid port");
    }
    Ok(Some(port))
}

/// Address errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_labels() {
        assert_eq!(classify("example.i2p").unwrap(), AddressClass::I2p);
        assert_eq!(classify("http://example.i2p/path").unwrap(), AddressClass::I2p);
        assert_eq!(classify("example.onion").unwrap(), AddressClass::Onion);
        assert_eq!(
            classify("https://user:pw@abcdef.onion:443/index.html?q=1").unwrap(),
            AddressClass::Onion
        );
    }

    #[test]
    fn test_ip_literals() {
        assert_eq!(classify("1.2.3.4").unwrap(), AddressClass::Ip);
        assert_eq!(classify("http://1.2.3.4:8080").unwrap(), AddressClass::Ip);
        assert_eq!(classify("[::1]:80").unwrap(), AddressClass::Ip);
        assert_eq!(classify("http://[2001:db8::1]/").unwrap(), AddressClass::Ip);
    }

    #[test]
    fn test_other_labels() {
        assert_eq!(classify("example.com").unwrap(), AddressClass::Other("com".into()));
        assert_eq!(classify("example.com:443").unwrap().label(), "com");
        assert_eq!(classify("localhost").unwrap().label(), "localhost");
        assert_eq!(classify("localhost:8080").unwrap().label(), "localhost");
        assert_eq!(classify("example.com.").unwrap().label(), "example.com.");
    }

    #[test]
    fn test_case_is_preserved() {
        assert_eq!(classify("EXAMPLE.ONION").unwrap(), AddressClass::Other("ONION".into()));
        assert_eq!(top_level_label("Example.Com").unwrap(), "Com");
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(matches!(classify(""), Err(AddressError::InvalidAddress(_))));
        assert!(matches!(classify("http://"), Err(AddressError::InvalidAddress(_))));
        assert!(matches!(classify(":8080"), Err(AddressError::InvalidAddress(_))));
        assert!(matches!(classify("example.com:http"), Err(AddressError::InvalidAddress(_))));
        assert!(matches!(classify("[::1"), Err(AddressError::InvalidAddress(_))));
    }

    #[test]
    fn test_embedded_url_is_not_the_authority() {
        // A URL in the query must not pick the route
        assert!(matches!(
            classify("x.onion?next=http://a.i2p"),
            Err(AddressError::InvalidAddress(_))
        ));
        assert!(matches!(
            classify("example.com/redirect?to=http://evil.onion"),
            Err(AddressError::InvalidAddress(_))
        ));
        assert!(matches!(classify("1http://a.onion"), Err(AddressError::InvalidAddress(_))));

        assert_eq!(classify("svn+ssh://host.i2p/repo").unwrap(), AddressClass::I2p);
        assert_eq!(
            classify("http://example.com/?to=http://evil.onion").unwrap().label(),
            "com"
        );
    }

    #[test]
    fn test_split_scheme() {
        assert_eq!(split_scheme("https://a.onion"), Ok(Some(("https", "a.onion"))));
        assert_eq!(split_scheme("a.onion:80"), Ok(None));
        assert!(split_scheme("a.onion/x?u=http://b").is_err());
        assert!(split_scheme("://a.onion").is_err());
    }

    #[test]
    fn test_classify_is_deterministic() {
        for address in ["example.i2p", "1.2.3.4", "localhost", "", "http://x.onion/a"] {
            assert_eq!(classify(address), classify(address));
        }
    }

    #[test]
    fn test_extract_hostname() {
        assert_eq!(extract_hostname("example.com:80").unwrap(), "example.com");
        assert_eq!(extract_hostname("socks5h://u@host.i2p:4444").unwrap(), "host.i2p");
        assert_eq!(extract_hostname("[::1]:443").unwrap(), "::1");
        assert_eq!(extract_hostname("host#frag").unwrap(), "host");
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("a.onion:80"), Ok(("a.onion", Some("80"))));
        assert_eq!(split_host_port("a.onion"), Ok(("a.onion", None)));
        assert_eq!(split_host_port("a.onion:"), Ok(("a.onion", None)));
        assert_eq!(split_host_port("[::1]:9050"), Ok(("::1", Some("9050"))));
        assert!(split_host_port("a:80x").is_err());
        assert!(split_host_port("[::1]x").is_err());
    }
}
