use std::{fmt, str::FromStr};

use bytes::Bytes;

use crate::error::Error;

/// A URL scheme the core knows how to speak.
///
/// Anything other than `http` or `https` is rejected at parse time, so a
/// [`RawUrl`] can always produce an [`Origin`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Cleartext HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Scheme {
    /// The scheme as it appears in a URL.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// The port implied when a URL does not carry an explicit one.
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(Error::unsupported_protocol(other)),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(scheme, host, port)` triple that keys connection reuse.
///
/// Two requests share a connection only when their origins compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Origin {
    /// Create an origin from its parts.
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Origin {
        Origin {
            scheme,
            host: host.into(),
            port,
        }
    }

    /// The scheme of this origin.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The host of this origin.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The (always explicit) port of this origin.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// The target of a request: scheme, host, optional port, and the raw
/// request-target bytes (path plus optional query) sent on the wire.
#[derive(Clone, Debug)]
pub struct RawUrl {
    scheme: Scheme,
    host: String,
    port: Option<u16>,
    target: Bytes,
}

impl RawUrl {
    /// Assemble a URL from pre-parsed parts.
    ///
    /// `target` is written to the request line verbatim; an empty target is
    /// normalised to `/`.
    pub fn new(
        scheme: Scheme,
        host: impl Into<String>,
        port: Option<u16>,
        target: impl Into<Bytes>,
    ) -> RawUrl {
        let target = target.into();
        RawUrl {
            scheme,
            host: host.into(),
            port,
            target: if target.is_empty() {
                Bytes::from_static(b"/")
            } else {
                target
            },
        }
    }

    /// Parse an absolute URL string.
    ///
    /// Fails with an unsupported-protocol error for schemes other than
    /// `http`/`https`, and with an invalid-URL error for anything the URL
    /// grammar rejects or that lacks a host.
    pub fn parse(input: &str) -> Result<RawUrl, Error> {
        let url = url::Url::parse(input).map_err(Error::url)?;
        let scheme = url.scheme().parse::<Scheme>()?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::url(format!("URL has no host: {input:?}")))?
            .to_owned();

        let mut target = url.path().to_owned();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        Ok(RawUrl::new(scheme, host, url.port(), target))
    }

    /// The scheme of this URL.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The host of this URL.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The explicit port of this URL, if any.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The raw request-target bytes.
    pub fn target(&self) -> &Bytes {
        &self.target
    }

    /// The origin this URL resolves to, substituting the scheme-default
    /// port when none is given.
    pub fn origin(&self) -> Origin {
        Origin {
            scheme: self.scheme,
            host: self.host.clone(),
            port: self.port.unwrap_or_else(|| self.scheme.default_port()),
        }
    }
}

impl fmt::Display for RawUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        match std::str::from_utf8(&self.target) {
            Ok(target) => f.write_str(target),
            Err(_) => write!(f, "{:?}", self.target),
        }
    }
}

impl FromStr for RawUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        RawUrl::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_substitutes_default_ports() {
        let url = RawUrl::parse("https://example.com/path?q=1").unwrap();
        assert_eq!(url.origin(), Origin::new(Scheme::Https, "example.com", 443));
        assert_eq!(url.target().as_ref(), b"/path?q=1");

        let url = RawUrl::parse("http://example.com").unwrap();
        assert_eq!(url.origin(), Origin::new(Scheme::Http, "example.com", 80));
        assert_eq!(url.target().as_ref(), b"/");
    }

    #[test]
    fn explicit_port_wins() {
        let url = RawUrl::parse("http://example.com:8080/").unwrap();
        assert_eq!(url.port(), Some(8080));
        assert_eq!(url.origin().port(), 8080);
    }

    #[test]
    fn origins_key_on_all_three_parts() {
        let https = RawUrl::parse("https://example.com/").unwrap().origin();
        let http = RawUrl::parse("http://example.com/").unwrap().origin();
        assert_ne!(https, http);
        assert_eq!(https, Origin::new(Scheme::Https, "example.com", 443));
    }

    #[test]
    fn rejects_unsupported_schemes() {
        let err = RawUrl::parse("ftp://example.com/").unwrap_err();
        assert!(err.is_unsupported_protocol());
    }

    #[test]
    fn origin_display() {
        let origin = Origin::new(Scheme::Https, "example.com", 443);
        assert_eq!(origin.to_string(), "https://example.com:443");
    }
}
