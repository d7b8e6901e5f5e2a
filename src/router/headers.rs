use std::{net::IpAddr, str::FromStr};

use axum::{
    headers::{Error, Header},
    http::{HeaderName, HeaderValue},
};

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// The proxy chain, client first.
pub struct XForwardedFor(pub Vec<IpAddr>);

impl XForwardedFor {
    pub fn client(&self) -> Option<IpAddr> {
        self.0.first().copied()
    }
}

impl Header for XForwardedFor {
    fn name() -> &'static HeaderName {
        &X_FORWARDED_FOR
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, Error>
    where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut chain = Vec::new();
        for value in values {
            let ips = value
                .to_str()
                .map_err(|_| Error::invalid())?
                .split(',')
                .map(str::trim)
                .filter(|ip| !ip.is_empty());
            for ip in ips {
                chain.push(IpAddr::from_str(ip).map_err(|_| Error::invalid())?);
            }
        }
        Ok(Self(chain))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let joined = self
            .0
            .iter()
            .map(IpAddr::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        if let Ok(value) = HeaderValue::from_str(&joined) {
            values.extend(std::iter::once(value));
        }
    }
}
