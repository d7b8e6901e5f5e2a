use std::net::IpAddr;

/// Who is performing a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authority {
    Anonymous,
    Staff { username: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
}

/// Per-request facts that every pipeline call needs. Built by the caller
/// (router or CLI) and passed explicitly; nothing is read from ambient state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub ip: IpAddr,
    pub timestamp: i64,
    pub method: RequestMethod,
    pub authority: Authority,
}

impl RequestContext {
    pub fn new(ip: IpAddr, timestamp: i64) -> Self {
        Self {
            ip,
            timestamp,
            method: RequestMethod::Post,
            authority: Authority::Anonymous,
        }
    }

    pub fn staff(mut self, username: impl Into<String>) -> Self {
        self.authority = Authority::Staff {
            username: username.into(),
        };
        self
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self.authority, Authority::Staff { .. })
    }

    /// The submitter's address in the decimal integer form used by the store.
    pub fn numip(&self) -> String {
        ip_to_dec(self.ip)
    }

    pub fn actor(&self) -> &str {
        match &self.authority {
            Authority::Anonymous => "anonymous",
            Authority::Staff { username } => username,
        }
    }
}

pub fn ip_to_dec(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => u32::from(v4).to_string(),
        IpAddr::V6(v6) => u128::from(v6).to_string(),
    }
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
