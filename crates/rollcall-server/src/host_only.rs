//! Loopback guard for the management surface.
//!
//! Course mutation, preference writes, and the roll export are meant for the
//! dashboard running on the professor's machine; students on the classroom
//! LAN only ever need the public routes. Requests whose TCP peer is not a
//! loopback address are refused.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ServerError;

pub fn is_dashboard_host(ip: IpAddr) -> bool {
    ip.is_loopback()
}

pub async fn require_loopback(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if !is_dashboard_host(addr.ip()) {
        tracing::warn!(peer = %addr, path = %req.uri().path(), "blocked non-local management request");
        return Err(ServerError::Forbidden(
            "This endpoint is only available on the dashboard host".to_string(),
        ));
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_addresses_pass() {
        assert!(is_dashboard_host("127.0.0.1".parse().unwrap()));
        assert!(is_dashboard_host("::1".parse().unwrap()));
    }

    #[test]
    fn lan_addresses_are_blocked() {
        assert!(!is_dashboard_host("10.0.0.5".parse().unwrap()));
        assert!(!is_dashboard_host("192.168.1.20".parse().unwrap()));
        assert!(!is_dashboard_host("fe80::1".parse().unwrap()));
    }
}
