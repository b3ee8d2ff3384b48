use axum::{
    extract::{connect_info::ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

/// Client IP from proxy headers, then the transport address, then loopback.
pub fn extract_ip_from_headers(headers: &HeaderMap, fallback: Option<IpAddr>) -> IpAddr {
    if let Some(h) = headers.get("x-forwarded-for").and_then(|hv| hv.to_str().ok()) {
        if let Some(first) = h.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }
    if let Some(h) = headers.get("x-real-ip").and_then(|hv| hv.to_str().ok()) {
        if let Ok(ip) = h.trim().parse::<IpAddr>() {
            return ip;
        }
    }
    fallback.unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

/// Optional remote socket address. Unlike `ConnectInfo` this never rejects,
/// so handlers also work under `oneshot` in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct MaybeRemoteAddr(pub Option<SocketAddr>);

impl MaybeRemoteAddr {
    /// Effective client IP for rate limiting.
    pub fn client_ip(&self, headers: &HeaderMap) -> IpAddr {
        extract_ip_from_headers(headers, self.0.map(|a| a.ip()))
    }
}

impl<S> FromRequestParts<S> for MaybeRemoteAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match ConnectInfo::<SocketAddr>::from_request_parts(parts, state).await {
            Ok(ConnectInfo(addr)) => Ok(MaybeRemoteAddr(Some(addr))),
            Err(_) => Ok(MaybeRemoteAddr(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(extract_ip_from_headers(&headers, None), IpAddr::from([203, 0, 113, 7]));
    }

    #[test]
    fn falls_back_to_transport_then_loopback() {
        let headers = HeaderMap::new();
        let remote = IpAddr::from([192, 0, 2, 1]);
        assert_eq!(extract_ip_from_headers(&headers, Some(remote)), remote);
        assert_eq!(extract_ip_from_headers(&headers, None), IpAddr::from([127, 0, 0, 1]));
    }
}
