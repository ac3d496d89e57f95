//! Per-IP request budgets backed by `governor` keyed limiters.
//!
//! Clients are keyed by socket peer address. Behind `n` trusted reverse
//! proxies the address is read `n` entries from the right of
//! `X-Forwarded-For` instead; entries further left are client-supplied.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::state::RateLimit;

pub const AUTH_LIMIT_MESSAGE: &str = "Too many authentication attempts. Please try again later.";
pub const API_LIMIT_MESSAGE: &str = "Too many requests. Please try again later.";

pub struct IpRateLimiter {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
    retry_after_secs: u64,
    message: &'static str,
    trusted_hops: usize,
}

impl IpRateLimiter {
    /// `limit.max` requests may be spent at once; the budget refills evenly
    /// over `limit.window`.
    pub fn new(limit: &RateLimit, message: &'static str, trusted_hops: usize) -> Self {
        let burst = NonZeroU32::new(limit.max).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(limit.window / burst.get())
            .map(|q| q.allow_burst(burst))
            .unwrap_or_else(|| Quota::per_second(burst));

        Self {
            limiter: RateLimiter::keyed(quota),
            retry_after_secs: limit.retry_after_secs(),
            message,
            trusted_hops,
        }
    }

    pub fn check(&self, ip: IpAddr) -> bool {
        self.limiter.check_key(&ip).is_ok()
    }

    /// Forget clients whose budget has fully refilled.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }

    fn rejection(&self) -> Response {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": self.message,
                "retryAfter": self.retry_after_secs,
            })),
        )
            .into_response();

        if let Ok(value) = HeaderValue::from_str(&self.retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<IpRateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = client_ip(req.headers(), peer, limiter.trusted_hops);

    if !limiter.check(ip) {
        tracing::warn!("Rate limit exceeded for {} on {}", ip, req.uri().path());
        return limiter.rejection();
    }

    next.run(req).await
}

fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trusted_hops: usize) -> IpAddr {
    let forwarded = (trusted_hops > 0)
        .then(|| forwarded_client(headers, trusted_hops))
        .flatten();

    forwarded
        .or(peer)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// The entry appended by the outermost trusted proxy. A shorter chain than
/// `trusted_hops` was written entirely by trusted proxies, so its first
/// entry is used.
fn forwarded_client(headers: &HeaderMap, trusted_hops: usize) -> Option<IpAddr> {
    let chain: Vec<&str> = headers
        .get_all("X-Forwarded-For")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect();

    let index = chain.len().checked_sub(1)?.saturating_sub(trusted_hops - 1);
    chain.get(index)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limit(max: u32) -> RateLimit {
        RateLimit {
            window: Duration::from_secs(900),
            max,
        }
    }

    #[test]
    fn test_budget_is_per_ip() {
        let limiter = IpRateLimiter::new(&limit(2), API_LIMIT_MESSAGE, 0);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a));
        assert!(limiter.check(a));
        assert!(!limiter.check(a));
        assert!(limiter.check(b));
    }

    #[test]
    fn test_zero_max_still_builds() {
        let limiter = IpRateLimiter::new(&limit(0), API_LIMIT_MESSAGE, 0);
        assert!(limiter.check(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn test_rejection_body() {
        let limiter = IpRateLimiter::new(&limit(1), AUTH_LIMIT_MESSAGE, 0);
        let response = limiter.rejection();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "900");
    }

    #[test]
    fn test_forwarded_for_ignored_without_trusted_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", HeaderValue::from_static("203.0.113.7"));
        let peer = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));

        assert_eq!(client_ip(&headers, peer, 0), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_rotating_forwarded_for_shares_one_budget() {
        let limiter = IpRateLimiter::new(&limit(2), AUTH_LIMIT_MESSAGE, 0);
        let peer = Some("198.51.100.4".parse::<IpAddr>().unwrap());

        let allowed = (0..50)
            .filter(|i| {
                let mut headers = HeaderMap::new();
                let spoofed = format!("10.1.{}.{}", i / 250, i % 250);
                headers.insert("X-Forwarded-For", HeaderValue::from_str(&spoofed).unwrap());
                limiter.check(client_ip(&headers, peer, limiter.trusted_hops))
            })
            .count();

        assert_eq!(allowed, 2);
    }

    #[test]
    fn test_trusted_hops_read_from_the_right() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Forwarded-For",
            HeaderValue::from_static("6.6.6.6, 203.0.113.7, 10.0.0.1"),
        );
        let peer = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));

        assert_eq!(client_ip(&headers, peer, 1), "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(client_ip(&headers, peer, 2), "203.0.113.7".parse::<IpAddr>().unwrap());
        assert_eq!(client_ip(&headers, peer, 5), "6.6.6.6".parse::<IpAddr>().unwrap());
        assert_eq!(client_ip(&HeaderMap::new(), peer, 1), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
