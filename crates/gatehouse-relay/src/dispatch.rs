//! Request dispatcher for the relay root.
//!
//! A request to `/` is one of three things, decided from headers alone:
//!
//! 1. A websocket upgrade: handed to the relay engine.
//! 2. A request for structured data: answered with the capability document.
//! 3. Anything else: answered with the human-readable status page.
//!
//! The upgrade check wins even when `Accept` also asks for JSON.

use axum::http::HeaderMap;
use axum::http::header::{ACCEPT, UPGRADE};

/// Media types that select the capability document.
const STRUCTURED_TYPES: [&str; 2] = ["application/json", "application/nostr+json"];

/// Where a root request goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    StreamingHandoff,
    CapabilityDocument,
    StatusPage,
}

/// Pick the branch for a request. Never fails.
pub fn route(headers: &HeaderMap) -> Route {
    if requests_upgrade(headers) {
        Route::StreamingHandoff
    } else if requests_structured_data(headers) {
        Route::CapabilityDocument
    } else {
        Route::StatusPage
    }
}

/// True when any `Upgrade` token is `websocket`, in any case.
///
/// Whether the rest of the handshake is valid is the engine's call.
fn requests_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(UPGRADE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
}

/// True when `Accept` lists a JSON media type with a non-zero quality.
fn requests_structured_data(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|entry| {
            let mut params = entry.split(';');
            let media_type = params.next().unwrap_or("").trim();
            STRUCTURED_TYPES
                .iter()
                .any(|t| media_type.eq_ignore_ascii_case(t))
                && !params.any(is_zero_quality)
        })
}

fn is_zero_quality(param: &str) -> bool {
    let Some((name, value)) = param.split_once('=') else {
        return false;
    };
    name.trim().eq_ignore_ascii_case("q")
        && value.trim().parse::<f32>().is_ok_and(|q| q <= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn upgrade_in_any_case() {
        for value in ["websocket", "WebSocket", "WEBSOCKET", "h2c, websocket"] {
            assert_eq!(
                route(&headers(&[("upgrade", value)])),
                Route::StreamingHandoff,
                "{value}"
            );
        }
    }

    #[test]
    fn upgrade_wins_over_json_accept() {
        let h = headers(&[("upgrade", "websocket"), ("accept", "application/json")]);
        assert_eq!(route(&h), Route::StreamingHandoff);
    }

    #[test]
    fn other_upgrades_are_not_streaming() {
        assert_eq!(route(&headers(&[("upgrade", "h2c")])), Route::StatusPage);
    }

    #[test]
    fn json_accept_selects_capability_document() {
        for value in [
            "application/json",
            "application/nostr+json",
            "Application/JSON",
            "text/html, application/json;q=0.9",
            "application/json; charset=utf-8",
        ] {
            assert_eq!(
                route(&headers(&[("accept", value)])),
                Route::CapabilityDocument,
                "{value}"
            );
        }
    }

    #[test]
    fn everything_else_gets_status_page() {
        assert_eq!(route(&HeaderMap::new()), Route::StatusPage);
        for value in ["text/html", "*/*", "", "application/json;q=0", "application/xml"] {
            assert_eq!(
                route(&headers(&[("accept", value)])),
                Route::StatusPage,
                "{value}"
            );
        }
    }

    #[test]
    fn zero_quality_parsing() {
        assert!(is_zero_quality("q=0"));
        assert!(is_zero_quality(" Q = 0.000"));
        assert!(!is_zero_quality("q=0.1"));
        assert!(!is_zero_quality("charset=utf-8"));
        assert!(!is_zero_quality("q"));
    }
}
