//! Human-readable status page.

use axum::http::HeaderMap;
use axum::http::header::HOST;
use maud::{DOCTYPE, Markup, PreEscaped, html};

use gatehouse_core::policy::kind_list;

use super::capability::CapabilityDocument;
use crate::state::AppState;

/// Render the status page for a request.
///
/// Shows the same fields as the capability document. The connection URL
/// combines the request's host name with the configured port.
pub fn page(state: &AppState, headers: &HeaderMap) -> Markup {
    let doc = CapabilityDocument::from_state(state);
    let host = request_host(headers);
    let url = format!("ws://{host}:{}/", state.config.port);
    let limits = &doc.config;

    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (doc.name) }
                style { (PreEscaped(STATUS_CSS)) }
            }
            body {
                div class="container" {
                    h1 { (doc.name) }
                    p { (doc.description) }

                    h2 { "Relay Configuration" }
                    pre {
                        "Allowed Event Kinds: " (kind_list(&limits.allowed_kinds)) "\n"
                        "Whitelist Enabled: " (limits.whitelist_enabled.to_string()) "\n"
                        "Max Content Length: " (limits.max_content_length) " bytes\n"
                        "Max Event Tags: " (limits.max_event_tags) "\n"
                        "Debug Enabled: " (limits.debug_enabled.to_string())
                    }

                    h2 { "Connection Information" }
                    p {
                        "Connect to this relay using: "
                        code { (url) }
                    }
                    @if !doc.pubkey.is_empty() {
                        p {
                            "Operator: "
                            code { (doc.pubkey) }
                        }
                    }
                }
            }
        }
    }
}

/// Host name from the `Host` header with any port removed.
fn request_host(headers: &HeaderMap) -> &str {
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or("localhost");
    strip_port(host)
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal: "[::1]:3334"
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

const STATUS_CSS: &str = r#"
body{font-family:Arial,sans-serif;margin:40px;line-height:1.6}
pre{background:#f4f4f4;padding:15px;border-radius:5px}
.container{max-width:800px;margin:0 auto}
"#;
