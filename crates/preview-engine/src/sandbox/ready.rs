//! Detection of the static server's "listening" announcement

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ServerReady;

static LOCAL_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d{1,5}))")
        .expect("valid regex")
});

/// Extract `{port, url}` from a server output line announcing a local URL.
///
/// Wildcard binds are rewritten to loopback so the URL is reachable.
pub fn parse_ready_line(line: &str) -> Option<ServerReady> {
    let caps = LOCAL_URL.captures(line)?;
    let port: u16 = caps.get(2)?.as_str().parse().ok()?;
    let url = caps
        .get(1)?
        .as_str()
        .replace("0.0.0.0", "127.0.0.1")
        .replace("[::]", "127.0.0.1");
    Some(ServerReady { port, url })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_banner() {
        let ready = parse_ready_line("   - Local:    http://127.0.0.1:4173").unwrap();
        assert_eq!(ready.port, 4173);
        assert_eq!(ready.url, "http://127.0.0.1:4173");
    }

    #[test]
    fn test_accepting_connections_line() {
        let ready = parse_ready_line(" INFO  Accepting connections at http://localhost:3000").unwrap();
        assert_eq!(ready.port, 3000);
        assert_eq!(ready.url, "http://localhost:3000");
    }

    #[test]
    fn test_wildcard_bind_is_rewritten() {
        let ready = parse_ready_line("listening on http://0.0.0.0:8080/").unwrap();
        assert_eq!(ready.url, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_non_ready_lines() {
        assert!(parse_ready_line("added 88 packages in 2s").is_none());
        assert!(parse_ready_line("see https://example.com:443 for docs").is_none());
        assert!(parse_ready_line("http://localhost:99999").is_none());
    }
}
