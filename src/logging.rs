use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Short stable id for a piece of reporter text. Raw text is never logged.
pub fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// `RUST_LOG` filter (default `report_triage=info,warn`); `LOG_FORMAT=json` for JSON lines.
///
/// Safe to call twice: a second global subscriber is silently ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("report_triage=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_short_and_stable() {
        let a = anon_hash("my teacher hit me");
        assert_eq!(a.len(), 12);
        assert_eq!(a, anon_hash("my teacher hit me"));
        assert_ne!(a, anon_hash("my teacher helped me"));
    }
}
