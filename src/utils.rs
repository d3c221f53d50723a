use once_cell::sync::Lazy;
use url::Url;

pub static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
});

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Push endpoint served from the root of the API host, with a websocket scheme.
pub fn push_url_from_api(api_base: &str) -> Option<String> {
    let mut url = Url::parse(api_base).ok()?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        "ws" | "wss" => return Some(url.to_string()),
        _ => return None,
    };
    url.set_scheme(scheme).ok()?;
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_defaults_to_https() {
        assert_eq!(normalize_url(" shop.test "), "https://shop.test");
        assert_eq!(normalize_url("http://localhost:5000"), "http://localhost:5000");
    }

    #[test]
    fn push_url_swaps_scheme_and_drops_path() {
        assert_eq!(
            push_url_from_api("https://shop.test/api/v1?x=1").as_deref(),
            Some("wss://shop.test/")
        );
        assert_eq!(push_url_from_api("http://127.0.0.1:5000").as_deref(), Some("ws://127.0.0.1:5000/"));
        assert_eq!(push_url_from_api("ftp://shop.test"), None);
        assert_eq!(push_url_from_api("not a url"), None);
    }
}
