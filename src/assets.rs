//! Build-time embedded monitor client assets
//!
//! The asset store is read-only and resolved at compile time; the server
//! looks files up by name and serves them with the matching MIME type.

/// Look up an embedded asset by name
pub fn get(name: &str) -> Option<(&'static [u8], &'static str)> {
    let bytes: &'static [u8] = match name {
        "favicon.ico" => include_bytes!("../assets/favicon.ico"),
        "index.html" => include_bytes!("../assets/index.html"),
        "styles/main.css" => include_bytes!("../assets/styles/main.css"),
        "external/monitor.js" => include_bytes!("../assets/external/monitor.js"),
        _ => return None,
    };
    Some((bytes, mime_for(name)))
}

/// MIME type by file extension; the client depends on these exact values
fn mime_for(name: &str) -> &'static str {
    if name.ends_with(".html") {
        "text/html"
    } else if name.ends_with(".css") {
        "text/css"
    } else if name.ends_with(".js") {
        "application/javascript"
    } else if name.ends_with(".ico") {
        "image/x-icon"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_assets_resolve() {
        for (name, mime) in [
            ("favicon.ico", "image/x-icon"),
            ("index.html", "text/html"),
            ("styles/main.css", "text/css"),
            ("external/monitor.js", "application/javascript"),
        ] {
            let (bytes, got) = get(name).unwrap();
            assert!(!bytes.is_empty(), "{name} is empty");
            assert_eq!(got, mime);
        }
    }

    #[test]
    fn test_unknown_asset_is_none() {
        assert!(get("styles/other.css").is_none());
        assert!(get("../Cargo.toml").is_none());
    }
}
