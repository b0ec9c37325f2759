//! Fixed extension → MIME type table. Deliberately closed (not delegated
//! to a general-purpose guesser like `mime_guess`) so unknown extensions
//! consistently fall back to `application/octet-stream` rather than
//! whatever a broader table happens to recognize.

pub fn lookup(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",

        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "bmp" => "image/bmp",

        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "aac" => "audio/aac",

        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",

        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "eot" => "application/vnd.ms-fontobject",

        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",

        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_map_correctly() {
        assert_eq!(lookup("html"), "text/html");
        assert_eq!(lookup("JPG"), "image/jpeg");
        assert_eq!(lookup("woff2"), "font/woff2");
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        assert_eq!(lookup("xyz123"), "application/octet-stream");
    }
}
