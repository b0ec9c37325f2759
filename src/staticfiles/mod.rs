//! Static-file service: safe path resolution, MIME lookup, conditional
//! requests, and size-tiered serving (synchronous / cached-async /
//! streamed) over the cache and async file reader subsystems.

mod mime;

use crate::cache::{CacheManager, CacheValue};
use crate::config::StaticConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::AsyncFileManager;
use crate::http::{Request, Response};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Ties the LRU cache and async file manager to one configured document
/// root. Shared across connections via `Arc`; the cache is the only piece
/// mutated concurrently, so it alone is behind a mutex (spec.md §5's
/// documented multi-thread adaptation).
pub struct StaticContext {
    config: StaticConfig,
    root: PathBuf,
    cache: Mutex<CacheManager>,
    files: Arc<AsyncFileManager>,
}

impl StaticContext {
    pub fn new(config: StaticConfig) -> Result<Self> {
        let root = std::fs::canonicalize(&config.root)
            .map_err(|_| Error::new(ErrorKind::InvalidConfig, "static root does not exist"))?;
        let files = Arc::new(AsyncFileManager::new(
            config.max_concurrent_reads,
            config.max_file_size as u64,
        ));
        let cache = Mutex::new(CacheManager::new(
            config.cache_byte_cap,
            config.cache_entry_cap,
            config.cache_ttl_secs,
        ));
        Ok(StaticContext {
            config,
            root,
            cache,
            files,
        })
    }

    /// Resolves a request path against the document root, defeating
    /// traversal. `request_path` must already have the query string
    /// stripped.
    pub fn resolve_path(&self, request_path: &str) -> Result<PathBuf> {
        if request_path.bytes().any(|b| b == 0 || b.is_ascii_control()) {
            return Err(Error::from_kind(ErrorKind::Malformed));
        }

        let relative = if request_path == "/" {
            self.config.index_filename.clone()
        } else {
            request_path.trim_start_matches('/').to_string()
        };

        let candidate = self.root.join(&relative);
        // The file need not exist yet for directory-listing callers; try
        // canonicalize, and fall back to the syntactic join only when the
        // parent exists but the leaf doesn't (e.g. a 404 we still want to
        // report safely).
        let canonical = match std::fs::canonicalize(&candidate) {
            Ok(c) => c,
            Err(_) => {
                let parent = candidate
                    .parent()
                    .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
                let canonical_parent = std::fs::canonicalize(parent).map_err(|_| Error::from_kind(ErrorKind::NotFound))?;
                if !canonical_parent.starts_with(&self.root) {
                    return Err(Error::new(ErrorKind::InvalidParam, "path traversal rejected"));
                }
                return Err(Error::from_kind(ErrorKind::NotFound));
            }
        };

        if !canonical.starts_with(&self.root) {
            return Err(Error::new(ErrorKind::InvalidParam, "path traversal rejected"));
        }
        if canonical.as_os_str().len() > 4096 {
            return Err(Error::new(ErrorKind::InvalidParam, "path too long"));
        }

        Ok(canonical)
    }

    /// Serves `req.path` from the document root, producing a complete
    /// response including conditional-request handling.
    pub async fn serve(&self, req: &Request) -> Result<Response> {
        let resolved = self.resolve_path(&req.path)?;
        let metadata = tokio::fs::metadata(&resolved).await.map_err(|_| Error::from_kind(ErrorKind::NotFound))?;

        if metadata.is_dir() {
            let index = resolved.join(&self.config.index_filename);
            if tokio::fs::metadata(&index).await.map(|m| m.is_file()).unwrap_or(false) {
                return self.serve_file(&index, req).await;
            }
            if self.config.directory_listing {
                return Ok(self.render_directory_listing(&resolved, &req.path));
            }
            return Err(Error::from_kind(ErrorKind::NotFound));
        }

        self.serve_file(&resolved, req).await
    }

    async fn serve_file(&self, path: &Path, req: &Request) -> Result<Response> {
        let metadata = tokio::fs::metadata(path).await.map_err(|_| Error::from_kind(ErrorKind::NotFound))?;
        let size = metadata.len();
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let etag = format!("\"{}-{}\"", size, mtime);

        if self.config.etag_enabled {
            if let Some(inm) = req.headers.get("if-none-match") {
                if inm == etag || inm == "*" {
                    return Ok(not_modified(&etag, mtime, &self.config));
                }
            }
        }
        if self.config.last_modified_enabled {
            if let Some(ims) = req.headers.get("if-modified-since") {
                if let Ok(since) = httpdate::parse_http_date(ims) {
                    let since_secs = since.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
                    if mtime <= since_secs {
                        return Ok(not_modified(&etag, mtime, &self.config));
                    }
                }
            }
        }

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let mime_type = mime::lookup(extension);
        let path_key = path.to_string_lossy().into_owned();

        if let Some(cached) = self.cache.lock().get(&path_key) {
            return Ok(self.build_response(cached, &etag, mtime));
        }

        let content = if (size as usize) < self.config.small_file_threshold {
            tokio::fs::read(path).await?
        } else if (size as usize) < self.config.streaming_threshold {
            let result = self.files.read_whole_file(path).await?;
            let value = CacheValue {
                content: result.content.to_vec(),
                mime_type: mime_type.to_string(),
                last_modified: mtime,
                etag: etag.clone(),
            };
            self.cache.lock().put(path_key, value.clone());
            return Ok(self.build_response(value, &etag, mtime));
        } else {
            return self.serve_streamed(path, mime_type, &etag, mtime, size).await;
        };

        let value = CacheValue {
            content,
            mime_type: mime_type.to_string(),
            last_modified: mtime,
            etag: etag.clone(),
        };
        Ok(self.build_response(value, &etag, mtime))
    }

    async fn serve_streamed(&self, path: &Path, mime_type: &str, etag: &str, mtime: u64, size: u64) -> Result<Response> {
        use crate::fs::FileStream;
        let mut stream = FileStream::open(
            &self.files,
            path,
            self.config.sendfile_chunk_size,
            self.config.sendfile_timeout,
        )
        .await?;

        let mut body = Vec::with_capacity(size as usize);
        let mut retries_left = self.config.sendfile_retries;
        loop {
            match stream.next_chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) if retries_left > 0 => {
                    retries_left -= 1;
                    let _ = e;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        let value = CacheValue {
            content: body,
            mime_type: mime_type.to_string(),
            last_modified: mtime,
            etag: etag.to_string(),
        };
        Ok(self.build_response(value, etag, mtime))
    }

    fn build_response(&self, value: CacheValue, etag: &str, mtime: u64) -> Response {
        let mut resp = Response::new().with_status(200).with_body(value.content);
        resp = resp.header("content-type", value.mime_type);
        if self.config.etag_enabled {
            resp = resp.header("etag", etag.to_string());
        }
        if self.config.last_modified_enabled {
            resp = resp.header("last-modified", httpdate::fmt_http_date(UNIX_EPOCH + std::time::Duration::from_secs(mtime)));
        }
        resp = resp.header("cache-control", "public, max-age=3600");
        if let Some(custom) = &self.config.custom_header {
            resp = resp.header("x-served-by", custom.clone());
        }
        resp
    }

    fn render_directory_listing(&self, dir: &Path, request_path: &str) -> Response {
        let mut html = String::new();
        html.push_str("<!DOCTYPE html><html><body><ul>\n");
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let escaped = escape_html(&name);
                let _ = write!(html, "<li><a href=\"{}\">{}</a></li>\n", escaped, escaped);
            }
        }
        html.push_str("</ul></body></html>");
        let _ = request_path;
        Response::new()
            .with_status(200)
            .header("content-type", "text/html")
            .with_body(html.into_bytes())
    }
}

fn not_modified(etag: &str, mtime: u64, config: &StaticConfig) -> Response {
    let mut resp = Response::new().with_status(304);
    if config.etag_enabled {
        resp = resp.header("etag", etag.to_string());
    }
    if config.last_modified_enabled {
        resp = resp.header(
            "last-modified",
            httpdate::fmt_http_date(UNIX_EPOCH + std::time::Duration::from_secs(mtime)),
        );
    }
    resp
}

fn escape_html(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#39;".to_string(),
            other => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, Version};
    use std::io::Write;

    fn make_root_with(files: &[(&str, &[u8])]) -> PathBuf {
        let mut root = std::env::temp_dir();
        root.push(format!("corehttp-static-test-{}-{}", std::process::id(), now_nanos()));
        std::fs::create_dir_all(&root).unwrap();
        for (name, content) in files {
            let path = root.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(content).unwrap();
        }
        root
    }

    fn now_nanos() -> u128 {
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    }

    fn context_for(root: &Path) -> StaticContext {
        let mut cfg = StaticConfig::default();
        cfg.root = root.to_string_lossy().into_owned();
        StaticContext::new(cfg).unwrap()
    }

    #[test]
    fn rejects_path_traversal_before_any_fs_call() {
        let root = make_root_with(&[("index.html", b"hi")]);
        let ctx = context_for(&root);
        let err = ctx.resolve_path("/a/../../etc/passwd").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidParam | ErrorKind::NotFound));
    }

    #[test]
    fn resolves_index_for_root_path() {
        let root = make_root_with(&[("index.html", b"hi")]);
        let ctx = context_for(&root);
        let resolved = ctx.resolve_path("/").unwrap();
        assert_eq!(resolved.file_name().unwrap(), "index.html");
    }

    #[tokio::test]
    async fn conditional_request_scenario_returns_304() {
        let root = make_root_with(&[("index.html", b"hello")]);
        let ctx = context_for(&root);
        let req = Request::new(Method::Get, "/index.html".to_string(), Version::Http11);
        let first = ctx.serve(&req).await.unwrap();
        let etag = first.headers.get("etag").unwrap().to_string();

        let mut second_req = Request::new(Method::Get, "/index.html".to_string(), Version::Http11);
        second_req.headers.set("If-None-Match", etag);
        let second = ctx.serve(&second_req).await.unwrap();
        assert_eq!(second.status, 304);
        assert!(second.body.is_empty());
    }

    #[tokio::test]
    async fn serves_small_file_content_with_correct_mime() {
        let root = make_root_with(&[("style.css", b"body{}")]);
        let ctx = context_for(&root);
        let req = Request::new(Method::Get, "/style.css".to_string(), Version::Http11);
        let resp = ctx.serve(&req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.headers.get("content-type"), Some("text/css"));
        assert_eq!(resp.body, b"body{}");
    }
}
