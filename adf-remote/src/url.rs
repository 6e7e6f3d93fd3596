use adf_core::{Error, RemoteOptions, Result};

/// True when a scan path must go through the remote driver instead of the
/// local file system.
pub fn is_remote_path(path: &str) -> bool {
    ["s3://", "gs://", "http://", "https://"]
        .iter()
        .any(|p| path.starts_with(p))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    S3,
    Gs,
    Http,
    Https,
}

/// A parsed remote location. For object-store schemes the bucket/key split
/// is kept so the request layout (virtual-hosted vs path-style) can be
/// decided per request; plain HTTP keeps host and path verbatim.
#[derive(Debug, Clone)]
pub struct RemoteUrl {
    pub scheme: Scheme,
    pub bucket: String,
    pub key: String,
    raw: String,
}

/// Host, absolute URI path and full URL for one HTTP request.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub host: String,
    pub uri_path: String,
    pub url: String,
    /// Whether the request should carry SigV4 headers when credentials
    /// are configured.
    pub sign: bool,
}

impl RemoteUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = if let Some(rest) = url.strip_prefix("s3://") {
            (Scheme::S3, rest)
        } else if let Some(rest) = url.strip_prefix("gs://") {
            (Scheme::Gs, rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else if let Some(rest) = url.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else {
            return Err(Error::Internal(format!("not a remote URL: {url}")));
        };

        let (bucket, key) = match rest.split_once('/') {
            Some((b, k)) => (b.to_string(), k.to_string()),
            None => (rest.to_string(), String::new()),
        };
        if bucket.is_empty() {
            return Err(Error::Internal(format!("malformed remote URL: {url}")));
        }
        if matches!(scheme, Scheme::S3 | Scheme::Gs) && key.is_empty() {
            return Err(Error::Internal(format!(
                "object URL has no key: {url}"
            )));
        }

        Ok(Self {
            scheme,
            bucket,
            key,
            raw: url.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Lay the request out for `region`. S3 without a custom endpoint uses
    /// virtual-hosted style; custom endpoints and GS use path style.
    pub fn resolve(&self, opts: &RemoteOptions, region: &str) -> ResolvedRequest {
        self.resolve_key(opts, region, &self.key)
    }

    /// Same as [`Self::resolve`] but for an arbitrary key under the same
    /// bucket (prefix listings hit the bucket root).
    pub fn resolve_key(&self, opts: &RemoteOptions, region: &str, key: &str) -> ResolvedRequest {
        match self.scheme {
            Scheme::S3 => {
                if let Some(endpoint) = &opts.endpoint {
                    let proto = if opts.use_ssl { "https" } else { "http" };
                    let host = endpoint
                        .trim_start_matches("https://")
                        .trim_start_matches("http://")
                        .trim_end_matches('/')
                        .to_string();
                    let uri_path = format!("/{}/{}", self.bucket, key);
                    ResolvedRequest {
                        url: format!("{proto}://{host}{uri_path}"),
                        host,
                        uri_path,
                        sign: true,
                    }
                } else {
                    let host = format!("{}.s3.{}.amazonaws.com", self.bucket, region);
                    let uri_path = format!("/{key}");
                    ResolvedRequest {
                        url: format!("https://{host}{uri_path}"),
                        host,
                        uri_path,
                        sign: true,
                    }
                }
            }
            // Google Cloud Storage speaks the S3-compatible XML API with
            // HMAC keys; path-style against the fixed endpoint.
            Scheme::Gs => {
                let host = "storage.googleapis.com".to_string();
                let uri_path = format!("/{}/{}", self.bucket, key);
                ResolvedRequest {
                    url: format!("https://{host}{uri_path}"),
                    host,
                    uri_path,
                    sign: true,
                }
            }
            Scheme::Http | Scheme::Https => {
                let proto = if self.scheme == Scheme::Http {
                    "http"
                } else {
                    "https"
                };
                let uri_path = if self.key.is_empty() {
                    "/".to_string()
                } else {
                    format!("/{}", self.key)
                };
                ResolvedRequest {
                    url: format!("{proto}://{}{uri_path}", self.bucket),
                    host: self.bucket.clone(),
                    uri_path,
                    sign: false,
                }
            }
        }
    }

    /// Base name of the object, for `_file_name` columns.
    pub fn base_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_hosted_s3() {
        let url = RemoteUrl::parse("s3://mybucket/data/f.h5ad").unwrap();
        let opts = RemoteOptions::default();
        let r = url.resolve(&opts, "us-west-2");
        assert_eq!(r.host, "mybucket.s3.us-west-2.amazonaws.com");
        assert_eq!(r.uri_path, "/data/f.h5ad");
        assert!(r.sign);
    }

    #[test]
    fn path_style_with_endpoint() {
        let url = RemoteUrl::parse("s3://b/k.h5ad").unwrap();
        let opts = RemoteOptions::default()
            .with_endpoint("http://127.0.0.1:9000")
            .with_use_ssl(false);
        let r = url.resolve(&opts, "us-east-1");
        assert_eq!(r.host, "127.0.0.1:9000");
        assert_eq!(r.url, "http://127.0.0.1:9000/b/k.h5ad");
    }

    #[test]
    fn gs_is_path_style() {
        let url = RemoteUrl::parse("gs://b/k.h5ad").unwrap();
        let r = url.resolve(&RemoteOptions::default(), "us-east-1");
        assert_eq!(r.url, "https://storage.googleapis.com/b/k.h5ad");
    }

    #[test]
    fn plain_http_passthrough() {
        let url = RemoteUrl::parse("https://example.org/pub/f.h5ad").unwrap();
        let r = url.resolve(&RemoteOptions::default(), "us-east-1");
        assert_eq!(r.url, "https://example.org/pub/f.h5ad");
        assert!(!r.sign);
        assert_eq!(url.base_name(), "f.h5ad");
    }

    #[test]
    fn rejects_local_paths() {
        assert!(!is_remote_path("/data/f.h5ad"));
        assert!(RemoteUrl::parse("/data/f.h5ad").is_err());
    }
}
