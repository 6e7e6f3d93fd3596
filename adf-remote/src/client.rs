use std::thread;
use std::time::Duration;

use adf_core::{Error, RemoteOptions, Result};
use chrono::Utc;
use log::debug;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::redirect::Policy;

use crate::sigv4::{self, SigningRequest};
use crate::url::{RemoteUrl, ResolvedRequest, Scheme};

const REGION_HEADER: &str = "x-amz-bucket-region";
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct HeadInfo {
    pub size: u64,
    pub accept_ranges: bool,
}

/// Issues HEAD and byte-range GET requests against one remote object,
/// signing them when the scheme calls for it. The client owns the region
/// state so a bucket redirect observed once sticks for all later reads.
pub struct RangeClient {
    http: Client,
    url: RemoteUrl,
    opts: RemoteOptions,
    region: String,
}

impl RangeClient {
    pub fn new(url: RemoteUrl, opts: RemoteOptions) -> Result<Self> {
        // Redirects for object stores are handled here (the region hint
        // must be read off the 301); plain HTTP follows them.
        let policy = if matches!(url.scheme, Scheme::Http | Scheme::Https) {
            Policy::default()
        } else {
            Policy::none()
        };
        let http = Client::builder()
            .timeout(opts.timeout)
            .redirect(policy)
            .build()
            .map_err(|e| Error::Internal(format!("http client: {e}")))?;
        let region = opts.region.clone();
        Ok(Self {
            http,
            url,
            opts,
            region,
        })
    }

    pub fn url(&self) -> &RemoteUrl {
        &self.url
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// HEAD the object: size, range support. A region hint on a redirect
    /// status is captured and the request retried once against the
    /// corrected region; a second redirect surfaces as `RegionRedirect`.
    pub fn head(&mut self) -> Result<HeadInfo> {
        let mut redirected = false;
        loop {
            let resolved = self.url.resolve(&self.opts, &self.region);
            let resp = self.send_with_retry("HEAD", None, &resolved, &[])?;
            let status = resp.status().as_u16();

            if let Some(region) = header(&resp, REGION_HEADER) {
                if (300..400).contains(&status) && region != self.region {
                    if redirected {
                        return Err(Error::RegionRedirect(region));
                    }
                    debug!("bucket region redirect: {} -> {region}", self.region);
                    self.region = region;
                    redirected = true;
                    continue;
                }
            }

            return match status {
                200..=299 => {
                    let size = header(&resp, "content-length")
                        .and_then(|v| v.parse::<u64>().ok())
                        .ok_or_else(|| Error::Http {
                            url: resolved.url.clone(),
                            status,
                        })?;
                    let accept_ranges = header(&resp, "accept-ranges")
                        .map(|v| v.to_ascii_lowercase().contains("bytes"))
                        .unwrap_or(false);
                    Ok(HeadInfo {
                        size,
                        accept_ranges,
                    })
                }
                _ => Err(status_error(status, &resolved.url)),
            };
        }
    }

    /// Fetch `[start, end]` (inclusive, per RFC 9110 range units).
    pub fn get_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let range = format!("bytes={start}-{end}");
        let resolved = self.url.resolve(&self.opts, &self.region);
        let resp = self.send_with_retry("GET", Some(&range), &resolved, &[])?;
        let status = resp.status().as_u16();
        match status {
            206 => body_bytes(resp, &resolved.url),
            // A server that ignores `Range:` answers 200 with the whole
            // object; slice out what was asked for.
            200 => {
                let all = body_bytes(resp, &resolved.url)?;
                let lo = (start as usize).min(all.len());
                let hi = ((end + 1) as usize).min(all.len());
                Ok(all[lo..hi].to_vec())
            }
            _ => Err(status_error(status, &resolved.url)),
        }
    }

    /// `ListObjectsV2` keys under `prefix`, following continuation tokens.
    pub fn list_prefix(&mut self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        let mut redirected = false;
        loop {
            let mut query: Vec<(String, String)> = vec![
                ("list-type".to_string(), "2".to_string()),
                ("prefix".to_string(), prefix.to_string()),
            ];
            if let Some(t) = &token {
                query.push(("continuation-token".to_string(), t.clone()));
            }
            let resolved = self.url.resolve_key(&self.opts, &self.region, "");
            let resp = self.send_with_retry("GET", None, &resolved, &query)?;
            let status = resp.status().as_u16();

            if let Some(region) = header(&resp, REGION_HEADER) {
                if (300..400).contains(&status) && region != self.region && !redirected {
                    self.region = region;
                    redirected = true;
                    continue;
                }
            }
            if !(200..300).contains(&status) {
                return Err(status_error(status, &resolved.url));
            }

            let body = resp
                .text()
                .map_err(|e| Error::Io(format!("{}: {e}", resolved.url)))?;
            keys.extend(extract_tags(&body, "Key"));
            if extract_tags(&body, "IsTruncated").first().map(String::as_str) == Some("true") {
                token = extract_tags(&body, "NextContinuationToken").into_iter().next();
                if token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        Ok(keys)
    }

    /// One transparent retry with backoff on transport-level failures;
    /// HTTP status errors are never retried here.
    fn send_with_retry(
        &self,
        method: &str,
        range: Option<&str>,
        resolved: &ResolvedRequest,
        query: &[(String, String)],
    ) -> Result<Response> {
        match self.send(method, range, resolved, query) {
            Ok(resp) => Ok(resp),
            Err(first) => {
                debug!("{method} {} failed ({first}), retrying", resolved.url);
                thread::sleep(RETRY_BACKOFF);
                match self.send(method, range, resolved, query) {
                    Ok(resp) => Ok(resp),
                    Err(e) => Err(classify_transport(e, &resolved.url)),
                }
            }
        }
    }

    fn send(
        &self,
        method: &str,
        range: Option<&str>,
        resolved: &ResolvedRequest,
        query: &[(String, String)],
    ) -> std::result::Result<Response, reqwest::Error> {
        let query_string = sigv4::canonical_query(query);
        let full_url = if query_string.is_empty() {
            resolved.url.clone()
        } else {
            format!("{}?{query_string}", resolved.url)
        };
        let mut req: RequestBuilder = match method {
            "HEAD" => self.http.head(&full_url),
            _ => self.http.get(&full_url),
        };

        if resolved.sign && self.opts.has_credentials() {
            let signing = SigningRequest {
                method,
                host: &resolved.host,
                uri_path: &resolved.uri_path,
                query,
                region: &self.region,
                service: "s3",
                key_id: self.opts.key_id.as_deref().unwrap_or_default(),
                secret: self.opts.secret.as_deref().unwrap_or_default(),
                session_token: self.opts.session_token.as_deref(),
                range,
                timestamp: Utc::now(),
            };
            for (name, value) in sigv4::sign(&signing) {
                req = req.header(name.as_str(), value.as_str());
            }
        } else if let Some(range) = range {
            req = req.header("range", range);
        }

        req.send()
    }
}

fn header(resp: &Response, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn body_bytes(resp: Response, url: &str) -> Result<Vec<u8>> {
    resp.bytes()
        .map(|b| b.to_vec())
        .map_err(|e| classify_transport(e, url))
}

fn classify_transport(e: reqwest::Error, url: &str) -> Error {
    if e.is_timeout() {
        Error::NetworkTimeout(url.to_string())
    } else {
        Error::Io(format!("{url}: {e}"))
    }
}

fn status_error(status: u16, url: &str) -> Error {
    match status {
        403 => Error::RemoteAuth {
            url: url.to_string(),
            status,
        },
        404 => Error::RemoteNotFound(url.to_string()),
        _ => Error::Http {
            url: url.to_string(),
            status,
        },
    }
}

/// Minimal scan for `<Tag>value</Tag>` occurrences. S3 listing bodies are
/// flat enough that a full XML parser buys nothing here.
fn extract_tags(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(at) = rest.find(&open) {
        rest = &rest[at + open.len()..];
        if let Some(end) = rest.find(&close) {
            out.push(xml_unescape(&rest[..end]));
            rest = &rest[end + close.len()..];
        } else {
            break;
        }
    }
    out
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_listing_keys() {
        let xml = "<ListBucketResult><Contents><Key>a/f1.h5ad</Key></Contents>\
                   <Contents><Key>a/f2.h5ad</Key></Contents>\
                   <IsTruncated>false</IsTruncated></ListBucketResult>";
        assert_eq!(extract_tags(xml, "Key"), vec!["a/f1.h5ad", "a/f2.h5ad"]);
        assert_eq!(extract_tags(xml, "IsTruncated"), vec!["false"]);
    }

    #[test]
    fn unescapes_entities() {
        assert_eq!(xml_unescape("a&amp;b &lt;c&gt;"), "a&b <c>");
    }
}
