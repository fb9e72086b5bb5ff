// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Media-by-reference: streams a `media_url` body under a size cap

use super::{capped, ByteStream, MediaError};
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::{Attempt, Policy};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

const MAX_REDIRECTS: usize = 5;

pub struct FetchedMedia {
    pub content_type: Option<String>,
    pub stream: ByteStream,
}

pub struct MediaFetcher {
    client: Client,
    max_bytes: u64,
}

impl MediaFetcher {
    pub fn new(max_bytes: u64, connect_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(Policy::custom(Self::check_redirect))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, max_bytes }
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedMedia, MediaError> {
        if !Self::is_safe_url(url) {
            return Err(MediaError::InvalidUrl(url.to_string()));
        }

        debug!("Fetching media from: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                if e.is_redirect() {
                    MediaError::InvalidUrl(format!("{} (redirect refused: {})", url, e))
                } else {
                    MediaError::Fetch(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Fetch(format!("HTTP {} for: {}", status.as_u16(), url)));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(MediaError::TooLarge {
                    limit: self.max_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| MediaError::Fetch(e.to_string())))
            .boxed();

        Ok(FetchedMedia {
            content_type,
            stream: capped(stream, self.max_bytes),
        })
    }

    /// Every hop must pass the same host check as the original URL
    fn check_redirect(attempt: Attempt) -> reqwest::redirect::Action {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        if !Self::is_safe_url(attempt.url().as_str()) {
            let target = attempt.url().to_string();
            return attempt.error(format!("unsafe redirect target {}", target));
        }
        attempt.follow()
    }

    /// Only public http(s) hosts; loopback, private and link-local targets
    /// are refused
    pub fn is_safe_url(url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !["http", "https"].contains(&parsed.scheme()) {
            return false;
        }

        match parsed.host() {
            Some(url::Host::Domain(host)) => {
                let host = host.to_ascii_lowercase();
                host != "localhost" && !host.ends_with(".localhost") && !host.ends_with(".internal")
            }
            Some(url::Host::Ipv4(ip)) => {
                !(ip.is_loopback()
                    || ip.is_private()
                    || ip.is_link_local()
                    || ip.is_unspecified()
                    || ip.is_broadcast())
            }
            Some(url::Host::Ipv6(ip)) => !(ip.is_loopback() || ip.is_unspecified()),
            None => false,
        }
    }
}
