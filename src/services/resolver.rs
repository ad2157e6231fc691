use crate::core::state::Character;
use crate::services::backend::ImageFetcher;
use crate::utils::media::{absolute_image_url, encode_data_url, is_data_url, mime_for_path, FALLBACK_MIME};
use futures_util::StreamExt;
use log::{debug, warn};
use std::collections::HashMap;

/// Name key → embeddable image (or the bare reference when it could not be fetched).
pub type ImageMap = HashMap<String, Option<String>>;

pub fn resolve_backend_url(base_url: &str, src: Option<&str>) -> Option<String> {
    absolute_image_url(base_url, src)
}

/// Turns an image reference into a data URL. Data URLs pass through without
/// a fetch; on any fetch failure the reference comes back unchanged.
pub async fn to_data_url(fetcher: &dyn ImageFetcher, src: Option<&str>) -> Option<String> {
    let src = src?;
    if is_data_url(src) {
        return Some(src.to_string());
    }

    match fetcher.fetch_image(src).await {
        Ok(image) => {
            let mime = image
                .content_type
                .as_deref()
                .and_then(|ct| ct.split(';').next())
                .map(str::trim)
                .filter(|ct| !ct.is_empty())
                .or_else(|| mime_for_path(src))
                .unwrap_or(FALLBACK_MIME);
            debug!("Embedded {} ({} bytes, {})", src, image.bytes.len(), mime);
            Some(encode_data_url(&image.bytes, mime))
        }
        Err(e) => {
            warn!("Could not embed {}, sending the reference instead: {}", src, e);
            Some(src.to_string())
        }
    }
}

/// Resolves every named character's image concurrently and waits for all of
/// them. Characters without a name key are skipped.
pub async fn build_char_image_map(
    fetcher: &dyn ImageFetcher,
    base_url: &str,
    characters: &[Character],
    concurrency: usize,
) -> ImageMap {
    futures_util::stream::iter(characters.iter())
        .filter_map(|c| {
            let key = c.name_key();
            async move { (!key.is_empty()).then_some((key, c)) }
        })
        .map(|(key, c)| async move {
            let src = resolve_backend_url(base_url, c.image.as_deref());
            let resolved = to_data_url(fetcher, src.as_deref()).await;
            (key, resolved)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::PipelineError;
    use crate::services::backend::FetchedImage;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockFetcher {
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ImageFetcher for MockFetcher {
        async fn fetch_image(&self, url: &str) -> Result<FetchedImage, PipelineError> {
            self.calls.lock().unwrap().push(url.to_string());
            if url.contains("blocked") {
                return Err(PipelineError::Transport {
                    endpoint: url.to_string(),
                    status: 403,
                    message: "cross-origin request denied".to_string(),
                });
            }
            let content_type = if url.ends_with(".jpg") {
                None
            } else {
                Some("image/png".to_string())
            };
            Ok(FetchedImage {
                bytes: b"hi".to_vec(),
                content_type,
            })
        }
    }

    fn character(name: &str, image: Option<&str>) -> Character {
        Character {
            name: Some(name.to_string()),
            image: image.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_data_url_skips_network() {
        let fetcher = MockFetcher::default();
        let out = to_data_url(&fetcher, Some("data:image/png;base64,AAAA")).await;
        assert_eq!(out.as_deref(), Some("data:image/png;base64,AAAA"));
        assert!(fetcher.calls.lock().unwrap().is_empty());
        assert_eq!(to_data_url(&fetcher, None).await, None);
    }

    #[tokio::test]
    async fn test_fetch_failure_returns_reference() {
        let fetcher = MockFetcher::default();
        let out = to_data_url(&fetcher, Some("https://blocked.example.com/ana.png")).await;
        assert_eq!(out.as_deref(), Some("https://blocked.example.com/ana.png"));
    }

    #[tokio::test]
    async fn test_mime_falls_back_to_extension() {
        let fetcher = MockFetcher::default();
        let out = to_data_url(&fetcher, Some("https://cdn.example.com/bo.jpg")).await;
        assert_eq!(out.as_deref(), Some("data:image/jpeg;base64,aGk="));
    }

    #[tokio::test]
    async fn test_image_map_completes_despite_failures() {
        let fetcher = MockFetcher::default();
        let characters = vec![
            character("Ana", Some("https://blocked.example.com/ana.png")),
            character(" Bo ", Some("/uploads/bo.png")),
            character("Cy", Some("data:image/png;base64,QUJD")),
            character("Di", None),
            character("   ", Some("/uploads/nobody.png")),
        ];

        let map = build_char_image_map(&fetcher, "http://localhost:3001", &characters, 2).await;

        assert_eq!(map.len(), 4);
        assert_eq!(
            map["ana"].as_deref(),
            Some("https://blocked.example.com/ana.png")
        );
        assert_eq!(map["bo"].as_deref(), Some("data:image/png;base64,aGk="));
        assert_eq!(map["cy"].as_deref(), Some("data:image/png;base64,QUJD"));
        assert_eq!(map["di"], None);

        let mut calls = fetcher.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                "http://localhost:3001/uploads/bo.png".to_string(),
                "https://blocked.example.com/ana.png".to_string(),
            ]
        );
    }
}
