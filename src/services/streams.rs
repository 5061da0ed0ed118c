use crate::error::UpstreamError;
use crate::models::{PathItem, StreamSummary};
use crate::state::{AppState, StreamUrls};

/// Query MediaMTX once and return the paths that currently have a publisher.
pub async fn list_live_streams(ctx: &AppState) -> Result<Vec<StreamSummary>, UpstreamError> {
    let paths = ctx.mediamtx.list_paths().await?;
    Ok(summarize(&paths.items, &ctx.urls))
}

/// Keep ready paths only and map each to its viewer URLs, preserving upstream order.
pub fn summarize(paths: &[PathItem], urls: &StreamUrls) -> Vec<StreamSummary> {
    paths
        .iter()
        .filter(|path| path.ready)
        .map(|path| StreamSummary {
            name: path.name.clone(),
            hls_url: urls.hls_url(&path.name),
            rtmp_ingest_url: urls.rtmp_ingest_url(&path.name),
            webrtc_url: urls.webrtc_url(&path.name),
            ready_time: path.ready_time.clone().filter(|t| !t.is_empty()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(name: &str, ready: bool, ready_time: Option<&str>) -> PathItem {
        PathItem {
            name: name.to_string(),
            ready,
            ready_time: ready_time.map(str::to_string),
        }
    }

    #[test]
    fn drops_paths_that_are_not_ready() {
        let paths = vec![
            path("mystream", true, Some("2024-01-01T00:00:00Z")),
            path("draft", false, None),
        ];
        let streams = summarize(&paths, &StreamUrls::default());

        assert_eq!(streams.len(), 1);
        let s = &streams[0];
        assert_eq!(s.name, "mystream");
        assert_eq!(s.hls_url, "/hls/mystream/index.m3u8");
        assert_eq!(s.rtmp_ingest_url, "rtmp://YOUR_SERVER_IP:1935/mystream");
        assert_eq!(s.ready_time.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(s.webrtc_url, None);
    }

    #[test]
    fn webrtc_url_only_when_prefix_configured() {
        let urls = StreamUrls {
            webrtc_prefix: Some("/webrtc/".to_string()),
            ..Default::default()
        };
        let streams = summarize(&[path("cam", true, None)], &urls);
        assert_eq!(streams[0].webrtc_url.as_deref(), Some("/webrtc/cam/whep"));
    }

    #[test]
    fn empty_ready_time_is_reported_as_null() {
        let streams = summarize(&[path("cam", true, Some(""))], &StreamUrls::default());
        assert_eq!(streams[0].ready_time, None);

        let body = serde_json::to_value(&streams[0]).unwrap();
        assert_eq!(body["readyTime"], serde_json::Value::Null);
    }

    #[test]
    fn no_paths_gives_no_streams() {
        assert!(summarize(&[], &StreamUrls::default()).is_empty());
        assert!(summarize(&[path("a", false, None)], &StreamUrls::default()).is_empty());
    }
}
