//! Fake video site for integration tests: an axum server whose pages can be
//! swapped between requests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::Router;

#[derive(Debug, Clone)]
pub enum Page {
    Html(String),
    Status(u16),
    /// Never answers within any sane timeout.
    Hang,
}

#[derive(Clone, Default)]
struct SiteState {
    pages: Arc<Mutex<HashMap<String, Page>>>,
    hits: Arc<AtomicUsize>,
}

pub struct FakeSite {
    pub base: String,
    state: SiteState,
}

impl FakeSite {
    pub async fn start() -> Self {
        let state = SiteState::default();
        let app = Router::new().fallback(serve).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base: format!("http://{}", addr),
            state,
        }
    }

    pub fn set(&self, path: &str, page: Page) {
        self.state.pages.lock().unwrap().insert(path.to_string(), page);
    }

    /// Point channel `id`'s video listing at `page`.
    pub fn set_listing(&self, id: &str, page: Page) {
        self.set(&format!("/channel/{}/videos", id), page);
    }

    pub fn listing_template(&self) -> String {
        format!("{}/channel/{{channel_id}}/videos", self.base)
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

async fn serve(State(state): State<SiteState>, uri: Uri) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let page = state.pages.lock().unwrap().get(uri.path()).cloned();
    match page {
        Some(Page::Html(body)) => Html(body).into_response(),
        Some(Page::Status(code)) => StatusCode::from_u16(code).unwrap().into_response(),
        Some(Page::Hang) => {
            tokio::time::sleep(Duration::from_secs(120)).await;
            StatusCode::OK.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// A listing page whose initial data blob puts `video_id` first.
pub fn listing(video_id: &str, title: &str) -> Page {
    Page::Html(format!(
        r#"<!DOCTYPE html><html><head><title>videos</title></head><body>
<script nonce="x">var ytInitialData = {{"contents":{{"items":[{{"videoRenderer":{{"videoId":"{}","title":{{"runs":[{{"text":"{}"}}]}}}}}},{{"videoRenderer":{{"videoId":"older","title":{{"runs":[{{"text":"Older"}}]}}}}}}]}}}};</script>
</body></html>"#,
        video_id, title
    ))
}

/// A listing page that loads fine but has no initial data.
pub fn empty_listing() -> Page {
    Page::Html("<html><body><p>nothing here</p></body></html>".to_string())
}
