use axum::http::{header, Uri};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;

use crate::api::error::ApiError;

/// 聊天页面的静态资源，编译时嵌入
#[derive(RustEmbed)]
#[folder = "../../web/"]
struct Assets;

pub async fn static_handler(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    serve(if path.is_empty() { "index.html" } else { path })
}

/// 情绪分类测试页
pub async fn mood_test_page() -> Response {
    serve("test-intent.html")
}

fn serve(path: &str) -> Response {
    match Assets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.as_ref())], content.data).into_response()
        }
        None => ApiError::NotFound.into_response(),
    }
}
