//! Translated Captions
//!
//! Caption subscriptions, translation collaborator and HTTP endpoints.

mod error;
pub mod fanout;
pub mod handlers;
pub mod translator;

use axum::{routing::get, Router};

pub use error::CaptionError;
pub use fanout::{CaptionFanout, LanguageDelivery, PublishReport, MAX_CAPTION_TEXT_LEN};
pub use translator::{
    HttpTranslator, TranslateError, TranslateRequest, Translator, UnconfiguredTranslator,
};

use crate::api::AppState;

/// Caption routes, nested under `/api/rooms`.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{room_id}/captions",
        get(handlers::subscribe).post(handlers::publish),
    )
}
