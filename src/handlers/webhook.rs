use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Form;

use crate::models::webhook::IncomingMessage;
use crate::services::otp::mask_phone;
use crate::AppState;

/// Inbound message webhook from the messaging provider. The reply rides back
/// synchronously as a TwiML payload per provider convention.
pub async fn receive_message(
    State(state): State<AppState>,
    Form(message): Form<IncomingMessage>,
) -> impl IntoResponse {
    tracing::info!(
        "Inbound message from {} ({} chars)",
        mask_phone(&message.from),
        message.body.len()
    );

    let reply = state
        .dialogue
        .handle_message(&message.from, &message.body)
        .await;

    (
        [(header::CONTENT_TYPE, "application/xml")],
        twiml_reply(&reply),
    )
}

fn twiml_reply(message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
        xml_escape(message)
    )
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
