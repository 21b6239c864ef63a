//! Client WebSocket endpoint.
//!
//! Each connection runs one [`Session`]. Outbound frames go through a single
//! writer task so they reach the client in the order they were produced.

use agent_bridge_protocol::ServerFrame;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use log::{debug, error, info};
use tokio::sync::mpsc;

use super::state::AppState;
use crate::receive::ClientFrame;
use crate::session::{ClientOutbox, Session};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("Client connected");
    let (ws_sender, ws_receiver) = socket.split();
    let (client, outbox) = ClientOutbox::channel();
    let writer = tokio::spawn(write_frames(ws_sender, outbox));

    let frames = ws_receiver.map(client_frame);
    let session = Session::new(
        frames,
        client.clone(),
        state.provider.clone(),
        state.session.clone(),
    );

    if let Err(e) = session.run().await {
        error!("Session failed: {}", e);
        if client.send(ServerFrame::error(e.to_string())).is_err() {
            debug!("Client gone before the error could be reported");
        }
    }

    // Closing the outbox lets the writer drain and close the socket.
    drop(client);
    if let Err(e) = writer.await {
        error!("Client writer task failed: {}", e);
    }
    info!("Client connection closed");
}

async fn write_frames(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::UnboundedReceiver<ServerFrame>,
) {
    while let Some(frame) = outbox.recv().await {
        if let Err(e) = ws_sender.send(Message::Text(frame.to_text().into())).await {
            debug!("Failed to send frame to client: {}", e);
            return;
        }
    }
    if let Err(e) = ws_sender.close().await {
        debug!("Error closing client socket: {}", e);
    }
}

fn client_frame(message: Result<Message, axum::Error>) -> ClientFrame {
    match message {
        Ok(Message::Text(text)) => ClientFrame::Text(text.as_str().to_owned()),
        Ok(Message::Binary(data)) => ClientFrame::Binary(data),
        Ok(Message::Ping(_) | Message::Pong(_)) => ClientFrame::Control,
        Ok(Message::Close(_)) => ClientFrame::Close,
        Err(e) => {
            debug!("Client socket error: {}", e);
            ClientFrame::Close
        }
    }
}
