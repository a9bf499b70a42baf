//! `/ws` transport.
//!
//! Frames from one socket are handled strictly in arrival order by the
//! reader loop. Outbound events go through an unbounded channel drained by
//! a dedicated writer task, so a slow socket never stalls a sender.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use minichat_shared::protocol::{ClientFrame, ServerEvent, Signal};
use minichat_shared::types::UserId;
use minichat_shared::MinichatError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::registry::{ConnectionHandle, Outbound};
use crate::router::SaveMode;
use crate::state::AppState;

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection state owned by the reader loop.
struct Session {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
    user: Option<UserId>,
}

impl Session {
    fn reply(&self, event: ServerEvent) {
        let _ = self.tx.send(Outbound::Event(event));
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(sink, rx));

    let mut session = Session {
        conn_id: Uuid::new_v4(),
        tx,
        user: None,
    };
    debug!(conn = %session.conn_id, "websocket connected");

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_text(&state, &mut session, text.as_str()).await,
            Ok(Message::Binary(_)) => {
                warn!(conn = %session.conn_id, "binary frames are not supported");
            }
            Ok(Message::Ping(data)) => {
                let _ = session.tx.send(Outbound::Pong(data));
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(conn = %session.conn_id, "close requested");
                break;
            }
            Err(e) => {
                debug!(conn = %session.conn_id, error = %e, "websocket error");
                break;
            }
        }
    }

    if let Some(user) = &session.user {
        state.disconnect(user, session.conn_id).await;
    }
    let _ = session.tx.send(Outbound::Close);
    drop(session);
    if let Err(e) = writer.await {
        error!(error = %e, "websocket writer task failed");
    }
}

/// Drain queued items into the socket until the queue closes, a `Close`
/// item arrives or the socket fails.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = rx.recv().await {
        let msg = match item {
            Outbound::Event(event) => match event.to_json() {
                Ok(json) => Message::Text(json.into()),
                Err(e) => {
                    error!(error = %e, "failed to encode event");
                    continue;
                }
            },
            Outbound::Pong(data) => Message::Pong(data),
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };
        if let Err(e) = sink.send(msg).await {
            debug!(error = %e, "websocket send failed");
            break;
        }
    }
}

/// A frame that fails to decode is answered with an error event and the
/// connection stays open.
async fn handle_text(state: &AppState, session: &mut Session, text: &str) {
    match ClientFrame::parse(text) {
        Ok(frame) => handle_frame(state, session, frame).await,
        Err(e) => {
            warn!(conn = %session.conn_id, error = %e, "malformed frame");
            session.reply(ServerEvent::error("Malformed message"));
        }
    }
}

async fn handle_frame(state: &AppState, session: &mut Session, frame: ClientFrame) {
    if let ClientFrame::Auth { token } = &frame {
        authenticate(state, session, token).await;
        return;
    }
    let Some(user) = session.user.clone() else {
        debug!(conn = %session.conn_id, kind = frame.kind(), "ignoring frame before auth");
        return;
    };

    if let Err(e) = dispatch(state, &user, frame).await {
        debug!(user = %user, error = %e, "frame rejected");
        session.reply(ServerEvent::from(&e));
    }
}

async fn authenticate(state: &AppState, session: &mut Session, token: &str) {
    let user = match state.authenticate(token).await {
        Ok(user) => user,
        Err(_) => {
            session.reply(ServerEvent::error("Invalid token"));
            return;
        }
    };

    if let Some(previous) = session.user.as_ref().filter(|u| **u != user.id) {
        state.disconnect(previous, session.conn_id).await;
    }

    let handle = ConnectionHandle::with_id(session.conn_id, session.tx.clone());
    session.reply(ServerEvent::AuthSuccess {
        user: user.profile(),
    });
    state.registry.bind(&user.id, handle).await;
    info!(user = %user.id, conn = %session.conn_id, "websocket authenticated");
    session.user = Some(user.id);
}

async fn dispatch(state: &AppState, user: &UserId, frame: ClientFrame) -> Result<(), MinichatError> {
    match frame {
        ClientFrame::Auth { .. } | ClientFrame::Unknown => {}

        ClientFrame::SendMessage { chat_id, content } => {
            state.router.send_message(user, &chat_id, content).await?;
        }
        ClientFrame::Typing { chat_id } => state.router.typing(user, &chat_id).await,
        ClientFrame::Read { chat_id } => state.router.read(user, &chat_id).await,

        ClientFrame::StartCall { to } => {
            state.calls.start_call(user, &to).await?;
        }
        ClientFrame::AcceptCall { call_id } => state.calls.accept_call(user, &call_id).await?,
        ClientFrame::EndCall { call_id } => state.calls.end_call(user, &call_id).await,
        ClientFrame::RtcOffer { call_id, offer } => {
            state.calls.relay(user, &call_id, Signal::Offer(offer)).await
        }
        ClientFrame::RtcAnswer { call_id, answer } => {
            state.calls.relay(user, &call_id, Signal::Answer(answer)).await
        }
        ClientFrame::RtcIce { call_id, candidate } => {
            state.calls.relay(user, &call_id, Signal::Ice(candidate)).await
        }

        ClientFrame::StartGroupCall { group_id } => {
            state.calls.start_group_call(user, &group_id).await?
        }
        ClientFrame::JoinGroupCall { group_id } => {
            state.calls.join_group_call(user, &group_id).await?
        }
        ClientFrame::LeaveGroupCall { group_id } => {
            state.calls.leave_group_call(user, &group_id).await
        }
        ClientFrame::GroupRtcOffer { group_id, to, offer } => {
            state.calls.group_relay(user, &group_id, &to, Signal::Offer(offer)).await
        }
        ClientFrame::GroupRtcAnswer { group_id, to, answer } => {
            state.calls.group_relay(user, &group_id, &to, Signal::Answer(answer)).await
        }
        ClientFrame::GroupRtcIce { group_id, to, candidate } => {
            state.calls.group_relay(user, &group_id, &to, Signal::Ice(candidate)).await
        }

        ClientFrame::ChannelMessage {
            channel_id,
            text,
            image,
            endpoint,
        } => {
            let result = state
                .router
                .channel_message(user, &channel_id, endpoint, text, image, SaveMode::Debounced)
                .await;
            match result {
                Ok(_) => {}
                // Non-members and unknown channels are dropped silently.
                Err(MinichatError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_user, drain, test_state};
    use minichat_shared::types::now_millis;

    fn session() -> (Session, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Session {
                conn_id: Uuid::new_v4(),
                tx,
                user: None,
            },
            rx,
        )
    }

    fn frame(json: &str) -> ClientFrame {
        ClientFrame::parse(json).unwrap()
    }

    #[tokio::test]
    async fn frames_before_auth_are_ignored() {
        let (_dir, state) = test_state().await;
        let (mut session, mut rx) = session();

        handle_frame(&state, &mut session, frame(r#"{"type":"start_call","to":"x"}"#)).await;
        assert!(drain(&mut rx).is_empty());
        assert!(session.user.is_none());
    }

    #[tokio::test]
    async fn malformed_frames_keep_the_connection_usable() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;
        let token = state.store.write(|s| s.create_session(&a, now_millis())).await;
        let (mut session, mut rx) = session();

        handle_text(&state, &mut session, "{ not json").await;
        handle_text(&state, &mut session, r#"{"type":"send_message"}"#).await;
        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::error("Malformed message"), ServerEvent::error("Malformed message")]
        );

        handle_text(&state, &mut session, &format!(r#"{{"type":"auth","token":"{token}"}}"#)).await;
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerEvent::AuthSuccess { user }] if user.id == a
        ));
        assert_eq!(session.user.as_ref(), Some(&a));
    }

    #[tokio::test]
    async fn bad_token_yields_error_event() {
        let (_dir, state) = test_state().await;
        let (mut session, mut rx) = session();

        handle_frame(&state, &mut session, frame(r#"{"type":"auth","token":"bogus"}"#)).await;
        assert_eq!(drain(&mut rx), vec![ServerEvent::error("Invalid token")]);
        assert!(session.user.is_none());
    }

    #[tokio::test]
    async fn auth_binds_and_call_errors_come_back_typed() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;
        let token = state.store.write(|s| s.create_session(&a, now_millis())).await;
        let (mut session, mut rx) = session();

        let auth = format!(r#"{{"type":"auth","token":"{token}"}}"#);
        handle_frame(&state, &mut session, frame(&auth)).await;
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerEvent::AuthSuccess { user }] if user.id == a
        ));
        assert!(state.registry.is_online(&a).await);

        handle_frame(&state, &mut session, frame(r#"{"type":"start_call","to":"ghost"}"#)).await;
        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::CallError { error: "User not found".into() }]
        );

        handle_frame(&state, &mut session, frame(r#"{"type":"mystery","x":1}"#)).await;
        assert!(drain(&mut rx).is_empty());

        state.disconnect(&a, session.conn_id).await;
        assert!(!state.registry.is_online(&a).await);
    }

    #[tokio::test]
    async fn channel_message_from_non_member_is_silent() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;

        let result = dispatch(
            &state,
            &a,
            frame(r#"{"type":"channel_message","channelId":"nowhere","text":"hi"}"#),
        )
        .await;
        assert!(result.is_ok());
    }
}
