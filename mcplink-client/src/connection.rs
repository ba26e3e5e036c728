//! A connection to an MCP-Link server.
//!
//! The connection opens the server's event stream, learns the session's reply path from the first
//! event, and then hands the stream to a reader task for the rest of its life.  Requests go out
//! through an [`RpcClient`] POSTing to the reply path; replies and reverse calls come back through
//! the reader.
//!
//! There is no reconnection.  Once the stream ends the connection is [`ConnectionState::Closed`]
//! for good, and a new [`Connection`] has to be opened.
use std::sync::Arc;

use futures::StreamExt;
use mcplink_jsonrpc::CorrelationTable;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use crate::client::RpcClient;
use crate::config::ConnectionConfig;
use crate::discovery::Endpoint;
use crate::reader::{ENDPOINT_EVENT, ReaderExit, StreamReader};
use crate::reverse::{ReverseCallDispatcher, ReverseCallQueue, ToolRouter};
use crate::transport::{EventStream, SseCodec, SseCodecError, event_stream};
use crate::{HandshakeError, McpLinkError, Result};

/// Query parameter of the reply path that identifies the session
const SESSION_ID_PARAM: &str = "session_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum ConnectionState {
    /// Created but not yet opened
    Idle,
    /// Event stream requested, waiting for the endpoint event
    Handshaking,
    /// Open; requests can be made and reverse calls arrive
    Streaming,
    /// The event stream is gone.  This is final.
    Closed,
}

/// The session established by the handshake
#[derive(Debug)]
struct Session {
    session_id: String,
    client: RpcClient,
    reverse_calls: ReverseCallQueue,
    reader: Option<JoinHandle<ReaderExit>>,
}

pub struct Connection {
    endpoint: Endpoint,
    config: ConnectionConfig,
    http: reqwest::Client,
    table: CorrelationTable,
    state: Arc<watch::Sender<ConnectionState>>,
    cancellation_token: CancellationToken,
    session: Option<Session>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish()
    }
}

impl Connection {
    /// A connection to `endpoint` that hasn't been opened yet.
    pub fn new(endpoint: Endpoint, config: ConnectionConfig) -> Result<Self> {
        let http = config.build_http_client()?;
        let (state, _) = watch::channel(ConnectionState::Idle);

        Ok(Self {
            endpoint,
            config,
            http,
            table: CorrelationTable::new(),
            state: Arc::new(state),
            cancellation_token: CancellationToken::new(),
            session: None,
        })
    }

    /// Create and open a connection in one step.
    pub async fn connect(endpoint: Endpoint, config: ConnectionConfig) -> Result<Self> {
        let mut connection = Self::new(endpoint, config)?;
        connection.open().await?;
        Ok(connection)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch the state of the connection as it changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Resolves once the connection is closed, whether by [`Self::stop`] or because the server
    /// ended the stream.
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so this can't fail while we're borrowing it
        let _ = state.wait_for(|state| *state == ConnectionState::Closed).await;
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Session ID assigned by the server, once the handshake is done
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.session_id.as_str())
    }

    /// The URL requests are POSTed to, once the handshake is done
    pub fn reply_url(&self) -> Option<&Url> {
        self.session.as_ref().map(|session| session.client.reply_url())
    }

    /// Client for making calls on this connection
    pub fn client(&self) -> Result<RpcClient> {
        self.session().map(|session| session.client.clone())
    }

    /// The reverse calls the server sends on this connection
    pub fn reverse_calls(&self) -> Result<ReverseCallQueue> {
        self.session().map(|session| session.reverse_calls.clone())
    }

    /// A dispatcher that answers this connection's reverse calls with the tools in `router`
    pub fn dispatcher(&self, router: ToolRouter) -> Result<ReverseCallDispatcher> {
        Ok(ReverseCallDispatcher::new(self.client()?, router))
    }

    /// Token that is cancelled when this connection is stopped.  Handy for stopping a dispatcher
    /// along with the connection.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Open the event stream and perform the handshake.
    ///
    /// Only an [`ConnectionState::Idle`] connection can be opened.  If the handshake fails the
    /// connection is closed.
    #[tracing::instrument(skip(self), fields(url = %self.endpoint.url))]
    pub async fn open(&mut self) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Idle {
            return Err(McpLinkError::InvalidState {
                expected: ConnectionState::Idle,
                actual: state,
            });
        }

        self.set_state(ConnectionState::Handshaking);

        let (events, reply_url, session_id) = match self.handshake().await {
            Ok(handshake) => handshake,
            Err(e) => {
                tracing::error!(error = %e, "Handshake failed");
                self.set_state(ConnectionState::Closed);
                return Err(McpLinkError::Handshake {
                    url: self.endpoint.url.to_string(),
                    source: e,
                });
            }
        };

        tracing::info!(%session_id, %reply_url, "Event stream open");

        let client = RpcClient::new(
            self.http.clone(),
            reply_url,
            self.endpoint.authorization.clone(),
            self.table.clone(),
            self.config.post_timeout,
            self.config.default_call_timeout,
        );
        let (reverse_tx, reverse_calls) = ReverseCallQueue::new();

        // Streaming has to be published before the reader exists, or a stream that ends right away
        // could be marked closed and then reopened
        self.set_state(ConnectionState::Streaming);

        let reader = StreamReader::new(events, self.table.clone(), reverse_tx, self.cancellation_token.clone());
        let state = self.state.clone();
        let reader = tokio::spawn(
            async move {
                let exit = reader.run().await;
                state.send_replace(ConnectionState::Closed);
                exit
            }
            .instrument(tracing::info_span!("stream_reader", session_id = %session_id)),
        );

        self.session = Some(Session {
            session_id,
            client,
            reverse_calls,
            reader: Some(reader),
        });

        Ok(())
    }

    /// Stop the reader and close the stream.
    ///
    /// Returns once the reader has exited, which means the HTTP response carrying the stream has
    /// been dropped.  Calls still waiting for replies are not cancelled; they will time out.
    /// Stopping a connection that never opened just closes it.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&mut self) -> Option<ReaderExit> {
        self.cancellation_token.cancel();

        let reader = self.session.as_mut().and_then(|session| session.reader.take());
        let exit = match reader {
            Some(reader) => match reader.await {
                Ok(exit) => Some(exit),
                Err(e) => {
                    tracing::error!(error = %e, "Event stream reader task failed");
                    None
                }
            },
            None => None,
        };

        self.set_state(ConnectionState::Closed);
        tracing::debug!(?exit, "Connection stopped");
        exit
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or_else(|| McpLinkError::InvalidState {
            expected: ConnectionState::Streaming,
            actual: self.state(),
        })
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(%previous, %state, "Connection state changed");
        }
    }

    /// Request the event stream and read it up to the endpoint event.
    async fn handshake(&self) -> Result<(EventStream, Url, String), HandshakeError> {
        let timeout = self.config.handshake_timeout;

        match tokio::time::timeout(timeout, self.handshake_inner()).await {
            Ok(result) => result,
            Err(_) => Err(HandshakeError::TimedOut { timeout }),
        }
    }

    async fn handshake_inner(&self) -> Result<(EventStream, Url, String), HandshakeError> {
        let response = self
            .http
            .get(self.endpoint.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(AUTHORIZATION, &self.endpoint.authorization)
            .send()
            .await
            .map_err(|e| HandshakeError::Request { source: e })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandshakeError::Status { status });
        }

        let codec = SseCodec::new(self.config.max_line_length).with_line_limit(self.config.handshake_max_lines);
        let mut events = event_stream(response, codec);

        let event = match events.next().await {
            Some(Ok(event)) => event,
            Some(Err(SseCodecError::LineLimitExceeded { limit })) => {
                return Err(HandshakeError::TooManyLines { max_lines: limit });
            }
            Some(Err(e)) => return Err(HandshakeError::Read { source: e }),
            None => return Err(HandshakeError::StreamEnded),
        };

        if event.event_type() != ENDPOINT_EVENT {
            return Err(HandshakeError::UnexpectedEvent {
                event: event.event_type().to_string(),
                data: event.data,
            });
        }

        let (reply_url, session_id) = resolve_reply_path(&self.endpoint.url, &event.data)?;
        Ok((events, reply_url, session_id))
    }
}

/// Resolve the reply path announced in the endpoint event against the stream's URL, and pull out
/// the session ID.
fn resolve_reply_path(base: &Url, endpoint: &str) -> Result<(Url, String), HandshakeError> {
    let endpoint = endpoint.trim();
    let reply_url = base.join(endpoint).map_err(|e| HandshakeError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        source: e,
    })?;

    let session_id = reply_url
        .query_pairs()
        .find(|(key, _)| key == SESSION_ID_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| HandshakeError::MissingSessionId {
            endpoint: endpoint.to_string(),
        })?;

    Ok((reply_url, session_id))
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Without this the reader task would keep the stream open after the connection is gone
        self.cancellation_token.cancel();
    }
}
