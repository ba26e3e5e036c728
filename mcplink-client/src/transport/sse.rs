use std::borrow::Cow;
use std::io;
use std::pin::Pin;

use futures::TryStreamExt;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, FramedRead};

/// One Server-Sent Event.
///
/// Only the fields this client interprets are kept.  `id:` and `retry:` are parsed and thrown
/// away, since there is no reconnection to use them for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if there was one
    pub event: Option<String>,
    /// All `data:` lines of the event, joined with `\n`
    pub data: String,
}

impl SseEvent {
    /// The event type, which defaults to `message` when the event had no `event:` field
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

#[derive(Debug, Error)]
pub enum SseCodecError {
    #[error("Event stream line exceeds the maximum length")]
    LineTooLong,

    #[error("No complete event within the first {limit} lines of the event stream")]
    LineLimitExceeded { limit: usize },

    #[error("Error reading event stream")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl From<AnyDelimiterCodecError> for SseCodecError {
    fn from(value: AnyDelimiterCodecError) -> Self {
        match value {
            AnyDelimiterCodecError::MaxChunkLengthExceeded => SseCodecError::LineTooLong,
            AnyDelimiterCodecError::Io(e) => SseCodecError::Io { source: e },
        }
    }
}

/// Decodes a `text/event-stream` body into [`SseEvent`]s.
///
/// Lines are split on raw bytes by [`AnyDelimiterCodec`], which also enforces the maximum line
/// length.  A trailing `\r` is dropped, and bytes that aren't valid UTF-8 are replaced rather than
/// failing the stream, so one bad event can't take the rest of the stream down with it.  A blank
/// line ends an event, lines starting with `:` are comments (servers send them as keep-alives).  An event with no `data:` lines is
/// never yielded, and neither is an event cut off by the end of the stream.
#[derive(Debug)]
pub struct SseCodec {
    lines: AnyDelimiterCodec,
    event: Option<String>,
    data: Option<String>,
    lines_read: usize,
    line_limit: Option<usize>,
}

impl SseCodec {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            lines: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max_line_length),
            event: None,
            data: None,
            lines_read: 0,
            line_limit: None,
        }
    }

    /// Fail with [`SseCodecError::LineLimitExceeded`] if more than `limit` lines in total are read
    /// before the next event is complete.
    ///
    /// The limit is cleared as soon as an event is yielded.
    pub fn with_line_limit(mut self, limit: usize) -> Self {
        self.line_limit = Some(limit);
        self
    }

    /// Total number of lines decoded so far, including blank lines and comments
    pub fn lines_read(&self) -> usize {
        self.lines_read
    }

    /// Feed one line into the event being assembled, returning the event if this line
    /// completed it.
    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            let event = self.event.take();
            return self.data.take().map(|data| SseEvent { event, data });
        }

        if line.starts_with(':') {
            tracing::trace!(comment = &line[1..], "Event stream comment");
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" | "retry" => {}
            other => tracing::trace!(field = other, "Ignoring unknown event stream field"),
        }

        None
    }

    fn decode_line(&mut self, line: &[u8]) -> Result<Option<SseEvent>, SseCodecError> {
        self.count_line()?;

        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line = String::from_utf8_lossy(line);
        if let Cow::Owned(_) = line {
            tracing::warn!(%line, "Event stream line is not valid UTF-8");
        }

        Ok(self.process_line(&line).and_then(|event| self.yielded(event)))
    }

    fn count_line(&mut self) -> Result<(), SseCodecError> {
        self.lines_read += 1;
        if let Some(limit) = self.line_limit {
            if self.lines_read > limit {
                return Err(SseCodecError::LineLimitExceeded { limit });
            }
        }
        Ok(())
    }

    fn yielded(&mut self, event: SseEvent) -> Option<SseEvent> {
        self.line_limit = None;
        Some(event)
    }
}

impl Decoder for SseCodec {
    type Item = SseEvent;
    type Error = SseCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = self.lines.decode(buf)? {
            if let Some(event) = self.decode_line(&line)? {
                return Ok(Some(event));
            }
        }

        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = self.lines.decode_eof(buf)? {
            if let Some(event) = self.decode_line(&line)? {
                return Ok(Some(event));
            }
        }

        if self.data.is_some() {
            tracing::debug!("Event stream ended in the middle of an event; discarding it");
            self.event = None;
            self.data = None;
        }

        Ok(None)
    }
}

/// A decoded event stream over any byte source.
pub type EventStream = FramedRead<Pin<Box<dyn AsyncRead + Send>>, SseCodec>;

/// Decode the body of an HTTP response as an event stream.
pub fn event_stream(response: reqwest::Response, codec: SseCodec) -> EventStream {
    let body = response.bytes_stream().map_err(io::Error::other);
    event_stream_from_reader(Box::pin(tokio_util::io::StreamReader::new(body)), codec)
}

pub fn event_stream_from_reader(reader: Pin<Box<dyn AsyncRead + Send>>, codec: SseCodec) -> EventStream {
    FramedRead::new(reader, codec)
}
