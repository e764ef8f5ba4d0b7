use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::ClientError;

use super::driver::Emission;

pub(crate) type StreamItem = Result<String, ClientError>;

/// Position of a token in the [`SpillBuffer`], valid until the next drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SpillMark {
    generation: u64,
    index: usize,
}

#[derive(Debug, Default)]
struct SpillInner {
    tokens: Vec<String>,
    generation: u64,
}

/// Tool-call tokens that could not be delivered live, shared by every stream
/// of one client. Tokens from one stream are kept oldest first.
#[derive(Debug, Default)]
pub(crate) struct SpillBuffer {
    inner: Mutex<SpillInner>,
}

impl SpillBuffer {
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().tokens.len()
    }

    pub(crate) fn drain(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        std::mem::take(&mut inner.tokens)
    }

    pub(crate) fn push(&self, token: String) -> SpillMark {
        let mut inner = self.inner.lock();
        let mark = SpillMark {
            generation: inner.generation,
            index: inner.tokens.len(),
        };
        inner.tokens.push(token);
        mark
    }

    /// Insert `tokens` at `mark`, or append them when there is no mark or a
    /// drain happened since it was taken.
    fn insert_at(&self, mark: Option<SpillMark>, tokens: Vec<String>) {
        let mut inner = self.inner.lock();
        match mark {
            Some(mark) if mark.generation == inner.generation && mark.index <= inner.tokens.len() => {
                inner.tokens.splice(mark.index..mark.index, tokens);
            }
            _ => inner.tokens.extend(tokens),
        }
    }
}

/// Spill state of one stream, shared by its task and its [`LlmStream`].
///
/// After the first spill every later tool token of the stream is spilled
/// too, so nothing delivered live is newer than a spilled token.
///
/// [`LlmStream`]: super::LlmStream
#[derive(Debug)]
pub(crate) struct StreamSpill {
    buffer: Arc<SpillBuffer>,
    first: Mutex<Option<SpillMark>>,
}

impl StreamSpill {
    pub(crate) fn new(buffer: Arc<SpillBuffer>) -> Arc<Self> {
        Arc::new(Self {
            buffer,
            first: Mutex::new(None),
        })
    }

    fn is_spilling(&self) -> bool {
        self.first.lock().is_some()
    }

    fn spill(&self, token: String) {
        let mark = self.buffer.push(token);
        self.first.lock().get_or_insert(mark);
    }

    /// Put tokens that were queued in the channel but never consumed ahead
    /// of anything this stream spilled; they were produced earlier.
    pub(crate) fn salvage(&self, tokens: Vec<String>) {
        if tokens.is_empty() {
            return;
        }
        let first = *self.first.lock();
        self.buffer.insert_at(first, tokens);
    }
}

/// Output side of one stream.
///
/// Text is best effort: it is dropped when the channel is full. Tool-call
/// tokens are never dropped: when the channel cannot take one immediately
/// it is moved to the spill buffer for an explicit drain.
pub(crate) struct StreamSink {
    tx: mpsc::Sender<StreamItem>,
    spill: Arc<StreamSpill>,
    spilled: usize,
    dropped_text: usize,
}

impl StreamSink {
    pub(crate) fn new(tx: mpsc::Sender<StreamItem>, spill: Arc<StreamSpill>) -> Self {
        Self {
            tx,
            spill,
            spilled: 0,
            dropped_text: 0,
        }
    }

    pub(crate) fn spilled(&self) -> usize {
        self.spilled
    }

    pub(crate) fn dropped_text(&self) -> usize {
        self.dropped_text
    }

    /// Resolves once the consumer is gone.
    pub(crate) async fn closed(&self) {
        self.tx.closed().await;
    }

    pub(crate) fn emit_all(&mut self, emissions: impl IntoIterator<Item = Emission>) {
        for emission in emissions {
            match emission {
                Emission::Text(text) => self.send_text(text),
                Emission::ToolCall(token) => self.send_tool_token(token),
            }
        }
    }

    fn send_text(&mut self, text: String) {
        match self.tx.try_send(Ok(text)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_text += 1;
                tracing::warn!(
                    dropped_text = self.dropped_text,
                    "output channel full; dropping text fragment"
                );
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn send_tool_token(&mut self, token: String) {
        if self.spill.is_spilling() {
            self.spill_token(token, "earlier tool-call token already buffered");
            return;
        }
        let err = match self.tx.try_send(Ok(token)) {
            Ok(()) => return,
            Err(err) => err,
        };
        let reason = match err {
            TrySendError::Full(_) => "output channel full",
            TrySendError::Closed(_) => "consumer closed",
        };
        if let Ok(token) = err.into_inner() {
            self.spill_token(token, reason);
        }
    }

    fn spill_token(&mut self, token: String, reason: &'static str) {
        self.spill.spill(token);
        self.spilled += 1;
        tracing::warn!(spilled = self.spilled, reason, "buffering tool-call token");
    }

    /// Deliver a terminal error, waiting for channel space.
    pub(crate) async fn fail(&self, err: ClientError) {
        if self.tx.send(Err(err)).await.is_err() {
            tracing::debug!("consumer gone before error could be delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(capacity: usize) -> (StreamSink, mpsc::Receiver<StreamItem>, Arc<SpillBuffer>) {
        let (tx, rx) = mpsc::channel(capacity);
        let buffer = Arc::new(SpillBuffer::default());
        let spill = StreamSpill::new(Arc::clone(&buffer));
        (StreamSink::new(tx, spill), rx, buffer)
    }

    fn tool(name: &str) -> String {
        format!("TOOL_CALL: {{\"tool\":\"{name}\"}}")
    }

    #[test]
    fn test_live_delivery_when_channel_has_room() {
        let (mut sink, mut rx, buffer) = sink(4);
        sink.emit_all([
            Emission::Text("a".to_string()),
            Emission::ToolCall("TOOL_CALL: {}".to_string()),
        ]);
        assert_eq!(rx.try_recv().unwrap().unwrap(), "a");
        assert_eq!(rx.try_recv().unwrap().unwrap(), "TOOL_CALL: {}");
        assert_eq!(buffer.len(), 0);
        assert_eq!(sink.spilled(), 0);
    }

    #[test]
    fn test_full_channel_drops_text_and_spills_tool_tokens() {
        let (mut sink, mut rx, buffer) = sink(1);
        sink.emit_all([
            Emission::Text("fills the slot".to_string()),
            Emission::Text("dropped".to_string()),
            Emission::ToolCall(tool("a")),
            Emission::ToolCall(tool("b")),
        ]);
        assert_eq!(sink.dropped_text(), 1);
        assert_eq!(sink.spilled(), 2);
        assert_eq!(buffer.drain(), vec![tool("a"), tool("b")]);
        assert_eq!(rx.try_recv().unwrap().unwrap(), "fills the slot");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_tokens_after_a_spill_never_overtake_it() {
        let (mut sink, mut rx, buffer) = sink(1);
        sink.emit_all([
            Emission::ToolCall(tool("v1")),
            Emission::ToolCall(tool("v2")),
        ]);
        // The consumer frees the slot, but the next token must not go live
        // ahead of the buffered one.
        assert_eq!(rx.try_recv().unwrap().unwrap(), tool("v1"));
        sink.emit_all([
            Emission::ToolCall(tool("v3")),
            Emission::Text("text still flows".to_string()),
        ]);
        assert_eq!(rx.try_recv().unwrap().unwrap(), "text still flows");
        assert!(rx.try_recv().is_err());
        assert_eq!(buffer.drain(), vec![tool("v2"), tool("v3")]);
    }

    #[test]
    fn test_closed_channel_spills_tool_tokens() {
        let (mut sink, rx, buffer) = sink(8);
        drop(rx);
        sink.emit_all([
            Emission::Text("lost".to_string()),
            Emission::ToolCall("TOOL_CALL: {}".to_string()),
        ]);
        assert_eq!(buffer.drain(), vec!["TOOL_CALL: {}".to_string()]);
        assert_eq!(sink.dropped_text(), 0);
    }

    #[test]
    fn test_salvaged_tokens_go_before_later_spills() {
        let buffer = Arc::new(SpillBuffer::default());
        buffer.push(tool("other_stream"));
        let spill = StreamSpill::new(Arc::clone(&buffer));
        spill.spill(tool("newer"));
        buffer.push(tool("after"));
        spill.salvage(vec![tool("older")]);
        assert_eq!(
            buffer.drain(),
            vec![tool("other_stream"), tool("older"), tool("newer"), tool("after")]
        );

        // A drain invalidates the mark; salvage then appends.
        spill.salvage(vec![tool("late")]);
        assert_eq!(buffer.drain(), vec![tool("late")]);
    }

    #[tokio::test]
    async fn test_fail_delivers_error() {
        let (sink, mut rx, _) = sink(1);
        sink.fail(ClientError::Remote("boom".to_string())).await;
        assert!(matches!(rx.recv().await, Some(Err(ClientError::Remote(_)))));
    }
}
