/// Line splitting for streamed HTTP bodies.
///
/// Both SSE and NDJSON are newline-delimited, so the response body is cut
/// into lines before any dialect-specific handling. Multi-byte UTF-8
/// sequences never contain `\n`, so buffering raw bytes up to the next
/// newline also reassembles characters split across network chunks.
use std::collections::VecDeque;

use futures_util::Stream;
use memchr::memchr_iter;

/// Incremental newline splitter.
///
/// Feed it raw byte chunks (arriving at arbitrary boundaries) and it yields
/// complete lines without their terminator. A trailing `\r` is stripped so
/// `\r\n` framed bodies behave like `\n` framed ones.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
    read_offset: usize,
}

impl LineSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return any complete lines.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw bytes and append complete lines into a caller-provided buffer.
    pub fn feed_into<C: Extend<String>>(&mut self, chunk: &[u8], out: &mut C) {
        let scan_start = self.buffer.len();
        self.buffer.extend_from_slice(chunk);
        let mut processed_up_to = self.read_offset;
        for rel_pos in memchr_iter(b'\n', &self.buffer[scan_start..]) {
            let line_end = scan_start + rel_pos;
            out.extend(std::iter::once(decode_line_bytes(
                &self.buffer[processed_up_to..line_end],
            )));
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush an unterminated final line, if any.
    pub fn finish(&mut self) -> Option<String> {
        let rest = &self.buffer[self.read_offset..];
        let line = (!rest.is_empty()).then(|| decode_line_bytes(rest));
        self.buffer.clear();
        self.read_offset = 0;
        line
    }
}

fn decode_line_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

struct LineStreamState<S> {
    stream: std::pin::Pin<Box<S>>,
    splitter: LineSplitter,
    pending: VecDeque<String>,
    exhausted: bool,
}

/// Split a byte stream into lines using [`LineSplitter`].
///
/// Transport errors are passed through in order; the unterminated tail of
/// the body (if any) is yielded as a last line once the source ends.
pub fn line_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, E>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;

    let state = LineStreamState {
        stream: Box::pin(byte_stream),
        splitter: LineSplitter::new(),
        pending: VecDeque::with_capacity(8),
        exhausted: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.pending.pop_front() {
                return Some((Ok(line), state));
            }
            if state.exhausted {
                return None;
            }

            match state.stream.as_mut().next().await {
                Some(Ok(bytes)) => {
                    state.splitter.feed_into(&bytes, &mut state.pending);
                }
                Some(Err(err)) => return Some((Err(err), state)),
                None => {
                    state.exhausted = true;
                    if let Some(line) = state.splitter.finish() {
                        return Some((Ok(line), state));
                    }
                    return None;
                }
            }
        }
    })
}
