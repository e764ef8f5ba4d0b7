#[inline]
pub(crate) fn extract_sse_data_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let payload = trimmed.strip_prefix("data:")?;
    Some(payload.trim())
}

#[inline]
pub(crate) fn is_done_sentinel(payload: &str) -> bool {
    payload.trim() == "[DONE]"
}

/// Longest prefix of `bytes` that is at most `limit` bytes, decoded lossily.
///
/// The cut never splits a UTF-8 sequence that is otherwise complete.
pub(crate) fn truncated_utf8_prefix(bytes: &[u8], limit: usize) -> String {
    if bytes.len() <= limit {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let head = &bytes[..limit];
    match std::str::from_utf8(head) {
        Ok(text) => text.to_owned(),
        Err(err) if err.error_len().is_none() => {
            // Ends in the middle of a character: drop the partial tail.
            String::from_utf8_lossy(&head[..err.valid_up_to()]).into_owned()
        }
        Err(_) => String::from_utf8_lossy(head).into_owned(),
    }
}
