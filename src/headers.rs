use bytes::Bytes;
use http::header::{HeaderValue, ValueIter, CONTENT_LENGTH, EXPECT};
use http::HeaderMap;

pub(crate) fn connection_keep_alive(headers: &HeaderMap) -> bool {
    connection_has(headers, "keep-alive")
}

pub(crate) fn connection_close(headers: &HeaderMap) -> bool {
    connection_has(headers, "close")
}

fn connection_has(headers: &HeaderMap, needle: &str) -> bool {
    for value in headers.get_all(http::header::CONNECTION) {
        if let Ok(s) = value.to_str() {
            for val in s.split(',') {
                if val.trim().eq_ignore_ascii_case(needle) {
                    return true;
                }
            }
        }
    }
    false
}

/// Recognized `Expect` request expectations.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Expectations {
    pub(crate) continue_100: bool,
    pub(crate) processing_102: bool,
}

/// Scans the `Expect` header as a comma-separated token list.
///
/// Any unrecognized token poisons the whole header: both recognized flags
/// are dropped and `Err` is returned so a 417 can be synthesized.
pub(crate) fn expectations(headers: &HeaderMap) -> Result<Expectations, ()> {
    let mut expect = Expectations::default();
    for value in headers.get_all(EXPECT) {
        let s = value.to_str().map_err(|_| ())?;
        for token in s.split(',') {
            match token.trim() {
                t if t.eq_ignore_ascii_case("100-continue") => expect.continue_100 = true,
                t if t.eq_ignore_ascii_case("102-processing") => expect.processing_102 = true,
                _ => return Err(()),
            }
        }
    }
    Ok(expect)
}

/// If multiple Content-Length headers were sent, everything can still be
/// alright if they all contain the same value, and all parse correctly.
/// If not, then it's an error.
pub(crate) fn content_length_parse_all(headers: &HeaderMap) -> Option<u64> {
    content_length_parse_all_values(headers.get_all(CONTENT_LENGTH).into_iter())
}

pub(crate) fn content_length_parse_all_values(values: ValueIter<'_, HeaderValue>) -> Option<u64> {
    let mut length = None;
    for value in values {
        let parsed = value.to_str().ok().and_then(|s| s.trim().parse::<u64>().ok())?;
        match length {
            Some(prev) if prev != parsed => return None,
            _ => length = Some(parsed),
        }
    }
    length
}

pub(crate) fn content_length_value(len: u64) -> HeaderValue {
    let mut buf = itoa::Buffer::new();
    let rendered = buf.format(len);
    // safe because u64 Display is ascii numerals
    unsafe { HeaderValue::from_maybe_shared_unchecked(Bytes::copy_from_slice(rendered.as_bytes())) }
}

pub(crate) fn set_content_length_if_missing(headers: &mut HeaderMap, len: u64) {
    headers
        .entry(CONTENT_LENGTH)
        .or_insert_with(|| content_length_value(len));
}

pub(crate) fn is_chunked_(value: &HeaderValue) -> bool {
    // chunked must always be the last encoding, according to spec
    if let Ok(s) = value.to_str() {
        if let Some(encoding) = s.rsplit(',').next() {
            return encoding.trim().eq_ignore_ascii_case("chunked");
        }
    }

    false
}
