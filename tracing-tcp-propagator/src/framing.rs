//! # Wire framing
//!
//! A wire message is a block of `key:value` header lines, one blank line,
//! then the raw payload:
//!
//! ```text
//! traceparent:00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01\n
//! tracestate:\n
//! \n
//! Hello from the Client
//! ```
//!
//! There is no length prefix. A reader assumes one read event holds one
//! whole message, and a buffer without a blank line is all payload.
use crate::carrier::CarrierMap;
use bytes::{BufMut, Bytes, BytesMut};

const HEADER_SEPARATOR: u8 = b':';
const LINE_TERMINATOR: u8 = b'\n';
const BLOCK_TERMINATOR: &[u8] = b"\n\n";

/// A header block and the payload that follows it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WireMessage {
    /// Decoded header lines.
    pub carrier: CarrierMap,
    /// Bytes after the header block, untouched.
    pub payload: Bytes,
}

impl WireMessage {
    /// Create a message from a carrier and a payload.
    pub fn new(carrier: CarrierMap, payload: impl Into<Bytes>) -> Self {
        WireMessage {
            carrier,
            payload: payload.into(),
        }
    }

    /// Frame this message for the wire.
    pub fn encode(&self) -> Bytes {
        encode(&self.carrier, &self.payload)
    }
}

/// How the header block was recovered by [`decode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderBlock {
    /// A terminated header block was found.
    Present {
        /// Lines dropped for lacking a `:` or having an empty key.
        skipped_lines: usize,
    },
    /// No blank line was found; the whole buffer was taken as payload.
    Missing,
}

/// Result of [`decode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    /// The recovered message.
    pub message: WireMessage,
    /// Whether the header block was present and how clean it was.
    pub header_block: HeaderBlock,
}

/// Encode `carrier` and `payload` as header lines, a blank line and the payload.
///
/// Keys and values must not contain `\n`, and keys must not contain `:`.
pub fn encode(carrier: &CarrierMap, payload: &[u8]) -> Bytes {
    let header_len: usize = carrier.iter().map(|(k, v)| k.len() + v.len() + 2).sum();
    let mut buf = BytesMut::with_capacity(header_len + 1 + payload.len());
    for (key, value) in carrier.iter() {
        buf.put_slice(key.as_bytes());
        buf.put_u8(HEADER_SEPARATOR);
        buf.put_slice(value.as_bytes());
        buf.put_u8(LINE_TERMINATOR);
    }
    buf.put_u8(LINE_TERMINATOR);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split `buf` once at the first `\n\n` into a header block and a payload.
///
/// Never fails. Without a `\n\n` the whole buffer is payload and
/// [`HeaderBlock::Missing`] is reported.
///
/// An empty carrier encodes as a single leading `\n`, which only finds its
/// block terminator when the payload itself starts with `\n`. Otherwise the
/// message decodes as [`HeaderBlock::Missing`] with that `\n` kept in the
/// payload; either way the carrier comes back empty.
pub fn decode(buf: impl Into<Bytes>) -> Decoded {
    let buf = buf.into();

    let Some(header_end) = find(&buf, BLOCK_TERMINATOR) else {
        return Decoded {
            message: WireMessage::new(CarrierMap::new(), buf),
            header_block: HeaderBlock::Missing,
        };
    };

    let (carrier, skipped_lines) = parse_header_lines(&buf[..header_end]);
    Decoded {
        message: WireMessage::new(carrier, buf.slice(header_end + BLOCK_TERMINATOR.len()..)),
        header_block: HeaderBlock::Present { skipped_lines },
    }
}

fn parse_header_lines(block: &[u8]) -> (CarrierMap, usize) {
    let mut carrier = CarrierMap::new();
    let mut skipped = 0;

    if block.is_empty() {
        return (carrier, skipped);
    }

    let text = String::from_utf8_lossy(block);
    for line in text.split('\n') {
        match line.split_once(':') {
            Some((key, value)) => {
                let (key, value) = (key.trim(), value.trim());
                if key.is_empty() {
                    skipped += 1;
                    continue;
                }
                // later duplicates overwrite earlier ones
                carrier.insert(key, value);
            }
            None => skipped += 1,
        }
    }

    (carrier, skipped)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn carrier(pairs: &[(&str, &str)]) -> CarrierMap {
        pairs.iter().copied().collect()
    }

    #[test]
    fn encode_layout() {
        let encoded = encode(
            &carrier(&[("traceparent", "00-abc-def-01"), ("baggage", "k=v")]),
            b"Hello from the Client",
        );

        assert_eq!(
            &encoded[..],
            b"baggage:k=v\ntraceparent:00-abc-def-01\n\nHello from the Client"
        );
    }

    #[test]
    fn encode_is_deterministic() {
        let headers = carrier(&[("b", "2"), ("a", "1"), ("c", "3")]);

        assert_eq!(encode(&headers, b"x"), encode(&headers.clone(), b"x"));
    }

    #[rstest]
    #[case::empty_payload(&[("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")], b"")]
    #[case::text_payload(&[("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"), ("tracestate", "foo=bar")], b"Hello from the Client")]
    #[case::empty_value(&[("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"), ("tracestate", "")], b"Hello from the Client")]
    #[case::payload_with_blank_lines(&[("k", "v")], b"\n\nline\n\n")]
    #[case::binary_payload(&[("k", "v")], &[0u8, 159, 146, 150, 10, 10, 255])]
    fn decode_recovers_encoded(#[case] pairs: &[(&str, &str)], #[case] payload: &[u8]) {
        let headers = carrier(pairs);
        let decoded = decode(encode(&headers, payload));

        assert_eq!(decoded.message.carrier, headers);
        assert_eq!(&decoded.message.payload[..], payload);
        assert_eq!(decoded.header_block, HeaderBlock::Present { skipped_lines: 0 });
    }

    #[rstest]
    #[case::plain_text(b"Hello from the Client".as_slice())]
    #[case::single_newlines(b"traceparent:00-abc\nHello\n".as_slice())]
    #[case::empty(b"".as_slice())]
    #[case::leading_newline(b"\nHello from the Client".as_slice())]
    #[case::lone_newline(b"\n".as_slice())]
    fn decode_without_block_terminator_is_all_payload(#[case] input: &'static [u8]) {
        let decoded = decode(Bytes::from_static(input));

        assert!(decoded.message.carrier.is_empty());
        assert_eq!(&decoded.message.payload[..], input);
        assert_eq!(decoded.header_block, HeaderBlock::Missing);
    }

    #[rstest]
    #[case::empty_block(b"\n\nfoo".as_slice(), 0, b"foo".as_slice())]
    #[case::empty_block_newline_payload(b"\n\n\nfoo".as_slice(), 0, b"\nfoo".as_slice())]
    #[case::header_then_newline_payload(b"k:v\n\n\nfoo".as_slice(), 1, b"\nfoo".as_slice())]
    #[case::later_blank_lines_stay_in_payload(b"k:v\n\nfoo\n\nbar".as_slice(), 1, b"foo\n\nbar".as_slice())]
    fn decode_splits_at_first_blank_line(
        #[case] input: &'static [u8],
        #[case] headers: usize,
        #[case] payload: &[u8],
    ) {
        let decoded = decode(Bytes::from_static(input));

        assert_eq!(decoded.message.carrier.len(), headers);
        assert_eq!(&decoded.message.payload[..], payload);
        assert_eq!(decoded.header_block, HeaderBlock::Present { skipped_lines: 0 });
    }

    #[rstest]
    #[case::text(b"Hello".as_slice())]
    #[case::empty(b"".as_slice())]
    fn empty_carrier_decodes_as_missing_block(#[case] payload: &[u8]) {
        let encoded = encode(&CarrierMap::new(), payload);
        let decoded = decode(encoded.clone());

        assert!(decoded.message.carrier.is_empty());
        assert_eq!(decoded.message.payload, encoded);
        assert_eq!(decoded.header_block, HeaderBlock::Missing);
    }

    #[test]
    fn empty_carrier_with_newline_payload_keeps_rest_of_payload() {
        let decoded = decode(encode(&CarrierMap::new(), b"\n\nHello"));

        assert!(decoded.message.carrier.is_empty());
        assert_eq!(&decoded.message.payload[..], b"\nHello");
        assert_eq!(decoded.header_block, HeaderBlock::Present { skipped_lines: 0 });
    }

    #[test]
    fn decode_splits_value_on_first_colon_only() {
        let decoded = decode(encode(&carrier(&[("traceparent", "00-abc:def-xyz-01")]), b""));

        assert_eq!(
            decoded.message.carrier.get("traceparent"),
            Some("00-abc:def-xyz-01")
        );
    }

    #[test]
    fn decode_duplicate_keys_last_wins() {
        let decoded = decode(Bytes::from_static(b"k:first\nk:second\n\npayload"));

        assert_eq!(decoded.message.carrier.get("k"), Some("second"));
        assert_eq!(decoded.message.carrier.len(), 1);
        assert_eq!(&decoded.message.payload[..], b"payload");
    }

    #[rstest]
    #[case::no_colon(b"garbage\nk:v\n\nbody".as_slice(), 1)]
    #[case::empty_key(b":v\nk:v\n\nbody".as_slice(), 1)]
    #[case::blank_key(b"   :v\nnope\nk:v\n\nbody".as_slice(), 2)]
    fn decode_skips_malformed_lines(#[case] input: &'static [u8], #[case] skipped: usize) {
        let decoded = decode(Bytes::from_static(input));

        assert_eq!(decoded.message.carrier.get("k"), Some("v"));
        assert_eq!(&decoded.message.payload[..], b"body");
        assert_eq!(
            decoded.header_block,
            HeaderBlock::Present {
                skipped_lines: skipped
            }
        );
    }

    #[test]
    fn decode_keeps_empty_values() {
        let decoded = decode(Bytes::from_static(b"tracestate:\ntraceparent:  \n\nbody"));

        assert_eq!(decoded.message.carrier.get("tracestate"), Some(""));
        assert_eq!(decoded.message.carrier.get("traceparent"), Some(""));
        assert_eq!(decoded.header_block, HeaderBlock::Present { skipped_lines: 0 });
    }

    #[test]
    fn decode_trims_whitespace_and_carriage_returns() {
        let decoded = decode(Bytes::from_static(b"  key :  value \r\n\nbody"));

        assert_eq!(decoded.message.carrier.get("key"), Some("value"));
        assert_eq!(&decoded.message.payload[..], b"body");
    }

    #[test]
    fn decode_leaves_payload_untouched() {
        let decoded = decode(Bytes::from_static(b"k:v\n\n  spaced: payload\n\n"));

        assert_eq!(&decoded.message.payload[..], b"  spaced: payload\n\n");
    }

    #[test]
    fn wire_message_encode_matches_free_function() {
        let message = WireMessage::new(carrier(&[("k", "v")]), "body");

        assert_eq!(message.encode(), encode(&message.carrier, b"body"));
        assert_eq!(decode(message.encode()).message, message);
    }
}
