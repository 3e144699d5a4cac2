//! Tests for body framing and the chunked sub-machine

use std::net::SocketAddr;

use conduit::http::parser::{HttpParser, ParseStatus};
use conduit::proxy::buffer::IoBuffer;

fn parser() -> HttpParser {
    let local: SocketAddr = "10.0.0.1:3128".parse().unwrap();
    let peer: SocketAddr = "192.168.7.9:41000".parse().unwrap();
    HttpParser::new(local, peer)
}

/// A parser that has just finished a chunked response head.
fn chunked_parser() -> HttpParser {
    let mut p = parser();
    p.start_response();
    let mut input = IoBuffer::new(4096);
    let mut output = IoBuffer::new(4096);
    assert!(input.append(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n"));
    assert_eq!(p.parse_head(&mut input, &mut output), ParseStatus::Proceed);
    assert!(p.chunked);
    p
}

/// A parser that has just finished an identity response head with the
/// given Content-Length.
fn identity_parser(content_length: u64) -> HttpParser {
    let mut p = parser();
    p.start_response();
    let mut input = IoBuffer::new(4096);
    let mut output = IoBuffer::new(4096);
    let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {content_length}\r\n\r\n");
    assert!(input.append(head.as_bytes()));
    assert_eq!(p.parse_head(&mut input, &mut output), ParseStatus::Proceed);
    p
}

#[test]
fn test_identity_body_counts_down() {
    let mut p = identity_parser(10);
    assert_eq!(p.parse_body(b"hello"), (ParseStatus::Continue, 5));
    assert_eq!(p.parse_body(b"world"), (ParseStatus::Proceed, 5));
}

#[test]
fn test_identity_body_does_not_consume_excess() {
    let mut p = identity_parser(3);
    assert_eq!(p.parse_body(b"abcde"), (ParseStatus::Proceed, 3));
}

#[test]
fn test_single_chunk_consumed_exactly() {
    let body = b"5\r\nhello\r\n0\r\n\r\n";
    let mut p = chunked_parser();
    assert_eq!(p.parse_body(body), (ParseStatus::Proceed, body.len()));
}

#[test]
fn test_trailing_bytes_are_not_part_of_the_body() {
    let mut body = b"5\r\nhello\r\n0\r\n\r\n".to_vec();
    let expected = body.len();
    body.extend_from_slice(b"JUNK");
    let mut p = chunked_parser();
    assert_eq!(p.parse_body(&body), (ParseStatus::Proceed, expected));
}

#[test]
fn test_multiple_chunks() {
    let body = b"3\r\nabc\r\nA\r\n0123456789\r\n0\r\n\r\n";
    let mut p = chunked_parser();
    assert_eq!(p.parse_body(body), (ParseStatus::Proceed, body.len()));
}

#[test]
fn test_byte_at_a_time_reaches_proceed_on_the_last_byte() {
    let body = b"5\r\nhello\r\n0\r\n\r\n";
    let mut p = chunked_parser();
    for (i, byte) in body.iter().enumerate() {
        let (status, consumed) = p.parse_body(std::slice::from_ref(byte));
        assert_eq!(consumed, 1);
        if i + 1 == body.len() {
            assert_eq!(status, ParseStatus::Proceed, "byte {i}");
        } else {
            assert_eq!(status, ParseStatus::Continue, "byte {i}");
        }
    }
}

#[test]
fn test_every_split_point_agrees() {
    let body: &[u8] = b"4\r\nwiki\r\n6\r\npedia \r\nE\r\nin \r\n\r\nchunks.\r\n0\r\n\r\n";
    for split in 1..body.len() {
        let mut p = chunked_parser();
        let (first, second) = body.split_at(split);
        let (status, consumed) = p.parse_body(first);
        assert_eq!(status, ParseStatus::Continue, "split {split}");
        assert_eq!(consumed, first.len(), "split {split}");
        let (status, consumed) = p.parse_body(second);
        assert_eq!(status, ParseStatus::Proceed, "split {split}");
        assert_eq!(consumed, second.len(), "split {split}");
    }
}

#[test]
fn test_size_marker_split_across_chunks() {
    // "1ff" arrives as "1" then "ff;ext": the hoarded value must come out
    // to 0x1ff and exactly 511 payload bytes are skipped
    let mut p = chunked_parser();
    assert_eq!(p.parse_body(b"1"), (ParseStatus::Continue, 1));

    let mut rest = b"ff;ext\r\n".to_vec();
    rest.extend_from_slice(&vec![b'x'; 0x1ff]);
    rest.extend_from_slice(b"\r\n0\r\n\r\n");
    assert_eq!(p.parse_body(&rest), (ParseStatus::Proceed, rest.len()));
}

#[test]
fn test_chunk_extensions_are_skipped() {
    let body = b"5;name=value\r\nhello\r\n0\r\n\r\n";
    let mut p = chunked_parser();
    assert_eq!(p.parse_body(body), (ParseStatus::Proceed, body.len()));
}

#[test]
fn test_trailer_section() {
    let body = b"5\r\nhello\r\n0\r\nExpires: never\r\n\r\n";
    let mut p = chunked_parser();
    assert_eq!(p.parse_body(body), (ParseStatus::Proceed, body.len()));
}

#[test]
fn test_trailer_with_multiple_lines() {
    let body = b"5\r\nhello\r\n0\r\nA: 1\r\nB: 2\r\n\r\n";
    let mut p = chunked_parser();
    assert_eq!(p.parse_body(body), (ParseStatus::Proceed, body.len()));
}

#[test]
fn test_trailer_split_byte_by_byte() {
    let body = b"5\r\nhello\r\n0\r\nChecksum: abc\r\n\r\n";
    let mut p = chunked_parser();
    for (i, byte) in body.iter().enumerate() {
        let (status, _) = p.parse_body(std::slice::from_ref(byte));
        if i + 1 == body.len() {
            assert_eq!(status, ParseStatus::Proceed);
        } else {
            assert_eq!(status, ParseStatus::Continue, "byte {i}");
        }
    }
}

#[test]
fn test_empty_body_terminator_only() {
    let body = b"0\r\n\r\n";
    let mut p = chunked_parser();
    assert_eq!(p.parse_body(body), (ParseStatus::Proceed, body.len()));
}

#[test]
fn test_uppercase_hex_sizes() {
    let body = b"A\r\n0123456789\r\n0\r\n\r\n";
    let mut p = chunked_parser();
    assert_eq!(p.parse_body(body), (ParseStatus::Proceed, body.len()));
}

#[test]
fn test_chunk_size_overflow_is_fatal() {
    // seventeen hex digits overflow a shifted u64 accumulator
    let mut p = chunked_parser();
    let (status, _) = p.parse_body(b"fffffffffffffffff\r\n");
    assert_eq!(status, ParseStatus::Terminate);
}

#[test]
fn test_garbage_after_chunk_size_is_fatal() {
    let mut p = chunked_parser();
    let (status, _) = p.parse_body(b"5x\r\nhello\r\n");
    assert_eq!(status, ParseStatus::Terminate);
}

#[test]
fn test_missing_size_digits_is_fatal() {
    let mut p = chunked_parser();
    let (status, _) = p.parse_body(b"\r\nhello\r\n");
    assert_eq!(status, ParseStatus::Terminate);
}

#[test]
fn test_payload_not_followed_by_crlf_is_fatal() {
    let mut p = chunked_parser();
    let (status, _) = p.parse_body(b"3\r\nabcXY");
    assert_eq!(status, ParseStatus::Terminate);
}
