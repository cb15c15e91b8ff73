//! Frame input under arbitrary chunk boundaries.
//!
//! The same byte sequence is split at random points with a fixed seed and
//! must always parse to the same frames.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stomp_session::ProtocolVersion;
use stomp_session::error::FrameError;
use stomp_session::parser::{ReadLimits, ReadParams, read_frame};
use stomp_session::reader::ByteReader;

const INPUT: &[u8] = b"MESSAGE\nsubscription:1\nmessage-id:a\\c1\ncontent-length:6\n\nfi\0rst\0\n\
\n\
MESSAGE\r\nsubscription:1\r\nmessage-id:2\r\n\r\nsecond\0\n\
RECEIPT\nreceipt-id:r\\n7\n\n\0";

#[derive(Debug, PartialEq)]
struct Parsed {
    command: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

fn split_randomly(rng: &mut StdRng, input: &'static [u8]) -> Vec<io::Result<Bytes>> {
    let mut chunks = Vec::new();
    let mut rest = input;
    while !rest.is_empty() {
        let n = rng.gen_range(1..=rest.len().min(17));
        chunks.push(Ok(Bytes::from_static(&rest[..n])));
        rest = &rest[n..];
    }
    chunks
}

async fn parse_all(chunks: Vec<io::Result<Bytes>>) -> Vec<Parsed> {
    let reader = Arc::new(ByteReader::new(stream::iter(chunks)));
    let params = ReadParams {
        limits: ReadLimits::default(),
        ignore_leading_empty_lines: true,
        protocol_version: ProtocolVersion::V1_2,
    };

    let mut frames = Vec::new();
    loop {
        let frame = match read_frame(&reader, &params).await {
            Ok(frame) => frame,
            Err(FrameError::EndOfStream) => break,
            Err(err) => panic!("unexpected error: {err}"),
        };
        let (command, headers, body) = frame.into_parts();
        let headers = headers
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        let body = body.read_to_end(1024).await.unwrap();
        frames.push(Parsed {
            command,
            headers,
            body,
        });
    }
    frames
}

#[tokio::test]
async fn random_splits_parse_identically() {
    let expected = parse_all(vec![Ok(Bytes::from_static(INPUT))]).await;
    assert_eq!(expected.len(), 3);
    assert_eq!(expected[0].body, Bytes::from_static(b"fi\0rst"));
    assert_eq!(expected[0].headers[1], ("message-id".to_string(), "a:1".to_string()));
    assert_eq!(expected[1].body, Bytes::from_static(b"second"));
    assert_eq!(expected[2].command, "RECEIPT");
    assert_eq!(expected[2].headers[0].1, "r\n7");

    let mut rng = StdRng::seed_from_u64(0x5707);
    for _ in 0..200 {
        let chunks = split_randomly(&mut rng, INPUT);
        assert_eq!(parse_all(chunks).await, expected);
    }
}

#[tokio::test]
async fn single_byte_chunks() {
    let expected = parse_all(vec![Ok(Bytes::from_static(INPUT))]).await;
    let chunks = (0..INPUT.len())
        .map(|i| Ok(Bytes::from_static(&INPUT[i..i + 1])))
        .collect();
    assert_eq!(parse_all(chunks).await, expected);
}
