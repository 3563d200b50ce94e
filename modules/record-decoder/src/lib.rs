//! Reassembles ulogd JSON records from a stream socket.
//!
//! ulogd writes one JSON object per packet separated by a newline, but a
//! single read may end anywhere inside an object or carry several objects at
//! once. Records are recovered by splitting the buffered text on `}\n{`
//! boundaries and parsing each candidate. A candidate that runs out of input
//! is held back and completed by the next read.

use serde_json::Value;

/// Upper bound on text held back waiting for the rest of a record.
pub const DEFAULT_MAX_PENDING: usize = 1 << 20;

/// Outcome of parsing one candidate.
#[derive(Debug)]
pub enum Candidate {
    Complete(Value),
    /// The parser ran out of input; more bytes may complete the record.
    NeedMore,
    Malformed(serde_json::Error),
}

/// What the decoder hands back for each record boundary it found.
#[derive(Debug)]
pub enum Frame {
    Record(Value),
    Malformed { text: String, reason: String },
}

pub fn classify(text: &str) -> Candidate {
    match serde_json::from_str::<Value>(text) {
        Ok(v) => Candidate::Complete(v),
        Err(e) if e.is_eof() => Candidate::NeedMore,
        Err(e) => Candidate::Malformed(e),
    }
}

/// Split at every newline that sits between a `}` and a `{`. The braces stay
/// with their records; the newline is dropped. Works on raw bytes: none of
/// the three can occur inside a multi-byte UTF-8 sequence.
pub fn split_candidates(buf: &[u8]) -> Vec<&[u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 3 <= buf.len() {
        if &buf[i..i + 3] == b"}\n{" {
            parts.push(&buf[start..i + 1]);
            start = i + 2;
            i += 2;
        } else {
            i += 1;
        }
    }
    parts.push(&buf[start..]);
    parts
}

#[derive(Debug)]
pub struct RecordDecoder {
    pending: Vec<u8>,
    max_pending: usize,
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl RecordDecoder {
    pub fn new(max_pending: usize) -> Self {
        RecordDecoder { pending: Vec::new(), max_pending: max_pending.max(1) }
    }

    /// Bytes carried over from previous reads.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Drop any carried-over text, returning how many bytes were discarded.
    pub fn reset(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    /// Append a chunk and return every frame that can be decided now, in
    /// stream order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        // Bytes are joined before decoding so a character split across two
        // reads survives. Invalid UTF-8 is replaced rather than rejected.
        self.pending.extend_from_slice(chunk);
        let buf = std::mem::take(&mut self.pending);
        let parts = split_candidates(&buf);
        let last = parts.len() - 1;

        let mut frames = Vec::with_capacity(parts.len());
        for (i, raw) in parts.into_iter().enumerate() {
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let part = String::from_utf8_lossy(raw);
            match classify(&part) {
                Candidate::Complete(v) => frames.push(Frame::Record(v)),
                Candidate::NeedMore if i == last => {
                    if raw.len() > self.max_pending {
                        frames.push(Frame::Malformed {
                            text: part.into_owned(),
                            reason: format!("incomplete record exceeds {} bytes", self.max_pending),
                        });
                    } else {
                        self.pending.extend_from_slice(raw);
                    }
                }
                // Bytes that followed this candidate are already consumed, so
                // it can never be completed.
                Candidate::NeedMore => frames.push(Frame::Malformed {
                    text: part.into_owned(),
                    reason: "truncated record".into(),
                }),
                Candidate::Malformed(e) => frames.push(Frame::Malformed {
                    text: part.into_owned(),
                    reason: e.to_string(),
                }),
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = r#"{"oob.prefix":"nft_in_unmtch","src_ip":"10.0.0.5","ip.protocol":6,"dest_port":22}"#;
    const B: &str = r#"{"oob.prefix":"nft_in_unmtch","src_ip":"10.0.0.6","ip.protocol":17,"dest_port":53,"nested":{"x":[1,2]}}"#;

    fn records(frames: &[Frame]) -> Vec<Value> {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::Record(v) => Some(v.clone()),
                Frame::Malformed { .. } => None,
            })
            .collect()
    }

    #[test]
    fn split_keeps_braces() {
        let parts = split_candidates(b"{\"a\":1}\n{\"b\":2}\n{\"c\":3}");
        assert_eq!(parts, vec![&b"{\"a\":1}"[..], &b"{\"b\":2}"[..], &b"{\"c\":3}"[..]]);
    }

    #[test]
    fn split_ignores_other_newlines() {
        let parts = split_candidates(b"{\"a\":\n1}\n\n{\"b\":2}");
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn classify_is_tristate() {
        assert!(matches!(classify(A), Candidate::Complete(_)));
        assert!(matches!(classify(&A[..20]), Candidate::NeedMore));
        assert!(matches!(classify("{\"a\":}"), Candidate::Malformed(_)));
        assert!(matches!(classify("{\"a\":1}xyz"), Candidate::Malformed(_)));
    }

    #[test]
    fn two_records_in_one_read() {
        let mut dec = RecordDecoder::default();
        let frames = dec.feed(format!("{A}\n{A}").as_bytes());
        assert_eq!(records(&frames).len(), 2);
        assert!(dec.pending().is_empty());
    }

    #[test]
    fn record_split_at_every_offset() {
        let stream = format!("{A}\n{B}\n");
        let expected: Vec<Value> = vec![
            serde_json::from_str(A).unwrap(),
            serde_json::from_str(B).unwrap(),
        ];
        for cut in 0..=stream.len() {
            let mut dec = RecordDecoder::default();
            let mut got = records(&dec.feed(&stream.as_bytes()[..cut]));
            let second = dec.feed(&stream.as_bytes()[cut..]);
            assert!(
                second.iter().all(|f| matches!(f, Frame::Record(_))),
                "malformed frame at cut {cut}"
            );
            got.extend(records(&second));
            assert_eq!(got, expected, "cut at {cut}");
            assert!(dec.pending().iter().all(u8::is_ascii_whitespace), "leftover at cut {cut}");
        }
    }

    #[test]
    fn byte_at_a_time() {
        let stream = format!("{A}\n{B}\n{A}");
        let mut dec = RecordDecoder::default();
        let mut got = Vec::new();
        for b in stream.as_bytes() {
            got.extend(records(&dec.feed(std::slice::from_ref(b))));
        }
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn malformed_candidate_does_not_block_neighbours() {
        let mut dec = RecordDecoder::default();
        let frames = dec.feed(format!("{A}\n{{\"broken\":}}\n{B}").as_bytes());
        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[0], Frame::Record(_)));
        assert!(matches!(frames[1], Frame::Malformed { .. }));
        assert!(matches!(frames[2], Frame::Record(_)));
    }

    #[test]
    fn truncated_middle_candidate_is_malformed() {
        let mut dec = RecordDecoder::default();
        let frames = dec.feed(b"{\"a\":{\"b\":1}\n{\"c\":2}");
        assert!(matches!(frames[0], Frame::Malformed { .. }));
        assert!(matches!(frames[1], Frame::Record(_)));
        assert!(dec.pending().is_empty());
    }

    #[test]
    fn oversized_remainder_is_dropped() {
        let mut dec = RecordDecoder::new(16);
        let frames = dec.feed(b"{\"key\":\"a long unterminated value");
        assert!(matches!(frames[0], Frame::Malformed { .. }));
        assert!(dec.pending().is_empty());
    }

    #[test]
    fn reset_discards_remainder() {
        let mut dec = RecordDecoder::default();
        assert!(dec.feed(&A.as_bytes()[..10]).is_empty());
        assert_eq!(dec.reset(), 10);
        assert!(dec.pending().is_empty());
    }

    #[test]
    fn non_ascii_bytes_do_not_panic() {
        let mut dec = RecordDecoder::default();
        let frames = dec.feed(b"{\"a\":\"\xff\xfe\"}");
        assert_eq!(records(&frames).len(), 1);
    }

    #[test]
    fn multibyte_character_split_across_reads() {
        let stream = r#"{"oob.prefix":"nft_in_unmtch","note":"café"}"#.as_bytes();
        let e_acute = stream.len() - 4;
        let mut dec = RecordDecoder::default();
        // Cut between the two bytes of 'é'.
        assert!(dec.feed(&stream[..e_acute + 1]).is_empty());
        let got = records(&dec.feed(&stream[e_acute + 1..]));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["note"], "café");
    }
}
