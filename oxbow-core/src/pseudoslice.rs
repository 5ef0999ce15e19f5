//! Virtual concatenation of a rendered header buffer and a response body.
//!
//! The send path reads a response as one logical byte sequence without ever
//! materializing it: `get` returns a contiguous window, staging through the
//! scratch buffer only when the window straddles the header/body boundary.
//! Header and scratch buffers are taken from the provision when the slice is
//! built and reclaimed when the send completes.

use oxbow_http::response::Body;

use crate::arena::Arena;

pub struct Pseudoslice {
    header: Vec<u8>,
    body: Body,
    scratch: Vec<u8>,
}

impl Pseudoslice {
    pub fn new(header: Vec<u8>, body: Body, scratch: Vec<u8>) -> Self {
        Pseudoslice {
            header,
            body,
            scratch,
        }
    }

    pub fn len(&self) -> usize {
        self.header.len() + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A contiguous view of `[start, min(end, len))`. Arena-backed bodies
    /// resolve against `arena`; the spans were allocated there and the arena
    /// is not reset until the send completes.
    pub fn get<'a>(&'a mut self, start: usize, end: usize, arena: &'a Arena) -> &'a [u8] {
        let end = end.min(self.len());
        if start >= end {
            return &[];
        }

        let boundary = self.header.len();
        if end <= boundary {
            return &self.header[start..end];
        }
        if start >= boundary {
            return &body_bytes(&self.body, arena)[start - boundary..end - boundary];
        }

        // Straddling window: stage the two halves contiguously.
        self.scratch.clear();
        self.scratch.extend_from_slice(&self.header[start..]);
        self.scratch
            .extend_from_slice(&body_bytes(&self.body, arena)[..end - boundary]);
        &self.scratch
    }

    /// Hand the header and scratch buffers back for reuse.
    pub fn into_buffers(self) -> (Vec<u8>, Vec<u8>) {
        (self.header, self.scratch)
    }

    #[cfg(test)]
    fn scratch_len(&self) -> usize {
        self.scratch.len()
    }
}

fn body_bytes<'a>(body: &'a Body, arena: &'a Arena) -> &'a [u8] {
    match body {
        Body::Empty => &[],
        Body::Static(bytes) => bytes,
        Body::Arena(span) => arena.get(span.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice_with(header: &[u8], body: Body) -> Pseudoslice {
        Pseudoslice::new(header.to_vec(), body, Vec::new())
    }

    #[test]
    fn len_is_header_plus_body() {
        let slice = slice_with(b"HTTP", Body::Static(b"body"));
        assert_eq!(slice.len(), 8);
        assert!(!slice.is_empty());
    }

    #[test]
    fn ranges_within_one_side_skip_the_scratch() {
        let arena = Arena::new();
        let mut slice = slice_with(b"headers", Body::Static(b"payload"));

        assert_eq!(slice.get(0, 7, &arena), b"headers");
        assert_eq!(slice.scratch_len(), 0);

        assert_eq!(slice.get(7, 14, &arena), b"payload");
        assert_eq!(slice.scratch_len(), 0);

        assert_eq!(slice.get(9, 12, &arena), b"ylo");
        assert_eq!(slice.scratch_len(), 0);
    }

    #[test]
    fn straddling_range_stages_contiguously() {
        let arena = Arena::new();
        let mut slice = slice_with(b"head", Body::Static(b"tail"));
        assert_eq!(slice.get(2, 6, &arena), b"adta");
        assert!(slice.scratch_len() > 0);
    }

    #[test]
    fn end_is_clamped_to_len() {
        let arena = Arena::new();
        let mut slice = slice_with(b"abc", Body::Static(b"def"));
        assert_eq!(slice.get(4, 100, &arena), b"ef");
        assert_eq!(slice.get(6, 100, &arena), b"");
        assert_eq!(slice.get(9, 12, &arena), b"");
    }

    #[test]
    fn arena_body_resolves() {
        let mut arena = Arena::new();
        let span = arena.alloc(b"dynamic body");
        let mut slice = slice_with(b"hdr:", Body::Arena(span));
        assert_eq!(slice.get(4, 16, &arena), b"dynamic body");
        assert_eq!(slice.get(2, 9, &arena), b"r:dynam");
    }

    // Windows of size <= B concatenate back to the original bytes, for
    // every window size.
    #[test]
    fn window_walk_reassembles_the_response() {
        let mut arena = Arena::new();
        let span = arena.alloc(b"0123456789");
        let header = b"HTTP/1.1 200 OK\r\n\r\n";
        let reference: Vec<u8> = header
            .iter()
            .copied()
            .chain(b"0123456789".iter().copied())
            .collect();

        for window in 1..=reference.len() + 1 {
            let mut slice = slice_with(header, Body::Arena(span.clone()));
            let mut assembled = Vec::new();
            let mut sent = 0;
            while sent < slice.len() {
                let chunk = slice.get(sent, sent + window, &arena);
                assert!(chunk.len() <= window);
                assembled.extend_from_slice(chunk);
                sent += chunk.len();
            }
            assert_eq!(assembled, reference, "window size {window}");
        }
    }

    #[test]
    fn buffers_are_reclaimable() {
        let slice = slice_with(b"abc", Body::Empty);
        let (header, scratch) = slice.into_buffers();
        assert_eq!(header, b"abc");
        assert!(scratch.is_empty());
    }
}
