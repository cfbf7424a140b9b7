//! Packet View
//!
//! A packet handed to a filter is usually spread over a chain of buffers.
//! The first segment is the contiguous head; later bytes are reached by
//! walking the rest of the chain.

/// A packet as seen by the interpreter and the capture path.
///
/// `wirelen` is the length the packet had on the wire. `buflen` is the
/// number of bytes actually present in the segments, never more than
/// `wirelen`. A driver that delivers a truncated chain produces a packet
/// with `buflen < wirelen`; loads into the missing part fail.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    head: &'a [u8],
    chain: &'a [&'a [u8]],
    wirelen: usize,
    buflen: usize,
}

impl<'a> Packet<'a> {
    /// A packet held in one contiguous buffer.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            head: data,
            chain: &[],
            wirelen: data.len(),
            buflen: data.len(),
        }
    }

    /// A packet whose bytes continue past `head` in `chain`.
    pub fn chained(head: &'a [u8], chain: &'a [&'a [u8]]) -> Self {
        let present = head.len() + chain.iter().map(|seg| seg.len()).sum::<usize>();
        Self {
            head,
            chain,
            wirelen: present,
            buflen: present,
        }
    }

    /// Declare the on-wire length. Bytes present beyond it are ignored.
    pub fn with_wirelen(mut self, wirelen: usize) -> Self {
        let present = self.head.len() + self.chain.iter().map(|seg| seg.len()).sum::<usize>();
        self.wirelen = wirelen;
        self.buflen = present.min(wirelen);
        self
    }

    /// Length of the packet on the wire.
    #[inline]
    pub fn wirelen(&self) -> usize {
        self.wirelen
    }

    /// Bytes available for loads and copies.
    #[inline]
    pub fn buflen(&self) -> usize {
        self.buflen
    }

    /// The contiguous head, clipped to the available bytes.
    #[inline]
    pub fn head(&self) -> &'a [u8] {
        &self.head[..self.head.len().min(self.buflen)]
    }

    fn segments(&self) -> impl Iterator<Item = &'a [u8]> {
        core::iter::once(self.head).chain(self.chain.iter().copied())
    }

    /// Copy bytes starting at `offset` into `dst`, walking the chain as
    /// needed. Returns the number of bytes copied, which is short when the
    /// available bytes run out.
    pub fn copy_to(&self, offset: usize, dst: &mut [u8]) -> usize {
        let want = dst.len().min(self.buflen.saturating_sub(offset));
        let mut skip = offset;
        let mut copied = 0;
        for seg in self.segments() {
            if copied == want {
                break;
            }
            if skip >= seg.len() {
                skip -= seg.len();
                continue;
            }
            let n = (seg.len() - skip).min(want - copied);
            dst[copied..copied + n].copy_from_slice(&seg[skip..skip + n]);
            copied += n;
            skip = 0;
        }
        copied
    }

    /// Fetch `N` bytes at `offset`, directly from the head when possible.
    #[inline]
    pub(crate) fn fetch<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let end = offset.checked_add(N)?;
        if end > self.buflen {
            return None;
        }
        let mut out = [0u8; N];
        match self.head.get(offset..end) {
            Some(bytes) => out.copy_from_slice(bytes),
            None => {
                if self.copy_to(offset, &mut out) != N {
                    return None;
                }
            }
        }
        Some(out)
    }
}
