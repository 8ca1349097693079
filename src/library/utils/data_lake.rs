use std::io::{self, Read};

/// Fixed-capacity byte lake. Bytes are appended at `pos` and never wrap:
/// once the lake is full it stays full.
#[derive(Clone)]
pub struct DataLake<const N: usize> {
    pub(super) buf: [u8; N],
    pub(super) pos: usize,
}

impl<const N: usize> DataLake<N> {
    #[inline(always)]
    pub const fn build() -> Self {
        Self {
            buf: [0u8; N],
            pos: 0,
        }
    }
    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.pos]
    }
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        N - self.pos
    }
    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.pos == N
    }
    /// Copies as much of `src` as fits and returns the number of bytes taken.
    #[cfg(test)]
    pub fn write(&mut self, src: &[u8]) -> usize {
        let len = src.len().min(self.remaining());
        self.buf[self.pos..self.pos + len].copy_from_slice(&src[..len]);
        self.pos += len;
        len
    }
    /// One `read` call straight into the unused tail of the lake.
    /// A full lake reads nothing and reports `Ok(0)` without touching `reader`.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        if self.is_full() {
            return Ok(0);
        }
        let read = reader.read(&mut self.buf[self.pos..])?;
        self.pos += read;
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_is_bounded_by_capacity() {
        let mut lake = DataLake::<8>::build();
        assert_eq!(lake.write(b"hello"), 5);
        assert_eq!(lake.write(b"world"), 3);
        assert!(lake.is_full());
        assert_eq!(lake.as_slice(), b"hellowor");
        assert_eq!(lake.write(b"!"), 0);
    }

    #[test]
    fn fill_from_appends_and_stops_when_full() {
        let mut lake = DataLake::<4>::build();
        let mut src: &[u8] = b"abcdef";
        assert_eq!(lake.fill_from(&mut src).unwrap(), 4);
        assert_eq!(lake.fill_from(&mut src).unwrap(), 0);
        assert_eq!(lake.as_slice(), b"abcd");
        assert_eq!(src, b"ef");
    }
}
