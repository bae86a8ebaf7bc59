//! Page - a page-sized byte buffer.

/// Bytes of one page, sized by the owning file's page size.
///
/// Copies in and out are clamped to the page, so a caller slicing a
/// request into page segments never has to bounds-check twice.
///
/// # Example
/// ```
/// use pagevault::storage::page::Page;
///
/// let mut page = Page::new(1024);
/// assert_eq!(page.write_from(1020, b"overflow"), 4);
///
/// let mut out = [0u8; 4];
/// page.read_into(1020, &mut out);
/// assert_eq!(&out, b"over");
/// ```
pub struct Page {
    bytes: Box<[u8]>,
}

impl Page {
    /// A zeroed page of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Copy bytes starting at `offset` into `dst`; returns how many fit.
    pub fn read_into(&self, offset: usize, dst: &mut [u8]) -> usize {
        let src = self.bytes.get(offset..).unwrap_or_default();
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        n
    }

    /// Copy `src` into the page at `offset`; returns how many bytes fit.
    pub fn write_from(&mut self, offset: usize, src: &[u8]) -> usize {
        let dst = self.bytes.get_mut(offset..).unwrap_or_default();
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        n
    }

    /// Zero everything from `offset` to the end of the page.
    pub fn zero_from(&mut self, offset: usize) {
        if let Some(tail) = self.bytes.get_mut(offset..) {
            tail.fill(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_page_is_zeroed() {
        let page = Page::new(512);
        assert_eq!(page.len(), 512);
        assert!(page.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_copies_clamp_to_page() {
        let mut page = Page::new(16);
        assert_eq!(page.write_from(10, &[7u8; 10]), 6);
        assert_eq!(page.write_from(16, &[1]), 0);
        assert_eq!(page.write_from(40, &[1]), 0);

        let mut out = [0u8; 10];
        assert_eq!(page.read_into(12, &mut out), 4);
        assert_eq!(&out[..4], &[7, 7, 7, 7]);
        assert_eq!(page.read_into(99, &mut out), 0);
    }

    #[test]
    fn test_zero_from() {
        let mut page = Page::new(8);
        page.as_mut_slice().fill(0xEE);
        page.zero_from(5);
        assert_eq!(page.as_slice(), &[0xEE, 0xEE, 0xEE, 0xEE, 0xEE, 0, 0, 0]);
        page.zero_from(100);
    }
}
