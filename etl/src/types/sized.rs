/// Approximate number of bytes a buffered value occupies.
///
/// Upload buffers add up the hints of their records and flush a block once the total reaches the
/// configured buffer size.
pub trait SizeHint {
    fn size_hint(&self) -> usize;
}
