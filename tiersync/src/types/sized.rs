/// Reports an approximate in-memory size in bytes.
pub trait SizeHint {
    fn size_hint(&self) -> usize;
}

impl<T> SizeHint for [T]
where
    T: SizeHint,
{
    fn size_hint(&self) -> usize {
        self.iter()
            .fold(0usize, |total, item| total.saturating_add(item.size_hint()))
    }
}

impl<T> SizeHint for Vec<T>
where
    T: SizeHint,
{
    fn size_hint(&self) -> usize {
        self.as_slice().size_hint()
    }
}
