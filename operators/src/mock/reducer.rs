//! A `Reducer` double that counts invocations, for proving `reduce_dimension`
//! calls the reducer exactly once per request rather than once per image
//! (spec.md §5's single-invocation contract).

use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::ArrayD;

use crate::error::Error;
use crate::processing::Reducer;

/// Wraps an inner reducer and counts how many times `reduce` actually ran.
pub struct MockReducer<R: Reducer> {
    inner: R,
    calls: AtomicUsize,
}

impl<R: Reducer> MockReducer<R> {
    pub fn new(inner: R) -> Self {
        MockReducer {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<R: Reducer> Reducer for MockReducer<R> {
    fn process_id(&self) -> Option<&str> {
        self.inner.process_id()
    }

    fn reduce(&self, data: ArrayD<f64>, mask: ArrayD<bool>) -> Result<(ArrayD<f64>, ArrayD<bool>), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.reduce(data, mask)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;

    use super::*;
    use crate::processing::BuiltinReducer;

    #[test]
    fn counts_reduce_invocations() {
        let reducer = MockReducer::new(BuiltinReducer::Mean);
        let data = ArrayD::<f64>::zeros(IxDyn(&[2, 1, 1]));
        let mask = ArrayD::<bool>::from_elem(IxDyn(&[2, 1, 1]), false);
        reducer.reduce(data, mask).unwrap();
        assert_eq!(reducer.call_count(), 1);
    }
}
