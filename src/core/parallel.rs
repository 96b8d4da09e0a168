//! Bounded fan-out for independent network units
//!
//! Metadata fetches, quality reads and window reads are independent per item.
//! They run on a dedicated pool of `workers` threads so the archive never sees
//! more concurrent requests than configured. Results come back in input order.

/// Map `f` over `items` with at most `workers` concurrent calls
#[cfg(feature = "parallel")]
pub fn map_bounded<T, R, F>(workers: usize, items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    use rayon::prelude::*;

    if workers <= 1 || items.len() <= 1 {
        return items.iter().map(f).collect();
    }
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| items.par_iter().map(&f).collect()),
        Err(e) => {
            log::warn!("Could not start {} workers ({}); running sequentially", workers, e);
            items.iter().map(f).collect()
        }
    }
}

#[cfg(not(feature = "parallel"))]
pub fn map_bounded<T, R, F>(_workers: usize, items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    items.iter().map(f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_preserved() {
        let items: Vec<u32> = (0..100).collect();
        let out = map_bounded(4, &items, |x| x * 2);
        assert_eq!(out, items.iter().map(|x| x * 2).collect::<Vec<_>>());
    }
}
