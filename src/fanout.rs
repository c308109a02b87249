//! Fan-in of per-server async results
//!
//! Fan-out operations issue one call per active server and need all the
//! outcomes back, each independently inspectable. These combinators complete
//! only once every input completes - an individual failure is just a value
//! in the output, never a short-circuit.

use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

/// Drive all futures to completion, preserving input order
pub async fn join_ordered<I, F, T>(futures: I) -> Vec<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T>,
{
    join_all(futures).await
}

/// Drive all named futures to completion, yielding a map from each name to
/// its individual result
pub async fn join_keyed<K, F, T>(pairs: Vec<(K, F)>) -> HashMap<K, T>
where
    K: Eq + Hash,
    F: Future<Output = T>,
{
    let (keys, futures): (Vec<K>, Vec<F>) = pairs.into_iter().unzip();
    keys.into_iter().zip(join_all(futures).await).collect()
}
