//! Route selection strategies
//!
//! A [`Selector`] takes the addresses a lookup produced and returns a
//! [`Next`] closure the caller invokes once per attempt. Each `select`
//! call gets its own closure with its own state, so independent request
//! sequences never share a counter.

use rand::Rng;

use crate::error::{Error, Result};

/// Yields one address per call
pub type Next = Box<dyn FnMut() -> String + Send>;

/// Picks addresses from a pool
pub trait Selector: Send + Sync {
    /// Short strategy name, e.g. `"random"`
    fn name(&self) -> &'static str;

    /// Build a [`Next`] over `addresses`
    ///
    /// Fails `NoneAvailable` on an empty pool; otherwise every call of
    /// the returned closure yields a member of the pool.
    fn select(&self, addresses: &[String]) -> Result<Next>;
}

/// Uniform random selection over the whole pool
pub struct Random;

impl Selector for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&self, addresses: &[String]) -> Result<Next> {
        if addresses.is_empty() {
            return Err(Error::none_available("no addresses to select from"));
        }
        let pool = addresses.to_vec();
        Ok(Box::new(move || {
            if pool.len() == 1 {
                return pool[0].clone();
            }
            let i = rand::thread_rng().gen_range(0..pool.len());
            pool[i].clone()
        }))
    }
}

/// Rotating selection; the counter lives in the closure
pub struct RoundRobin;

impl Selector for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, addresses: &[String]) -> Result<Next> {
        if addresses.is_empty() {
            return Err(Error::none_available("no addresses to select from"));
        }
        let pool = addresses.to_vec();
        let mut i = 0usize;
        Ok(Box::new(move || {
            let address = pool[i % pool.len()].clone();
            i = i.wrapping_add(1);
            address
        }))
    }
}
