//! 进程内有界 Cookie 池：新值追加在尾部，取值从尾部弹出（后进先出），满了丢最旧的。

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{CookieValue, IdentityPool};

pub const DEFAULT_COOKIE_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct CookiePool {
    cookies: Mutex<VecDeque<CookieValue>>,
    capacity: usize,
}

impl Default for CookiePool {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_COOKIE_CAPACITY)
    }
}

impl CookiePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            cookies: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<CookieValue>> {
        self.cookies.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl IdentityPool for CookiePool {
    type Item = CookieValue;

    fn get(&self) -> Option<CookieValue> {
        self.lock().pop_back()
    }

    fn add(&self, item: CookieValue) {
        let mut cookies = self.lock();
        while cookies.len() >= self.capacity {
            cookies.pop_front();
        }
        cookies.push_back(item);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_most_recent_first() {
        let pool = CookiePool::new();
        pool.add("a=1".into());
        pool.add("b=2".into());
        assert_eq!(pool.get(), Some(CookieValue::from("b=2")));
        assert_eq!(pool.get(), Some(CookieValue::from("a=1")));
        assert_eq!(pool.get(), None);
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let pool = CookiePool::with_capacity(3);
        for i in 0..4 {
            pool.add(format!("c={i}").into());
        }
        assert_eq!(pool.len(), 3);
        let mut drained = Vec::new();
        while let Some(c) = pool.get() {
            drained.push(c.to_header_string());
        }
        assert_eq!(drained, vec!["c=3", "c=2", "c=1"]);
    }

    #[test]
    fn close_is_noop() {
        let pool = CookiePool::default();
        assert!(pool.close().is_ok());
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), DEFAULT_COOKIE_CAPACITY);
    }
}
