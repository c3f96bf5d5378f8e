use std::sync::Mutex;

use rand::seq::SliceRandom;

use super::IdentityPool;

/// Referer 池：取值时随机挑一个，不会移除。
#[derive(Debug, Default)]
pub struct RefererPool {
    referers: Mutex<Vec<String>>,
}

impl RefererPool {
    pub fn new<I, S>(referers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            referers: Mutex::new(
                referers
                    .into_iter()
                    .map(Into::into)
                    .filter(|r: &String| !r.trim().is_empty())
                    .collect(),
            ),
        }
    }
}

impl IdentityPool for RefererPool {
    type Item = String;

    fn get(&self) -> Option<String> {
        let referers = self.referers.lock().unwrap_or_else(|e| e.into_inner());
        referers.choose(&mut rand::thread_rng()).cloned()
    }

    fn add(&self, item: String) {
        if item.trim().is_empty() {
            return;
        }
        self.referers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(item);
    }

    fn len(&self) -> usize {
        self.referers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_does_not_consume() {
        let pool = RefererPool::new(["https://a.example/", ""]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get().as_deref(), Some("https://a.example/"));
        assert_eq!(pool.get().as_deref(), Some("https://a.example/"));
    }

    #[test]
    fn empty_pool_returns_none() {
        let pool = RefererPool::default();
        assert!(pool.get().is_none());
        pool.add("https://b.example/".into());
        assert_eq!(pool.len(), 1);
    }
}
