use std::collections::HashMap;

use tokio::time::{Duration, Instant};
use tracing::warn;

/// A petition or proposal together with its bookkeeping.
#[derive(Debug, Clone)]
pub struct Tracked<P, R> {
    pub item: P,
    pub started: Instant,
    pub deadline: Instant,
    pub rounds: u32,
    /// Set exactly once, when the item reaches a terminal status.
    pub result: Option<R>,
}

impl<P, R> Tracked<P, R> {
    pub fn new(item: P, timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            item,
            started,
            deadline: started + timeout,
            rounds: 1,
            result: None,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn is_settled(&self) -> bool {
        self.result.is_some()
    }
}

/// In-memory store of everything an engine has been asked to decide.
#[derive(Debug, Clone)]
pub struct PetitionPool<P, R> {
    entries: HashMap<String, Tracked<P, R>>,
}

impl<P, R> Default for PetitionPool<P, R> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<P, R> PetitionPool<P, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. An existing entry with the same id is kept.
    pub fn add(&mut self, id: String, entry: Tracked<P, R>) -> bool {
        if self.entries.contains_key(&id) {
            warn!("petition {} already in pool", id);
            return false;
        }
        self.entries.insert(id, entry);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<Tracked<P, R>> {
        self.entries.remove(id)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Tracked<P, R>> {
        self.entries.get(id)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Tracked<P, R>> {
        self.entries.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Ids of entries without a result yet.
    pub fn unsettled_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.is_settled())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Tracked<P, R>)> {
        self.entries.iter_mut()
    }

    pub fn items(&self) -> impl Iterator<Item = &P> {
        self.entries.values().map(|e| &e.item)
    }

    pub fn results(&self) -> impl Iterator<Item = &R> {
        self.entries.values().filter_map(|e| e.result.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pool_keeps_first_entry_and_tracks_settlement() {
        let mut pool: PetitionPool<&str, bool> = PetitionPool::new();
        assert!(pool.add("p1".into(), Tracked::new("first", Duration::from_secs(1))));
        assert!(!pool.add("p1".into(), Tracked::new("second", Duration::from_secs(1))));
        assert_eq!(pool.find_by_id("p1").unwrap().item, "first");

        assert_eq!(pool.unsettled_ids(), vec!["p1".to_string()]);
        pool.find_by_id_mut("p1").unwrap().result = Some(true);
        assert!(pool.unsettled_ids().is_empty());
        assert_eq!(pool.results().count(), 1);

        assert!(pool.remove("p1").is_some());
        assert!(pool.is_empty());
    }
}
