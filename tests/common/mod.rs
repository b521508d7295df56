#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use ratecache::{AppState, clock::ManualClock, config::Config, store::MemoryStore};

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

/// App state over an in-process store and a hand-driven clock starting at 0.
pub fn harness(vars: &[(&str, &str)]) -> Harness {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config = Config::from_lookup(|name| vars.get(name).cloned()).expect("valid test config");

    let clock = ManualClock::new(0);
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let state = AppState::new(config, store.clone(), clock.clone());
    Harness { clock, store, state }
}
