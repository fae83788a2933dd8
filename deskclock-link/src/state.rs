use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Stop flag every worker watches; flipping it is final
#[derive(Debug)]
pub struct Shutdown {
    flag: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self { flag }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.flag.subscribe()
    }

    pub fn trigger(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
