use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

const TICK_CYCLE: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug)]
pub enum CounterType {
    Counted,
    Gauged,
}

#[derive(Clone, Copy, Debug)]
pub enum CounterValue {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl fmt::Display for CounterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterValue::Signed(v) => write!(f, "{}", v),
            CounterValue::Unsigned(v) => write!(f, "{}", v),
            CounterValue::Float(v) => write!(f, "{}", v),
        }
    }
}

pub type Counter = (&'static str, CounterType, CounterValue);

pub trait RefCountable: Send + Sync {
    fn get_counters(&self) -> Vec<Counter>;
}

pub trait OwnedCountable: Send + Sync {
    fn get_counters(&self) -> Vec<Counter>;
    fn closed(&self) -> bool;
}

pub enum Countable {
    Owned(Box<dyn OwnedCountable>),
    Ref(Weak<dyn RefCountable>),
}

impl Countable {
    fn get_counters(&self) -> Vec<Counter> {
        match self {
            Countable::Owned(c) => c.get_counters(),
            Countable::Ref(c) => c.upgrade().map(|c| c.get_counters()).unwrap_or_default(),
        }
    }

    fn closed(&self) -> bool {
        match self {
            Countable::Owned(c) => c.closed(),
            Countable::Ref(c) => c.strong_count() == 0,
        }
    }
}

pub enum StatsOption {
    Tag(&'static str, String),
}

struct Source {
    module: &'static str,
    countable: Countable,
    tags: Vec<(&'static str, String)>,
}

impl PartialEq for Source {
    fn eq(&self, other: &Source) -> bool {
        self.module == other.module && self.tags == other.tags
    }
}

impl Eq for Source {}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:?}", self.module, self.tags)
    }
}

// Periodically gathers counters from registered modules and reports them
// through the logger. Sources whose countable has closed are retired on
// the next tick.
pub struct Collector {
    sources: Arc<Mutex<Vec<Source>>>,
    interval: Duration,
    running: Arc<(Mutex<bool>, Condvar)>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Collector {
    pub fn new(interval: Duration) -> Self {
        let interval = if interval < TICK_CYCLE {
            TICK_CYCLE
        } else {
            interval
        };
        Self {
            sources: Arc::new(Mutex::new(vec![])),
            interval,
            running: Arc::new((Mutex::new(false), Condvar::new())),
            thread: Mutex::new(None),
        }
    }

    pub fn register_countable(
        &self,
        module: &'static str,
        countable: Countable,
        options: Vec<StatsOption>,
    ) {
        let mut source = Source {
            module,
            countable,
            tags: vec![],
        };
        for option in options {
            match option {
                StatsOption::Tag(k, v) if !source.tags.iter().any(|(key, _)| key == &k) => {
                    source.tags.push((k, v))
                }
                _ => warn!("ignored duplicated tag for module {}", source.module),
            }
        }
        let mut sources = self.sources.lock().unwrap();
        sources.retain(|s| {
            let closed = s.countable.closed();
            let equals = s == &source;
            if !closed && equals {
                warn!(
                    "possible memory leak! countable {} is not correctly closed",
                    source
                );
            }
            !closed && !equals
        });
        sources.push(source);
    }

    pub fn start(&self) {
        {
            let (started, _) = &*self.running;
            let mut started = started.lock().unwrap();
            if *started {
                return;
            }
            *started = true;
        }

        let running = self.running.clone();
        let sources = self.sources.clone();
        let interval = self.interval;
        *self.thread.lock().unwrap() = Some(thread::spawn(move || loop {
            {
                let mut sources = sources.lock().unwrap();
                sources.retain(|s| !s.countable.closed());
                for source in sources.iter() {
                    let points = source.countable.get_counters();
                    if points.is_empty() {
                        continue;
                    }
                    let fields = points
                        .iter()
                        .map(|(name, _, value)| format!("{}={}", name, value))
                        .collect::<Vec<_>>()
                        .join(" ");
                    debug!("counters {}: {}", source, fields);
                }
            }

            let (running, timer) = &*running;
            let mut running = running.lock().unwrap();
            if !*running {
                break;
            }
            running = timer.wait_timeout(running, interval).unwrap().0;
            if !*running {
                break;
            }
        }));
    }

    pub fn stop(&self) {
        {
            let (running, timer) = &*self.running;
            let mut running = running.lock().unwrap();
            if !*running {
                return;
            }
            *running = false;
            timer.notify_one();
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
