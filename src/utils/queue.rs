use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Condvar, Mutex,
};
use std::time::{Duration, Instant};

use crate::utils::stats::{Counter, CounterType, CounterValue, RefCountable};

#[derive(Debug, PartialEq)]
pub enum Error<T> {
    Timeout,
    Terminated(Option<T>),
}

#[derive(Debug, Default)]
pub struct QueueCounter {
    pub input: AtomicU64,
    pub output: AtomicU64,
    pub overwritten: AtomicU64,
}

impl RefCountable for QueueCounter {
    fn get_counters(&self) -> Vec<Counter> {
        vec![
            (
                "in",
                CounterType::Counted,
                CounterValue::Unsigned(self.input.swap(0, Ordering::Relaxed)),
            ),
            (
                "out",
                CounterType::Counted,
                CounterValue::Unsigned(self.output.swap(0, Ordering::Relaxed)),
            ),
            (
                "overwritten",
                CounterType::Counted,
                CounterValue::Unsigned(self.overwritten.swap(0, Ordering::Relaxed)),
            ),
        ]
    }
}

struct State<T> {
    buffer: VecDeque<T>,
    terminated: bool,
}

struct Shared<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    notify: Condvar,
    senders: AtomicUsize,
    counter: Arc<QueueCounter>,
}

impl<T> Shared<T> {
    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.terminated = true;
        self.notify.notify_all();
    }
}

// Fixed size MPSC queue. A send to a full queue overwrites the oldest
// element rather than blocking the producer.
pub fn bounded<T>(size: usize) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        capacity: size.next_power_of_two(),
        state: Mutex::new(State {
            buffer: VecDeque::with_capacity(size.next_power_of_two()),
            terminated: false,
        }),
        notify: Condvar::new(),
        senders: AtomicUsize::new(1),
        counter: Arc::new(QueueCounter::default()),
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    pub fn send(&self, msg: T) -> Result<(), Error<T>> {
        let mut state = self.shared.state.lock().unwrap();
        if state.terminated {
            return Err(Error::Terminated(Some(msg)));
        }
        if state.buffer.len() == self.shared.capacity {
            state.buffer.pop_front();
            self.shared
                .counter
                .overwritten
                .fetch_add(1, Ordering::Relaxed);
        }
        state.buffer.push_back(msg);
        self.shared.counter.input.fetch_add(1, Ordering::Relaxed);
        self.shared.notify.notify_one();
        Ok(())
    }

    pub fn terminated(&self) -> bool {
        self.shared.state.lock().unwrap().terminated
    }

    pub fn close(&self) {
        self.shared.close();
    }

    pub fn counter(&self) -> Arc<QueueCounter> {
        self.shared.counter.clone()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::Relaxed);
        Sender {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.close();
        }
    }
}

pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    // Remaining elements are drained before a closed queue reports
    // Terminated, so no queued message is lost on shutdown.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<T, Error<T>> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(msg) = state.buffer.pop_front() {
                self.shared.counter.output.fetch_add(1, Ordering::Relaxed);
                return Ok(msg);
            }
            if state.terminated {
                return Err(Error::Terminated(None));
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    let (guard, result) = self
                        .shared
                        .notify
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    if result.timed_out() && guard.buffer.is_empty() && !guard.terminated {
                        return Err(Error::Timeout);
                    }
                    guard
                }
                None => self.shared.notify.wait(state).unwrap(),
            };
        }
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counter(&self) -> Arc<QueueCounter> {
        self.shared.counter.clone()
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.close();
    }
}
