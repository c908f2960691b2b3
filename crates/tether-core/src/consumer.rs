#![forbid(unsafe_code)]

//! Independently owned value sinks.
//!
//! # Design
//!
//! A [`Consumer<T>`] owns a callback. Chains never hold it strongly: they
//! deliver through an [`Output<T>`] proxy that holds a `Weak` reference, so
//! a consumer can be dropped at any time and the chain quietly stops reaching
//! it. The proxy is created once per consumer and shared by every chain that
//! receives into it.
//!
//! [`Receivers`] adapts one consumer, a list of consumers (each receives the
//! whole value), a pair of consumers (each receives one tuple field) or an
//! array of consumers (each receives one element) into a single delivery
//! function for [`Builder::receive`](crate::Builder::receive).

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

struct ConsumerInner<T> {
    callback: Box<dyn Fn(T) + Send + Sync>,
    output: OnceLock<Output<T>>,
}

/// A callback with its own lifetime.
///
/// Cloning a `Consumer` creates another handle to the **same** callback.
pub struct Consumer<T> {
    inner: Arc<ConsumerInner<T>>,
}

impl<T> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("output_bound", &self.inner.output.get().is_some())
            .finish_non_exhaustive()
    }
}

impl<T: 'static> Consumer<T> {
    #[must_use]
    pub fn new(callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                callback: Box::new(callback),
                output: OnceLock::new(),
            }),
        }
    }

    /// The delivery proxy for this consumer. Repeated calls return the same
    /// proxy.
    #[must_use]
    pub fn make_output(&self) -> Output<T> {
        self.inner
            .output
            .get_or_init(|| Output {
                target: Arc::new(Arc::downgrade(&self.inner)),
            })
            .clone()
    }
}

/// Single-direction, weakly bound delivery handle into a [`Consumer`].
pub struct Output<T> {
    target: Arc<Weak<ConsumerInner<T>>>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl<T> Output<T> {
    /// Hand `value` to the consumer, if it still exists.
    pub fn deliver(&self, value: T) {
        if let Some(consumer) = self.target.upgrade() {
            (consumer.callback)(value);
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Whether both handles are the same proxy.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.target, &other.target)
    }
}

/// Delivery function compiled from one or more consumers.
pub type Deliver<V> = Box<dyn Fn(V) + Send + Sync>;

/// Something a chain can deliver values of type `V` into.
pub trait Receivers<V> {
    /// Bind the outputs now and return the function that feeds them.
    fn bind(&self) -> Deliver<V>;
}

impl<V: 'static> Receivers<V> for Consumer<V> {
    fn bind(&self) -> Deliver<V> {
        let output = self.make_output();
        Box::new(move |value: V| output.deliver(value))
    }
}

impl<V: Clone + 'static> Receivers<V> for [Consumer<V>] {
    fn bind(&self) -> Deliver<V> {
        let outputs: Vec<Output<V>> = self.iter().map(Consumer::make_output).collect();
        Box::new(move |value: V| {
            for output in &outputs {
                output.deliver(value.clone());
            }
        })
    }
}

impl<V: Clone + 'static> Receivers<V> for Vec<Consumer<V>> {
    fn bind(&self) -> Deliver<V> {
        self.as_slice().bind()
    }
}

impl<A: 'static, B: 'static> Receivers<(A, B)> for (Consumer<A>, Consumer<B>) {
    fn bind(&self) -> Deliver<(A, B)> {
        let (first, second) = (self.0.make_output(), self.1.make_output());
        Box::new(move |(a, b): (A, B)| {
            first.deliver(a);
            second.deliver(b);
        })
    }
}

impl<V: 'static, const N: usize> Receivers<[V; N]> for [Consumer<V>; N] {
    fn bind(&self) -> Deliver<[V; N]> {
        let outputs: Vec<Output<V>> = self.iter().map(Consumer::make_output).collect();
        Box::new(move |values: [V; N]| {
            for (output, value) in outputs.iter().zip(values) {
                output.deliver(value);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn output_is_memoized() {
        let consumer = Consumer::new(|_: i32| {});
        let a = consumer.make_output();
        let b = consumer.make_output();
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn output_delivers_while_consumer_alive() {
        let total = Arc::new(AtomicI32::new(0));
        let t = Arc::clone(&total);
        let consumer = Consumer::new(move |v: i32| {
            t.fetch_add(v, Ordering::SeqCst);
        });
        let output = consumer.make_output();

        output.deliver(3);
        assert_eq!(total.load(Ordering::SeqCst), 3);

        drop(consumer);
        assert!(!output.is_alive());
        output.deliver(10);
        assert_eq!(total.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn clone_keeps_consumer_alive() {
        let consumer = Consumer::new(|_: ()| {});
        let output = consumer.make_output();
        let other = consumer.clone();
        drop(consumer);
        assert!(output.is_alive());
        drop(other);
        assert!(!output.is_alive());
    }

    #[test]
    fn list_receives_whole_value() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let consumers: Vec<_> = (0..3)
            .map(|i| {
                let log = Arc::clone(&log);
                Consumer::new(move |v: &'static str| log.lock().unwrap().push((i, v)))
            })
            .collect();

        consumers.bind()("hi");
        assert_eq!(*log.lock().unwrap(), vec![(0, "hi"), (1, "hi"), (2, "hi")]);
    }

    #[test]
    fn tuple_fields_are_split() {
        let left = Arc::new(AtomicI32::new(0));
        let right = Arc::new(Mutex::new(String::new()));
        let (l, r) = (Arc::clone(&left), Arc::clone(&right));
        let pair = (
            Consumer::new(move |v: i32| l.store(v, Ordering::SeqCst)),
            Consumer::new(move |v: String| *r.lock().unwrap() = v),
        );

        pair.bind()((4, "four".to_string()));
        assert_eq!(left.load(Ordering::SeqCst), 4);
        assert_eq!(*right.lock().unwrap(), "four");
    }

    #[test]
    fn array_elements_are_indexed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = |tag: char| {
            let log = Arc::clone(&log);
            Consumer::new(move |v: u8| log.lock().unwrap().push((tag, v)))
        };
        let consumers = [make('a'), make('b'), make('c')];

        consumers.bind()([1, 2, 3]);
        assert_eq!(*log.lock().unwrap(), vec![('a', 1), ('b', 2), ('c', 3)]);
    }
}
