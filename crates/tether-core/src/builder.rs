#![forbid(unsafe_code)]

//! Chain composition.
//!
//! # Design
//!
//! A [`Builder<M, In, Out>`] is "an endpoint, a slot in it, and a function
//! `In -> Out` not yet installed anywhere". Operators either fold more work
//! into that function ([`to`](Builder::to), [`tap`](Builder::tap)) or
//! install it into the slot as a stage that forwards to a freshly reserved
//! slot, returning a builder bound to the new slot ([`filter_map`],
//! [`guard`], [`normalize`], [`merge`], [`pair`], [`delay`], [`debounce`]).
//! [`end`](Builder::end) installs the final stage, seals the endpoint and
//! hands it to a [`Terminal`].
//!
//! Stages forward through a weak endpoint handle, so the stage table never
//! owns itself. Fan-in operators make the other builder's endpoint a
//! sub-endpoint of this one: it is pulled after this one and torn down with
//! it.
//!
//! Builders are consumed by every operator and cannot be cloned, so at most
//! one builder ever extends a given endpoint.
//!
//! [`filter_map`]: Builder::filter_map
//! [`guard`]: Builder::guard
//! [`normalize`]: Builder::normalize
//! [`merge`]: Builder::merge
//! [`pair`]: Builder::pair
//! [`delay`]: Builder::delay
//! [`debounce`]: Builder::debounce

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::consumer::Receivers;
use crate::endpoint::{Endpoint, EndpointId};
use crate::lock;
use crate::mode::{Mode, Syncable};
use crate::schedule::{Scheduler, TaskHandle};
use crate::terminal::Terminal;

type Accumulated<In, Out> = Box<dyn Fn(In) -> Out + Send + Sync>;

/// Payload of a [`pair`](Builder::pair): only the side that fired is set.
pub type Paired<A, B> = (Option<A>, Option<B>);

/// A chain under construction.
#[must_use = "a chain does nothing until it is terminated with `end`, `sink`, `receive` or `sync`"]
pub struct Builder<M, In, Out> {
    endpoint: Endpoint,
    slot: usize,
    func: Accumulated<In, Out>,
    _mode: PhantomData<fn() -> M>,
}

impl<M, In, Out> fmt::Debug for Builder<M, In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("endpoint", &self.endpoint)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

/// Install `stage` at `slot`.
///
/// # Panics
///
/// Panics if the endpoint was sealed underneath the builder.
#[track_caller]
fn install_stage<V: 'static>(endpoint: &Endpoint, slot: usize, stage: impl Fn(V) + Send + Sync + 'static) {
    if let Err(err) = endpoint.install::<V>(slot, Arc::new(stage)) {
        panic!("cannot extend chain: {err}");
    }
}

/// Stage body that delivers into `slot` of `target`, if it is still alive.
fn forward<V: 'static>(target: &Endpoint, slot: usize) -> impl Fn(V) + Send + Sync + 'static {
    let target = target.downgrade();
    move |value| {
        if let Some(endpoint) = target.upgrade() {
            endpoint.deliver_at(slot, value);
        }
    }
}

impl<M: Mode, T: Send + 'static> Builder<M, T, T> {
    /// Builder over a fresh endpoint, starting at slot 0.
    pub(crate) fn start(endpoint: Endpoint) -> Self {
        let slot = endpoint.reserve_slot();
        Self::at(endpoint, slot)
    }

    fn at(endpoint: Endpoint, slot: usize) -> Self {
        Self {
            endpoint,
            slot,
            func: Box::new(|value| value),
            _mode: PhantomData,
        }
    }
}

impl<M, In, Out> Builder<M, In, Out>
where
    M: Mode,
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Identity of the endpoint this builder extends.
    #[must_use]
    pub fn endpoint_id(&self) -> EndpointId {
        self.endpoint.id()
    }

    /// Apply `f` after the accumulated function.
    pub fn to<Next: Send + 'static>(
        self,
        f: impl Fn(Out) -> Next + Send + Sync + 'static,
    ) -> Builder<M, In, Next> {
        let func = self.func;
        Builder {
            endpoint: self.endpoint,
            slot: self.slot,
            func: Box::new(move |value| f(func(value))),
            _mode: PhantomData,
        }
    }

    /// Observe each value without changing it.
    pub fn tap(self, f: impl Fn(&Out) + Send + Sync + 'static) -> Self {
        let func = self.func;
        Builder {
            endpoint: self.endpoint,
            slot: self.slot,
            func: Box::new(move |value| {
                let out = func(value);
                f(&out);
                out
            }),
            _mode: PhantomData,
        }
    }

    /// Install the accumulated function as a stage that forwards only the
    /// `Some` results of `f`.
    pub fn filter_map<Next: Send + 'static>(
        self,
        f: impl Fn(Out) -> Option<Next> + Send + Sync + 'static,
    ) -> Builder<M, Next, Next> {
        let next = self.endpoint.reserve_slot();
        let onward = forward::<Next>(&self.endpoint, next);
        let func = self.func;
        install_stage(&self.endpoint, self.slot, move |value: In| {
            if let Some(out) = f(func(value)) {
                onward(out);
            }
        });
        Builder::at(self.endpoint, next)
    }

    /// Drop values for which `predicate` is false.
    pub fn guard(
        self,
        predicate: impl Fn(&Out) -> bool + Send + Sync + 'static,
    ) -> Builder<M, Out, Out> {
        self.filter_map(move |value| predicate(&value).then_some(value))
    }

    /// Commit the accumulated function as its own stage.
    pub fn normalize(self) -> Builder<M, Out, Out> {
        self.filter_map(Some)
    }

    /// Install both builders' functions as stages feeding one shared stage,
    /// wrapping each side's output on the way in.
    fn fuse<M2, In2, Sub, J>(
        self,
        other: Builder<M2, In2, Sub>,
        wrap_self: impl Fn(Out) -> J + Send + Sync + 'static,
        wrap_other: impl Fn(Sub) -> J + Send + Sync + 'static,
    ) -> Builder<M, J, J>
    where
        M2: Mode,
        In2: Send + 'static,
        Sub: Send + 'static,
        J: Send + 'static,
    {
        let shared = self.endpoint.reserve_slot();

        let Builder {
            endpoint: other_endpoint,
            slot: other_slot,
            func: other_func,
            ..
        } = other;
        let onward = forward::<J>(&self.endpoint, shared);
        install_stage(&other_endpoint, other_slot, move |value: In2| {
            onward(wrap_other(other_func(value)));
        });
        self.endpoint.add_sub_endpoint(other_endpoint);

        let onward = forward::<J>(&self.endpoint, shared);
        let func = self.func;
        install_stage(&self.endpoint, self.slot, move |value: In| {
            onward(wrap_self(func(value)));
        });
        Builder::at(self.endpoint, shared)
    }

    /// Fan-in of two chains carrying the same type.
    pub fn merge<M2, In2>(self, other: Builder<M2, In2, Out>) -> Builder<M, Out, Out>
    where
        M2: Mode,
        In2: Send + 'static,
    {
        self.fuse(other, |value| value, |value| value)
    }

    /// Fan-in of two chains of different types. Each delivery carries the
    /// side that fired and `None` for the other.
    pub fn pair<M2, In2, Sub>(
        self,
        other: Builder<M2, In2, Sub>,
    ) -> Builder<M, Paired<Out, Sub>, Paired<Out, Sub>>
    where
        M2: Mode,
        In2: Send + 'static,
        Sub: Send + 'static,
    {
        self.fuse(other, |a| (Some(a), None), |b| (None, Some(b)))
    }

    /// Latest value of both sides, once both have fired at least once.
    pub fn combine<M2, In2, Sub>(self, other: Builder<M2, In2, Sub>) -> Builder<M, (Out, Sub), (Out, Sub)>
    where
        M2: Mode,
        In2: Send + 'static,
        Out: Clone,
        Sub: Clone + Send + 'static,
    {
        let latest: Mutex<Paired<Out, Sub>> = Mutex::new((None, None));
        self.pair(other)
            .to(move |(a, b)| {
                let mut latest = lock(&latest);
                if let Some(a) = a {
                    latest.0 = Some(a);
                }
                if let Some(b) = b {
                    latest.1 = Some(b);
                }
                latest.clone()
            })
            .filter_map(|(a, b)| a.zip(b))
    }

    /// Deliver each value `after` the given delay, through `scheduler`.
    pub fn delay(self, after: Duration, scheduler: Arc<dyn Scheduler>) -> Builder<M, Out, Out> {
        let next = self.endpoint.reserve_slot();
        let target = self.endpoint.downgrade();
        let func = self.func;
        install_stage(&self.endpoint, self.slot, move |value: In| {
            let mut pending = Some(func(value));
            let target = target.clone();
            scheduler.schedule(
                after,
                false,
                Box::new(move || {
                    if let (Some(value), Some(endpoint)) = (pending.take(), target.upgrade()) {
                        endpoint.deliver_at(next, value);
                    }
                }),
            );
        });
        Builder::at(self.endpoint, next)
    }

    /// Deliver only the latest value once `quiet` has passed without a newer
    /// one.
    pub fn debounce(self, quiet: Duration, scheduler: Arc<dyn Scheduler>) -> Builder<M, Out, Out> {
        let next = self.endpoint.reserve_slot();
        let target = self.endpoint.downgrade();
        let state = Arc::new(Mutex::new(Debounce::<Out>::default()));
        let func = self.func;
        install_stage(&self.endpoint, self.slot, move |value: In| {
            let out = func(value);
            let mut pending = lock(&state);
            pending.generation += 1;
            pending.value = Some(out);
            if let Some(task) = pending.task.take() {
                scheduler.cancel(task);
            }

            let generation = pending.generation;
            let state = Arc::clone(&state);
            let target = target.clone();
            let task = scheduler.schedule(
                quiet,
                false,
                Box::new(move || {
                    let value = {
                        let mut pending = lock(&state);
                        if pending.generation != generation {
                            return;
                        }
                        pending.task = None;
                        pending.value.take()
                    };
                    if let (Some(value), Some(endpoint)) = (value, target.upgrade()) {
                        endpoint.deliver_at(next, value);
                    }
                }),
            );
            pending.task = Some(task);
        });
        Builder::at(self.endpoint, next)
    }

    /// Install the accumulated function as the final stage and hand the chain
    /// to a [`Terminal`].
    pub fn end(self) -> Terminal<M> {
        let func = self.func;
        install_stage(&self.endpoint, self.slot, move |value: In| {
            func(value);
        });
        Terminal::seal(self.endpoint)
    }

    /// Finish the chain with `f` as the terminal callback.
    pub fn sink(self, f: impl Fn(Out) + Send + Sync + 'static) -> Terminal<M> {
        self.to(f).end()
    }

    /// Finish the chain by delivering into `receivers` through their output
    /// proxies. The chain never keeps a consumer alive.
    pub fn receive<R>(self, receivers: &R) -> Terminal<M>
    where
        R: Receivers<Out> + ?Sized,
    {
        let deliver = receivers.bind();
        self.sink(move |value| deliver(value))
    }
}

impl<In, Out> Builder<Syncable, In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// [`end`](Self::end) the chain and pull the current value through it
    /// right away.
    pub fn sync(self) -> Terminal<Syncable> {
        let terminal = self.end();
        terminal.sync();
        terminal
    }
}

struct Debounce<T> {
    generation: u64,
    value: Option<T>,
    task: Option<TaskHandle>,
}

impl<T> Default for Debounce<T> {
    fn default() -> Self {
        Self {
            generation: 0,
            value: None,
            task: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::Consumer;
    use crate::producer::{ManualProducer, StatefulProducer};
    use crate::schedule::ManualScheduler;

    fn log<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, move |v| sink.lock().unwrap().push(v))
    }

    #[test]
    fn to_composes_without_new_stage() {
        let producer = ManualProducer::new();
        let (seen, sink) = log();
        let chain = producer
            .begin()
            .to(|v: i32| v + 1)
            .to(|v| v * 10)
            .to(|v| format!("<{v}>"))
            .sink(sink);

        producer.notify(1);
        assert_eq!(*seen.lock().unwrap(), vec!["<20>".to_string()]);
        assert_eq!(chain.endpoint().stage_count(), 1);
    }

    #[test]
    fn guard_drops_rejected_values() {
        let producer = ManualProducer::new();
        let (seen, sink) = log();
        let _chain = producer.begin().guard(|v: &i32| v % 2 == 0).sink(sink);

        for v in 0..6 {
            producer.notify(v);
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 2, 4]);
    }

    #[test]
    fn guard_sees_accumulated_output() {
        let producer = ManualProducer::new();
        let (seen, sink) = log();
        let _chain = producer
            .begin()
            .to(|s: &'static str| s.len())
            .guard(|len| *len > 2)
            .to(|len| len * 2)
            .sink(sink);

        producer.notify("ab");
        producer.notify("abcd");
        assert_eq!(*seen.lock().unwrap(), vec![8]);
    }

    #[test]
    fn normalize_commits_a_stage() {
        let producer = ManualProducer::new();
        let (seen, sink) = log();
        let chain = producer
            .begin()
            .to(|v: u8| u16::from(v) + 1)
            .normalize()
            .to(|v| v * 2)
            .sink(sink);

        producer.notify(4);
        assert_eq!(*seen.lock().unwrap(), vec![10]);
        assert_eq!(chain.endpoint().stage_count(), 2);
    }

    #[test]
    fn filter_map_converts_and_filters() {
        let producer = ManualProducer::new();
        let (seen, sink) = log();
        let _chain = producer
            .begin()
            .filter_map(|s: &'static str| s.parse::<i32>().ok())
            .sink(sink);

        producer.notify("12");
        producer.notify("x");
        producer.notify("-3");
        assert_eq!(*seen.lock().unwrap(), vec![12, -3]);
    }

    #[test]
    fn merge_delivers_both_sides() {
        let left = ManualProducer::new();
        let right = ManualProducer::new();
        let (seen, sink) = log();
        let chain = left
            .begin()
            .to(|v: i32| v * 10)
            .merge(right.begin().to(|s: &'static str| s.len() as i32))
            .sink(sink);

        left.notify(1);
        right.notify("abc");
        left.notify(2);
        assert_eq!(*seen.lock().unwrap(), vec![10, 3, 20]);
        assert_eq!(chain.endpoint().sub_endpoint_count(), 1);
    }

    #[test]
    fn merge_teardown_unregisters_both_producers() {
        let left = ManualProducer::<i32>::new();
        let right = ManualProducer::<i32>::new();
        let chain = left.begin().merge(right.begin()).end();
        assert_eq!(left.endpoint_count(), 1);
        assert_eq!(right.endpoint_count(), 1);

        drop(chain);
        assert_eq!(left.endpoint_count(), 0);
        assert_eq!(right.endpoint_count(), 0);
    }

    #[test]
    fn pair_marks_the_firing_side() {
        let numbers = ManualProducer::new();
        let words = ManualProducer::new();
        let (seen, sink) = log();
        let _chain = numbers
            .begin()
            .pair(words.begin().to(|s: &'static str| s.to_uppercase()))
            .sink(sink);

        numbers.notify(1u8);
        words.notify("hi");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Some(1), None), (None, Some("HI".to_string()))]
        );
    }

    #[test]
    fn combine_waits_for_both_sides() {
        let a = StatefulProducer::new(0);
        let b = StatefulProducer::new('-');
        let (seen, sink) = log();
        let _chain = a.begin().combine(b.begin()).sink(sink);

        a.set_value(1);
        a.set_value(2);
        assert!(seen.lock().unwrap().is_empty());

        b.set_value('x');
        a.set_value(3);
        b.set_value('y');
        assert_eq!(*seen.lock().unwrap(), vec![(2, 'x'), (3, 'x'), (3, 'y')]);
    }

    #[test]
    fn nested_merge_pulls_every_branch() {
        let a = StatefulProducer::new(1);
        let b = StatefulProducer::new(2);
        let c = StatefulProducer::new(3);
        let (seen, sink) = log();
        let chain = a.begin().merge(b.begin().merge(c.begin())).sink(sink);

        chain.sync();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn sync_on_merge_delivers_twice() {
        let primary = StatefulProducer::new(10);
        let secondary = StatefulProducer::new(20);
        let (seen, sink) = log();
        let _chain = primary.begin().merge(secondary.begin()).to(sink).sync();
        assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
    }

    #[test]
    fn receive_delivers_into_consumer() {
        let producer = ManualProducer::new();
        let (seen, sink) = log();
        let consumer = Consumer::new(sink);
        let _chain = producer.begin().to(|v: i32| -v).receive(&consumer);

        producer.notify(5);
        drop(consumer);
        producer.notify(6);
        assert_eq!(*seen.lock().unwrap(), vec![-5]);
    }

    #[test]
    fn receive_into_list_and_tuple() {
        let producer = ManualProducer::new();
        let (first, sink_a) = log();
        let (second, sink_b) = log();
        let list = vec![Consumer::new(sink_a), Consumer::new(sink_b)];
        let _broadcast = producer.begin().receive(&list);

        let (lengths, sink_len) = log();
        let (echoes, sink_echo) = log();
        let split = (Consumer::new(sink_len), Consumer::new(sink_echo));
        let _split = producer
            .begin()
            .to(|s: &'static str| (s.len(), s))
            .receive(&split);

        producer.notify("hey");
        assert_eq!(*first.lock().unwrap(), vec!["hey"]);
        assert_eq!(*second.lock().unwrap(), vec!["hey"]);
        assert_eq!(*lengths.lock().unwrap(), vec![3]);
        assert_eq!(*echoes.lock().unwrap(), vec!["hey"]);
    }

    #[test]
    fn delay_defers_each_value() {
        let scheduler = Arc::new(ManualScheduler::new());
        let producer = ManualProducer::new();
        let (seen, sink) = log();
        let _chain = producer
            .begin()
            .delay(Duration::from_millis(50), scheduler.clone())
            .sink(sink);

        producer.notify(1);
        producer.notify(2);
        assert!(seen.lock().unwrap().is_empty());
        scheduler.advance(Duration::from_millis(50));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn debounce_keeps_latest_value() {
        let scheduler = Arc::new(ManualScheduler::new());
        let producer = ManualProducer::new();
        let (seen, sink) = log();
        let _chain = producer
            .begin()
            .debounce(Duration::from_millis(100), scheduler.clone())
            .sink(sink);

        producer.notify(1);
        scheduler.advance(Duration::from_millis(60));
        producer.notify(2);
        scheduler.advance(Duration::from_millis(60));
        producer.notify(3);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(scheduler.pending(), 1);

        scheduler.advance(Duration::from_millis(100));
        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }

    #[test]
    fn unbounded_debounce_never_fires_and_never_panics() {
        let scheduler = Arc::new(ManualScheduler::new());
        let producer = ManualProducer::<i32>::new();
        let (seen, sink) = log();
        let _chain = producer
            .begin()
            .debounce(Duration::MAX, scheduler.clone())
            .sink(sink);

        scheduler.advance(Duration::from_millis(1));
        producer.notify(1);
        producer.notify(2);
        scheduler.advance(Duration::from_secs(3600));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn pending_delay_is_dropped_with_chain() {
        let scheduler = Arc::new(ManualScheduler::new());
        let producer = ManualProducer::new();
        let (seen, sink) = log();
        let chain = producer
            .begin()
            .debounce(Duration::from_millis(10), scheduler.clone())
            .sink(sink);

        producer.notify(1);
        drop(chain);
        scheduler.advance(Duration::from_millis(10));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn dropped_builder_leaves_no_registration() {
        let producer = ManualProducer::<i32>::new();
        let other = ManualProducer::<i32>::new();
        let half = producer.begin().guard(|_| true).merge(other.begin());
        assert_eq!(producer.endpoint_count(), 1);
        assert_eq!(other.endpoint_count(), 1);
        drop(half);
        assert_eq!(producer.endpoint_count(), 0);
        assert_eq!(other.endpoint_count(), 0);
    }
}
