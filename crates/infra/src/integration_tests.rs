//! Integration tests for the full signal pipeline.
//!
//! Tests: send → shared cache → delivery pass → listeners
//!
//! Verifies:
//! - Reliable sends are delivered exactly as sent, in order, and only once
//! - Concurrent reliable senders never lose a payload
//! - Concurrent weak senders may lose payloads but never duplicate or reorder,
//!   even while a weak drain runs alongside them
//! - Overlapping reliable drains after a lease expiry redeliver, never drop
//! - Leases are mutually exclusive
//! - Store outages and listener failures leave queues intact

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    use proptest::prelude::*;
    use serde_json::{Value as JsonValue, json};

    use kvsignals_core::{Namespace, SignalError};
    use kvsignals_signals::{FailurePolicy, Listener, ListenerRegistry, SignalMapping};

    use crate::cache::{CacheStore, InMemoryCache};
    use crate::config::SignalsConfig;
    use crate::hub::SignalHub;
    use crate::retry::RetryPolicy;

    type Seen = Arc<Mutex<Vec<Option<JsonValue>>>>;

    fn hub(store: &Arc<InMemoryCache>) -> SignalHub<Arc<InMemoryCache>> {
        hub_with(store, SignalsConfig::default())
    }

    fn hub_with(store: &Arc<InMemoryCache>, config: SignalsConfig) -> SignalHub<Arc<InMemoryCache>> {
        SignalHub::new(store.clone(), config)
    }

    fn recorder(seen: &Seen) -> Listener {
        let seen = seen.clone();
        Listener::new("recorder", move |data| {
            seen.lock().unwrap().push(data.cloned());
            Ok(())
        })
    }

    fn seen_values(seen: &Seen) -> Vec<JsonValue> {
        seen.lock().unwrap().iter().flatten().cloned().collect()
    }

    #[test]
    fn reliable_foo_scenario() {
        let store = Arc::new(InMemoryCache::new());
        let hub = hub(&store);
        let seen = Seen::default();
        let mapping = SignalMapping::builder()
            .reliable("foo", recorder(&seen))
            .build()
            .unwrap();

        hub.send("foo", "a", true).unwrap();
        hub.send("foo", "b", true).unwrap();

        assert_eq!(hub.deliver(&mapping).unwrap(), 2);
        assert_eq!(seen_values(&seen), vec![json!("a"), json!("b")]);
        assert_eq!(hub.deliver(&mapping).unwrap(), 0);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn every_listener_sees_every_payload_through_registry_references() {
        let store = Arc::new(InMemoryCache::new());
        let hub = hub(&store);
        let first = Seen::default();
        let second = Seen::default();

        let registry = ListenerRegistry::new()
            .with("audit.first", {
                let first = first.clone();
                move |data: Option<&JsonValue>| {
                    first.lock().unwrap().push(data.cloned());
                    Ok(())
                }
            })
            .with("audit.second", {
                let second = second.clone();
                move |data: Option<&JsonValue>| {
                    second.lock().unwrap().push(data.cloned());
                    Ok(())
                }
            });
        let mapping = SignalMapping::builder()
            .registry(registry)
            .weak("order.created", vec!["audit.first", "audit.second"])
            .build()
            .unwrap();

        hub.send_multi([("order.created", 1_i64), ("order.created", 2_i64)], false)
            .unwrap();

        assert_eq!(hub.deliver(&mapping).unwrap(), 2);
        assert_eq!(seen_values(&first), vec![json!(1), json!(2)]);
        assert_eq!(seen_values(&second), vec![json!(1), json!(2)]);
    }

    #[test]
    fn unmapped_signals_are_left_alone() {
        let store = Arc::new(InMemoryCache::new());
        let hub = hub(&store);
        let mapping = SignalMapping::builder()
            .weak("mapped", Listener::new("noop", |_| Ok(())))
            .build()
            .unwrap();

        hub.send("mapped", "a", false).unwrap();
        hub.send("other", "b", false).unwrap();

        assert_eq!(hub.deliver(&mapping).unwrap(), 1);
        assert_eq!(
            store.get("other", &Namespace::messages()).unwrap(),
            Some(json!(["b"]))
        );
    }

    #[test]
    fn concurrent_reliable_senders_lose_nothing() {
        let store = Arc::new(InMemoryCache::new());
        let config = SignalsConfig::default().with_cas_retry(RetryPolicy::exponential(
            10_000,
            Duration::from_micros(50),
            Duration::from_millis(2),
        ));
        let senders = 16;
        let barrier = Arc::new(Barrier::new(senders));

        let handles: Vec<_> = (0..senders)
            .map(|i| {
                let hub = hub_with(&store, config.clone());
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    hub.send("bar", json!(i), true).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let seen = Seen::default();
        let mapping = SignalMapping::builder()
            .reliable("bar", recorder(&seen))
            .build()
            .unwrap();
        assert_eq!(hub(&store).deliver(&mapping).unwrap(), senders);

        let got: HashSet<u64> = seen_values(&seen).iter().filter_map(JsonValue::as_u64).collect();
        assert_eq!(got, (0..senders as u64).collect());
    }

    #[test]
    fn reliable_sends_racing_reliable_drains_are_delivered_once() {
        let store = Arc::new(InMemoryCache::new());
        let config = SignalsConfig::default()
            .with_cas_retry(RetryPolicy::exponential(
                10_000,
                Duration::from_micros(50),
                Duration::from_millis(2),
            ))
            .with_lock_retry(RetryPolicy::exponential(
                10_000,
                Duration::from_micros(50),
                Duration::from_millis(2),
            ));
        let seen = Seen::default();
        let mapping = Arc::new(
            SignalMapping::builder()
                .reliable("jobs", recorder(&seen))
                .build()
                .unwrap(),
        );
        let senders = 4;
        let per_sender = 25;

        let send_handles: Vec<_> = (0..senders)
            .map(|s| {
                let hub = hub_with(&store, config.clone());
                thread::spawn(move || {
                    for i in 0..per_sender {
                        hub.send("jobs", json!(s * 1_000 + i), true).unwrap();
                    }
                })
            })
            .collect();
        let drain_handles: Vec<_> = (0..2)
            .map(|_| {
                let hub = hub_with(&store, config.clone());
                let mapping = mapping.clone();
                thread::spawn(move || {
                    let mut delivered = 0;
                    for _ in 0..50 {
                        delivered += hub.deliver(&mapping).unwrap();
                    }
                    delivered
                })
            })
            .collect();

        for h in send_handles {
            h.join().unwrap();
        }
        let mut delivered: usize = drain_handles.into_iter().map(|h| h.join().unwrap()).sum();
        delivered += hub(&store).deliver(&mapping).unwrap();

        let values = seen_values(&seen);
        let unique: HashSet<u64> = values.iter().filter_map(JsonValue::as_u64).collect();
        assert_eq!(delivered, senders * per_sender);
        assert_eq!(values.len(), senders * per_sender);
        assert_eq!(unique.len(), senders * per_sender);

        // Per-sender send order is kept.
        for s in 0..senders as u64 {
            let mine: Vec<u64> = values
                .iter()
                .filter_map(JsonValue::as_u64)
                .filter(|v| v / 1_000 == s)
                .collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]), "sender {s}: {mine:?}");
        }
    }

    #[test]
    fn concurrent_weak_senders_never_duplicate_or_reorder() {
        let store = Arc::new(InMemoryCache::new());
        let senders = 4;
        let per_sender = 30;
        let barrier = Arc::new(Barrier::new(senders));

        let handles: Vec<_> = (0..senders)
            .map(|s| {
                let hub = hub(&store);
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..per_sender {
                        hub.send("bar", json!(s * 1_000 + i), false).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let seen = Seen::default();
        let mapping = SignalMapping::builder()
            .weak("bar", recorder(&seen))
            .build()
            .unwrap();
        let delivered = hub(&store).deliver(&mapping).unwrap();

        let values: Vec<u64> = seen_values(&seen).iter().filter_map(JsonValue::as_u64).collect();
        assert_eq!(delivered, values.len());
        assert!(delivered >= 1 && delivered <= senders * per_sender);

        let unique: HashSet<u64> = values.iter().copied().collect();
        assert_eq!(unique.len(), values.len(), "duplicated payloads: {values:?}");

        for s in 0..senders as u64 {
            let mine: Vec<u64> = values.iter().copied().filter(|v| v / 1_000 == s).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]), "sender {s}: {mine:?}");
        }
    }

    #[test]
    fn weak_sends_racing_a_weak_drain_are_never_delivered_twice() {
        let store = Arc::new(InMemoryCache::new());
        let senders = 4;
        let per_sender = 50;
        let seen = Seen::default();
        let mapping = SignalMapping::builder()
            .weak("bar", recorder(&seen))
            .build()
            .unwrap();
        let barrier = Arc::new(Barrier::new(senders + 1));
        let done = Arc::new(AtomicBool::new(false));

        let drainer = {
            let hub = hub(&store);
            let seen = seen.clone();
            let barrier = barrier.clone();
            let done = done.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut total = 0;
                loop {
                    // One more pass after the senders are done picks up the rest.
                    let finished = done.load(Ordering::SeqCst);
                    let before = seen.lock().unwrap().len();
                    let delivered = hub.deliver_weak(&mapping).unwrap();
                    assert_eq!(seen.lock().unwrap().len() - before, delivered);
                    total += delivered;
                    if finished {
                        break total;
                    }
                }
            })
        };

        let handles: Vec<_> = (0..senders)
            .map(|s| {
                let hub = hub(&store);
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..per_sender {
                        hub.send("bar", json!(s * 1_000 + i), false).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        let delivered = drainer.join().unwrap();

        let values: Vec<u64> = seen_values(&seen).iter().filter_map(JsonValue::as_u64).collect();
        assert_eq!(delivered, values.len());
        assert!(delivered >= 1);
        assert!(
            values
                .iter()
                .all(|v| v / 1_000 < senders as u64 && v % 1_000 < per_sender as u64)
        );

        let unique: HashSet<u64> = values.iter().copied().collect();
        assert_eq!(unique.len(), values.len(), "duplicated payloads: {values:?}");

        for s in 0..senders as u64 {
            let mine: Vec<u64> = values.iter().copied().filter(|v| v / 1_000 == s).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]), "sender {s}: {mine:?}");
        }
        assert_eq!(store.get("bar", &Namespace::messages()).unwrap(), Some(json!([])));
    }

    #[test]
    fn overlapping_drains_after_lease_expiry_redeliver_but_keep_later_sends() {
        let store = Arc::new(InMemoryCache::new());
        let config = SignalsConfig::default().with_lease_ttl(Some(Duration::from_millis(5)));
        let seen = Seen::default();
        let slow = {
            let seen = seen.clone();
            Listener::new("slow", move |data| {
                thread::sleep(Duration::from_millis(50));
                seen.lock().unwrap().push(data.cloned());
                Ok(())
            })
        };
        let mapping = Arc::new(
            SignalMapping::builder()
                .reliable("jobs", slow)
                .build()
                .unwrap(),
        );
        let sender = hub_with(&store, config.clone());
        sender.send_multi([("jobs", "a"), ("jobs", "b")], true).unwrap();

        // The second drain starts once the first one's lease has expired.
        let drains: Vec<_> = (0..2u64)
            .map(|i| {
                let hub = hub_with(&store, config.clone());
                let mapping = mapping.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(15 * i));
                    hub.deliver(&mapping).unwrap()
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(25));
        sender.send_multi([("jobs", "c"), ("jobs", "d")], true).unwrap();
        for h in drains {
            h.join().unwrap();
        }

        hub_with(&store, config).deliver(&mapping).unwrap();

        let values = seen_values(&seen);
        let delivered: HashSet<&str> = values.iter().filter_map(JsonValue::as_str).collect();
        for payload in ["a", "b", "c", "d"] {
            assert!(delivered.contains(payload), "{payload} never delivered: {values:?}");
        }
        assert_eq!(store.get("jobs", &Namespace::messages()).unwrap(), Some(json!([])));
    }

    #[test]
    fn concurrent_try_acquire_admits_one_holder() {
        let store = Arc::new(InMemoryCache::new());
        let contenders = 12;
        let barrier = Arc::new(Barrier::new(contenders));

        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let hub = hub(&store);
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    hub.lease_lock().try_acquire("foo").unwrap()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);

        let hub = hub(&store);
        assert!(!hub.lease_lock().try_acquire("foo").unwrap());
        hub.lease_lock().release("foo").unwrap();
        assert!(hub.lease_lock().try_acquire("foo").unwrap());
    }

    #[test]
    fn store_outage_propagates_and_queue_survives() {
        let store = Arc::new(InMemoryCache::new());
        let hub = hub(&store);
        let seen = Seen::default();
        let mapping = SignalMapping::builder()
            .reliable("foo", recorder(&seen))
            .build()
            .unwrap();

        hub.send("foo", "a", true).unwrap();

        store.set_available(false);
        assert!(matches!(hub.send("foo", "b", true), Err(SignalError::StoreUnavailable(_))));
        assert!(matches!(hub.deliver(&mapping), Err(SignalError::StoreUnavailable(_))));
        assert!(seen.lock().unwrap().is_empty());

        store.set_available(true);
        assert_eq!(hub.deliver(&mapping).unwrap(), 1);
        assert_eq!(seen_values(&seen), vec![json!("a")]);
    }

    #[test]
    fn propagated_listener_failure_redelivers_on_next_pass() {
        let store = Arc::new(InMemoryCache::new());
        let hub = hub_with(
            &store,
            SignalsConfig::default().with_listener_failures(FailurePolicy::Propagate),
        );
        let attempts = Arc::new(Mutex::new(0));
        let mapping = SignalMapping::builder()
            .reliable("foo", {
                let attempts = attempts.clone();
                Listener::new("flaky", move |_| {
                    let mut n = attempts.lock().unwrap();
                    *n += 1;
                    if *n == 1 {
                        anyhow::bail!("first call fails");
                    }
                    Ok(())
                })
            })
            .build()
            .unwrap();

        hub.send("foo", "a", true).unwrap();

        assert!(matches!(
            hub.deliver(&mapping),
            Err(SignalError::ListenerFailure { .. })
        ));
        assert_eq!(hub.deliver(&mapping).unwrap(), 1);
        assert_eq!(hub.deliver(&mapping).unwrap(), 0);
        assert_eq!(*attempts.lock().unwrap(), 2);
    }

    #[test]
    fn queues_written_by_another_process_are_read() {
        let store = Arc::new(InMemoryCache::new());
        store
            .set("foo", json!(["x", null, {"n": 1}]), &Namespace::messages(), None)
            .unwrap();

        let seen = Seen::default();
        let mapping = SignalMapping::weak_only(vec![("foo", recorder(&seen))], &ListenerRegistry::new())
            .unwrap();

        assert_eq!(hub(&store).deliver(&mapping).unwrap(), 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(json!("x")), None, Some(json!({"n": 1}))]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn reliable_sends_are_delivered_in_order(
            name in "[a-z][a-z0-9_.]{0,15}",
            payloads in prop::collection::vec(any::<i64>(), 0..20),
        ) {
            let store = Arc::new(InMemoryCache::new());
            let hub = hub(&store);
            let first = Seen::default();
            let second = Seen::default();
            let mapping = SignalMapping::builder()
                .reliable(name.clone(), vec![recorder(&first), recorder(&second)])
                .build()
                .unwrap();

            for p in &payloads {
                hub.send(&name, *p, true).unwrap();
            }

            prop_assert_eq!(hub.deliver(&mapping).unwrap(), payloads.len());
            let expected: Vec<JsonValue> = payloads.iter().map(|p| json!(p)).collect();
            prop_assert_eq!(seen_values(&first), expected.clone());
            prop_assert_eq!(seen_values(&second), expected);
            prop_assert_eq!(hub.deliver(&mapping).unwrap(), 0);
        }
    }
}
