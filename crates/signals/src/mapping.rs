//! Signal mapping: which listeners handle which signals, and how.
//!
//! A mapping partitions signal names into two delivery groups:
//!
//! - **weak**: drained in one batched read/clear, no locking, best effort
//! - **reliable**: drained signal-by-signal under a lease, no lost sends
//!
//! Mappings are built once (per process or per delivery pass) and are
//! immutable afterwards.

use kvsignals_core::{SignalError, SignalName, SignalResult};

use crate::listener::{Listener, ListenerRegistry, ListenerSpec};

/// Listeners registered for one signal, in registration order. Never empty.
#[derive(Debug, Clone)]
pub struct SignalRoute {
    name: SignalName,
    listeners: Vec<Listener>,
}

impl SignalRoute {
    pub fn name(&self) -> &SignalName {
        &self.name
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }
}

/// Normalize raw `(signal name, listener-or-listeners)` associations.
///
/// - a single handler or reference becomes a one-element sequence
/// - a sequence of handlers/references is kept in order
/// - anything else (empty sequence, nested sequence, empty or unknown
///   reference) fails with `InvalidListener`, naming the offending value
///
/// A name repeated in `raw` keeps its first position and takes the last
/// association.
pub fn preprocess<I, N, L>(raw: I, registry: &ListenerRegistry) -> SignalResult<Vec<SignalRoute>>
where
    I: IntoIterator<Item = (N, L)>,
    N: Into<String>,
    L: Into<ListenerSpec>,
{
    let mut routes: Vec<SignalRoute> = Vec::new();

    for (name, spec) in raw {
        let name = SignalName::new(name)?;
        let listeners = normalize(spec.into(), registry)?;

        match routes.iter_mut().find(|r| r.name == name) {
            Some(existing) => existing.listeners = listeners,
            None => routes.push(SignalRoute { name, listeners }),
        }
    }

    Ok(routes)
}

fn normalize(spec: ListenerSpec, registry: &ListenerRegistry) -> SignalResult<Vec<Listener>> {
    match spec {
        ListenerSpec::Handler(l) => Ok(vec![l]),
        ListenerSpec::Reference(r) => Ok(vec![resolve(&r, registry)?]),
        ListenerSpec::Many(items) => {
            if items.is_empty() {
                return Err(SignalError::invalid_listener("empty listener sequence"));
            }
            items
                .into_iter()
                .map(|item| match item {
                    ListenerSpec::Handler(l) => Ok(l),
                    ListenerSpec::Reference(r) => resolve(&r, registry),
                    nested @ ListenerSpec::Many(_) => Err(SignalError::invalid_listener(format!(
                        "{nested:?} (nested listener sequence)"
                    ))),
                })
                .collect()
        }
    }
}

fn resolve(reference: &str, registry: &ListenerRegistry) -> SignalResult<Listener> {
    if reference.is_empty() {
        return Err(SignalError::invalid_listener("empty listener reference"));
    }
    registry
        .resolve(reference)
        .ok_or_else(|| SignalError::invalid_listener(format!("unknown listener reference {reference:?}")))
}

/// Signal names mapped to listeners, split into weak and reliable groups.
#[derive(Debug, Clone, Default)]
pub struct SignalMapping {
    weak: Vec<SignalRoute>,
    reliable: Vec<SignalRoute>,
}

impl SignalMapping {
    pub fn builder() -> SignalMappingBuilder {
        SignalMappingBuilder::default()
    }

    /// Mapping whose signals are all delivered weakly.
    pub fn weak_only<I, N, L>(raw: I, registry: &ListenerRegistry) -> SignalResult<Self>
    where
        I: IntoIterator<Item = (N, L)>,
        N: Into<String>,
        L: Into<ListenerSpec>,
    {
        Ok(Self {
            weak: preprocess(raw, registry)?,
            reliable: Vec::new(),
        })
    }

    /// Mapping whose signals are all delivered reliably.
    pub fn reliable_only<I, N, L>(raw: I, registry: &ListenerRegistry) -> SignalResult<Self>
    where
        I: IntoIterator<Item = (N, L)>,
        N: Into<String>,
        L: Into<ListenerSpec>,
    {
        Ok(Self {
            weak: Vec::new(),
            reliable: preprocess(raw, registry)?,
        })
    }

    pub fn weak(&self) -> &[SignalRoute] {
        &self.weak
    }

    pub fn reliable(&self) -> &[SignalRoute] {
        &self.reliable
    }

    pub fn is_empty(&self) -> bool {
        self.weak.is_empty() && self.reliable.is_empty()
    }

    /// Number of mapped signal names across both groups.
    pub fn len(&self) -> usize {
        self.weak.len() + self.reliable.len()
    }

    pub fn listeners(&self, name: &str) -> Option<&[Listener]> {
        self.reliable
            .iter()
            .chain(self.weak.iter())
            .find(|r| r.name.as_str() == name)
            .map(|r| r.listeners())
    }
}

/// Incremental construction of a [`SignalMapping`].
#[derive(Debug, Default)]
pub struct SignalMappingBuilder {
    registry: ListenerRegistry,
    weak: Vec<(String, ListenerSpec)>,
    reliable: Vec<(String, ListenerSpec)>,
}

impl SignalMappingBuilder {
    /// Registry used to resolve named references.
    pub fn registry(mut self, registry: ListenerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn weak(mut self, name: impl Into<String>, listeners: impl Into<ListenerSpec>) -> Self {
        self.weak.push((name.into(), listeners.into()));
        self
    }

    pub fn reliable(mut self, name: impl Into<String>, listeners: impl Into<ListenerSpec>) -> Self {
        self.reliable.push((name.into(), listeners.into()));
        self
    }

    /// Validate names, resolve references and normalize listener lists.
    ///
    /// A signal may belong to one group only.
    pub fn build(self) -> SignalResult<SignalMapping> {
        let weak = preprocess(self.weak, &self.registry)?;
        let reliable = preprocess(self.reliable, &self.registry)?;

        if let Some(dup) = weak
            .iter()
            .find(|w| reliable.iter().any(|r| r.name == w.name))
        {
            return Err(SignalError::invalid_argument(format!(
                "signal '{}' is mapped as both weak and reliable",
                dup.name
            )));
        }

        Ok(SignalMapping { weak, reliable })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn registry() -> ListenerRegistry {
        ListenerRegistry::new()
            .with("handlers.a", |_| Ok(()))
            .with("handlers.b", |_| Ok(()))
            .with("handlers.c", |_| Ok(()))
    }

    fn labels(route: &SignalRoute) -> Vec<&str> {
        route.listeners().iter().map(|l| l.label()).collect()
    }

    #[test]
    fn bare_handler_and_reference_become_single_element_lists() {
        let routes = preprocess(
            vec![
                ("foo", ListenerSpec::handler(|_| Ok(()))),
                ("bar", ListenerSpec::from("handlers.a")),
            ],
            &registry(),
        )
        .unwrap();

        assert_eq!(routes.len(), 2);
        assert_eq!(labels(&routes[0]), vec!["<handler>"]);
        assert_eq!(labels(&routes[1]), vec!["handlers.a"]);
    }

    #[test]
    fn sequences_keep_order() {
        let routes = preprocess(
            vec![("foo", vec!["handlers.c", "handlers.a", "handlers.b"])],
            &registry(),
        )
        .unwrap();

        assert_eq!(labels(&routes[0]), vec!["handlers.c", "handlers.a", "handlers.b"]);
    }

    #[test]
    fn invalid_listeners_are_rejected() {
        let reg = registry();
        let cases: Vec<ListenerSpec> = vec![
            ListenerSpec::Many(vec![]),
            ListenerSpec::from(""),
            ListenerSpec::from("handlers.missing"),
            ListenerSpec::from(vec![ListenerSpec::from(vec!["handlers.a"])]),
        ];

        for spec in cases {
            let err = preprocess(vec![("foo", spec)], &reg).unwrap_err();
            assert!(matches!(err, SignalError::InvalidListener(_)), "got {err:?}");
        }
    }

    #[test]
    fn unknown_reference_is_named_in_error() {
        let err = preprocess(vec![("foo", "handlers.nope")], &registry()).unwrap_err();
        assert!(err.to_string().contains("handlers.nope"));
    }

    #[test]
    fn empty_signal_name_is_invalid_argument() {
        let err = preprocess(vec![("", "handlers.a")], &registry()).unwrap_err();
        assert!(matches!(err, SignalError::InvalidArgument(_)));
    }

    #[test]
    fn repeated_name_takes_last_association() {
        let routes = preprocess(
            vec![("foo", "handlers.a"), ("bar", "handlers.b"), ("foo", "handlers.c")],
            &registry(),
        )
        .unwrap();

        assert_eq!(routes[0].name().as_str(), "foo");
        assert_eq!(labels(&routes[0]), vec!["handlers.c"]);
        assert_eq!(routes.len(), 2);
    }

    #[test]
    fn builder_rejects_signal_in_both_groups() {
        let err = SignalMapping::builder()
            .registry(registry())
            .weak("foo", "handlers.a")
            .reliable("foo", "handlers.b")
            .build()
            .unwrap_err();
        assert!(matches!(err, SignalError::InvalidArgument(_)));
    }

    #[test]
    fn builder_partitions_groups() {
        let mapping = SignalMapping::builder()
            .registry(registry())
            .weak("w", "handlers.a")
            .reliable("r", vec!["handlers.b", "handlers.c"])
            .build()
            .unwrap();

        assert_eq!(mapping.weak().len(), 1);
        assert_eq!(mapping.reliable().len(), 1);
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.listeners("r").map(|l| l.len()), Some(2));
        assert!(mapping.listeners("missing").is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: any non-empty list of known references normalizes to the
        /// same references, in the same order.
        #[test]
        fn reference_lists_normalize_in_order(
            picks in prop::collection::vec(0usize..3, 1..8)
        ) {
            let names = ["handlers.a", "handlers.b", "handlers.c"];
            let refs: Vec<&str> = picks.iter().map(|i| names[*i]).collect();

            let routes = preprocess(vec![("sig", refs.clone())], &registry()).unwrap();

            prop_assert_eq!(labels(&routes[0]), refs);
        }
    }
}
