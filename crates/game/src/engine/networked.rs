/// Replication contract: an entity can be captured as a full `Init` and
/// advanced by `Delta`s.
///
/// A mirror built from a captured `Init` that then receives the same deltas
/// as its source ends up observationally equal to the source. Implementors
/// are built from their `Init` only and carry no `Default`.
pub trait Networked {
    type Init;
    type Delta;

    fn apply_delta(&mut self, delta: &Self::Delta);
    fn capture_initializer(&self) -> Self::Init;
}

/// A networked entity that tracks its own changes.
pub trait AutoNetworked: Networked {
    /// Everything that changed since the last call, or `None` if nothing did.
    fn collect_delta(&mut self) -> Option<Self::Delta>;
}

/// Structural check run on every value that arrives from the network before
/// it is trusted.
pub trait VerifyStructure {
    fn verify_structure(&self) -> bool;
}

impl<T: VerifyStructure> VerifyStructure for Option<T> {
    fn verify_structure(&self) -> bool {
        self.as_ref().is_none_or(T::verify_structure)
    }
}

impl<T: VerifyStructure> VerifyStructure for Vec<T> {
    fn verify_structure(&self) -> bool {
        self.iter().all(T::verify_structure)
    }
}

impl<K, V: VerifyStructure> VerifyStructure for std::collections::BTreeMap<K, V> {
    fn verify_structure(&self) -> bool {
        self.values().all(V::verify_structure)
    }
}
