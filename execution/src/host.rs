use noclip_types::EntityId;

/// The game-server host's view of each car's collision capability.
///
/// Implementations must be cheap and non-blocking: the coordinator calls them while
/// holding the entity's lock.
pub trait Host: Send + Sync + 'static {
    /// Apply the capability to the car (and broadcast it, if the host does that).
    fn set_collision_enabled(&self, entity: EntityId, enabled: bool);

    /// What the host currently believes, or `None` if it does not know the car.
    fn collision_enabled(&self, entity: EntityId) -> Option<bool>;
}

/// Best-effort chat delivery to a single car.
pub trait Notifier: Send + Sync + 'static {
    fn send_message(&self, entity: EntityId, text: &str);
}
