//! Connection Registry
//!
//! Zwei unabhängige Maps, eine pro Anruf-Richtung. Dieselbe
//! ConnectionId darf in beiden Richtungen gleichzeitig vorkommen
//! (beidseitige Anruf-Race beim gleichzeitigen Betreten der
//! Reichweite) - das ist erlaubt, kein Fehler. Innerhalb einer
//! Richtung gilt: höchstens ein Eintrag pro ID, und `try_insert` ist
//! der einzige Deduplizierungs-Punkt.
//!
//! Jede Reservierung bekommt ein Generations-Token. Zwischen Teardown
//! und erneutem Join kann unter derselben ID ein neuer Eintrag
//! entstehen; `attach_connection` und `set_active` greifen nur, wenn
//! das Token noch zum aktuellen Eintrag gehört - sonst würde ein
//! verspätet fertig gewordener Aufbau den Nachfolger kapern.

use crate::identity::ConnectionId;
use crate::transport::MediaConnection;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// TYPES
// ============================================================================

/// Richtung eines Anrufs aus Sicht dieses Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Wir haben angerufen
    Outgoing,
    /// Wir wurden angerufen
    Incoming,
}

/// Zustand einer Verbindung
///
/// `Closed` ist terminal und existiert nur implizit: geschlossene
/// Verbindungen werden aus der Map entfernt und nie wiederverwendet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Erstellt, wartet auf den Remote-Stream
    Pending,
    /// Remote-Stream angekommen und an die RenderSink gebunden
    Active,
}

/// Generations-Token einer Reservierung
///
/// Monoton steigend über alle Einträge und Richtungen; identifiziert
/// genau eine Reservierung, auch wenn dieselbe ConnectionId nach einem
/// Teardown neu eingetragen wird.
pub type Generation = u64;

/// Registry-Eintrag für eine Verbindung
///
/// Das Connection-Handle wird erst nach dem asynchronen Aufbau
/// nachgetragen; zwischen Reservierung (`try_insert`) und
/// `attach_connection` kann der Eintrag durch Teardown wieder
/// verschwinden oder durch einen neuen ersetzt worden sein.
pub struct PeerLink {
    generation: Generation,
    connection: Option<Arc<dyn MediaConnection>>,
    state: LinkState,
    display_name: Option<String>,
}

impl PeerLink {
    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn connection(&self) -> Option<&Arc<dyn MediaConnection>> {
        self.connection.as_ref()
    }
}

// ============================================================================
// CONNECTION REGISTRY
// ============================================================================

#[derive(Default)]
struct Maps {
    outgoing: HashMap<ConnectionId, PeerLink>,
    incoming: HashMap<ConnectionId, PeerLink>,
    next_generation: Generation,
}

impl Maps {
    fn map_mut(&mut self, direction: Direction) -> &mut HashMap<ConnectionId, PeerLink> {
        match direction {
            Direction::Outgoing => &mut self.outgoing,
            Direction::Incoming => &mut self.incoming,
        }
    }
}

/// Registry aktiver Verbindungen, getrennt nach Richtung
#[derive(Default)]
pub struct ConnectionRegistry {
    maps: Mutex<Maps>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserviert einen Pending-Eintrag, falls noch keiner existiert
    ///
    /// Check-and-insert in einem Schritt: zwischen getrenntem Prüfen
    /// und Einfügen könnten sonst andere Events dazwischenfunken.
    /// Liefert das Generations-Token der Reservierung; `None` wenn zu
    /// dieser ID schon ein Eintrag existiert.
    pub fn try_insert(
        &self,
        direction: Direction,
        id: ConnectionId,
        display_name: Option<String>,
    ) -> Option<Generation> {
        let mut maps = self.maps.lock();
        maps.next_generation += 1;
        let generation = maps.next_generation;

        let map = maps.map_mut(direction);
        if map.contains_key(&id) {
            return None;
        }
        map.insert(
            id,
            PeerLink {
                generation,
                connection: None,
                state: LinkState::Pending,
                display_name,
            },
        );
        Some(generation)
    }

    /// Trägt das Connection-Handle in einen reservierten Eintrag nach
    ///
    /// Gibt `false` zurück, wenn der Eintrag inzwischen abgebaut (oder
    /// unter derselben ID neu reserviert) wurde - der Aufrufer muss
    /// die Verbindung dann selbst schließen.
    pub fn attach_connection(
        &self,
        direction: Direction,
        id: &ConnectionId,
        generation: Generation,
        connection: Arc<dyn MediaConnection>,
    ) -> bool {
        let mut maps = self.maps.lock();
        match maps.map_mut(direction).get_mut(id) {
            Some(link) if link.generation == generation => {
                link.connection = Some(connection);
                true
            }
            _ => false,
        }
    }

    /// Markiert eine Verbindung als Active (Remote-Stream angekommen)
    ///
    /// Gibt `false` zurück, wenn der Eintrag nicht mehr existiert oder
    /// inzwischen zu einer neueren Reservierung gehört.
    pub fn set_active(
        &self,
        direction: Direction,
        id: &ConnectionId,
        generation: Generation,
    ) -> bool {
        let mut maps = self.maps.lock();
        match maps.map_mut(direction).get_mut(id) {
            Some(link) if link.generation == generation => {
                link.state = LinkState::Active;
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, direction: Direction, id: &ConnectionId) -> bool {
        let mut maps = self.maps.lock();
        maps.map_mut(direction).contains_key(id)
    }

    /// Entfernt und liefert einen Eintrag; `None` wenn keiner existiert
    pub fn remove(&self, direction: Direction, id: &ConnectionId) -> Option<PeerLink> {
        let mut maps = self.maps.lock();
        maps.map_mut(direction).remove(id)
    }

    /// Entfernt einen Eintrag nur, wenn er noch zur angegebenen
    /// Reservierung gehört
    ///
    /// Für die Aufräum-Pfade nach einem fehlgeschlagenen Aufbau: die ID
    /// kann inzwischen einem Nachfolger gehören, der nicht mit
    /// abgeräumt werden darf.
    pub fn remove_if_current(
        &self,
        direction: Direction,
        id: &ConnectionId,
        generation: Generation,
    ) -> Option<PeerLink> {
        let mut maps = self.maps.lock();
        let map = maps.map_mut(direction);
        if map.get(id).is_some_and(|link| link.generation == generation) {
            map.remove(id)
        } else {
            None
        }
    }

    pub fn len(&self, direction: Direction) -> usize {
        let mut maps = self.maps.lock();
        maps.map_mut(direction).len()
    }

    pub fn is_empty(&self, direction: Direction) -> bool {
        self.len(direction) == 0
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopConnection;

    impl MediaConnection for NoopConnection {
        fn close(&self) {}
    }

    fn id(raw: &str) -> ConnectionId {
        ConnectionId::from_raw(raw)
    }

    #[test]
    fn test_try_insert_refuses_duplicates() {
        let registry = ConnectionRegistry::new();

        assert!(registry.try_insert(Direction::Outgoing, id("alice"), None).is_some());
        assert!(registry.try_insert(Direction::Outgoing, id("alice"), None).is_none());
        assert_eq!(registry.len(Direction::Outgoing), 1);
    }

    #[test]
    fn test_directions_are_independent() {
        let registry = ConnectionRegistry::new();

        // Beidseitige Anruf-Race: dieselbe ID in beiden Richtungen
        assert!(registry.try_insert(Direction::Outgoing, id("bob"), None).is_some());
        assert!(registry.try_insert(Direction::Incoming, id("bob"), None).is_some());

        assert!(registry.contains(Direction::Outgoing, &id("bob")));
        assert!(registry.contains(Direction::Incoming, &id("bob")));
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let registry = ConnectionRegistry::new();

        assert!(registry.remove(Direction::Incoming, &id("ghost")).is_none());

        registry.try_insert(Direction::Incoming, id("carol"), None);
        assert!(registry.remove(Direction::Incoming, &id("carol")).is_some());
        assert!(registry.remove(Direction::Incoming, &id("carol")).is_none());
    }

    #[test]
    fn test_attach_connection_fails_after_teardown() {
        let registry = ConnectionRegistry::new();
        let generation = registry
            .try_insert(Direction::Outgoing, id("dave"), None)
            .unwrap();
        registry.remove(Direction::Outgoing, &id("dave"));

        let attached = registry.attach_connection(
            Direction::Outgoing,
            &id("dave"),
            generation,
            Arc::new(NoopConnection),
        );
        assert!(!attached);
    }

    #[test]
    fn test_stale_generation_is_refused_after_rejoin() {
        let registry = ConnectionRegistry::new();

        // Erste Reservierung wird abgebaut, dieselbe ID neu reserviert
        let first = registry
            .try_insert(Direction::Outgoing, id("frank"), None)
            .unwrap();
        registry.remove(Direction::Outgoing, &id("frank"));
        let second = registry
            .try_insert(Direction::Outgoing, id("frank"), None)
            .unwrap();
        assert_ne!(first, second);

        // Das alte Token greift nicht mehr auf den neuen Eintrag
        assert!(!registry.attach_connection(
            Direction::Outgoing,
            &id("frank"),
            first,
            Arc::new(NoopConnection),
        ));
        assert!(!registry.set_active(Direction::Outgoing, &id("frank"), first));

        // Das aktuelle Token greift weiterhin
        assert!(registry.attach_connection(
            Direction::Outgoing,
            &id("frank"),
            second,
            Arc::new(NoopConnection),
        ));
        assert!(registry.set_active(Direction::Outgoing, &id("frank"), second));
    }

    #[test]
    fn test_set_active_and_state() {
        let registry = ConnectionRegistry::new();
        let generation = registry
            .try_insert(Direction::Outgoing, id("erin"), Some("Erin".to_string()))
            .unwrap();

        assert!(registry.set_active(Direction::Outgoing, &id("erin"), generation));
        let link = registry.remove(Direction::Outgoing, &id("erin")).unwrap();
        assert_eq!(link.state(), LinkState::Active);
        assert_eq!(link.display_name(), Some("Erin"));

        assert!(!registry.set_active(Direction::Outgoing, &id("erin"), generation));
    }
}
