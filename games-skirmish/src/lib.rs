//! Skirmish simulation built on the scoped instance locator
//!
//! This crate is a headless reference consumer demonstrating how a host
//! wires the locator: a deterministic space skirmish whose actors register
//! themselves by type and find each other through scope resolution.

use std::cell::Cell;
use std::rc::Rc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::info;

use locator_core::{
    typed_listener, Cardinality, InstanceContainer, InstanceListener, ObjectId, SceneId,
    ScopeResolver, StaticSceneGraph,
};

/// The scene every wave fights in.
pub const COMBAT_SCENE: SceneId = SceneId(1);

/// The one player vessel, registered globally as a singleton.
#[derive(Debug)]
pub struct PlayerShip {
    pub callsign: String,
    pub hull: u32,
}

/// A hostile ship living in the combat scene's scope.
#[derive(Debug)]
pub struct Enemy {
    pub designation: String,
    pub hull: u32,
}

/// Squad-local coordination channel, bound to a squad leader object so
/// members resolve it ahead of anything scene- or global-scoped.
#[derive(Debug)]
pub struct SquadBeacon {
    pub frequency: u16,
}

/// Faults the simulation reports to its driver.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SkirmishError {
    #[error("a player ship is already deployed")]
    PlayerAlreadyDeployed,
    #[error("the skirmish is shutting down")]
    ShuttingDown,
}

/// Live enemy count maintained from the locator's events.
///
/// A tracker attached after the wave has already spawned is brought up to
/// date by the registered-listener replay.
pub struct WaveTracker {
    live: Rc<Cell<usize>>,
    arrivals: InstanceListener,
    departures: InstanceListener,
}

impl WaveTracker {
    /// Subscribe to [`Enemy`] traffic on `container`.
    pub fn attach(container: &InstanceContainer) -> Self {
        let live = Rc::new(Cell::new(0usize));
        let up = live.clone();
        let arrivals = typed_listener::<Enemy, _>(move |_| up.set(up.get() + 1));
        let down = live.clone();
        let departures =
            typed_listener::<Enemy, _>(move |_| down.set(down.get().saturating_sub(1)));
        container.add_registered_listener::<Enemy>(arrivals.clone());
        container.add_unregistered_listener::<Enemy>(departures.clone());
        Self {
            live,
            arrivals,
            departures,
        }
    }

    /// Enemies currently registered, as seen through the event stream.
    pub fn live(&self) -> usize {
        self.live.get()
    }

    /// Stop following `container`. The count freezes at its last value.
    pub fn detach(&self, container: &InstanceContainer) {
        container.remove_registered_listener::<Enemy>(&self.arrivals);
        container.remove_unregistered_listener::<Enemy>(&self.departures);
    }
}

struct Squad {
    leader: ObjectId,
    container: Rc<InstanceContainer>,
    beacon: Rc<SquadBeacon>,
}

/// A deterministic, headless skirmish world.
///
/// Owns the [`ScopeResolver`], the scene graph the resolver consults, and
/// the strong handles for everything it spawns; the locator itself is
/// non-owning. Spawning is driven by a seeded [`ChaCha20Rng`], so two
/// worlds with the same seed produce identical waves.
pub struct Skirmish {
    resolver: ScopeResolver,
    graph: Rc<StaticSceneGraph>,
    rng: ChaCha20Rng,
    next_object: u64,
    player: Option<Rc<PlayerShip>>,
    wave: Vec<(ObjectId, Rc<Enemy>)>,
    squads: Vec<Squad>,
}

impl Skirmish {
    pub fn new(seed: u64) -> Self {
        let graph = Rc::new(StaticSceneGraph::new());
        let resolver = ScopeResolver::new(graph.clone());
        Self {
            resolver,
            graph,
            rng: ChaCha20Rng::seed_from_u64(seed),
            next_object: 1,
            player: None,
            wave: Vec::new(),
            squads: Vec::new(),
        }
    }

    /// The locator serving this world.
    pub fn resolver(&self) -> &ScopeResolver {
        &self.resolver
    }

    /// Put the player vessel into the global scope.
    ///
    /// There is only ever one: a second deployment is refused and the
    /// original keeps flying.
    pub fn deploy_player(&mut self, callsign: &str) -> Result<Rc<PlayerShip>, SkirmishError> {
        if self.resolver.is_shutting_down() {
            return Err(SkirmishError::ShuttingDown);
        }
        let ship = Rc::new(PlayerShip {
            callsign: callsign.to_string(),
            hull: 100,
        });
        if !self.resolver.global().register(&ship, Cardinality::Singleton) {
            return Err(SkirmishError::PlayerAlreadyDeployed);
        }
        info!("player {} deployed", ship.callsign);
        self.player = Some(ship.clone());
        Ok(ship)
    }

    /// The deployed player, looked up through the global scope.
    pub fn player(&self) -> Option<Rc<PlayerShip>> {
        self.resolver.global().try_get::<PlayerShip>()
    }

    /// Withdraw the player vessel and unregister it.
    pub fn retire_player(&mut self) -> bool {
        match self.player.take() {
            Some(ship) => self.resolver.global().unregister(&ship),
            None => false,
        }
    }

    /// Spawn `count` enemies into the combat scene, in formation order.
    pub fn spawn_wave(&mut self, count: usize) -> Result<Vec<Rc<Enemy>>, SkirmishError> {
        if self.resolver.is_shutting_down() {
            return Err(SkirmishError::ShuttingDown);
        }
        let scene = self.resolver.for_scene(COMBAT_SCENE);
        let mut spawned = Vec::with_capacity(count);
        for _ in 0..count {
            let object = self.allocate_object();
            self.graph.place(object, COMBAT_SCENE);
            let enemy = Rc::new(Enemy {
                designation: format!("raider-{:04x}", self.rng.gen::<u16>()),
                hull: self.rng.gen_range(20..=60),
            });
            scene.register(&enemy, Cardinality::Multiple);
            self.wave.push((object, enemy.clone()));
            spawned.push(enemy);
        }
        info!("wave of {} spawned into scene {}", count, COMBAT_SCENE);
        Ok(spawned)
    }

    /// Retire the wave properly: every enemy unregisters before its
    /// strong handle is dropped.
    pub fn clear_wave(&mut self) {
        let scene = self.resolver.for_scene(COMBAT_SCENE);
        for (object, enemy) in self.wave.drain(..) {
            scene.unregister(&enemy);
            self.graph.remove(object);
        }
    }

    /// Drop the wave's strong handles without unregistering.
    ///
    /// This deliberately breaks the unregister-on-teardown convention and
    /// leaves stale entries behind for the next listener replay to prune.
    pub fn abandon_wave(&mut self) {
        for (object, _) in self.wave.drain(..) {
            self.graph.remove(object);
        }
    }

    /// Total hull strength of the live wave, through the scene scope.
    pub fn wave_strength(&self) -> u32 {
        self.resolver
            .for_scene(COMBAT_SCENE)
            .try_get_all::<Enemy>()
            .map(|wave| wave.iter().map(|enemy| enemy.hull).sum())
            .unwrap_or(0)
    }

    /// Stand up a squad: a fresh leader object gets its own container
    /// with a beacon registered inside it.
    pub fn form_squad(&mut self, frequency: u16) -> Result<ObjectId, SkirmishError> {
        if self.resolver.is_shutting_down() {
            return Err(SkirmishError::ShuttingDown);
        }
        let leader = self.allocate_object();
        self.graph.place(leader, COMBAT_SCENE);
        let container = self.resolver.bind_object(leader);
        let beacon = Rc::new(SquadBeacon { frequency });
        container.register(&beacon, Cardinality::Singleton);
        self.squads.push(Squad {
            leader,
            container,
            beacon,
        });
        Ok(leader)
    }

    /// Attach a new follower object under a squad leader.
    pub fn join_squad(&mut self, leader: ObjectId) -> ObjectId {
        let member = self.allocate_object();
        self.graph.link(member, leader);
        member
    }

    /// The beacon an object answers to, resolved at the narrowest scope.
    pub fn beacon_for(&self, object: ObjectId) -> Option<Rc<SquadBeacon>> {
        self.resolver.closest_for(object).try_get::<SquadBeacon>()
    }

    /// Tear a squad down: beacon unregisters, then the binding dies.
    pub fn disband_squad(&mut self, leader: ObjectId) {
        let Some(position) = self.squads.iter().position(|squad| squad.leader == leader) else {
            return;
        };
        let squad = self.squads.remove(position);
        squad.container.unregister(&squad.beacon);
        self.resolver
            .object_binding_destroyed(leader, &squad.container);
        self.graph.remove(leader);
    }

    /// Signal intent to quit. Scopes handed out afterwards are inert.
    pub fn begin_shutdown(&self) {
        info!("skirmish shutting down");
        self.resolver.begin_shutdown();
    }

    fn allocate_object(&mut self) -> ObjectId {
        let id = ObjectId(self.next_object);
        self.next_object += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn init_diagnostics() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    #[test]
    fn test_player_singleton_conflict() {
        init_diagnostics();
        let mut sim = Skirmish::new(1);
        let aurora = sim.deploy_player("aurora").unwrap();
        assert_eq!(sim.player().unwrap().callsign, "aurora");

        let refused = sim.deploy_player("vagrant");
        assert_eq!(refused.unwrap_err(), SkirmishError::PlayerAlreadyDeployed);
        assert!(Rc::ptr_eq(&sim.player().unwrap(), &aurora));
    }

    #[test]
    fn test_player_redeploys_after_retiring() {
        let mut sim = Skirmish::new(1);
        sim.deploy_player("aurora").unwrap();
        assert!(sim.retire_player());
        assert!(sim.player().is_none());
        assert!(sim.deploy_player("vagrant").is_ok());
        assert_eq!(sim.player().unwrap().callsign, "vagrant");
    }

    #[test]
    fn test_wave_registers_in_formation_order() {
        let mut sim = Skirmish::new(2);
        let spawned = sim.spawn_wave(3).unwrap();

        let seen = sim
            .resolver()
            .for_scene(COMBAT_SCENE)
            .try_get_all::<Enemy>()
            .expect("wave should be registered");
        assert_eq!(seen.len(), 3);
        for (spawn, lookup) in spawned.iter().zip(&seen) {
            assert!(Rc::ptr_eq(spawn, lookup));
        }
        assert!(sim.wave_strength() > 0);
    }

    #[test]
    fn test_late_tracker_catches_up_by_replay() {
        let mut sim = Skirmish::new(3);
        sim.spawn_wave(2).unwrap();

        // Attached after the fact: the replay delivers both raiders.
        let scene = sim.resolver().for_scene(COMBAT_SCENE);
        let tracker = WaveTracker::attach(&scene);
        assert_eq!(tracker.live(), 2);

        sim.spawn_wave(1).unwrap();
        assert_eq!(tracker.live(), 3);

        sim.clear_wave();
        assert_eq!(tracker.live(), 0);

        tracker.detach(&scene);
        sim.spawn_wave(2).unwrap();
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_abandoned_wave_is_pruned_at_replay() {
        init_diagnostics();
        let mut sim = Skirmish::new(4);
        sim.spawn_wave(2).unwrap();
        sim.abandon_wave();

        // Lookups skip the stale entries without touching them.
        assert_eq!(sim.wave_strength(), 0);

        // Replay is the cleanup path: the tracker never hears about the
        // abandoned raiders and later spawns count from zero.
        let scene = sim.resolver().for_scene(COMBAT_SCENE);
        let tracker = WaveTracker::attach(&scene);
        assert_eq!(tracker.live(), 0);

        sim.spawn_wave(1).unwrap();
        assert_eq!(tracker.live(), 1);
    }

    #[test]
    fn test_squad_beacon_resolves_closest() {
        let mut sim = Skirmish::new(5);
        let leader = sim.form_squad(42).unwrap();
        let member = sim.join_squad(leader);

        assert_eq!(sim.beacon_for(member).unwrap().frequency, 42);
        assert_eq!(sim.beacon_for(leader).unwrap().frequency, 42);

        // An object outside the squad falls through to scopes that carry
        // no beacon at all.
        assert!(sim.beacon_for(ObjectId(9999)).is_none());
    }

    #[test]
    fn test_disbanded_squad_stops_resolving() {
        let mut sim = Skirmish::new(6);
        let leader = sim.form_squad(17).unwrap();
        let member = sim.join_squad(leader);
        assert!(sim.beacon_for(member).is_some());

        sim.disband_squad(leader);
        assert!(sim.beacon_for(member).is_none());
        assert!(sim.resolver().for_object(leader).is_inert());
    }

    #[test]
    fn test_shutdown_latches_the_world() {
        let mut sim = Skirmish::new(7);
        sim.deploy_player("aurora").unwrap();
        sim.spawn_wave(2).unwrap();

        sim.begin_shutdown();
        assert_eq!(
            sim.deploy_player("too-late").unwrap_err(),
            SkirmishError::ShuttingDown
        );
        assert_eq!(sim.spawn_wave(1).unwrap_err(), SkirmishError::ShuttingDown);
        assert_eq!(sim.form_squad(1).unwrap_err(), SkirmishError::ShuttingDown);

        // Scope accessors now hand out the inert container, so even the
        // still-living player is unreachable through the locator.
        assert!(sim.resolver().global().is_inert());
        assert!(sim.player().is_none());
        assert_eq!(sim.wave_strength(), 0);
    }

    #[test]
    fn test_same_seed_same_wave() {
        let mut first = Skirmish::new(99);
        let mut second = Skirmish::new(99);
        let names = |wave: &[Rc<Enemy>]| -> Vec<String> {
            wave.iter().map(|enemy| enemy.designation.clone()).collect()
        };

        let a = first.spawn_wave(3).unwrap();
        let b = second.spawn_wave(3).unwrap();
        assert_eq!(names(&a), names(&b));

        let mut third = Skirmish::new(100);
        let c = third.spawn_wave(3).unwrap();
        assert_ne!(names(&a), names(&c));
    }

    proptest! {
        #[test]
        fn test_tracker_matches_wave_size(count in 0usize..12) {
            let mut sim = Skirmish::new(11);
            let scene = sim.resolver().for_scene(COMBAT_SCENE);
            let tracker = WaveTracker::attach(&scene);

            sim.spawn_wave(count).unwrap();
            prop_assert_eq!(tracker.live(), count);

            sim.clear_wave();
            prop_assert_eq!(tracker.live(), 0);
        }
    }
}
