//! Game rooms and the server-wide room registry.
//!
//! A [`GameRoom`] ties one room's pieces together: its player roster,
//! the selected story, and, while a game is running, the floor
//! arbiter plus agent session wired back to the shared event log. The
//! [`RoomRegistry`] owns all rooms and is the single entry point the
//! RPC surface talks to.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use reef_agent::{AgentApi, AgentSessionConfig, EndGameTool};
use reef_common::{GameError, PeerId, RoomEvent, RoomId};
use reef_config::GameConfig;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::eventlog::EventLog;
use crate::floor::{FloorArbiter, RoomOutput, VoiceActivitySegment};
use crate::session::{AgentSessionManager, MuteSource, SessionEnd};
use crate::stories::{
    first_message_for, instructions_for, tool_description_for, Story, StoryCatalog,
};

/// Name the agent's end-game tool is declared under.
pub const END_GAME_TOOL: &str = "end_game";

/// Room-level knobs, derived from [`GameConfig`] plus the agent's
/// reconnect backoff.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub time_limit: Duration,
    pub players_limit: usize,
    pub reconnect_backoff: Duration,
}

impl RoomSettings {
    pub fn from_config(game: &GameConfig, reconnect_backoff: Duration) -> Self {
        Self {
            time_limit: Duration::from_secs(game.time_limit_secs),
            players_limit: game.room_players_limit,
            reconnect_backoff,
        }
    }
}

struct Player {
    name: String,
}

struct RoomState {
    players: HashMap<PeerId, Player>,
    story: Option<Story>,
}

/// Everything that exists only while a game is running.
struct ActiveGame {
    manager: AgentSessionManager,
    cancel: CancellationToken,
    timer: JoinHandle<()>,
    end_watcher: JoinHandle<()>,
}

/// One voice party room.
pub struct GameRoom {
    room_id: RoomId,
    log: Arc<EventLog>,
    api: Arc<dyn AgentApi>,
    settings: RoomSettings,
    state: Mutex<RoomState>,
    /// Start/stop are serialized through this lock; taking the value
    /// out is what makes `GameEnded` fire exactly once.
    active: tokio::sync::Mutex<Option<ActiveGame>>,
    /// Hot-path handles for voice packets and audio subscribers,
    /// published on start and cleared on stop.
    live: RwLock<Option<(FloorArbiter, broadcast::Sender<RoomOutput>)>>,
}

impl GameRoom {
    fn new(
        room_id: RoomId,
        log: Arc<EventLog>,
        api: Arc<dyn AgentApi>,
        settings: RoomSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            room_id,
            log,
            api,
            settings,
            state: Mutex::new(RoomState {
                players: HashMap::new(),
                story: None,
            }),
            active: tokio::sync::Mutex::new(None),
            live: RwLock::new(None),
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn player_count(&self) -> usize {
        self.state.lock().expect("room state poisoned").players.len()
    }

    pub fn player_name(&self, peer_id: &PeerId) -> Option<String> {
        self.state
            .lock()
            .expect("room state poisoned")
            .players
            .get(peer_id)
            .map(|p| p.name.clone())
    }

    /// Add a player, up to the room limit. Mid-game joiners are wired
    /// into the running floor immediately.
    pub fn add_player(&self, name: impl Into<String>) -> Result<PeerId, GameError> {
        let name = name.into();
        let peer_id = PeerId::new();
        {
            let mut state = self.state.lock().expect("room state poisoned");
            if state.players.len() >= self.settings.players_limit {
                return Err(GameError::RoomFull(self.room_id.clone()));
            }
            state
                .players
                .insert(peer_id.clone(), Player { name: name.clone() });
        }

        if let Some((arbiter, _)) = self.live_handles() {
            arbiter.add_peer(peer_id.clone());
        }

        self.log
            .append(&self.room_id, RoomEvent::player_joined(name));
        info!(room = %self.room_id, peer = %peer_id, "player joined");
        Ok(peer_id)
    }

    /// Remove a player. Returns the player's name, and whether the
    /// room is now empty; the caller decides what to do with an empty
    /// room.
    fn remove_player(&self, peer_id: &PeerId) -> (Option<String>, bool) {
        let (player, empty) = {
            let mut state = self.state.lock().expect("room state poisoned");
            let player = state.players.remove(peer_id);
            (player, state.players.is_empty())
        };

        if let Some((arbiter, _)) = self.live_handles() {
            arbiter.remove_peer(peer_id);
        }

        let name = player.map(|p| p.name);
        if let Some(name) = &name {
            self.log
                .append(&self.room_id, RoomEvent::player_left(name.clone()));
            info!(room = %self.room_id, peer = %peer_id, "player left");
        }
        (name, empty)
    }

    /// Pick the story the next game will narrate. Allowed any time
    /// before start; the selection is broadcast so every player's
    /// lobby agrees.
    pub fn select_story(
        &self,
        catalog: &StoryCatalog,
        story_id: u32,
        user_name: &str,
    ) -> Result<(), GameError> {
        let story = catalog.get(story_id)?.clone();
        let title = story.title.clone();
        {
            let mut state = self.state.lock().expect("room state poisoned");
            state.story = Some(story);
        }
        self.log.append(
            &self.room_id,
            RoomEvent::story_selected(story_id, title, user_name),
        );
        Ok(())
    }

    pub fn selected_story(&self) -> Option<Story> {
        self.state
            .lock()
            .expect("room state poisoned")
            .story
            .clone()
    }

    /// Start a game on the selected story: spin up the floor arbiter,
    /// open the agent session, arm the game timer, and announce
    /// `GameStarted`. Fails without side effects if no story is
    /// selected, nobody is in the room, or the session cannot open.
    pub async fn start_game(self: &Arc<Self>) -> Result<(), GameError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(GameError::GameAlreadyStarted(self.room_id.clone()));
        }

        let (story, peers) = {
            let state = self.state.lock().expect("room state poisoned");
            let story = state
                .story
                .clone()
                .ok_or_else(|| GameError::NoStorySelected(self.room_id.clone()))?;
            if state.players.is_empty() {
                return Err(GameError::NoPlayersConnected(self.room_id.clone()));
            }
            let peers: Vec<PeerId> = state.players.keys().cloned().collect();
            (story, peers)
        };

        let cancel = CancellationToken::new();
        let (agent_tx, agent_rx) = mpsc::unbounded_channel();
        let (room_tx, _) = broadcast::channel(256);
        let arbiter = FloorArbiter::new(
            self.room_id.clone(),
            Arc::clone(&self.log),
            agent_tx,
            room_tx.clone(),
            cancel.clone(),
        );
        for peer in peers {
            arbiter.add_peer(peer);
        }

        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
        let manager = AgentSessionManager::new(
            self.room_id.clone(),
            Arc::clone(&self.log),
            arbiter.clone(),
            Arc::clone(&self.api),
            agent_rx,
            self.settings.reconnect_backoff,
            ended_tx,
        );

        let session_config = AgentSessionConfig {
            instructions: instructions_for(&story),
            first_message: first_message_for(&story),
            end_game_tool: EndGameTool {
                name: END_GAME_TOOL.to_string(),
                description: tool_description_for(&story),
            },
            time_limit_secs: self.settings.time_limit.as_secs(),
            resumption_token: None,
        };

        if let Err(err) = manager.start(session_config).await {
            cancel.cancel();
            warn!(room = %self.room_id, error = %err, "game start rejected");
            return Err(err);
        }

        let timer = {
            let manager = manager.clone();
            let time_limit = self.settings.time_limit;
            let room_id = self.room_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(time_limit).await;
                info!(room = %room_id, "game time limit reached");
                manager.announce_time_expired().await;
            })
        };

        let end_watcher = {
            let room = Arc::clone(self);
            tokio::spawn(async move {
                if let Some(end) = ended_rx.recv().await {
                    // Drain pending agent audio only for a narrated
                    // ending; a lost connection has nothing to play.
                    let wait = end == SessionEnd::ToolCall;
                    debug!(room = %room.room_id, reason = ?end, "session ended, stopping game");
                    room.stop_game(wait).await;
                }
            })
        };

        *self
            .live
            .write()
            .expect("room live handles poisoned") = Some((arbiter, room_tx));
        *active = Some(ActiveGame {
            manager,
            cancel,
            timer,
            end_watcher,
        });
        drop(active);

        self.log.append(&self.room_id, RoomEvent::game_started());
        info!(room = %self.room_id, "game started");
        Ok(())
    }

    /// Stop the running game. Safe to call from any path and any
    /// number of times; only the call that actually takes the active
    /// game does the teardown and emits `GameEnded`.
    pub async fn stop_game(&self, wait: bool) {
        let Some(game) = self.active.lock().await.take() else {
            return;
        };
        info!(room = %self.room_id, wait, "stopping game");

        game.timer.abort();
        // Player input stops immediately; the wrap-up may still drain.
        game.manager.set_muted(true, MuteSource::System);
        game.manager.stop(wait).await;
        game.cancel.cancel();
        game.end_watcher.abort();

        self.live
            .write()
            .expect("room live handles poisoned")
            .take();
        {
            let mut state = self.state.lock().expect("room state poisoned");
            state.story = None;
        }

        self.log.append(&self.room_id, RoomEvent::game_ended());
        info!(room = %self.room_id, "game ended");
    }

    /// Toggle the player-facing mute. Requires a running game.
    pub async fn mute_agent(&self, muted: bool) -> Result<bool, GameError> {
        let active = self.active.lock().await;
        let game = active
            .as_ref()
            .ok_or_else(|| GameError::GameNotActive(self.room_id.clone()))?;
        Ok(game.manager.set_muted(muted, MuteSource::Manual))
    }

    pub async fn is_game_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Feed one voice-activity segment into the floor. Dropped when no
    /// game is running.
    pub fn on_voice_activity(&self, segment: VoiceActivitySegment) {
        if let Some((arbiter, _)) = self.live_handles() {
            arbiter.on_voice_activity(segment);
        }
    }

    /// Subscribe to the paced agent audio of the running game.
    pub fn subscribe_audio(&self) -> Result<broadcast::Receiver<RoomOutput>, GameError> {
        match self.live_handles() {
            Some((_, room_tx)) => Ok(room_tx.subscribe()),
            None => Err(GameError::GameNotActive(self.room_id.clone())),
        }
    }

    fn live_handles(&self) -> Option<(FloorArbiter, broadcast::Sender<RoomOutput>)> {
        self.live
            .read()
            .expect("room live handles poisoned")
            .clone()
    }
}

/// All rooms the server knows about.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomId, Arc<GameRoom>>>,
    log: Arc<EventLog>,
    catalog: StoryCatalog,
    api: Arc<dyn AgentApi>,
    settings: RoomSettings,
}

impl RoomRegistry {
    pub fn new(
        log: Arc<EventLog>,
        catalog: StoryCatalog,
        api: Arc<dyn AgentApi>,
        settings: RoomSettings,
    ) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            log,
            catalog,
            api,
            settings,
        }
    }

    pub fn catalog(&self) -> &StoryCatalog {
        &self.catalog
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn get(&self, room_id: &RoomId) -> Result<Arc<GameRoom>, GameError> {
        self.rooms
            .lock()
            .expect("registry poisoned")
            .get(room_id)
            .cloned()
            .ok_or_else(|| GameError::RoomNotFound(room_id.clone()))
    }

    fn get_or_create(&self, room_id: &RoomId) -> Arc<GameRoom> {
        let mut rooms = self.rooms.lock().expect("registry poisoned");
        rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                info!(room = %room_id, "room created");
                GameRoom::new(
                    room_id.clone(),
                    Arc::clone(&self.log),
                    Arc::clone(&self.api),
                    self.settings.clone(),
                )
            })
            .clone()
    }

    /// Join a room, creating it on first use.
    pub fn join(&self, room_id: &RoomId, name: impl Into<String>) -> Result<PeerId, GameError> {
        self.get_or_create(room_id).add_player(name)
    }

    /// Leave a room. When the last player leaves, any running game is
    /// stopped without draining and the room is removed entirely.
    pub async fn leave(&self, room_id: &RoomId, peer_id: &PeerId) -> Result<(), GameError> {
        let room = self.get(room_id)?;
        let (_, empty) = room.remove_player(peer_id);
        if empty {
            room.stop_game(false).await;
            self.rooms
                .lock()
                .expect("registry poisoned")
                .remove(room_id);
            self.log.remove_room(room_id);
            info!(room = %room_id, "room removed, no players left");
        }
        Ok(())
    }

    pub fn select_story(
        &self,
        room_id: &RoomId,
        story_id: u32,
        user_name: &str,
    ) -> Result<(), GameError> {
        self.get(room_id)?
            .select_story(&self.catalog, story_id, user_name)
    }

    pub async fn start_game(&self, room_id: &RoomId) -> Result<(), GameError> {
        self.get(room_id)?.start_game().await
    }

    pub async fn stop_game(&self, room_id: &RoomId) -> Result<(), GameError> {
        self.get(room_id)?.stop_game(false).await;
        Ok(())
    }

    pub async fn mute_agent(&self, room_id: &RoomId, muted: bool) -> Result<bool, GameError> {
        self.get(room_id)?.mute_agent(muted).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::NORMAL_CLOSE_CODE;
    use async_trait::async_trait;
    use reef_agent::{AgentConnection, AgentError, ClientCommand, ServerEvent};
    use reef_common::EventLogEntry;

    /// Backend double that accepts every session and stays open until
    /// told to close, optionally emitting a scripted prelude.
    #[derive(Clone, Default)]
    struct OpenAgentApi {
        prelude: Arc<Mutex<Vec<ServerEvent>>>,
        opens: Arc<Mutex<Vec<AgentSessionConfig>>>,
        refuse: Arc<std::sync::atomic::AtomicBool>,
    }

    impl OpenAgentApi {
        fn with_prelude(events: Vec<ServerEvent>) -> Self {
            Self {
                prelude: Arc::new(Mutex::new(events)),
                ..Self::default()
            }
        }

        fn refusing() -> Self {
            let api = Self::default();
            api.refuse.store(true, std::sync::atomic::Ordering::SeqCst);
            api
        }

        fn opens(&self) -> Vec<AgentSessionConfig> {
            self.opens.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentApi for OpenAgentApi {
        async fn open(&self, config: AgentSessionConfig) -> Result<AgentConnection, AgentError> {
            if self.refuse.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(AgentError::Connect("refused".to_string()));
            }
            self.opens.lock().unwrap().push(config);
            let prelude = std::mem::take(&mut *self.prelude.lock().unwrap());
            let (cmd_tx, mut cmd_rx) = mpsc::channel(64);
            let (evt_tx, evt_rx) = mpsc::channel(64);
            tokio::spawn(async move {
                for event in prelude {
                    if evt_tx.send(event).await.is_err() {
                        return;
                    }
                }
                while let Some(command) = cmd_rx.recv().await {
                    if matches!(command, ClientCommand::Close) {
                        let _ = evt_tx
                            .send(ServerEvent::Closed {
                                code: NORMAL_CLOSE_CODE,
                                reason: String::new(),
                            })
                            .await;
                        return;
                    }
                }
            });
            Ok(AgentConnection {
                commands: cmd_tx,
                events: evt_rx,
            })
        }
    }

    fn registry_with(api: Arc<dyn AgentApi>) -> RoomRegistry {
        let settings = RoomSettings {
            time_limit: Duration::from_secs(600),
            players_limit: 2,
            reconnect_backoff: Duration::from_secs(2),
        };
        RoomRegistry::new(
            Arc::new(EventLog::default()),
            StoryCatalog::built_in(),
            api,
            settings,
        )
    }

    fn event_types(log: &EventLog, room: &RoomId) -> Vec<&'static str> {
        log.history(room, None)
            .into_iter()
            .map(|EventLogEntry { event, .. }| match event {
                RoomEvent::PlayerJoined { .. } => "playerJoined",
                RoomEvent::PlayerLeft { .. } => "playerLeft",
                RoomEvent::GameStarted { .. } => "gameStarted",
                RoomEvent::GameEnded { .. } => "gameEnded",
                RoomEvent::StorySelected { .. } => "storySelected",
                RoomEvent::Transcription { .. } => "transcription",
                RoomEvent::AgentMuteChanged { .. } => "agentMuteChanged",
                RoomEvent::FloorChanged { .. } => "floorChanged",
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn join_enforces_player_limit() {
        let registry = registry_with(Arc::new(OpenAgentApi::default()));
        let room = RoomId::from("room-1");
        registry.join(&room, "alice").unwrap();
        registry.join(&room, "bob").unwrap();
        assert!(matches!(
            registry.join(&room, "carol"),
            Err(GameError::RoomFull(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn full_game_cycle_emits_events_in_order() {
        let api = OpenAgentApi::default();
        let registry = registry_with(Arc::new(api.clone()));
        let room = RoomId::from("room-1");

        registry.join(&room, "alice").unwrap();
        registry.select_story(&room, 1, "alice").unwrap();
        registry.start_game(&room).await.unwrap();
        registry.stop_game(&room).await.unwrap();

        assert_eq!(
            event_types(registry.event_log(), &room),
            vec![
                "playerJoined",
                "storySelected",
                "gameStarted",
                "agentMuteChanged",
                "gameEnded"
            ]
        );

        let opens = api.opens();
        assert_eq!(opens.len(), 1);
        let story = StoryCatalog::built_in().get(1).unwrap().clone();
        assert!(opens[0].instructions.contains(&story.back));
        assert!(opens[0].first_message.contains(&story.front));
        assert_eq!(opens[0].end_game_tool.name, END_GAME_TOOL);
    }

    #[tokio::test(start_paused = true)]
    async fn start_requires_story_and_players() {
        let registry = registry_with(Arc::new(OpenAgentApi::default()));
        let room = RoomId::from("room-1");

        assert!(matches!(
            registry.start_game(&room).await,
            Err(GameError::RoomNotFound(_))
        ));

        let peer = registry.join(&room, "alice").unwrap();
        assert!(matches!(
            registry.start_game(&room).await,
            Err(GameError::NoStorySelected(_))
        ));

        registry.select_story(&room, 1, "alice").unwrap();
        registry.leave(&room, &peer).await.unwrap();
        // Room was removed with its last player.
        assert!(matches!(
            registry.start_game(&room).await,
            Err(GameError::RoomNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_is_rejected() {
        let registry = registry_with(Arc::new(OpenAgentApi::default()));
        let room = RoomId::from("room-1");
        registry.join(&room, "alice").unwrap();
        registry.select_story(&room, 1, "alice").unwrap();
        registry.start_game(&room).await.unwrap();
        assert!(matches!(
            registry.start_game(&room).await,
            Err(GameError::GameAlreadyStarted(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_session_open_leaves_room_startable() {
        let api = OpenAgentApi::refusing();
        let registry = registry_with(Arc::new(api.clone()));
        let room = RoomId::from("room-1");
        registry.join(&room, "alice").unwrap();
        registry.select_story(&room, 1, "alice").unwrap();

        assert!(matches!(
            registry.start_game(&room).await,
            Err(GameError::Agent(_))
        ));
        assert!(!registry.get(&room).unwrap().is_game_active().await);
        let types = event_types(registry.event_log(), &room);
        assert!(!types.contains(&"gameStarted"));

        api.refuse.store(false, std::sync::atomic::Ordering::SeqCst);
        registry.start_game(&room).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_stop_emits_one_game_ended() {
        let registry = registry_with(Arc::new(OpenAgentApi::default()));
        let room = RoomId::from("room-1");
        registry.join(&room, "alice").unwrap();
        registry.select_story(&room, 1, "alice").unwrap();
        registry.start_game(&room).await.unwrap();

        registry.stop_game(&room).await.unwrap();
        registry.stop_game(&room).await.unwrap();
        registry.stop_game(&room).await.unwrap();

        let endings = event_types(registry.event_log(), &room)
            .into_iter()
            .filter(|t| *t == "gameEnded")
            .count();
        assert_eq!(endings, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn last_player_leaving_stops_game_and_removes_room() {
        let registry = registry_with(Arc::new(OpenAgentApi::default()));
        let room = RoomId::from("room-1");
        let peer = registry.join(&room, "alice").unwrap();
        registry.select_story(&room, 1, "alice").unwrap();
        registry.start_game(&room).await.unwrap();

        registry.leave(&room, &peer).await.unwrap();

        assert!(matches!(
            registry.get(&room),
            Err(GameError::RoomNotFound(_))
        ));
        assert!(registry.event_log().history(&room, None).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn agent_end_tool_stops_the_game() {
        let api = OpenAgentApi::with_prelude(vec![ServerEvent::ToolCall {
            id: "call-1".to_string(),
            name: END_GAME_TOOL.to_string(),
        }]);
        let registry = registry_with(Arc::new(api));
        let room = RoomId::from("room-1");
        registry.join(&room, "alice").unwrap();
        registry.select_story(&room, 1, "alice").unwrap();
        registry.start_game(&room).await.unwrap();

        // Give the end watcher time to observe the tool call and run
        // the teardown.
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!registry.get(&room).unwrap().is_game_active().await);
        let types = event_types(registry.event_log(), &room);
        assert!(types.contains(&"gameEnded"));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_session_without_token_ends_the_game() {
        let api = OpenAgentApi::with_prelude(vec![ServerEvent::Closed {
            code: 1006,
            reason: "gone".to_string(),
        }]);
        let registry = registry_with(Arc::new(api));
        let room = RoomId::from("room-1");
        registry.join(&room, "alice").unwrap();
        registry.select_story(&room, 1, "alice").unwrap();
        registry.start_game(&room).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!registry.get(&room).unwrap().is_game_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn time_limit_triggers_wrap_up_announcement() {
        let api = OpenAgentApi::default();
        let registry = registry_with(Arc::new(api));
        let room = RoomId::from("room-1");
        registry.join(&room, "alice").unwrap();
        registry.select_story(&room, 1, "alice").unwrap();
        registry.start_game(&room).await.unwrap();

        tokio::time::sleep(Duration::from_secs(601)).await;

        // The game is still running; the agent was merely asked to
        // wrap up. Ending comes from its tool call.
        assert!(registry.get(&room).unwrap().is_game_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn mute_requires_active_game() {
        let registry = registry_with(Arc::new(OpenAgentApi::default()));
        let room = RoomId::from("room-1");
        registry.join(&room, "alice").unwrap();
        assert!(matches!(
            registry.mute_agent(&room, true).await,
            Err(GameError::GameNotActive(_))
        ));

        registry.select_story(&room, 1, "alice").unwrap();
        registry.start_game(&room).await.unwrap();
        assert!(registry.mute_agent(&room, true).await.unwrap());
        assert!(!registry.mute_agent(&room, false).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn audio_subscription_requires_active_game() {
        let registry = registry_with(Arc::new(OpenAgentApi::default()));
        let room = RoomId::from("room-1");
        registry.join(&room, "alice").unwrap();
        let game_room = registry.get(&room).unwrap();
        assert!(game_room.subscribe_audio().is_err());

        registry.select_story(&room, 1, "alice").unwrap();
        registry.start_game(&room).await.unwrap();
        assert!(game_room.subscribe_audio().is_ok());

        game_room.stop_game(false).await;
        assert!(game_room.subscribe_audio().is_err());
    }
}
