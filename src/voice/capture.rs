//! Per-speaker voice capture.
//!
//! Listens for speaking events from a [`VoiceSource`], keeps a rolling
//! pre-roll buffer of decoded audio per consented participant, and turns
//! each burst of speech into a finalized WAV segment registered with the
//! session manager. Speech that ends after a run of silence closes the
//! capture subscription, which finalizes the file.

use crate::config::AudioConfig;
use crate::defaults::pcm_duration_ms;
use crate::error::{Result, ScribeError};
use crate::session::manager::SessionManager;
use crate::session::types::{now_ms, Segment, Session};
use crate::storage::StorageManager;
use crate::voice::pre_roll::PreRollBuffer;
use crate::voice::wav::WavWriter;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Speaking notifications from the voice platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    SpeakingStart { user_id: String },
}

/// A stream of audio packets for one user.
///
/// Packets arrive in capture order; the stream ends when the source closes
/// the subscription (silence timeout or disconnect). A stream-level error is
/// delivered in-band and ends the capture with a failure.
pub struct AudioSubscription {
    rx: mpsc::Receiver<Result<Vec<u8>>>,
}

impl AudioSubscription {
    /// Builds a subscription backed by a bounded channel, returning the
    /// sending half for the producer.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<Vec<u8>>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }

    /// Next packet, or `None` once the stream has ended.
    pub async fn next_packet(&mut self) -> Option<Result<Vec<u8>>> {
        self.rx.recv().await
    }
}

/// Decodes one wire packet into 16-bit little-endian PCM bytes.
pub trait PacketDecoder: Send {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<u8>>;
}

/// Decoder for sources that already deliver raw PCM.
pub struct PcmPassthrough;

impl PacketDecoder for PcmPassthrough {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        Ok(packet.to_vec())
    }
}

/// Voice platform seam: speaking events plus per-user audio subscriptions.
pub trait VoiceSource: Send + Sync {
    /// Takes the speaking event stream. Yields `None` after the first call.
    fn take_events(&self) -> Option<mpsc::Receiver<VoiceEvent>>;

    /// Open-ended packet stream for one user, used to feed the pre-roll
    /// buffer while the user is not actively being captured.
    fn subscribe_continuous(&self, user_id: &str) -> AudioSubscription;

    /// Packet stream that the source closes once the user has been silent
    /// for `silence`.
    fn subscribe_until_silence(&self, user_id: &str, silence: Duration) -> AudioSubscription;

    /// Fresh decoder for one subscription's packets.
    fn new_decoder(&self) -> Box<dyn PacketDecoder>;
}

type RingMap = Arc<Mutex<HashMap<String, Arc<Mutex<PreRollBuffer>>>>>;
type TaskList = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Drives capture for one recording session.
pub struct VoiceCaptureEngine {
    ctx: CaptureContext,
    feed_tasks: TaskList,
}

#[derive(Clone)]
struct CaptureContext {
    manager: Arc<SessionManager>,
    storage: StorageManager,
    source: Arc<dyn VoiceSource>,
    audio: AudioConfig,
    session_id: String,
    started_at: i64,
    rings: RingMap,
    active: Arc<Mutex<HashSet<String>>>,
    capture_tasks: TaskList,
}

impl VoiceCaptureEngine {
    pub fn new(
        manager: Arc<SessionManager>,
        storage: StorageManager,
        source: Arc<dyn VoiceSource>,
        audio: AudioConfig,
        session: &Session,
    ) -> Self {
        Self {
            ctx: CaptureContext {
                manager,
                storage,
                source,
                audio,
                session_id: session.session_id.clone(),
                started_at: session.started_at,
                rings: Arc::new(Mutex::new(HashMap::new())),
                active: Arc::new(Mutex::new(HashSet::new())),
                capture_tasks: Arc::new(Mutex::new(Vec::new())),
            },
            feed_tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Starts the pre-roll feeds and the speaking event loop.
    ///
    /// Only participants who have consented at start time get a pre-roll
    /// feed; consent is re-checked per speaking event, so a participant
    /// added mid-session is still captured (without pre-roll history).
    pub async fn start(&self, session: &Session) -> Result<()> {
        self.ctx
            .storage
            .create_session_dirs(&session.session_id)
            .await?;

        let mut events = self.ctx.source.take_events().ok_or(ScribeError::Capture {
            message: "voice source event stream already taken".to_string(),
        })?;

        for participant in session.participants.values().filter(|p| p.consented) {
            self.spawn_ring_feed(participant.user_id.clone());
        }

        let ctx = self.ctx.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    VoiceEvent::SpeakingStart { user_id } => ctx.on_speaking_start(user_id),
                }
            }
        });
        lock(&self.feed_tasks).push(handle);

        info!(session_id = %self.ctx.session_id, "voice capture started");
        Ok(())
    }

    /// Registers a pre-roll feed for a participant who consented after the
    /// engine started.
    pub fn add_participant_feed(&self, user_id: &str) {
        self.spawn_ring_feed(user_id.to_string());
    }

    /// Captures currently writing WAV data.
    pub fn active_captures(&self) -> usize {
        lock(&self.ctx.active).len()
    }

    /// Tears down every subscription task and clears ring/active state.
    ///
    /// In-flight captures are abandoned, not flushed; segments already
    /// registered and files already written stay as they are.
    pub fn stop(&self) {
        let feeds: Vec<_> = lock(&self.feed_tasks).drain(..).collect();
        let captures: Vec<_> = lock(&self.ctx.capture_tasks).drain(..).collect();
        for handle in feeds.into_iter().chain(captures) {
            handle.abort();
        }

        lock(&self.ctx.rings).clear();
        lock(&self.ctx.active).clear();
        info!(session_id = %self.ctx.session_id, "voice capture stopped");
    }

    fn spawn_ring_feed(&self, user_id: String) {
        let ring = Arc::new(Mutex::new(PreRollBuffer::new(
            self.ctx.audio.pre_roll_ms,
            self.ctx.audio.sample_rate,
        )));
        lock(&self.ctx.rings).insert(user_id.clone(), ring.clone());

        let mut subscription = self.ctx.source.subscribe_continuous(&user_id);
        let mut decoder = self.ctx.source.new_decoder();
        let sample_rate = self.ctx.audio.sample_rate;

        let handle = tokio::spawn(async move {
            while let Some(packet) = subscription.next_packet().await {
                let packet = match packet {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!(user_id = %user_id, "continuous stream error: {e}");
                        break;
                    }
                };
                match decoder.decode(&packet) {
                    Ok(pcm) => {
                        let duration = pcm_duration_ms(pcm.len(), sample_rate);
                        lock(&ring).add(pcm, duration);
                    }
                    Err(e) => warn!(user_id = %user_id, "dropping undecodable packet: {e}"),
                }
            }
        });
        lock(&self.feed_tasks).push(handle);
    }
}

impl CaptureContext {
    fn on_speaking_start(&self, user_id: String) {
        let Some(participant) = self.manager.participant(&self.session_id, &user_id) else {
            debug!(user_id = %user_id, "speaker is not a session participant, ignoring");
            return;
        };
        if !participant.consented {
            debug!(user_id = %user_id, "speaker has not consented, ignoring");
            return;
        }
        if !lock(&self.active).insert(user_id.clone()) {
            // A capture for this user is already running.
            return;
        }

        let (pre_roll, ring_ms) = lock(&self.rings)
            .get(&user_id)
            .map(|ring| {
                let ring = lock(ring);
                (ring.get_buffer(), ring.duration_ms())
            })
            .unwrap_or_default();

        let elapsed = now_ms() - self.started_at;
        let start_ms = (elapsed - ring_ms.round() as i64).max(0);

        let segment_id = Uuid::new_v4().to_string();
        let file_name = format!(
            "{segment_id}_{user_id}_{}.wav",
            sanitize_name(&participant.display_name)
        );
        let path = self.storage.segment_dir(&self.session_id).join(file_name);

        let subscription = self
            .source
            .subscribe_until_silence(&user_id, Duration::from_millis(u64::from(
                self.audio.silence_duration_ms,
            )));
        let mut decoder = self.source.new_decoder();

        let ctx = self.clone();
        let handle = tokio::spawn(async move {
            let writer = WavWriter::new(ctx.audio.sample_rate, ctx.audio.channels);
            let pre_roll = (!pre_roll.is_empty()).then_some(pre_roll);

            match writer
                .process_and_save(subscription, decoder.as_mut(), &path, pre_roll)
                .await
            {
                Ok(()) => {
                    let end_ms = now_ms() - ctx.started_at;
                    let segment = Segment {
                        segment_id: segment_id.clone(),
                        session_id: ctx.session_id.clone(),
                        user_id: user_id.clone(),
                        start_ms,
                        end_ms,
                        audio_path: path,
                        transcript: None,
                    };
                    if let Err(e) = ctx.manager.add_segment(&ctx.session_id, segment) {
                        error!(
                            session_id = %ctx.session_id,
                            segment_id = %segment_id,
                            "failed to register segment: {e}"
                        );
                    } else {
                        info!(
                            session_id = %ctx.session_id,
                            segment_id = %segment_id,
                            user_id = %user_id,
                            start_ms,
                            end_ms,
                            "segment captured"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        session_id = %ctx.session_id,
                        user_id = %user_id,
                        "capture failed, discarding partial file: {e}"
                    );
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }

            lock(&ctx.active).remove(&user_id);
        });
        lock(&self.capture_tasks).push(handle);
    }
}

/// Replaces every non-ASCII-alphanumeric character with `_`.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Scripted voice source for tests.
pub struct MockVoiceSource {
    events_tx: mpsc::Sender<VoiceEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<VoiceEvent>>>,
    continuous: Mutex<HashMap<String, std::collections::VecDeque<AudioSubscription>>>,
    captures: Mutex<HashMap<String, std::collections::VecDeque<AudioSubscription>>>,
}

impl MockVoiceSource {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            continuous: Mutex::new(HashMap::new()),
            captures: Mutex::new(HashMap::new()),
        }
    }

    /// Queues a continuous subscription handed out on the next
    /// `subscribe_continuous` call for this user.
    pub fn push_continuous(&self, user_id: &str, subscription: AudioSubscription) {
        lock(&self.continuous)
            .entry(user_id.to_string())
            .or_default()
            .push_back(subscription);
    }

    /// Queues a capture subscription handed out on the next
    /// `subscribe_until_silence` call for this user.
    pub fn push_capture(&self, user_id: &str, subscription: AudioSubscription) {
        lock(&self.captures)
            .entry(user_id.to_string())
            .or_default()
            .push_back(subscription);
    }

    /// Emits a speaking-start event.
    pub fn speaking_start(&self, user_id: &str) {
        let _ = self.events_tx.try_send(VoiceEvent::SpeakingStart {
            user_id: user_id.to_string(),
        });
    }

    fn pop_or_empty(
        map: &Mutex<HashMap<String, std::collections::VecDeque<AudioSubscription>>>,
        user_id: &str,
    ) -> AudioSubscription {
        if let Some(subscription) = lock(map).get_mut(user_id).and_then(|q| q.pop_front()) {
            return subscription;
        }
        // Unscripted subscriptions yield an immediately-closed stream.
        let (_tx, subscription) = AudioSubscription::channel(1);
        subscription
    }
}

impl Default for MockVoiceSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceSource for MockVoiceSource {
    fn take_events(&self) -> Option<mpsc::Receiver<VoiceEvent>> {
        lock(&self.events_rx).take()
    }

    fn subscribe_continuous(&self, user_id: &str) -> AudioSubscription {
        Self::pop_or_empty(&self.continuous, user_id)
    }

    fn subscribe_until_silence(&self, user_id: &str, _silence: Duration) -> AudioSubscription {
        Self::pop_or_empty(&self.captures, user_id)
    }

    fn new_decoder(&self) -> Box<dyn PacketDecoder> {
        Box::new(PcmPassthrough)
    }
}
