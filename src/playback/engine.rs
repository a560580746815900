use std::{
    fs::File,
    io::BufReader,
    sync::mpsc::{self, Receiver, Sender},
    thread::{self, JoinHandle},
};

use async_trait::async_trait;
use log::{error, warn};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tokio::sync::{oneshot, watch};

use crate::{
    error::PlaybackError,
    models::{Track, TrackSource, MAX_VOLUME},
};

use super::{
    ambient::{ambient_source, AmbientSource},
    PlaybackResource, PlayerFactory,
};

type Reply = oneshot::Sender<Result<(), PlaybackError>>;

enum EngineCommand {
    Load(Track, Reply),
    Play(Reply),
    Pause(Reply),
    SetVolume(u8, Reply),
}

/// rodio output on a dedicated thread, since the output stream must stay on
/// the thread that opened it. Commands are acknowledged once applied.
pub struct AudioEngine {
    tx: Option<Sender<EngineCommand>>,
    ready: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEngine {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            tx: None,
            ready,
            thread: None,
        }
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> EngineCommand,
    ) -> Result<(), PlaybackError> {
        let tx = self.tx.as_ref().ok_or(PlaybackError::NotReady)?;
        let (reply, response) = oneshot::channel();
        tx.send(command(reply)).map_err(|_| engine_gone())?;
        response.await.map_err(|_| engine_gone())?
    }
}

fn engine_gone() -> PlaybackError {
    PlaybackError::Engine("audio thread stopped".into())
}

#[async_trait]
impl PlaybackResource for AudioEngine {
    async fn initialize(&mut self) -> Result<(), PlaybackError> {
        if self.tx.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        let (opened_tx, opened) = oneshot::channel();
        let thread = thread::Builder::new()
            .name("audio-engine".to_string())
            .spawn(move || run_engine(rx, opened_tx))
            .map_err(|err| PlaybackError::Engine(format!("cannot start audio thread: {err}")))?;

        self.thread = Some(thread);
        opened.await.map_err(|_| engine_gone())??;
        self.tx = Some(tx);
        self.ready.send_replace(true);
        Ok(())
    }

    fn readiness(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    async fn load(&mut self, track: &Track) -> Result<(), PlaybackError> {
        let track = track.clone();
        self.request(|reply| EngineCommand::Load(track, reply)).await
    }

    async fn play(&mut self) -> Result<(), PlaybackError> {
        self.request(EngineCommand::Play).await
    }

    async fn pause(&mut self) -> Result<(), PlaybackError> {
        self.request(EngineCommand::Pause).await
    }

    async fn set_volume(&mut self, volume: u8) -> Result<(), PlaybackError> {
        self.request(|reply| EngineCommand::SetVolume(volume, reply))
            .await
    }

    async fn teardown(&mut self) {
        self.ready.send_replace(false);
        // Closing the channel ends the thread, which drops the stream.
        self.tx = None;
        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => error!("audio thread panicked"),
                Err(err) => error!("failed to join audio thread: {err}"),
            }
        }
    }
}

fn run_engine(rx: Receiver<EngineCommand>, opened: oneshot::Sender<Result<(), PlaybackError>>) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(output) => output,
        Err(err) => {
            let _ = opened.send(Err(PlaybackError::Engine(format!(
                "failed to open audio output: {err}"
            ))));
            return;
        }
    };
    let _ = opened.send(Ok(()));

    let mut sink: Option<Sink> = None;
    let mut volume = 1.0_f32;

    while let Ok(command) = rx.recv() {
        match command {
            EngineCommand::Load(track, reply) => {
                let result = new_sink(&handle, &track, volume).map(|loaded| {
                    if let Some(previous) = sink.replace(loaded) {
                        previous.stop();
                    }
                });
                let _ = reply.send(result);
            }
            EngineCommand::Play(reply) => {
                let _ = reply.send(with_sink(&sink, Sink::play));
            }
            EngineCommand::Pause(reply) => {
                let _ = reply.send(with_sink(&sink, Sink::pause));
            }
            EngineCommand::SetVolume(level, reply) => {
                volume = f32::from(level.min(MAX_VOLUME)) / f32::from(MAX_VOLUME);
                if let Some(sink) = sink.as_ref() {
                    sink.set_volume(volume);
                }
                let _ = reply.send(Ok(()));
            }
        }
    }

    if let Some(sink) = sink.take() {
        sink.stop();
    }
}

/// Fresh paused sink holding `track`, looping forever.
fn new_sink(handle: &OutputStreamHandle, track: &Track, volume: f32) -> Result<Sink, PlaybackError> {
    let source = open_source(track)?;
    let sink = Sink::try_new(handle).map_err(|err| PlaybackError::Engine(err.to_string()))?;
    sink.pause();
    sink.set_volume(volume);
    sink.append(source);
    Ok(sink)
}

fn open_source(track: &Track) -> Result<AmbientSource, PlaybackError> {
    let load_error = |reason: String| PlaybackError::Load {
        track: track.id.clone(),
        reason,
    };

    match &track.source {
        TrackSource::Ambient(kind) => Ok(ambient_source(*kind)),
        TrackSource::File(path) => {
            let file = File::open(path).map_err(|err| load_error(format!("{path}: {err}")))?;
            let decoder =
                Decoder::new(BufReader::new(file)).map_err(|err| load_error(err.to_string()))?;
            Ok(Box::new(decoder.repeat_infinite().convert_samples::<f32>()))
        }
        TrackSource::Url(url) => {
            warn!("streaming track {url} requested; only local files are supported");
            Err(load_error("streaming URLs are not supported".into()))
        }
    }
}

fn with_sink(sink: &Option<Sink>, apply: fn(&Sink)) -> Result<(), PlaybackError> {
    match sink {
        Some(sink) => {
            apply(sink);
            Ok(())
        }
        None => Err(PlaybackError::Engine("no track loaded".into())),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AudioEngineFactory;

impl PlayerFactory for AudioEngineFactory {
    fn create(&self) -> Box<dyn PlaybackResource> {
        Box::new(AudioEngine::new())
    }
}
