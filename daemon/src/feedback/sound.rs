//! Feedback sound playback on a dedicated audio thread
//!
//! `rodio::OutputStream` is not `Send`, so the stream and its sink live on
//! their own thread and paths are handed over through a channel.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread;

use rodio::{Decoder, OutputStream, Sink};
use tracing::{debug, info, warn};

use super::Feedback;

pub struct SoundPlayer {
    tx: Sender<PathBuf>,
}

impl SoundPlayer {
    /// Spawn the playback thread
    pub fn spawn() -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel::<PathBuf>();

        thread::Builder::new()
            .name("sound-player".to_string())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(output) => output,
                    Err(e) => {
                        warn!(?e, "no audio output, feedback sounds disabled");
                        return;
                    }
                };
                let sink = match Sink::try_new(&handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        warn!(?e, "failed to create audio sink");
                        return;
                    }
                };
                info!("sound player started");

                while let Ok(path) = rx.recv() {
                    // A new sound cuts off whatever is still playing
                    sink.stop();
                    match open(&path) {
                        Ok(source) => {
                            sink.append(source);
                            sink.play();
                        }
                        Err(e) => warn!(?path, %e, "failed to load sound"),
                    }
                }
                debug!("sound player stopped");
            })?;

        Ok(Self { tx })
    }
}

fn open(path: &Path) -> anyhow::Result<Decoder<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(Decoder::new(BufReader::new(file))?)
}

impl Feedback for SoundPlayer {
    fn play(&self, sound: &Path) {
        if self.tx.send(sound.to_path_buf()).is_err() {
            debug!("sound player gone, skipping sound");
        }
    }
}
