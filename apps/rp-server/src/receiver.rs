//! A minimal [`Receiver`] implementation: appends elementary-stream packets
//! to flat files on disk. Stands in for the real downstream consumer (a
//! WebRTC bridge, explicitly out of scope for this crate) so the driver has
//! something to hand decoded frames to.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rp_core::{AudioCodec, Receiver, VideoCodec};

pub struct FileDumpReceiver {
    dir: PathBuf,
    video: Mutex<Option<File>>,
    audio: Mutex<Option<File>>,
}

impl FileDumpReceiver {
    pub fn new(dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            video: Mutex::new(None),
            audio: Mutex::new(None),
        })
    }

    fn open(path: &Path) -> std::io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }
}

impl Receiver for FileDumpReceiver {
    fn on_video_packet(&self, access_unit: &[u8]) {
        let mut slot = self.video.lock();
        let file = match slot.as_mut() {
            Some(f) => f,
            None => match Self::open(&self.dir.join("video.es")) {
                Ok(f) => slot.insert(f),
                Err(e) => {
                    log::warn!("failed to open video dump file: {e}");
                    return;
                }
            },
        };
        if let Err(e) = file.write_all(access_unit) {
            log::warn!("failed to write video packet: {e}");
        }
    }

    fn on_audio_packet(&self, access_unit: &[u8]) {
        let mut slot = self.audio.lock();
        let file = match slot.as_mut() {
            Some(f) => f,
            None => match Self::open(&self.dir.join("audio.opus")) {
                Ok(f) => slot.insert(f),
                Err(e) => {
                    log::warn!("failed to open audio dump file: {e}");
                    return;
                }
            },
        };
        if let Err(e) = file.write_all(access_unit) {
            log::warn!("failed to write audio packet: {e}");
        }
    }

    fn on_stream_info(&self, info: &str) {
        log::info!("stream info: {info}");
    }

    fn set_video_codec(&self, codec: VideoCodec) {
        log::info!("video codec negotiated: {codec:?}");
    }

    fn set_audio_codec(&self, codec: AudioCodec) {
        log::info!("audio codec negotiated: {codec:?}");
    }

    fn enter_wait_for_idr(&self) {
        log::warn!("stream entered wait-for-idr; discarding frames until next keyframe");
    }
}
